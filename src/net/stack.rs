//! Network stack core
//!
//! [`NetStack`] owns the IPv4 layer (device, neighbor cache, addressing)
//! and the protocol handler table. Frames and timer ticks enter through
//! [`NetStack::process`] and are handled to completion before it returns.

use alloc::boxed::Box;

use crate::config::NetConfig;

use super::arp::ArpPacket;
use super::buffer::NetBuf;
use super::drivers::{NetDevice, NetError};
use super::ethernet::{self, EtherType, MacAddress};
use super::ipv4::{Ipv4Address, Ipv4Layer, Ipv4Stats};
use super::protocol::{ProtocolHandler, ProtocolTable};

#[cfg(feature = "net_icmp")]
use super::icmp::{IcmpLayer, PROTO_ICMP};
#[cfg(feature = "net_tcp")]
use super::tcp::{ControlBlock, SharedEvents, SocketHandle, TcpLayer, TcpState, TcpStats, PROTO_TCP};
#[cfg(feature = "net_udp")]
use super::udp::{UdpHandle, UdpLayer, UdpStats, PROTO_UDP};

/// Work item for the stack.
#[derive(Debug, Clone, Copy)]
pub enum NetEvent<'a> {
    /// A received link-layer frame
    Frame(&'a [u8]),
    /// Timer tick
    Tick { elapsed_ms: u64 },
}

pub struct NetStack {
    ip: Ipv4Layer,
    protocols: ProtocolTable,
}

impl Default for NetStack {
    fn default() -> Self {
        Self::new(NetConfig::default())
    }
}

impl NetStack {
    /// Stack with the compiled-in transports registered and no device.
    pub fn new(config: NetConfig) -> Self {
        #[allow(unused_mut)]
        let mut protocols = ProtocolTable::new();

        #[cfg(feature = "net_icmp")]
        register_builtin(&mut protocols, PROTO_ICMP, Box::new(IcmpLayer::new()));
        #[cfg(feature = "net_tcp")]
        register_builtin(&mut protocols, PROTO_TCP, Box::new(TcpLayer::new()));
        #[cfg(feature = "net_udp")]
        register_builtin(&mut protocols, PROTO_UDP, Box::new(UdpLayer::new()));

        Self {
            ip: Ipv4Layer::new(config),
            protocols,
        }
    }

    pub fn with_device(config: NetConfig, device: Box<dyn NetDevice>) -> Self {
        let mut stack = Self::new(config);
        stack.attach_device(device);
        stack
    }

    /// Attach the link device, returning the one it replaces.
    pub fn attach_device(&mut self, device: Box<dyn NetDevice>) -> Option<Box<dyn NetDevice>> {
        self.ip.attach_device(device)
    }

    pub fn detach_device(&mut self) -> Option<Box<dyn NetDevice>> {
        self.ip.detach_device()
    }

    pub fn ip(&self) -> &Ipv4Layer {
        &self.ip
    }

    pub fn ip_mut(&mut self) -> &mut Ipv4Layer {
        &mut self.ip
    }

    pub fn config(&self) -> &NetConfig {
        self.ip.config()
    }

    pub fn set_config(&mut self, config: NetConfig) {
        self.ip.set_config(config);
    }

    pub fn ip_stats(&self) -> &Ipv4Stats {
        self.ip.stats()
    }

    pub fn register_protocol(
        &mut self,
        number: u8,
        handler: Box<dyn ProtocolHandler>,
    ) -> Result<(), NetError> {
        self.protocols.register(number, handler)
    }

    pub fn unregister_protocol(&mut self, number: u8) -> Option<Box<dyn ProtocolHandler>> {
        self.protocols.unregister(number)
    }

    /// Registered handler for `number`, if it is a `T`.
    pub fn protocol<T: ProtocolHandler>(&self, number: u8) -> Option<&T> {
        self.protocols.downcast_ref::<T>(number)
    }

    pub fn protocol_mut<T: ProtocolHandler>(&mut self, number: u8) -> Option<&mut T> {
        self.protocols.downcast_mut::<T>(number)
    }

    pub fn process(&mut self, event: NetEvent<'_>) -> Result<(), NetError> {
        match event {
            NetEvent::Frame(frame) => self.handle_frame(frame),
            NetEvent::Tick { elapsed_ms } => {
                self.tick(elapsed_ms);
                Ok(())
            }
        }
    }

    /// Dispatch one received Ethernet frame by EtherType.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<(), NetError> {
        let mut buf = NetBuf::from_slice(0, frame);
        let header = ethernet::pop_header(&mut buf)?;

        let dst = header.dst_mac;
        if dst != self.ip.mac_address() && !dst.is_broadcast() && !dst.is_multicast() {
            return Err(NetError::NotForUs);
        }

        #[cfg(feature = "debug_net")]
        ktrace!(
            "net: rx {} -> {} type={:?} len={}",
            header.src_mac,
            header.dst_mac,
            header.ether_type,
            frame.len()
        );

        match header.ether_type {
            EtherType::ARP => {
                let packet = ArpPacket::parse(buf.data())?;
                self.ip.handle_arp(&packet)
            }
            EtherType::IPv4 => self.ip_rx_from(buf, Some(header.src_mac)),
            other => {
                ktrace!("net: ignoring frame with ethertype {:?}", other);
                Ok(())
            }
        }
    }

    /// Validate an IPv4 packet and hand its payload to the protocol handler.
    pub fn ip_rx(&mut self, buf: NetBuf) -> Result<(), NetError> {
        self.ip_rx_from(buf, None)
    }

    fn ip_rx_from(&mut self, mut buf: NetBuf, src_mac: Option<MacAddress>) -> Result<(), NetError> {
        let (header, delivery) = self.ip.validate(&mut buf)?;

        if let Some(mac) = src_mac {
            if !delivery.is_broadcast() {
                self.ip.learn(header.src_addr, mac);
            }
        }

        let Some(handler) = self.protocols.get_mut(header.protocol) else {
            self.ip.note_no_protocol();
            kdebug!(
                "ip: no handler for protocol {} from {}",
                header.protocol,
                header.src_addr
            );
            return Err(NetError::ProtocolUnsupported);
        };

        self.ip.note_delivered();
        handler.receive(&mut self.ip, header.src_addr, header.dst_addr, buf)
    }

    /// Send a transport payload as an IPv4 packet.
    pub fn ip_tx(
        &mut self,
        buf: NetBuf,
        dst: Ipv4Address,
        protocol: u8,
        ttl: u8,
    ) -> Result<(), NetError> {
        self.ip.send(buf, dst, protocol, ttl)
    }

    /// Advance every protocol timer by `elapsed_ms`.
    pub fn tick(&mut self, elapsed_ms: u64) {
        self.ip.advance_clock(elapsed_ms);
        for (_, handler) in self.protocols.iter_mut() {
            handler.on_tick(&mut self.ip, elapsed_ms);
        }
    }

    /// TCP socket API, or `ProtocolUnsupported` when TCP is not registered.
    #[cfg(feature = "net_tcp")]
    pub fn tcp(&mut self) -> Result<TcpSockets<'_>, NetError> {
        let tcp = self
            .protocols
            .downcast_mut::<TcpLayer>(PROTO_TCP)
            .ok_or(NetError::ProtocolUnsupported)?;
        Ok(TcpSockets { ip: &mut self.ip, tcp })
    }

    #[cfg(feature = "net_tcp")]
    pub fn tcp_layer(&self) -> Option<&TcpLayer> {
        self.protocols.downcast_ref::<TcpLayer>(PROTO_TCP)
    }

    /// UDP socket API, or `ProtocolUnsupported` when UDP is not registered.
    #[cfg(feature = "net_udp")]
    pub fn udp(&mut self) -> Result<UdpSockets<'_>, NetError> {
        let udp = self
            .protocols
            .downcast_mut::<UdpLayer>(PROTO_UDP)
            .ok_or(NetError::ProtocolUnsupported)?;
        Ok(UdpSockets { ip: &mut self.ip, udp })
    }

    #[cfg(feature = "net_icmp")]
    pub fn icmp_layer(&self) -> Option<&IcmpLayer> {
        self.protocols.downcast_ref::<IcmpLayer>(PROTO_ICMP)
    }
}

#[cfg(any(feature = "net_icmp", feature = "net_udp", feature = "net_tcp"))]
fn register_builtin(table: &mut ProtocolTable, number: u8, handler: Box<dyn ProtocolHandler>) {
    let name = handler.name();
    if let Err(err) = table.register(number, handler) {
        kerror!("net: failed to register {} (protocol {}): {}", name, number, err);
    }
}

/// Borrowed view of the TCP layer together with the IP layer it sends through.
#[cfg(feature = "net_tcp")]
pub struct TcpSockets<'a> {
    ip: &'a mut Ipv4Layer,
    tcp: &'a mut TcpLayer,
}

#[cfg(feature = "net_tcp")]
impl TcpSockets<'_> {
    pub fn socket(
        &mut self,
        local_addr: Ipv4Address,
        local_port: u16,
        events: SharedEvents,
    ) -> Result<SocketHandle, NetError> {
        self.tcp.socket(local_addr, local_port, events)
    }

    pub fn bind(&mut self, handle: SocketHandle, addr: Ipv4Address, port: u16) -> Result<(), NetError> {
        self.tcp.bind(handle, addr, port)
    }

    pub fn listen(&mut self, handle: SocketHandle, backlog: usize) -> Result<(), NetError> {
        self.tcp.listen(handle, backlog)
    }

    pub fn accept(&mut self, handle: SocketHandle) -> Result<SocketHandle, NetError> {
        self.tcp.accept(handle)
    }

    pub fn connect(&mut self, handle: SocketHandle, addr: Ipv4Address, port: u16) -> Result<(), NetError> {
        self.tcp.connect(self.ip, handle, addr, port)
    }

    pub fn send(&mut self, handle: SocketHandle, data: &[u8]) -> Result<usize, NetError> {
        self.tcp.send(self.ip, handle, data)
    }

    pub fn recv(&mut self, handle: SocketHandle, buf: &mut [u8]) -> Result<usize, NetError> {
        self.tcp.recv(self.ip, handle, buf)
    }

    pub fn available(&self, handle: SocketHandle) -> Result<usize, NetError> {
        self.tcp.available(handle)
    }

    pub fn close(&mut self, handle: SocketHandle) -> Result<(), NetError> {
        self.tcp.close(self.ip, handle)
    }

    pub fn register_callbacks(&mut self, handle: SocketHandle, events: SharedEvents) -> Result<(), NetError> {
        self.tcp.register_callbacks(handle, events)
    }

    pub fn pending_connections(&self, handle: SocketHandle) -> Result<usize, NetError> {
        self.tcp.pending_connections(handle)
    }

    pub fn state(&self, handle: SocketHandle) -> TcpState {
        self.tcp.state(handle)
    }

    pub fn control_block(&self, handle: SocketHandle) -> Option<ControlBlock> {
        self.tcp.control_block(handle)
    }

    pub fn local_endpoint(&self, handle: SocketHandle) -> Option<(Ipv4Address, u16)> {
        self.tcp.socket_info(handle).map(|s| s.local_endpoint())
    }

    pub fn remote_endpoint(&self, handle: SocketHandle) -> Option<(Ipv4Address, u16)> {
        self.tcp.socket_info(handle).map(|s| s.remote_endpoint())
    }

    pub fn stats(&self) -> TcpStats {
        *self.tcp.stats()
    }
}

/// Borrowed view of the UDP layer together with the IP layer it sends through.
#[cfg(feature = "net_udp")]
pub struct UdpSockets<'a> {
    ip: &'a mut Ipv4Layer,
    udp: &'a mut UdpLayer,
}

#[cfg(feature = "net_udp")]
impl UdpSockets<'_> {
    pub fn bind(&mut self, port: u16) -> Result<UdpHandle, NetError> {
        self.udp.bind(port)
    }

    pub fn local_port(&self, handle: UdpHandle) -> Result<u16, NetError> {
        self.udp.local_port(handle)
    }

    pub fn send_to(
        &mut self,
        handle: UdpHandle,
        dst: Ipv4Address,
        dst_port: u16,
        data: &[u8],
    ) -> Result<usize, NetError> {
        self.udp.send_to(self.ip, handle, dst, dst_port, data)
    }

    pub fn recv_from(
        &mut self,
        handle: UdpHandle,
        buf: &mut [u8],
    ) -> Result<(usize, Ipv4Address, u16), NetError> {
        self.udp.recv_from(handle, buf)
    }

    pub fn pending(&self, handle: UdpHandle) -> Result<usize, NetError> {
        self.udp.pending(handle)
    }

    pub fn close(&mut self, handle: UdpHandle) -> Result<(), NetError> {
        self.udp.close(handle)
    }

    pub fn stats(&self) -> UdpStats {
        *self.udp.stats()
    }
}
