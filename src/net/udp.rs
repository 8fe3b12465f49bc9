/// UDP (User Datagram Protocol)
///
/// Header codec and a small bound-port table. Each bound port queues a
/// bounded number of datagrams until the owner reads them.
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::any::Any;

use super::buffer::NetBuf;
use super::checksum;
use super::drivers::NetError;
use super::ipv4::{Ipv4Address, Ipv4Layer};
use super::protocol::ProtocolHandler;

pub const PROTO_UDP: u8 = 17;
pub const UDP_MAX_SOCKETS: usize = 8;
pub const UDP_MAX_QUEUED: usize = 16;
const UDP_EPHEMERAL_FIRST: u16 = 49152;

/// UDP port number
pub type Port = u16;

/// UDP header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: Port,
    pub dst_port: Port,
    /// Length of header + data
    pub length: u16,
    /// Zero means "no checksum" over IPv4
    pub checksum: u16,
}

impl UdpHeader {
    pub const SIZE: usize = 8;

    pub fn new(src_port: Port, dst_port: Port, data_len: usize) -> Self {
        Self {
            src_port,
            dst_port,
            length: (Self::SIZE + data_len) as u16,
            checksum: 0,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < Self::SIZE {
            return Err(NetError::Truncated);
        }
        let header = Self {
            src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
            dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            checksum: u16::from_be_bytes([bytes[6], bytes[7]]),
        };
        let length = header.length as usize;
        if length < Self::SIZE || length > bytes.len() {
            return Err(NetError::InvalidPacket);
        }
        Ok(header)
    }

    pub fn emit(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        out[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        out[4..6].copy_from_slice(&self.length.to_be_bytes());
        out[6..8].copy_from_slice(&self.checksum.to_be_bytes());
    }
}

/// Build a datagram with its pseudo-header checksum filled in.
pub fn build_datagram(
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
    src_port: Port,
    dst_port: Port,
    payload: &[u8],
) -> NetBuf {
    let mut buf = NetBuf::for_payload(payload);
    UdpHeader::new(src_port, dst_port, payload.len()).emit(buf.push_head(UdpHeader::SIZE));

    let sum = checksum::pseudo_header_checksum(src_ip, dst_ip, PROTO_UDP, buf.data());
    // A computed zero is sent as all ones; zero on the wire means "none".
    let sum = if sum == 0 { 0xFFFF } else { sum };
    buf.data_mut()[6..8].copy_from_slice(&sum.to_be_bytes());
    buf
}

fn verify_datagram(src_ip: Ipv4Address, dst_ip: Ipv4Address, header: &UdpHeader, datagram: &[u8]) -> bool {
    if header.checksum == 0 {
        return true;
    }
    // Summing the stored field too yields all ones for both encodings of zero.
    let initial = checksum::pseudo_header_sum(src_ip, dst_ip, PROTO_UDP, datagram.len());
    checksum::checksum_with_initial(datagram, initial) == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UdpHandle(pub(crate) usize);

impl UdpHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedDatagram {
    pub src: Ipv4Address,
    pub src_port: Port,
    pub data: Vec<u8>,
}

struct UdpBinding {
    port: Port,
    queue: VecDeque<ReceivedDatagram>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UdpStats {
    pub rx_datagrams: u64,
    pub rx_bad_checksum: u64,
    pub rx_no_port: u64,
    pub rx_queue_full: u64,
    pub tx_datagrams: u64,
}

pub struct UdpLayer {
    bindings: [Option<UdpBinding>; UDP_MAX_SOCKETS],
    next_ephemeral: Port,
    stats: UdpStats,
}

impl Default for UdpLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl UdpLayer {
    pub fn new() -> Self {
        Self {
            bindings: Default::default(),
            next_ephemeral: UDP_EPHEMERAL_FIRST,
            stats: UdpStats::default(),
        }
    }

    pub fn stats(&self) -> &UdpStats {
        &self.stats
    }

    fn port_bound(&self, port: Port) -> bool {
        self.bindings.iter().flatten().any(|b| b.port == port)
    }

    /// Bind `port` (0 picks an ephemeral port).
    pub fn bind(&mut self, port: Port) -> Result<UdpHandle, NetError> {
        let slot = self
            .bindings
            .iter()
            .position(Option::is_none)
            .ok_or(NetError::TooManyConnections)?;

        let port = if port == 0 {
            self.pick_ephemeral()?
        } else if self.port_bound(port) {
            return Err(NetError::AddressInUse);
        } else {
            port
        };

        self.bindings[slot] = Some(UdpBinding {
            port,
            queue: VecDeque::new(),
        });
        crate::kdebug!("udp: bound port {} in slot {}", port, slot);
        Ok(UdpHandle(slot))
    }

    fn pick_ephemeral(&mut self) -> Result<Port, NetError> {
        for _ in 0..=(u16::MAX - UDP_EPHEMERAL_FIRST) {
            let candidate = self.next_ephemeral;
            self.next_ephemeral = if candidate == u16::MAX {
                UDP_EPHEMERAL_FIRST
            } else {
                candidate + 1
            };
            if !self.port_bound(candidate) {
                return Ok(candidate);
            }
        }
        Err(NetError::PortsExhausted)
    }

    pub fn local_port(&self, handle: UdpHandle) -> Result<Port, NetError> {
        self.binding(handle).map(|b| b.port)
    }

    fn binding(&self, handle: UdpHandle) -> Result<&UdpBinding, NetError> {
        self.bindings
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(NetError::InvalidSocket)
    }

    pub fn send_to(
        &mut self,
        ip: &mut Ipv4Layer,
        handle: UdpHandle,
        dst: Ipv4Address,
        dst_port: Port,
        data: &[u8],
    ) -> Result<usize, NetError> {
        let src_port = self.binding(handle)?.port;
        if UdpHeader::SIZE + data.len() > ip.max_payload() {
            return Err(NetError::BufferTooSmall);
        }
        let buf = build_datagram(ip.address(), dst, src_port, dst_port, data);
        let ttl = ip.default_ttl();
        ip.send(buf, dst, PROTO_UDP, ttl)?;
        self.stats.tx_datagrams += 1;
        Ok(data.len())
    }

    /// Pop the oldest datagram; the payload is truncated to `buf`.
    pub fn recv_from(
        &mut self,
        handle: UdpHandle,
        buf: &mut [u8],
    ) -> Result<(usize, Ipv4Address, Port), NetError> {
        let binding = self
            .bindings
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(NetError::InvalidSocket)?;
        let datagram = binding.queue.pop_front().ok_or(NetError::WouldBlock)?;
        let count = datagram.data.len().min(buf.len());
        buf[..count].copy_from_slice(&datagram.data[..count]);
        Ok((count, datagram.src, datagram.src_port))
    }

    pub fn pending(&self, handle: UdpHandle) -> Result<usize, NetError> {
        self.binding(handle).map(|b| b.queue.len())
    }

    pub fn close(&mut self, handle: UdpHandle) -> Result<(), NetError> {
        let slot = self.bindings.get_mut(handle.0).ok_or(NetError::InvalidSocket)?;
        if slot.take().is_none() {
            return Err(NetError::InvalidSocket);
        }
        Ok(())
    }
}

impl ProtocolHandler for UdpLayer {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn receive(
        &mut self,
        _ip: &mut Ipv4Layer,
        src: Ipv4Address,
        dst: Ipv4Address,
        payload: NetBuf,
    ) -> Result<(), NetError> {
        self.stats.rx_datagrams += 1;
        let header = UdpHeader::parse(payload.data())?;
        let datagram = &payload.data()[..header.length as usize];
        if !verify_datagram(src, dst, &header, datagram) {
            self.stats.rx_bad_checksum += 1;
            return Err(NetError::ChecksumFailed);
        }

        let Some(binding) = self
            .bindings
            .iter_mut()
            .flatten()
            .find(|b| b.port == header.dst_port)
        else {
            self.stats.rx_no_port += 1;
            crate::kdebug!("udp: no socket on port {} from {}", header.dst_port, src);
            return Ok(());
        };

        if binding.queue.len() >= UDP_MAX_QUEUED {
            self.stats.rx_queue_full += 1;
            return Ok(());
        }
        binding.queue.push_back(ReceivedDatagram {
            src,
            src_port: header.src_port,
            data: datagram[UdpHeader::SIZE..].to_vec(),
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
