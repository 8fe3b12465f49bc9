/// TCP protocol engine
///
/// Connection table, segment codec, state machine, retransmission and
/// TIME-WAIT timers, and the socket API. No options, no congestion control,
/// no out-of-order reassembly: a segment that does not start at `rcv_nxt`
/// (after trimming an already received prefix) is dropped and re-ACKed.
use alloc::vec;
use core::any::Any;
use core::fmt;

use crate::net::buffer::NetBuf;
use crate::net::drivers::NetError;
use crate::net::ipv4::{Ipv4Address, Ipv4Layer};
use crate::net::protocol::ProtocolHandler;

mod input;
mod output;
pub mod segment;
pub mod seq;
pub mod socket;
pub mod table;
mod timer;

pub use segment::{
    FlagsDisplay, TcpHeader, TCP_ACK, TCP_FIN, TCP_PSH, TCP_RST, TCP_SYN, TCP_URG,
};
pub use socket::{
    no_events, ControlBlock, Listener, NoEvents, SharedEvents, SocketEvents, SocketHandle,
    TcpSocket,
};
pub use table::{PortAllocator, SocketTable, TimeWaitTracker};

use output::Route;

pub const PROTO_TCP: u8 = 6;

/// Socket arena size
pub const TCP_MAX_SOCKETS: usize = 16;
/// Concurrent TIME-WAIT trackers
pub const TCP_MAX_TIME_WAIT: usize = 8;
pub const TCP_RX_BUFFER_SIZE: usize = 8192;
pub const TCP_TX_BUFFER_SIZE: usize = 8192;
/// Segment payload limit; no MSS option is exchanged
pub const TCP_DEFAULT_MSS: u16 = 536;
pub const TCP_INITIAL_RTO_MS: u64 = 500;
pub const TCP_MAX_RTO_MS: u64 = 60_000;
/// Retransmissions tolerated before a connection is abandoned
pub const TCP_MAX_RETRANSMITS: u32 = 5;
/// Maximum segment lifetime
pub const TCP_MSL_MS: u64 = 30_000;
pub const TCP_TIME_WAIT_MS: u64 = 2 * TCP_MSL_MS;
pub const TCP_MAX_BACKLOG: usize = 8;
pub const TCP_EPHEMERAL_FIRST: u16 = 49152;
pub const TCP_EPHEMERAL_LAST: u16 = 65535;

/// ISS advance per connection, on top of 250 per clock millisecond
const ISS_INCREMENT: u32 = 64_000;

/// TCP connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    pub fn as_str(self) -> &'static str {
        match self {
            TcpState::Closed => "CLOSED",
            TcpState::Listen => "LISTEN",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynReceived => "SYN_RECEIVED",
            TcpState::Established => "ESTABLISHED",
            TcpState::FinWait1 => "FIN_WAIT_1",
            TcpState::FinWait2 => "FIN_WAIT_2",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::Closing => "CLOSING",
            TcpState::LastAck => "LAST_ACK",
            TcpState::TimeWait => "TIME_WAIT",
        }
    }

    /// The peer has sent its FIN; no more data will arrive.
    pub fn peer_closed(self) -> bool {
        matches!(
            self,
            TcpState::CloseWait | TcpState::LastAck | TcpState::Closing | TcpState::TimeWait
        )
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpStats {
    pub segments_in: u64,
    pub segments_out: u64,
    pub checksum_failures: u64,
    pub malformed: u64,
    /// Segments with neither a connection nor a listener
    pub rx_unmatched: u64,
    pub backlog_drops: u64,
    pub out_of_order: u64,
    pub duplicates: u64,
    pub rx_overflow: u64,
    pub retransmits: u64,
    pub timeouts: u64,
    pub resets_sent: u64,
    pub tx_errors: u64,
}

pub struct TcpLayer {
    table: SocketTable,
    clock_ms: u64,
    isn_base: u32,
    isn_counter: u32,
    stats: TcpStats,
}

impl Default for TcpLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpLayer {
    pub fn new() -> Self {
        Self {
            table: SocketTable::new(),
            clock_ms: 0,
            isn_base: 0x1357_9BDF,
            isn_counter: 0,
            stats: TcpStats::default(),
        }
    }

    pub fn stats(&self) -> &TcpStats {
        &self.stats
    }

    /// Milliseconds of timer ticks seen so far.
    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    pub fn table(&self) -> &SocketTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut SocketTable {
        &mut self.table
    }

    /// Rebase the ISS generator so the next connection starts at `iss`.
    /// A kernel calls this once with boot entropy.
    pub fn seed_iss(&mut self, iss: u32) {
        let step = self.iss_step(self.isn_counter.wrapping_add(ISS_INCREMENT));
        self.isn_base = iss.wrapping_sub(step);
    }

    fn next_iss(&mut self) -> u32 {
        self.isn_counter = self.isn_counter.wrapping_add(ISS_INCREMENT);
        self.isn_base.wrapping_add(self.iss_step(self.isn_counter))
    }

    fn iss_step(&self, counter: u32) -> u32 {
        (self.clock_ms as u32).wrapping_mul(250).wrapping_add(counter)
    }

    fn socket_ref(&self, handle: SocketHandle) -> Result<&TcpSocket, NetError> {
        self.table.get(handle).ok_or(NetError::InvalidSocket)
    }

    fn socket_mut(&mut self, handle: SocketHandle) -> Result<&mut TcpSocket, NetError> {
        self.table.get_mut(handle).ok_or(NetError::InvalidSocket)
    }

    /// Create a CLOSED socket bound to `local_addr:local_port`
    /// (`UNSPECIFIED` for any address, port 0 for an ephemeral port).
    pub fn socket(
        &mut self,
        local_addr: Ipv4Address,
        local_port: u16,
        events: SharedEvents,
    ) -> Result<SocketHandle, NetError> {
        let port = if local_port == 0 {
            self.table.allocate_port(local_addr)?
        } else if self.table.port_in_use(local_addr, local_port, None) {
            return Err(NetError::AddressInUse);
        } else {
            local_port
        };

        let handle = self.table.insert(TcpSocket::new(local_addr, port, events))?;
        kdebug!("tcp: {} created on {}:{}", handle, local_addr, port);
        Ok(handle)
    }

    /// Rebind a CLOSED socket.
    pub fn bind(
        &mut self,
        handle: SocketHandle,
        local_addr: Ipv4Address,
        local_port: u16,
    ) -> Result<(), NetError> {
        if self.socket_ref(handle)?.state != TcpState::Closed {
            return Err(NetError::InvalidState);
        }
        let port = if local_port == 0 {
            self.table.allocate_port(local_addr)?
        } else if self.table.port_in_use(local_addr, local_port, Some(handle)) {
            return Err(NetError::AddressInUse);
        } else {
            local_port
        };

        let socket = self.socket_mut(handle)?;
        socket.local_addr = local_addr;
        socket.local_port = port;
        Ok(())
    }

    pub fn listen(&mut self, handle: SocketHandle, backlog: usize) -> Result<(), NetError> {
        let socket = self.socket_mut(handle)?;
        if socket.state != TcpState::Closed {
            return Err(NetError::InvalidState);
        }
        let backlog = backlog.clamp(1, TCP_MAX_BACKLOG);
        socket.listener = Some(Listener::new(backlog));
        socket.state = TcpState::Listen;
        kinfo!(
            "tcp: {} listening on {}:{} (backlog {})",
            handle,
            socket.local_addr,
            socket.local_port,
            backlog
        );
        Ok(())
    }

    /// Take the oldest child that finished its handshake.
    pub fn accept(&mut self, handle: SocketHandle) -> Result<SocketHandle, NetError> {
        let queue: alloc::vec::Vec<SocketHandle> = match self.socket_ref(handle)?.listener.as_ref() {
            Some(listener) => listener.queue.iter().copied().collect(),
            None => return Err(NetError::InvalidState),
        };

        let ready = queue.into_iter().find(|child| {
            self.table.get(*child).map_or(false, |s| {
                matches!(s.state, TcpState::Established | TcpState::CloseWait)
            })
        });
        let Some(child) = ready else {
            return Err(NetError::WouldBlock);
        };

        if let Some(listener) = self.socket_mut(handle)?.listener.as_mut() {
            listener.remove(child);
        }
        self.socket_mut(child)?.parent = None;
        kdebug!("tcp: {} accepted {}", handle, child);
        Ok(child)
    }

    /// Children queued on a listener, handshake complete or not.
    pub fn pending_connections(&self, handle: SocketHandle) -> Result<usize, NetError> {
        self.socket_ref(handle)?
            .listener
            .as_ref()
            .map(Listener::pending)
            .ok_or(NetError::InvalidState)
    }

    /// Active open: send SYN to `addr:port`.
    pub fn connect(
        &mut self,
        ip: &mut Ipv4Layer,
        handle: SocketHandle,
        addr: Ipv4Address,
        port: u16,
    ) -> Result<(), NetError> {
        if self.socket_ref(handle)?.state != TcpState::Closed {
            return Err(NetError::InvalidState);
        }
        if port == 0 || addr.is_unspecified() || ip.is_broadcast(addr) || addr.is_multicast() {
            return Err(NetError::InvalidState);
        }
        if !ip.has_device() {
            return Err(NetError::NoDevice);
        }
        ip.route(addr)?;

        let local_addr = match self.socket_ref(handle)?.local_addr {
            a if a.is_unspecified() => ip.address(),
            a => a,
        };
        let local_port = self.socket_ref(handle)?.local_port;
        if self.table.find_connection(local_addr, local_port, addr, port).is_some() {
            return Err(NetError::AddressInUse);
        }

        let iss = self.next_iss();
        let socket = self.socket_mut(handle)?;
        socket.local_addr = local_addr;
        socket.remote_addr = addr;
        socket.remote_port = port;
        socket.cb = ControlBlock::new(iss);
        socket.update_rcv_wnd();
        socket.state = TcpState::SynSent;

        kdebug!(
            "tcp: {} connecting {}:{} -> {}:{} iss={}",
            handle,
            local_addr,
            local_port,
            addr,
            port,
            iss
        );
        self.send_segment(ip, handle, TCP_SYN, &[])
    }

    /// Queue `data` for transmission; returns how much was accepted.
    pub fn send(
        &mut self,
        ip: &mut Ipv4Layer,
        handle: SocketHandle,
        data: &[u8],
    ) -> Result<usize, NetError> {
        let socket = self.socket_mut(handle)?;
        match socket.state {
            TcpState::Established | TcpState::CloseWait => {}
            TcpState::Closed | TcpState::Listen | TcpState::SynSent | TcpState::SynReceived => {
                return Err(NetError::NotConnected)
            }
            _ => return Err(NetError::ConnectionClosed),
        }
        if socket.fin_pending {
            return Err(NetError::ConnectionClosed);
        }

        let written = socket.tx.write(data);
        if written == 0 && !data.is_empty() {
            return Err(NetError::WouldBlock);
        }
        self.flush(ip, handle)?;
        Ok(written)
    }

    /// Read received data. `Ok(0)` means the peer closed and everything
    /// has been read.
    pub fn recv(
        &mut self,
        ip: &mut Ipv4Layer,
        handle: SocketHandle,
        buf: &mut [u8],
    ) -> Result<usize, NetError> {
        let socket = self.socket_mut(handle)?;
        if socket.state == TcpState::Listen {
            return Err(NetError::InvalidState);
        }

        let count = socket.rx.read(buf);
        if count == 0 {
            if buf.is_empty() || socket.state.peer_closed() {
                return Ok(0);
            }
            return match socket.state {
                TcpState::Closed => Err(NetError::NotConnected),
                _ => Err(NetError::WouldBlock),
            };
        }

        // Tell a peer stalled on a closed window that it has reopened.
        let was_closed = socket.cb.rcv_wnd < socket.cb.mss;
        socket.update_rcv_wnd();
        let reopened = was_closed && socket.cb.rcv_wnd >= socket.cb.mss;
        let synchronized = matches!(
            socket.state,
            TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2
        );
        if reopened && synchronized {
            self.send_ack(ip, handle)?;
        }
        Ok(count)
    }

    pub fn available(&self, handle: SocketHandle) -> Result<usize, NetError> {
        Ok(self.socket_ref(handle)?.rx.available())
    }

    /// Start an orderly close (or tear down a socket that has no peer yet).
    pub fn close(&mut self, ip: &mut Ipv4Layer, handle: SocketHandle) -> Result<(), NetError> {
        let state = self.socket_ref(handle)?.state;
        match state {
            TcpState::Closed | TcpState::SynSent => {
                self.release(handle);
                Ok(())
            }
            TcpState::Listen => {
                let children = self
                    .socket_ref(handle)?
                    .listener
                    .as_ref()
                    .map(|l| l.queue.clone())
                    .unwrap_or_default();
                for child in children {
                    self.abort(ip, child);
                }
                kdebug!("tcp: {} listener closed", handle);
                self.release(handle);
                Ok(())
            }
            TcpState::SynReceived => {
                self.abort(ip, handle);
                Ok(())
            }
            TcpState::Established | TcpState::CloseWait => {
                let socket = self.socket_mut(handle)?;
                socket.fin_pending = true;
                socket.state = if state == TcpState::Established {
                    TcpState::FinWait1
                } else {
                    TcpState::LastAck
                };
                kdebug!("tcp: {} {} -> {}", handle, state, socket.state);
                self.flush(ip, handle)
            }
            _ => Err(NetError::InvalidState),
        }
    }

    /// Replace the event sink of a socket.
    pub fn register_callbacks(
        &mut self,
        handle: SocketHandle,
        events: SharedEvents,
    ) -> Result<(), NetError> {
        self.socket_mut(handle)?.events = events;
        Ok(())
    }

    /// State of `handle`; free slots read as CLOSED.
    pub fn state(&self, handle: SocketHandle) -> TcpState {
        self.table.get(handle).map_or(TcpState::Closed, |s| s.state)
    }

    pub fn control_block(&self, handle: SocketHandle) -> Option<ControlBlock> {
        self.table.get(handle).map(|s| s.cb)
    }

    pub fn socket_info(&self, handle: SocketHandle) -> Option<&TcpSocket> {
        self.table.get(handle)
    }

    /// Send RST for a synchronized socket and free it without a callback.
    fn abort(&mut self, ip: &mut Ipv4Layer, handle: SocketHandle) {
        if let Some(socket) = self.table.get(handle) {
            let route = Route::of(socket);
            let (seq, ack) = (socket.cb.snd_nxt, socket.cb.rcv_nxt);
            self.send_reset(ip, &route, seq, Some(ack));
        }
        self.release(handle);
    }
}

impl ProtocolHandler for TcpLayer {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn receive(
        &mut self,
        ip: &mut Ipv4Layer,
        src: Ipv4Address,
        dst: Ipv4Address,
        payload: NetBuf,
    ) -> Result<(), NetError> {
        self.input(ip, src, dst, payload)
    }

    fn on_tick(&mut self, ip: &mut Ipv4Layer, elapsed_ms: u64) {
        self.tick(ip, elapsed_ms);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Scratch buffer sized for one segment payload.
fn segment_scratch(len: usize) -> alloc::vec::Vec<u8> {
    vec![0u8; len]
}
