/// TCP socket records
///
/// A [`TcpSocket`] lives in a slot of the connection table and is named by a
/// [`SocketHandle`]. Nothing outside the table holds a reference to it.
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::net::ipv4::Ipv4Address;
use crate::net::ring::RingBuffer;

use super::segment::seg_len;
use super::{
    TcpState, TCP_DEFAULT_MSS, TCP_INITIAL_RTO_MS, TCP_RX_BUFFER_SIZE, TCP_TX_BUFFER_SIZE,
};

/// Index of a socket slot in the connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketHandle(pub(crate) usize);

impl SocketHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp#{}", self.0)
    }
}

/// Connection notifications.
///
/// Called with the stack locked: implementations must only record the event
/// (set a flag, wake a waiter) and never call back into the stack.
pub trait SocketEvents: Send + Sync {
    fn connected(&self, _handle: SocketHandle) {}

    /// New in-order data; `available` is the total readable byte count.
    fn data_ready(&self, _handle: SocketHandle, _available: usize) {}

    /// `bytes` of payload were acknowledged by the peer.
    fn sent(&self, _handle: SocketHandle, _bytes: usize) {}

    fn closed(&self, _handle: SocketHandle) {}
}

/// Events sink that ignores everything.
pub struct NoEvents;

impl SocketEvents for NoEvents {}

pub type SharedEvents = Arc<dyn SocketEvents>;

pub fn no_events() -> SharedEvents {
    Arc::new(NoEvents)
}

/// Connection control block: the sequence-space and timer state of one
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    /// Oldest unacknowledged sequence number
    pub snd_una: u32,
    /// Next sequence number to send
    pub snd_nxt: u32,
    /// Peer's advertised window
    pub snd_wnd: u16,
    /// Next sequence number expected from the peer
    pub rcv_nxt: u32,
    /// Window we advertise (free receive buffer space)
    pub rcv_wnd: u16,
    pub mss: u16,
    pub iss: u32,
    pub irs: u32,
    /// Current retransmission timeout
    pub rto: u64,
    /// Retransmissions since the last acceptable ACK
    pub attempts: u32,
    /// Remaining time until the next retransmission
    pub rtx_timer_ms: Option<u64>,
}

impl ControlBlock {
    pub fn new(iss: u32) -> Self {
        Self {
            snd_una: iss,
            snd_nxt: iss,
            snd_wnd: 0,
            rcv_nxt: 0,
            rcv_wnd: TCP_RX_BUFFER_SIZE.min(u16::MAX as usize) as u16,
            mss: TCP_DEFAULT_MSS,
            iss,
            irs: 0,
            rto: TCP_INITIAL_RTO_MS,
            attempts: 0,
            rtx_timer_ms: None,
        }
    }

    /// Sequence space sent but not yet acknowledged.
    pub fn in_flight(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    pub(crate) fn reset_backoff(&mut self) {
        self.attempts = 0;
        self.rto = TCP_INITIAL_RTO_MS;
    }
}

/// A sent segment kept until the peer acknowledges it.
#[derive(Debug, Clone)]
pub(crate) struct RtxSegment {
    pub seq: u32,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl RtxSegment {
    pub fn end(&self) -> u32 {
        self.seq.wrapping_add(seg_len(self.flags, self.payload.len()))
    }
}

/// Listener state: children not yet handed out by `accept`.
#[derive(Debug, Clone)]
pub struct Listener {
    pub backlog: usize,
    pub queue: VecDeque<SocketHandle>,
}

impl Listener {
    pub fn new(backlog: usize) -> Self {
        Self {
            backlog,
            queue: VecDeque::with_capacity(backlog),
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.backlog
    }

    pub(crate) fn remove(&mut self, handle: SocketHandle) -> bool {
        match self.queue.iter().position(|h| *h == handle) {
            Some(pos) => {
                self.queue.remove(pos);
                true
            }
            None => false,
        }
    }
}

pub struct TcpSocket {
    pub(crate) state: TcpState,
    pub(crate) local_addr: Ipv4Address,
    pub(crate) local_port: u16,
    pub(crate) remote_addr: Ipv4Address,
    pub(crate) remote_port: u16,
    pub(crate) cb: ControlBlock,
    pub(crate) rx: RingBuffer,
    /// Bytes accepted from the user but not yet sent
    pub(crate) tx: RingBuffer,
    pub(crate) rtx_queue: VecDeque<RtxSegment>,
    pub(crate) listener: Option<Listener>,
    pub(crate) parent: Option<SocketHandle>,
    pub(crate) events: SharedEvents,
    /// close() was called; FIN goes out once `tx` drains
    pub(crate) fin_pending: bool,
    pub(crate) fin_sent: bool,
}

impl TcpSocket {
    pub(crate) fn new(local_addr: Ipv4Address, local_port: u16, events: SharedEvents) -> Self {
        Self {
            state: TcpState::Closed,
            local_addr,
            local_port,
            remote_addr: Ipv4Address::UNSPECIFIED,
            remote_port: 0,
            cb: ControlBlock::new(0),
            rx: RingBuffer::new(TCP_RX_BUFFER_SIZE),
            tx: RingBuffer::new(TCP_TX_BUFFER_SIZE),
            rtx_queue: VecDeque::new(),
            listener: None,
            parent: None,
            events,
            fin_pending: false,
            fin_sent: false,
        }
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    pub fn local_endpoint(&self) -> (Ipv4Address, u16) {
        (self.local_addr, self.local_port)
    }

    pub fn remote_endpoint(&self) -> (Ipv4Address, u16) {
        (self.remote_addr, self.remote_port)
    }

    pub fn control_block(&self) -> &ControlBlock {
        &self.cb
    }

    pub fn listener(&self) -> Option<&Listener> {
        self.listener.as_ref()
    }

    /// Recompute the advertised window from free receive space.
    pub(crate) fn update_rcv_wnd(&mut self) {
        self.cb.rcv_wnd = self.rx.free().min(u16::MAX as usize) as u16;
    }

    /// Our FIN has been sent and acknowledged.
    pub(crate) fn fin_acked(&self) -> bool {
        self.fin_sent && self.cb.snd_una == self.cb.snd_nxt
    }

    pub(crate) fn matches(
        &self,
        local_addr: Ipv4Address,
        local_port: u16,
        remote_addr: Ipv4Address,
        remote_port: u16,
    ) -> bool {
        self.state != TcpState::Listen
            && self.state != TcpState::Closed
            && self.local_port == local_port
            && self.remote_port == remote_port
            && self.remote_addr == remote_addr
            && self.local_addr == local_addr
    }
}
