/// TCP connection table
///
/// Fixed arena of socket slots, the TIME-WAIT tracker array, and the
/// ephemeral port allocator.
use alloc::vec::Vec;

use crate::net::drivers::NetError;
use crate::net::ipv4::Ipv4Address;

use super::socket::{SocketHandle, TcpSocket};
use super::{
    TcpState, TCP_EPHEMERAL_FIRST, TCP_EPHEMERAL_LAST, TCP_MAX_SOCKETS, TCP_MAX_TIME_WAIT,
    TCP_TIME_WAIT_MS,
};

/// A socket parked in TIME-WAIT since `started_ms` (stack clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWaitTracker {
    pub handle: SocketHandle,
    pub started_ms: u64,
}

impl TimeWaitTracker {
    pub fn expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.started_ms) >= TCP_TIME_WAIT_MS
    }
}

/// Round-robin cursor over the ephemeral port range.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    next: u16,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    pub const fn new() -> Self {
        Self {
            next: TCP_EPHEMERAL_FIRST,
        }
    }

    /// Start the cursor at `port` (clamped into the ephemeral range).
    pub fn starting_at(port: u16) -> Self {
        Self {
            next: port.clamp(TCP_EPHEMERAL_FIRST, TCP_EPHEMERAL_LAST),
        }
    }

    fn advance(&mut self) -> u16 {
        let port = self.next;
        self.next = if port >= TCP_EPHEMERAL_LAST {
            TCP_EPHEMERAL_FIRST
        } else {
            port + 1
        };
        port
    }

    /// Next port for which `in_use` is false, scanning the range at most once.
    pub fn allocate(&mut self, mut in_use: impl FnMut(u16) -> bool) -> Result<u16, NetError> {
        let span = (TCP_EPHEMERAL_LAST - TCP_EPHEMERAL_FIRST) as usize + 1;
        for _ in 0..span {
            let port = self.advance();
            if !in_use(port) {
                return Ok(port);
            }
        }
        Err(NetError::PortsExhausted)
    }
}

pub struct SocketTable {
    slots: Vec<Option<TcpSocket>>,
    time_wait: [Option<TimeWaitTracker>; TCP_MAX_TIME_WAIT],
    ports: PortAllocator,
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(TCP_MAX_SOCKETS);
        slots.resize_with(TCP_MAX_SOCKETS, || None);
        Self {
            slots,
            time_wait: [None; TCP_MAX_TIME_WAIT],
            ports: PortAllocator::new(),
        }
    }

    /// Place `socket` in the first free slot.
    pub fn insert(&mut self, socket: TcpSocket) -> Result<SocketHandle, NetError> {
        let idx = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(NetError::TooManyConnections)?;
        self.slots[idx] = Some(socket);
        Ok(SocketHandle(idx))
    }

    /// Empty the slot and drop any TIME-WAIT tracker pointing at it.
    pub fn remove(&mut self, handle: SocketHandle) -> Option<TcpSocket> {
        self.cancel_time_wait(handle);
        self.slots.get_mut(handle.0)?.take()
    }

    pub fn get(&self, handle: SocketHandle) -> Option<&TcpSocket> {
        self.slots.get(handle.0)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: SocketHandle) -> Option<&mut TcpSocket> {
        self.slots.get_mut(handle.0)?.as_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles of every occupied slot, in slot order.
    pub fn handles(&self) -> Vec<SocketHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(idx, _)| SocketHandle(idx))
            .collect()
    }

    /// Synchronized (or connecting) socket for an exact 4-tuple.
    pub fn find_connection(
        &self,
        local_addr: Ipv4Address,
        local_port: u16,
        remote_addr: Ipv4Address,
        remote_port: u16,
    ) -> Option<SocketHandle> {
        self.slots
            .iter()
            .position(|slot| {
                slot.as_ref().map_or(false, |s| {
                    s.matches(local_addr, local_port, remote_addr, remote_port)
                })
            })
            .map(SocketHandle)
    }

    /// LISTEN socket on `local_port` bound to `local_addr` or to any address.
    pub fn find_listener(&self, local_addr: Ipv4Address, local_port: u16) -> Option<SocketHandle> {
        self.slots
            .iter()
            .position(|slot| {
                slot.as_ref().map_or(false, |s| {
                    s.state == TcpState::Listen
                        && s.local_port == local_port
                        && (s.local_addr.is_unspecified() || s.local_addr == local_addr)
                })
            })
            .map(SocketHandle)
    }

    /// Whether binding `addr:port` would overlap another unconnected socket.
    /// Connections are told apart by their 4-tuple and are not counted.
    pub fn port_in_use(&self, addr: Ipv4Address, port: u16, except: Option<SocketHandle>) -> bool {
        self.slots.iter().enumerate().any(|(idx, slot)| {
            let Some(s) = slot.as_ref() else {
                return false;
            };
            Some(SocketHandle(idx)) != except
                && s.remote_port == 0
                && s.local_port == port
                && (s.local_addr == addr || s.local_addr.is_unspecified() || addr.is_unspecified())
        })
    }

    pub fn allocate_port(&mut self, addr: Ipv4Address) -> Result<u16, NetError> {
        let slots = &self.slots;
        self.ports.allocate(|port| {
            slots.iter().flatten().any(|s| {
                s.local_port == port
                    && (s.local_addr == addr || s.local_addr.is_unspecified() || addr.is_unspecified())
            })
        })
    }

    pub fn ports_mut(&mut self) -> &mut PortAllocator {
        &mut self.ports
    }

    /// Start tracking `handle` in TIME-WAIT. Returns false when every
    /// tracker slot is busy.
    pub fn start_time_wait(&mut self, handle: SocketHandle, now_ms: u64) -> bool {
        if let Some(tracker) = self.time_wait.iter_mut().flatten().find(|t| t.handle == handle) {
            tracker.started_ms = now_ms;
            return true;
        }
        match self.time_wait.iter_mut().find(|t| t.is_none()) {
            Some(slot) => {
                *slot = Some(TimeWaitTracker {
                    handle,
                    started_ms: now_ms,
                });
                true
            }
            None => false,
        }
    }

    pub fn cancel_time_wait(&mut self, handle: SocketHandle) {
        for slot in self.time_wait.iter_mut() {
            if slot.map_or(false, |t| t.handle == handle) {
                *slot = None;
            }
        }
    }

    /// Sockets whose TIME-WAIT period has run out at `now_ms`.
    pub fn expired_time_waits(&self, now_ms: u64) -> Vec<SocketHandle> {
        self.time_wait
            .iter()
            .flatten()
            .filter(|t| t.expired(now_ms))
            .map(|t| t.handle)
            .collect()
    }

    pub fn time_wait_count(&self) -> usize {
        self.time_wait.iter().flatten().count()
    }
}
