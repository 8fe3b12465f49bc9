//! Link-layer device boundary
//!
//! NIC drivers live outside this crate. The engine only needs a MAC address
//! and a way to hand a finished Ethernet frame to the hardware.

mod queue;

use core::fmt;

pub use queue::{TxQueue, TxQueueDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    // Malformed input
    Truncated,
    BadVersion,
    BadHeaderLength,
    ChecksumFailed,
    Fragmented,
    InvalidPacket,
    // Delivery
    NotForUs,
    ProtocolUnsupported,
    ProtocolInUse,
    NoRoute,
    NoDevice,
    TxBusy,
    BufferTooSmall,
    // Resources
    TooManyConnections,
    AddressInUse,
    PortsExhausted,
    BacklogFull,
    // Socket API
    InvalidSocket,
    InvalidState,
    NotConnected,
    WouldBlock,
    ConnectionClosed,
}

impl NetError {
    /// Malformed input is dropped silently; everything else is worth a log line.
    pub fn is_malformed(self) -> bool {
        matches!(
            self,
            NetError::Truncated
                | NetError::BadVersion
                | NetError::BadHeaderLength
                | NetError::ChecksumFailed
                | NetError::Fragmented
                | NetError::InvalidPacket
        )
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            NetError::Truncated => "packet truncated",
            NetError::BadVersion => "unsupported IP version",
            NetError::BadHeaderLength => "bad header length",
            NetError::ChecksumFailed => "checksum mismatch",
            NetError::Fragmented => "fragmented packet",
            NetError::InvalidPacket => "invalid packet",
            NetError::NotForUs => "not addressed to this host",
            NetError::ProtocolUnsupported => "no handler for protocol",
            NetError::ProtocolInUse => "protocol already registered",
            NetError::NoRoute => "no route to host",
            NetError::NoDevice => "no network device attached",
            NetError::TxBusy => "transmit queue busy",
            NetError::BufferTooSmall => "buffer too small",
            NetError::TooManyConnections => "socket table full",
            NetError::AddressInUse => "address in use",
            NetError::PortsExhausted => "ephemeral ports exhausted",
            NetError::BacklogFull => "listen backlog full",
            NetError::InvalidSocket => "invalid socket handle",
            NetError::InvalidState => "operation invalid in current state",
            NetError::NotConnected => "socket not connected",
            NetError::WouldBlock => "operation would block",
            NetError::ConnectionClosed => "connection closed",
        };
        f.write_str(msg)
    }
}

/// A link-layer device able to transmit complete Ethernet frames.
///
/// Received frames are pushed into the engine by the driver through
/// [`crate::net::handle_frame`]; the engine never polls the device.
pub trait NetDevice: Send {
    fn mac_address(&self) -> [u8; 6];

    /// Largest Ethernet payload the device accepts.
    fn mtu(&self) -> usize {
        1500
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), NetError>;
}
