/// ARP (Address Resolution Protocol) for Ethernet/IPv4
///
/// Packet codec plus the neighbor cache consulted by the IPv4 transmit path.

use super::drivers::NetError;
use super::ethernet::MacAddress;
use super::ipv4::Ipv4Address;

const HW_TYPE_ETHERNET: u16 = 1;
const PROTO_TYPE_IPV4: u16 = 0x0800;

/// ARP operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOperation {
    Request,
    Reply,
    Unknown(u16),
}

impl From<u16> for ArpOperation {
    fn from(value: u16) -> Self {
        match value {
            1 => ArpOperation::Request,
            2 => ArpOperation::Reply,
            other => ArpOperation::Unknown(other),
        }
    }
}

impl From<ArpOperation> for u16 {
    fn from(value: ArpOperation) -> Self {
        match value {
            ArpOperation::Request => 1,
            ArpOperation::Reply => 2,
            ArpOperation::Unknown(other) => other,
        }
    }
}

/// ARP packet for Ethernet/IPv4 (28 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOperation,
    pub sender_hw_addr: MacAddress,
    pub sender_proto_addr: Ipv4Address,
    pub target_hw_addr: MacAddress,
    pub target_proto_addr: Ipv4Address,
}

impl ArpPacket {
    pub const SIZE: usize = 28;

    pub fn new_request(
        sender_mac: MacAddress,
        sender_ip: Ipv4Address,
        target_ip: Ipv4Address,
    ) -> Self {
        Self {
            operation: ArpOperation::Request,
            sender_hw_addr: sender_mac,
            sender_proto_addr: sender_ip,
            target_hw_addr: MacAddress::ZERO,
            target_proto_addr: target_ip,
        }
    }

    pub fn new_reply(
        sender_mac: MacAddress,
        sender_ip: Ipv4Address,
        target_mac: MacAddress,
        target_ip: Ipv4Address,
    ) -> Self {
        Self {
            operation: ArpOperation::Reply,
            sender_hw_addr: sender_mac,
            sender_proto_addr: sender_ip,
            target_hw_addr: target_mac,
            target_proto_addr: target_ip,
        }
    }

    /// Parse an Ethernet/IPv4 ARP packet; other hardware or protocol types
    /// are rejected.
    pub fn parse(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < Self::SIZE {
            return Err(NetError::Truncated);
        }
        let hw_type = u16::from_be_bytes([bytes[0], bytes[1]]);
        let proto_type = u16::from_be_bytes([bytes[2], bytes[3]]);
        if hw_type != HW_TYPE_ETHERNET || proto_type != PROTO_TYPE_IPV4 || bytes[4] != 6 || bytes[5] != 4 {
            return Err(NetError::InvalidPacket);
        }

        let mut sender_mac = [0u8; 6];
        sender_mac.copy_from_slice(&bytes[8..14]);
        let mut target_mac = [0u8; 6];
        target_mac.copy_from_slice(&bytes[18..24]);

        Ok(Self {
            operation: ArpOperation::from(u16::from_be_bytes([bytes[6], bytes[7]])),
            sender_hw_addr: MacAddress(sender_mac),
            sender_proto_addr: Ipv4Address::from_slice(&bytes[14..18]),
            target_hw_addr: MacAddress(target_mac),
            target_proto_addr: Ipv4Address::from_slice(&bytes[24..28]),
        })
    }

    pub fn emit(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&HW_TYPE_ETHERNET.to_be_bytes());
        out[2..4].copy_from_slice(&PROTO_TYPE_IPV4.to_be_bytes());
        out[4] = 6;
        out[5] = 4;
        out[6..8].copy_from_slice(&u16::from(self.operation).to_be_bytes());
        out[8..14].copy_from_slice(self.sender_hw_addr.as_bytes());
        out[14..18].copy_from_slice(self.sender_proto_addr.as_bytes());
        out[18..24].copy_from_slice(self.target_hw_addr.as_bytes());
        out[24..28].copy_from_slice(self.target_proto_addr.as_bytes());
    }
}

/// ARP cache entry
#[derive(Clone, Copy)]
pub struct ArpEntry {
    pub ip: Ipv4Address,
    pub mac: MacAddress,
    pub timestamp_ms: u64,
}

impl ArpEntry {
    /// Entries older than 60 seconds are not trusted.
    pub fn is_stale(&self, current_ms: u64) -> bool {
        current_ms.saturating_sub(self.timestamp_ms) > ARP_ENTRY_LIFETIME_MS
    }
}

pub const ARP_CACHE_SIZE: usize = 32;
pub const ARP_ENTRY_LIFETIME_MS: u64 = 60_000;

pub struct ArpCache {
    entries: [Option<ArpEntry>; ARP_CACHE_SIZE],
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ArpCache {
    pub const fn new() -> Self {
        Self {
            entries: [None; ARP_CACHE_SIZE],
        }
    }

    pub fn lookup(&self, ip: Ipv4Address, current_ms: u64) -> Option<MacAddress> {
        let result = self
            .entries
            .iter()
            .flatten()
            .find(|e| e.ip == ip && !e.is_stale(current_ms))
            .map(|e| e.mac);

        ktrace!(
            "arp: lookup {} -> {}",
            ip,
            if result.is_some() { "hit" } else { "miss" }
        );
        result
    }

    /// Insert or refresh a mapping; a full cache evicts its oldest entry.
    pub fn insert(&mut self, ip: Ipv4Address, mac: MacAddress, timestamp_ms: u64) {
        ktrace!("arp: insert {} -> {}", ip, mac);

        if let Some(entry) = self.entries.iter_mut().flatten().find(|e| e.ip == ip) {
            entry.mac = mac;
            entry.timestamp_ms = timestamp_ms;
            return;
        }

        let slot = match self.entries.iter().position(Option::is_none) {
            Some(idx) => idx,
            None => self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.map_or(0, |e| e.timestamp_ms))
                .map_or(0, |(idx, _)| idx),
        };

        self.entries[slot] = Some(ArpEntry { ip, mac, timestamp_ms });
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.entries = [None; ARP_CACHE_SIZE];
    }

    pub fn cleanup(&mut self, current_ms: u64) {
        for entry in self.entries.iter_mut() {
            if entry.map_or(false, |e| e.is_stale(current_ms)) {
                *entry = None;
            }
        }
    }
}
