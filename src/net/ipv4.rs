/// IPv4 packet engine
///
/// Header codec, receive-side validation and classification, and the
/// transmit path (`Ipv4Layer::send`): header construction, next-hop
/// selection, neighbor resolution and hand-off to the link layer.
use alloc::boxed::Box;

use crate::config::NetConfig;

use super::arp::{ArpCache, ArpOperation, ArpPacket};
use super::buffer::NetBuf;
use super::checksum;
use super::drivers::{NetDevice, NetError};
use super::ethernet::{self, EtherType, MacAddress};

/// IPv4 address (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipv4Address(pub [u8; 4]);

impl Ipv4Address {
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address([0, 0, 0, 0]);
    pub const BROADCAST: Ipv4Address = Ipv4Address([255, 255, 255, 255]);
    pub const LOOPBACK: Ipv4Address = Ipv4Address([127, 0, 0, 1]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&bytes[..4]);
        Self(arr)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn from_u32(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    /// Dotted-quad parse (`10.0.2.15`).
    pub fn parse(text: &str) -> Option<Self> {
        let mut octets = [0u8; 4];
        let mut parts = text.split('.');
        for octet in octets.iter_mut() {
            *octet = parts.next()?.parse().ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self(octets))
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] >= 224 && self.0[0] <= 239
    }

    pub fn is_loopback(&self) -> bool {
        self.0[0] == 127
    }

    pub fn in_subnet(&self, network: Ipv4Address, mask: Ipv4Address) -> bool {
        self.to_u32() & mask.to_u32() == network.to_u32() & mask.to_u32()
    }

    /// All host bits set within `mask`.
    pub fn directed_broadcast(&self, mask: Ipv4Address) -> Ipv4Address {
        Self::from_u32(self.to_u32() | !mask.to_u32())
    }
}

impl core::fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl From<[u8; 4]> for Ipv4Address {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    ICMP,
    TCP,
    UDP,
    Unknown(u8),
}

impl IpProtocol {
    pub const fn number(self) -> u8 {
        match self {
            IpProtocol::ICMP => 1,
            IpProtocol::TCP => 6,
            IpProtocol::UDP => 17,
            IpProtocol::Unknown(n) => n,
        }
    }
}

impl From<u8> for IpProtocol {
    fn from(value: u8) -> Self {
        match value {
            1 => IpProtocol::ICMP,
            6 => IpProtocol::TCP,
            17 => IpProtocol::UDP,
            other => IpProtocol::Unknown(other),
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(value: IpProtocol) -> Self {
        value.number()
    }
}

pub const FLAG_DF: u16 = 0x4000;
pub const FLAG_MF: u16 = 0x2000;
const FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;

/// IPv4 header (20 bytes plus options)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    /// Flags (3 bits) + fragment offset (13 bits)
    pub flags_fragment: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub header_checksum: u16,
    pub src_addr: Ipv4Address,
    pub dst_addr: Ipv4Address,
}

impl Ipv4Header {
    pub const MIN_SIZE: usize = 20;

    /// Parse the fixed header and check the version and header length.
    /// The checksum and total length are checked by [`Ipv4Layer::validate`].
    pub fn parse(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < Self::MIN_SIZE {
            return Err(NetError::Truncated);
        }

        let header = Self {
            version: bytes[0] >> 4,
            ihl: bytes[0] & 0x0F,
            tos: bytes[1],
            total_length: u16::from_be_bytes([bytes[2], bytes[3]]),
            identification: u16::from_be_bytes([bytes[4], bytes[5]]),
            flags_fragment: u16::from_be_bytes([bytes[6], bytes[7]]),
            ttl: bytes[8],
            protocol: bytes[9],
            header_checksum: u16::from_be_bytes([bytes[10], bytes[11]]),
            src_addr: Ipv4Address::from_slice(&bytes[12..16]),
            dst_addr: Ipv4Address::from_slice(&bytes[16..20]),
        };

        if header.version != 4 {
            return Err(NetError::BadVersion);
        }
        if header.ihl < 5 {
            return Err(NetError::BadHeaderLength);
        }
        if bytes.len() < header.header_len() {
            return Err(NetError::Truncated);
        }
        Ok(header)
    }

    pub fn header_len(&self) -> usize {
        (self.ihl as usize) * 4
    }

    pub fn protocol(&self) -> IpProtocol {
        IpProtocol::from(self.protocol)
    }

    pub fn is_fragment(&self) -> bool {
        self.flags_fragment & FLAG_MF != 0 || self.flags_fragment & FRAGMENT_OFFSET_MASK != 0
    }

    /// Write a 20-byte header (no options) with a fresh checksum.
    pub fn emit(&self, out: &mut [u8]) {
        out[0] = (4 << 4) | 5;
        out[1] = self.tos;
        out[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        out[4..6].copy_from_slice(&self.identification.to_be_bytes());
        out[6..8].copy_from_slice(&self.flags_fragment.to_be_bytes());
        out[8] = self.ttl;
        out[9] = self.protocol;
        out[12..16].copy_from_slice(self.src_addr.as_bytes());
        out[16..20].copy_from_slice(self.dst_addr.as_bytes());
        checksum::fill_field(&mut out[..Self::MIN_SIZE], 10, 0);
    }
}

/// How an accepted packet was addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Local,
    LimitedBroadcast,
    DirectedBroadcast,
}

impl Delivery {
    pub fn is_broadcast(self) -> bool {
        !matches!(self, Delivery::Local)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ipv4Stats {
    pub rx_packets: u64,
    pub rx_delivered: u64,
    pub rx_malformed: u64,
    pub rx_bad_checksum: u64,
    pub rx_fragments: u64,
    pub rx_not_for_us: u64,
    pub rx_no_protocol: u64,
    pub tx_packets: u64,
    pub tx_no_route: u64,
    pub tx_errors: u64,
    pub arp_requests_sent: u64,
    pub arp_replies_sent: u64,
}

/// Interface state shared by every transport: address configuration, the
/// attached device, the neighbor cache and the identification counter.
pub struct Ipv4Layer {
    config: NetConfig,
    device: Option<Box<dyn NetDevice>>,
    mac: MacAddress,
    arp: ArpCache,
    next_ident: u16,
    now_ms: u64,
    stats: Ipv4Stats,
}

impl Ipv4Layer {
    pub fn new(config: NetConfig) -> Self {
        Self {
            config,
            device: None,
            mac: MacAddress::ZERO,
            arp: ArpCache::new(),
            next_ident: 1,
            now_ms: 0,
            stats: Ipv4Stats::default(),
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: NetConfig) {
        self.config = config;
        self.arp.clear();
    }

    pub fn address(&self) -> Ipv4Address {
        self.config.address
    }

    pub fn default_ttl(&self) -> u8 {
        self.config.ttl
    }

    pub fn mac_address(&self) -> MacAddress {
        self.mac
    }

    pub fn stats(&self) -> &Ipv4Stats {
        &self.stats
    }

    pub fn arp_cache(&self) -> &ArpCache {
        &self.arp
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub(crate) fn advance_clock(&mut self, elapsed_ms: u64) {
        self.now_ms = self.now_ms.saturating_add(elapsed_ms);
        if self.now_ms % 10_000 < elapsed_ms {
            self.arp.cleanup(self.now_ms);
        }
    }

    pub fn attach_device(&mut self, device: Box<dyn NetDevice>) -> Option<Box<dyn NetDevice>> {
        self.mac = MacAddress(device.mac_address());
        self.device.replace(device)
    }

    pub fn detach_device(&mut self) -> Option<Box<dyn NetDevice>> {
        self.mac = MacAddress::ZERO;
        self.device.take()
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Largest transport payload that fits one unfragmented packet.
    pub fn max_payload(&self) -> usize {
        self.device
            .as_ref()
            .map_or(1500, |dev| dev.mtu())
            .saturating_sub(Ipv4Header::MIN_SIZE)
    }

    pub fn is_broadcast(&self, addr: Ipv4Address) -> bool {
        addr.is_broadcast() || addr == self.config.directed_broadcast()
    }

    /// Accept only our address and the two broadcast forms.
    pub fn classify(&self, dst: Ipv4Address) -> Result<Delivery, NetError> {
        if dst == self.config.address {
            Ok(Delivery::Local)
        } else if dst.is_broadcast() {
            Ok(Delivery::LimitedBroadcast)
        } else if dst == self.config.directed_broadcast() {
            Ok(Delivery::DirectedBroadcast)
        } else {
            Err(NetError::NotForUs)
        }
    }

    /// Validate an inbound packet and strip its header.
    ///
    /// On success `buf` holds exactly the transport payload (link padding
    /// removed) and the parsed header is returned.
    pub fn validate(&mut self, buf: &mut NetBuf) -> Result<(Ipv4Header, Delivery), NetError> {
        self.stats.rx_packets += 1;
        let result = self.check(buf);
        match result {
            Ok(_) => {}
            Err(NetError::ChecksumFailed) => self.stats.rx_bad_checksum += 1,
            Err(NetError::Fragmented) => self.stats.rx_fragments += 1,
            Err(NetError::NotForUs) => self.stats.rx_not_for_us += 1,
            Err(_) => self.stats.rx_malformed += 1,
        }
        result
    }

    fn check(&self, buf: &mut NetBuf) -> Result<(Ipv4Header, Delivery), NetError> {
        let header = Ipv4Header::parse(buf.data())?;
        let header_len = header.header_len();

        if !checksum::verify_field(&buf.data()[..header_len], 10) {
            return Err(NetError::ChecksumFailed);
        }
        if header.is_fragment() {
            return Err(NetError::Fragmented);
        }

        let total_len = header.total_length as usize;
        if total_len < header_len || total_len > buf.len() {
            return Err(NetError::InvalidPacket);
        }

        let delivery = self.classify(header.dst_addr)?;

        buf.trim(total_len);
        buf.pull_head(header_len)?;
        Ok((header, delivery))
    }

    pub(crate) fn note_delivered(&mut self) {
        self.stats.rx_delivered += 1;
    }

    pub(crate) fn note_no_protocol(&mut self) {
        self.stats.rx_no_protocol += 1;
    }

    /// Next hop for `dst`: on-link and broadcast destinations go direct,
    /// everything else through the default gateway.
    pub fn route(&self, dst: Ipv4Address) -> Result<Ipv4Address, NetError> {
        if self.is_broadcast(dst) || self.config.is_on_link(dst) {
            return Ok(dst);
        }
        self.config.gateway.ok_or(NetError::NoRoute)
    }

    /// Learn a neighbor from an accepted on-link packet.
    pub(crate) fn learn(&mut self, ip: Ipv4Address, mac: MacAddress) {
        if mac.is_unicast() && !ip.is_unspecified() && self.config.is_on_link(ip) && !self.is_broadcast(ip) {
            self.arp.insert(ip, mac, self.now_ms);
        }
    }

    /// Send `buf` (the transport payload) to `dst` as protocol `protocol`.
    pub fn send(
        &mut self,
        mut buf: NetBuf,
        dst: Ipv4Address,
        protocol: u8,
        ttl: u8,
    ) -> Result<(), NetError> {
        if self.device.is_none() {
            return Err(NetError::NoDevice);
        }

        let next_hop = match self.route(dst) {
            Ok(hop) => hop,
            Err(err) => {
                self.stats.tx_no_route += 1;
                crate::kdebug!("ipv4: no route to {}", dst);
                return Err(err);
            }
        };

        let total_length = Ipv4Header::MIN_SIZE + buf.len();
        if total_length > u16::MAX as usize || buf.len() > self.max_payload() {
            return Err(NetError::BufferTooSmall);
        }

        let identification = self.next_ident;
        self.next_ident = self.next_ident.wrapping_add(1);

        let header = Ipv4Header {
            version: 4,
            ihl: 5,
            tos: 0,
            total_length: total_length as u16,
            identification,
            flags_fragment: FLAG_DF,
            ttl,
            protocol,
            header_checksum: 0,
            src_addr: self.config.address,
            dst_addr: dst,
        };
        header.emit(buf.push_head(Ipv4Header::MIN_SIZE));

        let dst_mac = if self.is_broadcast(next_hop) {
            MacAddress::BROADCAST
        } else {
            match self.arp.lookup(next_hop, self.now_ms) {
                Some(mac) => mac,
                None => {
                    // Unresolved neighbors get the frame broadcast while the
                    // request is outstanding.
                    self.send_arp_request(next_hop)?;
                    MacAddress::BROADCAST
                }
            }
        };

        crate::ktrace!(
            "ipv4: tx {} -> {} via {} proto={} len={}",
            header.src_addr,
            dst,
            next_hop,
            protocol,
            total_length
        );

        let device = self.device.as_deref_mut().ok_or(NetError::NoDevice)?;
        match ethernet::frame_send(device, buf, dst_mac, EtherType::IPv4) {
            Ok(()) => {
                self.stats.tx_packets += 1;
                Ok(())
            }
            Err(err) => {
                self.stats.tx_errors += 1;
                Err(err)
            }
        }
    }

    pub fn send_arp_request(&mut self, target: Ipv4Address) -> Result<(), NetError> {
        let packet = ArpPacket::new_request(self.mac, self.config.address, target);
        self.stats.arp_requests_sent += 1;
        self.send_arp(&packet, MacAddress::BROADCAST)
    }

    fn send_arp(&mut self, packet: &ArpPacket, dst: MacAddress) -> Result<(), NetError> {
        let mut buf = NetBuf::new(ethernet::EthernetHeader::SIZE, ArpPacket::SIZE);
        packet.emit(buf.push_tail(ArpPacket::SIZE));
        let device = self.device.as_deref_mut().ok_or(NetError::NoDevice)?;
        ethernet::frame_send(device, buf, dst, EtherType::ARP)
    }

    /// Learn the sender and answer requests for our address.
    pub fn handle_arp(&mut self, packet: &ArpPacket) -> Result<(), NetError> {
        let for_us = packet.target_proto_addr == self.config.address;

        // Refresh existing mappings for anyone; add new ones only when the
        // packet concerns us.
        let known = self.arp.lookup(packet.sender_proto_addr, self.now_ms).is_some();
        if (for_us || known) && !packet.sender_proto_addr.is_unspecified() {
            self.arp
                .insert(packet.sender_proto_addr, packet.sender_hw_addr, self.now_ms);
        }

        if packet.operation == ArpOperation::Request && for_us {
            let reply = ArpPacket::new_reply(
                self.mac,
                self.config.address,
                packet.sender_hw_addr,
                packet.sender_proto_addr,
            );
            self.stats.arp_replies_sent += 1;
            return self.send_arp(&reply, packet.sender_hw_addr);
        }
        Ok(())
    }
}
