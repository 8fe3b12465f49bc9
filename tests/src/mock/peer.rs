//! Scripted remote host
//!
//! Builds the Ethernet/IPv4/TCP frames a real peer would send and decodes
//! what the stack under test transmitted.

use nexa_net::net::arp::ArpPacket;
use nexa_net::net::buffer::NetBuf;
use nexa_net::net::checksum;
use nexa_net::net::drivers::TxQueue;
use nexa_net::net::ethernet::{self, EtherType, EthernetHeader, MacAddress};
use nexa_net::net::ipv4::{Ipv4Address, Ipv4Header, FLAG_DF};
#[cfg(feature = "net_tcp")]
use nexa_net::net::tcp::segment::{build_segment, parse_segment};
#[cfg(feature = "net_tcp")]
use nexa_net::net::tcp::{TcpHeader, PROTO_TCP};

use super::device::LOCAL_MAC;

pub const PEER_MAC: MacAddress = MacAddress::new([0x52, 0x54, 0x00, 0xab, 0xcd, 0xef]);
/// Peer address: on link with the stack (and its default gateway)
pub const PEER_IP: Ipv4Address = Ipv4Address::new(10, 0, 2, 2);

pub struct Peer {
    pub mac: MacAddress,
    pub ip: Ipv4Address,
    /// Where frames are sent
    pub target_mac: MacAddress,
    next_ident: u16,
}

impl Default for Peer {
    fn default() -> Self {
        Self::new(PEER_MAC, PEER_IP)
    }
}

impl Peer {
    pub fn new(mac: MacAddress, ip: Ipv4Address) -> Self {
        Self {
            mac,
            ip,
            target_mac: LOCAL_MAC,
            next_ident: 0x100,
        }
    }

    fn ethernet(&self, dst: MacAddress, ether_type: EtherType, mut buf: NetBuf) -> Vec<u8> {
        ethernet::push_header(
            &mut buf,
            &EthernetHeader {
                dst_mac: dst,
                src_mac: self.mac,
                ether_type,
            },
        );
        buf.to_vec()
    }

    /// ARP request asking who has `target`.
    pub fn arp_request(&self, target: Ipv4Address) -> Vec<u8> {
        let packet = ArpPacket::new_request(self.mac, self.ip, target);
        let mut body = NetBuf::new(64, ArpPacket::SIZE);
        packet.emit(body.push_tail(ArpPacket::SIZE));
        self.ethernet(MacAddress::BROADCAST, EtherType::ARP, body)
    }

    /// IPv4 header for a packet of `payload_len` bytes to `dst`.
    pub fn ipv4_header(&mut self, dst: Ipv4Address, protocol: u8, payload_len: usize) -> Ipv4Header {
        let identification = self.next_ident;
        self.next_ident = self.next_ident.wrapping_add(1);
        Ipv4Header {
            version: 4,
            ihl: 5,
            tos: 0,
            total_length: (Ipv4Header::MIN_SIZE + payload_len) as u16,
            identification,
            flags_fragment: FLAG_DF,
            ttl: 64,
            protocol,
            header_checksum: 0,
            src_addr: self.ip,
            dst_addr: dst,
        }
    }

    /// Frame carrying `payload` as protocol `protocol` to `dst`.
    pub fn ipv4_frame(&mut self, dst: Ipv4Address, protocol: u8, payload: &[u8]) -> Vec<u8> {
        let header = self.ipv4_header(dst, protocol, payload.len());
        self.frame_with_header(&header, payload)
    }

    /// Frame with an explicit (possibly bogus) IPv4 header.
    pub fn frame_with_header(&self, header: &Ipv4Header, payload: &[u8]) -> Vec<u8> {
        let mut buf = NetBuf::for_payload(payload);
        header.emit(buf.push_head(Ipv4Header::MIN_SIZE));
        self.ethernet(self.target_mac, EtherType::IPv4, buf)
    }

    /// TCP segment from `src_port` to the stack's `dst_port`.
    #[cfg(feature = "net_tcp")]
    #[allow(clippy::too_many_arguments)]
    pub fn tcp(
        &mut self,
        dst: Ipv4Address,
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let header = TcpHeader::new(src_port, dst_port, seq, ack, flags, 8192);
        self.tcp_with_header(dst, &header, payload)
    }

    #[cfg(feature = "net_tcp")]
    pub fn tcp_with_header(&mut self, dst: Ipv4Address, header: &TcpHeader, payload: &[u8]) -> Vec<u8> {
        let segment = build_segment(self.ip, dst, header, payload);
        self.ipv4_frame(dst, PROTO_TCP, segment.data())
    }
}

/// An IPv4 packet the stack transmitted.
#[derive(Debug, Clone)]
pub struct SentPacket {
    pub eth: EthernetHeader,
    pub ip: Ipv4Header,
    pub payload: Vec<u8>,
}

/// A TCP segment the stack transmitted.
#[cfg(feature = "net_tcp")]
#[derive(Debug, Clone)]
pub struct SentSegment {
    pub dst_mac: MacAddress,
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
    pub header: TcpHeader,
    pub payload: Vec<u8>,
}

#[cfg(feature = "net_tcp")]
impl SentSegment {
    pub fn has(&self, flag: u8) -> bool {
        self.header.has(flag)
    }
}

/// Decode an IPv4 frame, verifying the header checksum and dropping link
/// padding. `None` for anything else.
pub fn decode_ipv4(frame: &[u8]) -> Option<SentPacket> {
    let eth = EthernetHeader::parse(frame).ok()?;
    if eth.ether_type != EtherType::IPv4 {
        return None;
    }
    let packet = &frame[EthernetHeader::SIZE..];
    let ip = Ipv4Header::parse(packet).ok()?;
    assert!(
        checksum::verify_field(&packet[..ip.header_len()], 10),
        "stack sent an IPv4 header with a bad checksum"
    );
    let end = ip.total_length as usize;
    Some(SentPacket {
        eth,
        payload: packet[ip.header_len()..end].to_vec(),
        ip,
    })
}

/// Decode a TCP frame; the segment checksum must verify.
#[cfg(feature = "net_tcp")]
pub fn decode_tcp(frame: &[u8]) -> Option<SentSegment> {
    let packet = decode_ipv4(frame)?;
    if packet.ip.protocol != PROTO_TCP {
        return None;
    }
    let (header, payload) = parse_segment(packet.ip.src_addr, packet.ip.dst_addr, &packet.payload)
        .expect("stack sent a TCP segment with a bad checksum");
    Some(SentSegment {
        dst_mac: packet.eth.dst_mac,
        src: packet.ip.src_addr,
        dst: packet.ip.dst_addr,
        header,
        payload: payload.to_vec(),
    })
}

/// Drain `queue` and return the TCP segments in transmit order.
#[cfg(feature = "net_tcp")]
pub fn tcp_segments(queue: &TxQueue) -> Vec<SentSegment> {
    queue.drain().iter().filter_map(|f| decode_tcp(f)).collect()
}

/// Drain `queue` and return the IPv4 packets in transmit order.
pub fn ipv4_packets(queue: &TxQueue) -> Vec<SentPacket> {
    queue.drain().iter().filter_map(|f| decode_ipv4(f)).collect()
}
