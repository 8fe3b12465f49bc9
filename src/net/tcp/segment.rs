/// TCP segment codec
///
/// 20-byte header build and parse. Options are never emitted; options on
/// received segments are skipped via the data offset.
use core::fmt;

use crate::net::buffer::NetBuf;
use crate::net::checksum;
use crate::net::drivers::NetError;
use crate::net::ipv4::Ipv4Address;

use super::PROTO_TCP;

// TCP flags
pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;
pub const TCP_URG: u8 = 0x20;

const CHECKSUM_OFFSET: usize = 16;

/// TCP header, host byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    /// Header length in bytes (20 when built here)
    pub data_offset: usize,
    pub flags: u8,
    pub window_size: u16,
    pub checksum: u16,
    pub urgent_ptr: u16,
}

impl TcpHeader {
    pub const SIZE: usize = 20;

    pub fn new(src_port: u16, dst_port: u16, seq_num: u32, ack_num: u32, flags: u8, window_size: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq_num,
            ack_num,
            data_offset: Self::SIZE,
            flags,
            window_size,
            checksum: 0,
            urgent_ptr: 0,
        }
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < Self::SIZE {
            return Err(NetError::Truncated);
        }
        let data_offset = ((bytes[12] >> 4) as usize) * 4;
        if data_offset < Self::SIZE || data_offset > bytes.len() {
            return Err(NetError::BadHeaderLength);
        }

        Ok(Self {
            src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
            dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
            seq_num: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ack_num: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            data_offset,
            flags: bytes[13] & 0x3F,
            window_size: u16::from_be_bytes([bytes[14], bytes[15]]),
            checksum: u16::from_be_bytes([bytes[16], bytes[17]]),
            urgent_ptr: u16::from_be_bytes([bytes[18], bytes[19]]),
        })
    }

    /// Write the fixed 20-byte header; the checksum field is written as stored.
    pub fn emit(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        out[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        out[4..8].copy_from_slice(&self.seq_num.to_be_bytes());
        out[8..12].copy_from_slice(&self.ack_num.to_be_bytes());
        out[12] = ((Self::SIZE / 4) as u8) << 4;
        out[13] = self.flags & 0x3F;
        out[14..16].copy_from_slice(&self.window_size.to_be_bytes());
        out[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        out[18..20].copy_from_slice(&self.urgent_ptr.to_be_bytes());
    }
}

/// Sequence space a segment occupies: payload plus one per SYN and FIN.
pub fn seg_len(flags: u8, payload_len: usize) -> u32 {
    let mut len = payload_len as u32;
    if flags & TCP_SYN != 0 {
        len = len.wrapping_add(1);
    }
    if flags & TCP_FIN != 0 {
        len = len.wrapping_add(1);
    }
    len
}

/// Parse and checksum-verify a segment received from `src` for `dst`.
/// Returns the header and the payload (options skipped).
pub fn parse_segment<'a>(
    src: Ipv4Address,
    dst: Ipv4Address,
    bytes: &'a [u8],
) -> Result<(TcpHeader, &'a [u8]), NetError> {
    let header = TcpHeader::parse(bytes)?;
    if !checksum::verify_pseudo_header(src, dst, PROTO_TCP, bytes, CHECKSUM_OFFSET) {
        return Err(NetError::ChecksumFailed);
    }
    Ok((header, &bytes[header.data_offset..]))
}

/// Build a complete segment with its pseudo-header checksum.
pub fn build_segment(src: Ipv4Address, dst: Ipv4Address, header: &TcpHeader, payload: &[u8]) -> NetBuf {
    let mut buf = NetBuf::for_payload(payload);
    let mut header = *header;
    header.checksum = 0;
    header.emit(buf.push_head(TcpHeader::SIZE));

    let initial = checksum::pseudo_header_sum(src, dst, PROTO_TCP, buf.len());
    checksum::fill_field(buf.data_mut(), CHECKSUM_OFFSET, initial);
    buf
}

/// `SYN|ACK` style rendering of a flag byte for log lines.
pub struct FlagsDisplay(pub u8);

impl fmt::Display for FlagsDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u8, &str); 6] = [
            (TCP_SYN, "SYN"),
            (TCP_FIN, "FIN"),
            (TCP_RST, "RST"),
            (TCP_PSH, "PSH"),
            (TCP_ACK, "ACK"),
            (TCP_URG, "URG"),
        ];
        let mut first = true;
        for (bit, name) in NAMES {
            if self.0 & bit != 0 {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}
