//! Internet checksum (RFC 1071)
//!
//! Sum of big-endian 16-bit words with end-around carry, complemented. The
//! pseudo-header variant prefixes source, destination, zero, protocol and
//! segment length, as TCP and UDP require.

use super::ipv4::Ipv4Address;

fn sum_words(data: &[u8], initial: u32) -> u32 {
    let mut sum = initial;
    let mut chunks = data.chunks_exact(2);
    for chunk in chunks.by_ref() {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let Some(&byte) = chunks.remainder().first() {
        sum += (byte as u32) << 8;
    }
    fold_carries(sum)
}

fn fold_carries(mut sum: u32) -> u32 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum
}

pub fn internet_checksum(data: &[u8]) -> u16 {
    checksum_with_initial(data, 0)
}

/// Checksum of `data` continuing from a partial (uncomplemented) sum.
pub fn checksum_with_initial(data: &[u8], initial: u32) -> u16 {
    !(sum_words(data, initial) as u16)
}

/// Uncomplemented sum of the IPv4 pseudo-header.
pub fn pseudo_header_sum(src: Ipv4Address, dst: Ipv4Address, protocol: u8, length: usize) -> u32 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(src.as_bytes());
    pseudo[4..8].copy_from_slice(dst.as_bytes());
    pseudo[9] = protocol;
    pseudo[10..12].copy_from_slice(&(length as u16).to_be_bytes());
    sum_words(&pseudo, 0)
}

pub fn pseudo_header_checksum(
    src: Ipv4Address,
    dst: Ipv4Address,
    protocol: u8,
    segment: &[u8],
) -> u16 {
    checksum_with_initial(segment, pseudo_header_sum(src, dst, protocol, segment.len()))
}

/// Stored checksum at `offset` (big-endian), or `None` if out of range.
pub fn stored_field(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Sum of `data` with the 16-bit field at the even `offset` treated as zero.
fn sum_without_field(data: &[u8], offset: usize, initial: u32) -> u32 {
    let head = sum_words(&data[..offset], initial);
    sum_words(&data[offset + 2..], head)
}

/// Recompute the checksum with the field at `offset` zeroed and compare it
/// with the stored value.
pub fn verify_field(data: &[u8], offset: usize) -> bool {
    match stored_field(data, offset) {
        Some(stored) if offset % 2 == 0 => !(sum_without_field(data, offset, 0) as u16) == stored,
        _ => false,
    }
}

pub fn verify_pseudo_header(
    src: Ipv4Address,
    dst: Ipv4Address,
    protocol: u8,
    segment: &[u8],
    offset: usize,
) -> bool {
    let Some(stored) = stored_field(segment, offset) else {
        return false;
    };
    if offset % 2 != 0 {
        return false;
    }
    let initial = pseudo_header_sum(src, dst, protocol, segment.len());
    !(sum_without_field(segment, offset, initial) as u16) == stored
}

/// Write the checksum of `data` (field at `offset` zeroed first) into place.
pub fn fill_field(data: &mut [u8], offset: usize, initial: u32) {
    data[offset..offset + 2].copy_from_slice(&[0, 0]);
    let sum = checksum_with_initial(data, initial);
    data[offset..offset + 2].copy_from_slice(&sum.to_be_bytes());
}
