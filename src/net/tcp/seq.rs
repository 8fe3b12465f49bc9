//! Sequence number comparison modulo 2^32.
//!
//! Two sequence numbers compare by the sign of their wrapping difference,
//! which is correct as long as they are less than 2^31 apart.

#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[inline]
pub fn seq_ge(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

/// `low < seq <= high`, the acceptable-ACK test.
#[inline]
pub fn seq_in_window(seq: u32, low: u32, high: u32) -> bool {
    seq_lt(low, seq) && seq_le(seq, high)
}
