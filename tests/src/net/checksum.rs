//! Internet checksum properties
//!
//! Round trips over even and odd lengths, single-bit corruption, and the
//! pseudo-header variant used by TCP and UDP.

#[cfg(test)]
mod tests {
    use nexa_net::net::checksum::{
        fill_field, internet_checksum, pseudo_header_checksum, pseudo_header_sum,
        verify_field, verify_pseudo_header,
    };
    use nexa_net::net::ipv4::Ipv4Address;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 37 + 11) as u8).collect()
    }

    // =========================================================================
    // Round trips
    // =========================================================================

    #[test]
    fn test_fill_then_verify_even_and_odd_lengths() {
        for len in [20usize, 21, 64, 65, 1499, 1500] {
            let mut data = pattern(len);
            fill_field(&mut data, 10, 0);
            assert!(verify_field(&data, 10), "length {}", len);
        }
    }

    #[test]
    fn test_checksum_of_checksummed_data_is_zero() {
        let mut data = pattern(40);
        fill_field(&mut data, 16, 0);
        assert_eq!(internet_checksum(&data), 0);
    }

    #[test]
    fn test_odd_trailing_byte_is_padded_with_zero() {
        assert_eq!(internet_checksum(&[0x12, 0x34, 0x56]), internet_checksum(&[0x12, 0x34, 0x56, 0x00]));
    }

    // =========================================================================
    // Corruption
    // =========================================================================

    #[test]
    fn test_every_single_bit_flip_detected() {
        let mut data = pattern(33);
        fill_field(&mut data, 4, 0);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupt = data.clone();
                corrupt[byte] ^= 1 << bit;
                assert!(
                    !verify_field(&corrupt, 4),
                    "flip of bit {} in byte {} went unnoticed",
                    bit,
                    byte
                );
            }
        }
    }

    // =========================================================================
    // Pseudo-header
    // =========================================================================

    #[test]
    fn test_pseudo_header_binds_addresses_and_protocol() {
        let src = Ipv4Address::new(10, 0, 2, 2);
        let dst = Ipv4Address::new(10, 0, 2, 15);
        let mut segment = pattern(28);
        segment[16] = 0;
        segment[17] = 0;
        let len = segment.len();
        fill_field(&mut segment, 16, pseudo_header_sum(src, dst, 6, len));

        assert!(verify_pseudo_header(src, dst, 6, &segment, 16));
        assert!(!verify_pseudo_header(src, Ipv4Address::new(10, 0, 2, 16), 6, &segment, 16));
        assert!(!verify_pseudo_header(src, dst, 17, &segment, 16));

        let stored = u16::from_be_bytes([segment[16], segment[17]]);
        segment[16] = 0;
        segment[17] = 0;
        assert_eq!(pseudo_header_checksum(src, dst, 6, &segment), stored);
    }
}
