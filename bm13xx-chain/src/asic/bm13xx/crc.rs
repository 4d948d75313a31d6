//! CRC engines for BM13xx frames.
//!
//! Command frames and chip responses carry a CRC-5 in their last byte; job
//! frames carry a CRC-16/CCITT-FALSE transmitted big-endian. Both are computed
//! over everything after the two-byte preamble.

use crc_all::CrcAlgo;

/// Calculates a 5-bit CRC using the USB polynomial over a slice of bytes.
///
/// This is the bit-serial network the chips implement: a 5-bit register seeded
/// with `0b11111`, fed most-significant bit first, with taps at bits 0 and 2
/// (polynomial x^5 + x^2 + 1, no reflection, no output XOR). The result sits
/// in the low five bits of the returned byte.
pub fn crc5(data: &[u8]) -> u8 {
    let mut crc = CRC5_INIT;
    CRC5.update_crc(&mut crc, data);
    CRC5.finish_crc(&crc)
}

/// Validates data integrity using the CRC-5-USB algorithm.
///
/// When a CRC is appended to data, the CRC over the whole sequence (data plus
/// CRC) is zero. Chip responses are checked this way, with the response type
/// bits in the top of the final byte participating in the calculation.
pub fn crc5_is_valid(data: &[u8]) -> bool {
    crc5(data) == 0
}

const CRC5_INIT: u8 = 0x1f;

const CRC5: CrcAlgo<u8> = CrcAlgo::<u8>::new(
    0x5,       // polynomial
    5,         // width
    CRC5_INIT, // init
    0,         // xorout
    false,     // reflect
);

/// Calculates CRC-16/CCITT-FALSE over a slice of bytes.
///
/// Table driven: for every byte the index is `((crc >> 8) ^ byte) & 0xff` and
/// the register becomes `CRC16_TABLE[index] ^ (crc << 8)`, starting from
/// `0xffff`.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |crc, &byte| {
        let index = ((crc >> 8) ^ byte as u16) & 0xff;
        CRC16_TABLE[index as usize] ^ (crc << 8)
    })
}

/// Validates a job frame body against the big-endian CRC-16 that follows it.
pub fn crc16_is_valid(data: &[u8], expected_crc: &[u8]) -> bool {
    match expected_crc {
        [hi, lo] => crc16(data) == u16::from_be_bytes([*hi, *lo]),
        _ => false,
    }
}

const CRC16_INIT: u16 = 0xffff;
const CRC16_POLY: u16 = 0x1021;

/// Lookup table for [`crc16`], one entry per possible input byte.
///
/// Built at compile time and shared read-only by every chain in the process.
pub static CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use crc_all::CrcAlgo;
    use test_case::test_case;

    /// Straight transcription of the chip's 5-bit shift register, used to
    /// cross-check the library implementation.
    fn crc5_shift_register(data: &[u8]) -> u8 {
        let mut reg = [true; 5];
        for byte in data {
            for bit in (0..8).rev() {
                let din = (byte >> bit) & 1 == 1;
                reg = [
                    reg[4] ^ din,
                    reg[0],
                    reg[1] ^ reg[4] ^ din,
                    reg[2],
                    reg[3],
                ];
            }
        }
        reg.iter()
            .enumerate()
            .fold(0, |crc, (i, &set)| if set { crc | (1 << i) } else { crc })
    }

    // Frames known to be good, taken from hardware captures. Skip the first two
    // bytes, which are a prefix, and the last byte, which is the expected CRC.
    #[test_case(&[0x55, 0xaa, 0x52, 0x05, 0x00, 0x00, 0x0a]; "read_register_0")]
    #[test_case(&[0x55, 0xaa, 0x51, 0x09, 0x00, 0x28, 0x11, 0x30, 0x02, 0x00, 0x03]; "set_baud")]
    #[test_case(&[0x55, 0xaa, 0x40, 0x05, 0x00, 0x00, 0x1c]; "set_chip_address_00")]
    #[test_case(&[0x55, 0xaa, 0x40, 0x05, 0x04, 0x00, 0x03]; "set_chip_address_04")]
    #[test_case(&[0x55, 0xaa, 0x40, 0x05, 0x80, 0x00, 0x10]; "set_chip_address_80")]
    #[test_case(&[0x55, 0xaa, 0x53, 0x05, 0x00, 0x00, 0x03]; "chain_inactive")]
    #[test_case(&[0x55, 0xaa, 0x51, 0x09, 0x00, 0xa4, 0x90, 0x00, 0xff, 0xff, 0x1c]; "write_version_mask_full")]
    #[test_case(&[0x55, 0xaa, 0x51, 0x09, 0x00, 0xa4, 0x90, 0x00, 0x00, 0x00, 0x17]; "write_version_mask_zero")]
    #[test_case(&[0x55, 0xaa, 0x51, 0x09, 0x00, 0x14, 0x00, 0x00, 0x00, 0xff, 0x08]; "write_ticket_mask")]
    fn calculate(frame: &[u8]) {
        let crc = super::crc5(&frame[2..frame.len() - 1]);
        let expect = frame[frame.len() - 1];
        assert_eq!(crc, expect);
        assert_eq!(crc5_shift_register(&frame[2..frame.len() - 1]), expect);
    }

    #[test_case(&[0xaa, 0x55, 0x13, 0x70, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10]; "chip_id_response")]
    #[test_case(&[0xaa, 0x55, 0x78, 0x56, 0x34, 0x12, 0x00, 0x35, 0x01, 0x2a, 0x90]; "nonce_response")]
    fn validate(frame: &[u8]) {
        assert!(super::crc5_is_valid(&frame[2..]));
    }

    #[test]
    fn crc5_of_nothing_is_the_seed() {
        assert_eq!(super::crc5(&[]), 0x1f);
    }

    #[test]
    fn crc5_stays_within_five_bits_and_is_deterministic() {
        for len in 0..16usize {
            let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(37) ^ 0x5a).collect();
            let first = super::crc5(&data);
            assert!(first < 32);
            assert_eq!(first, super::crc5(&data));
            assert_eq!(first, crc5_shift_register(&data));
        }
    }

    #[test]
    fn crc5_detects_single_bit_flips() {
        let samples: [&[u8]; 3] = [
            &[0x53, 0x05, 0x00, 0x00],
            &[0x51, 0x09, 0x00, 0xa4, 0x90, 0x00, 0x00, 0x00],
            &[0x40, 0x05, 0x04, 0x00],
        ];
        for sample in samples {
            let reference = super::crc5(sample);
            for byte in 0..sample.len() {
                for bit in 0..8 {
                    let mut flipped = sample.to_vec();
                    flipped[byte] ^= 1 << bit;
                    assert_ne!(
                        super::crc5(&flipped),
                        reference,
                        "flip of byte {byte} bit {bit} went unnoticed"
                    );
                }
            }
        }
    }

    #[test]
    fn crc16_reference_vector() {
        assert_eq!(super::crc16(b"123456789"), 0x29b1);
    }

    #[test]
    fn crc16_table_spot_checks() {
        assert_eq!(super::CRC16_TABLE[0], 0x0000);
        assert_eq!(super::CRC16_TABLE[1], 0x1021);
        assert_eq!(super::CRC16_TABLE[0x80], 0x9188);
        assert_eq!(super::CRC16_TABLE[0xff], 0x1ef0);
    }

    #[test]
    fn crc16_agrees_with_bitwise_engine() {
        const CCITT_FALSE: CrcAlgo<u16> = CrcAlgo::<u16>::new(0x1021, 16, 0xffff, 0, false);

        let data: Vec<u8> = (0..=255u8).collect();
        for window in [0usize, 1, 7, 54, 84, 256] {
            let mut crc = 0xffff;
            CCITT_FALSE.update_crc(&mut crc, &data[..window]);
            assert_eq!(super::crc16(&data[..window]), CCITT_FALSE.finish_crc(&crc));
        }
    }

    #[test]
    fn crc16_validation_uses_big_endian() {
        assert!(super::crc16_is_valid(b"123456789", &[0x29, 0xb1]));
        assert!(!super::crc16_is_valid(b"123456789", &[0xb1, 0x29]));
        assert!(!super::crc16_is_valid(b"123456789", &[0x29]));
    }
}
