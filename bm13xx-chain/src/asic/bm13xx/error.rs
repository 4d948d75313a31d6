//! Error types for BM13xx protocol operations

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame of {len} bytes exceeds the {max}-byte frame bound")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Truncated frame: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("Missing preamble: expected {expected:02x?}, found {found:02x?}")]
    BadSync { expected: [u8; 2], found: [u8; 2] },

    #[error("Checksum mismatch: frame carries 0x{received:04x}, computed 0x{computed:04x}")]
    ChecksumMismatch { computed: u16, received: u16 },

    #[error("Length field 0x{0:02x} is shorter than the frame overhead")]
    InvalidLength(u8),

    #[error("{extra} unexpected bytes after the frame")]
    TrailingBytes { extra: usize },

    #[error("Invalid header byte: 0x{0:02x}")]
    InvalidHeader(u8),

    #[error("Invalid midstate count {0} (must be 1, 2 or 4)")]
    InvalidMidstateCount(usize),

    #[error("Invalid frequency: {mhz} MHz (must be between 50-800 MHz)")]
    InvalidFrequency { mhz: u32 },

    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaud(u32),

    #[error("Invalid response type: 0x{0:02x}")]
    InvalidResponseType(u8),

    #[error("Invalid register address: 0x{0:02x}")]
    InvalidRegisterAddress(u8),
}
