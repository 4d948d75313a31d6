//! Turn raw bytes into a description of one BM13xx frame.
//!
//! Host frames go through the same strict [`decode`] the chain driver uses to
//! check its own output; chip frames through the response [`parse`]. Nothing
//! here reimplements framing, it only explains what the codecs saw.

use std::fmt;

use bm13xx_chain::asic::bm13xx::{
    frame::{decode, FrameKind, Group, Operation, PREAMBLE},
    register::{Register, RegisterAddress},
    response::{parse, Response, RESPONSE_PREAMBLE},
    Frame, ProtocolError,
};
use bytes::Buf;
use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToChip,
    ChipToHost,
}

impl Direction {
    /// Guess the direction from the preamble; host frames by default.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&RESPONSE_PREAMBLE) {
            Direction::ChipToHost
        } else {
            Direction::HostToChip
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::HostToChip => write!(f, "TX"),
            Direction::ChipToHost => write!(f, "RX"),
        }
    }
}

/// CRC validation status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStatus {
    Valid,
    Invalid { computed: u16, received: u16 },
    NotChecked,
}

impl fmt::Display for CrcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrcStatus::Valid => write!(f, "{}", "CRC OK".green()),
            CrcStatus::Invalid { computed, received } => write!(
                f,
                "{}",
                format!("CRC FAIL (expected {:#x}, got {:#x})", computed, received).red()
            ),
            CrcStatus::NotChecked => write!(f, ""),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameContent {
    /// Decoded host frame with a one-line summary of its payload.
    Host {
        header: u8,
        kind: FrameKind,
        length_field: usize,
        summary: String,
    },
    Response(Response),
    /// Bytes that did not decode, and why.
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DissectedFrame {
    pub direction: Direction,
    pub raw: Vec<u8>,
    pub content: FrameContent,
    pub crc_status: CrcStatus,
}

/// Dissect `bytes` as a frame travelling in `direction`.
pub fn dissect(bytes: &[u8], direction: Direction) -> DissectedFrame {
    let (content, crc_status) = match direction {
        Direction::HostToChip => dissect_host(bytes),
        Direction::ChipToHost => dissect_response(bytes),
    };

    DissectedFrame {
        direction,
        raw: bytes.to_vec(),
        content,
        crc_status,
    }
}

fn dissect_host(bytes: &[u8]) -> (FrameContent, CrcStatus) {
    match decode(bytes) {
        Ok(frame) => {
            let content = FrameContent::Host {
                header: frame.header.into(),
                kind: frame.header.kind,
                length_field: frame.length_field(),
                summary: summarize(&frame),
            };
            (content, CrcStatus::Valid)
        }
        Err(e) => invalid(e),
    }
}

fn dissect_response(bytes: &[u8]) -> (FrameContent, CrcStatus) {
    match parse(bytes) {
        Ok(response) => (FrameContent::Response(response), CrcStatus::Valid),
        Err(e) => invalid(e),
    }
}

fn invalid(error: ProtocolError) -> (FrameContent, CrcStatus) {
    let status = match error {
        ProtocolError::ChecksumMismatch { computed, received } => {
            CrcStatus::Invalid { computed, received }
        }
        _ => CrcStatus::NotChecked,
    };
    (FrameContent::Invalid(error.to_string()), status)
}

fn summarize(frame: &Frame) -> String {
    match frame.header.kind {
        FrameKind::Job => summarize_job(&frame.payload),
        FrameKind::Command => summarize_command(frame),
    }
}

fn summarize_job(payload: &[u8]) -> String {
    if payload.len() < 18 {
        return format!("Job (short payload, {} bytes)", payload.len());
    }

    let mut bytes = payload;
    let job_id = bytes.get_u8();
    let midstates = bytes.get_u8();
    let starting_nonce = bytes.get_u32_le();
    let nbits = bytes.get_u32_le();
    let ntime = bytes.get_u32_le();

    format!(
        "Job id={} midstates={} start_nonce={:#010x} nbits={:#010x} ntime={:#010x}",
        job_id, midstates, starting_nonce, nbits, ntime
    )
}

fn summarize_command(frame: &Frame) -> String {
    let payload = &frame.payload[..];
    let target = match frame.header.group {
        Group::All => "all".to_string(),
        Group::Single => match payload.first() {
            Some(address) => format!("chip {:#04x}", address),
            None => "chip ?".to_string(),
        },
    };

    match (frame.header.operation, payload) {
        (Operation::Inactive, _) => "ChainInactive".to_string(),
        (Operation::SetAddress, [address, ..]) => format!("SetAddress {:#04x}", address),
        (Operation::Read, [_, register, ..]) => {
            format!("ReadRegister {} {}", target, register_name(*register))
        }
        (Operation::Write, [_, register, a, b, c, d]) => match RegisterAddress::try_from(*register)
        {
            Ok(address) => format!(
                "WriteRegister {} {:?}",
                target,
                Register::decode(address, &[*a, *b, *c, *d])
            ),
            Err(_) => format!(
                "WriteRegister {} {:#04x} = {:02x}{:02x}{:02x}{:02x}",
                target, register, a, b, c, d
            ),
        },
        (operation, _) => format!("{:?} (malformed payload)", operation),
    }
}

fn register_name(register: u8) -> String {
    match RegisterAddress::try_from(register) {
        Ok(address) => format!("{:?}", address),
        Err(_) => format!("{:#04x}", register),
    }
}

/// Parse a line of hex such as `55 aa 53 05 00 00 03` or `55aa5305000003`.
pub fn parse_hex(line: &str) -> Result<Vec<u8>, String> {
    let digits: String = line
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != ',')
        .collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);

    if !digits.is_ascii() {
        return Err(format!("non-hex characters in {:?}", line));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {:?}", line));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| format!("invalid hex {:?} in {:?}", &digits[i..i + 2], line))
        })
        .collect()
}

/// True when `bytes` start like a frame from either direction.
pub fn has_preamble(bytes: &[u8]) -> bool {
    bytes.starts_with(&PREAMBLE) || bytes.starts_with(&RESPONSE_PREAMBLE)
}
