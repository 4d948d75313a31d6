//! Chip-to-host responses.
//!
//! Every response is 11 bytes: the preamble `AA 55`, eight data bytes, and a
//! final byte holding the response type in its top three bits and a CRC-5 in
//! the low five. The CRC covers the type bits too, so the CRC-5 over the nine
//! bytes after the preamble comes out zero for an intact frame.

use bitvec::prelude::*;
use bytes::{Buf, BytesMut};
use strum::FromRepr;
use tokio_util::codec::Decoder;

use super::crc::{crc5, crc5_is_valid};
use super::error::ProtocolError;
use super::frame::HexBytes;
use super::register::{Register, RegisterAddress};
use crate::error::Error;
use crate::tracing::prelude::*;

pub const RESPONSE_PREAMBLE: [u8; 2] = [0xaa, 0x55];
pub const RESPONSE_LEN: usize = RESPONSE_PREAMBLE.len() + 9;

#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseType {
    ReadRegister = 0,
    Nonce = 4,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    ReadRegister {
        chip_address: u8,
        register: Register,
    },
    Nonce {
        nonce: u32,
        /// Job id echoed from the job frame, upper nibble of the result header
        job_id: u8,
        midstate_num: u8,
        /// Rolled version bits, big-endian on the wire
        version: u16,
        subcore_id: u8,
    },
}

impl Response {
    /// Decode the nine bytes following the preamble. The CRC must already
    /// have been checked.
    fn decode_body(body: &[u8]) -> Result<Response, ProtocolError> {
        let mut bytes = body;
        let type_and_crc = body[body.len() - 1].view_bits::<Lsb0>();
        let type_repr = type_and_crc[5..].load::<u8>();

        match ResponseType::from_repr(type_repr) {
            Some(ResponseType::ReadRegister) => {
                let value = [
                    bytes.get_u8(),
                    bytes.get_u8(),
                    bytes.get_u8(),
                    bytes.get_u8(),
                ];
                let chip_address = bytes.get_u8();
                let register_address = RegisterAddress::try_from(bytes.get_u8())?;

                Ok(Response::ReadRegister {
                    chip_address,
                    register: Register::decode(register_address, &value),
                })
            }
            Some(ResponseType::Nonce) => {
                let nonce = bytes.get_u32_le();
                let midstate_num = bytes.get_u8();
                let result_header = bytes.get_u8();
                let version = bytes.get_u16();

                Ok(Response::Nonce {
                    nonce,
                    job_id: (result_header >> 4) & 0x0f,
                    midstate_num,
                    version,
                    subcore_id: result_header & 0x0f,
                })
            }
            None => Err(ProtocolError::InvalidResponseType(type_repr)),
        }
    }
}

/// Decode exactly one response frame, reporting what is wrong with it.
pub fn parse(bytes: &[u8]) -> Result<Response, ProtocolError> {
    if bytes.len() < RESPONSE_LEN {
        return Err(ProtocolError::Truncated {
            need: RESPONSE_LEN,
            have: bytes.len(),
        });
    }
    if bytes.len() > RESPONSE_LEN {
        return Err(ProtocolError::TrailingBytes {
            extra: bytes.len() - RESPONSE_LEN,
        });
    }
    if bytes[..2] != RESPONSE_PREAMBLE {
        return Err(ProtocolError::BadSync {
            expected: RESPONSE_PREAMBLE,
            found: [bytes[0], bytes[1]],
        });
    }

    let body = &bytes[2..];
    if !crc5_is_valid(body) {
        return Err(ProtocolError::ChecksumMismatch {
            computed: expected_crc(body) as u16,
            received: (body[8] & 0x1f) as u16,
        });
    }

    Response::decode_body(body)
}

/// The CRC bits that would make `body` valid, keeping its type bits.
fn expected_crc(body: &[u8]) -> u8 {
    let mut candidate = [0u8; 9];
    candidate.copy_from_slice(&body[..9]);
    let type_bits = body[8] & 0xe0;
    (0..32u8)
        .find(|crc| {
            candidate[8] = type_bits | crc;
            crc5(&candidate) == 0
        })
        .unwrap_or(0)
}

/// Stream decoder for chip responses.
///
/// Garbage, corrupt frames and frames of unknown type are skipped one byte at
/// a time until a valid frame lines up with the front of the buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseCodec;

impl Decoder for ResponseCodec {
    type Item = Response;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Returning an error terminates a framed stream, so invalid input only
        // ever advances the buffer.
        const CALL_AGAIN: Result<Option<Response>, Error> = Ok(None);

        loop {
            if src.len() < RESPONSE_LEN {
                return CALL_AGAIN;
            }

            if src[..2] != RESPONSE_PREAMBLE {
                src.advance(1);
                continue;
            }

            if !crc5_is_valid(&src[2..RESPONSE_LEN]) {
                trace!("Response sync lost: CRC5 failed, searching for next frame");
                src.advance(1);
                continue;
            }

            match Response::decode_body(&src[2..RESPONSE_LEN]) {
                Ok(response) => {
                    trace!(
                        resp = ?response,
                        frame = %HexBytes(&src[..RESPONSE_LEN]),
                        "RX BM13xx"
                    );
                    src.advance(RESPONSE_LEN);
                    return Ok(Some(response));
                }
                Err(err) => {
                    warn!(error = %err, "Failed to decode response");
                    src.advance(1);
                }
            }
        }
    }
}
