//! Host-to-chip frame layout.
//!
//! Every frame the host sends has the shape
//!
//! ```text
//! [0]=0x55 [1]=0xAA [2]=header [3]=length [4..]=payload [last 1 or 2]=checksum
//! ```
//!
//! The header byte packs the frame kind (bits 6-5), the group scope (bit 4)
//! and the operation (bits 3-0). The length field counts header, length,
//! payload and checksum, so a frame occupies `2 + length` bytes on the wire.
//! Command frames end in a CRC-5 byte; job frames end in a big-endian CRC-16.
//! Both checksums cover header, length and payload, never the preamble.

use std::fmt;

use bitvec::prelude::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use strum::FromRepr;
use tokio_util::codec::{Decoder, Encoder};

use super::crc::{crc16, crc5};
use super::error::ProtocolError;
use crate::error::Error;
use crate::tracing::prelude::*;

/// Sync bytes preceding every host frame.
pub const PREAMBLE: [u8; 2] = [0x55, 0xaa];

/// Largest frame, in bytes, the codec accepts unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64;

/// Smallest slice that can hold preamble, header and length.
const PREFIX_LEN: usize = PREAMBLE.len() + 2;

/// Wrapper for formatting byte slices as space-separated hex.
pub(crate) struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Frame type, bits 6-5 of the header.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Work for the chain, header bit 0x20
    Job = 1,
    /// Register/control command, header bit 0x40
    Command = 2,
}

impl FrameKind {
    /// Bytes of trailing checksum.
    pub const fn checksum_len(self) -> usize {
        match self {
            FrameKind::Job => 2,
            FrameKind::Command => 1,
        }
    }

    /// What the length field adds on top of the payload length: header,
    /// length and checksum.
    pub const fn length_overhead(self) -> usize {
        2 + self.checksum_len()
    }

    /// What the wire adds on top of the payload length.
    pub const fn frame_overhead(self) -> usize {
        PREAMBLE.len() + self.length_overhead()
    }
}

/// Addressing scope, bit 4 of the header.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Group {
    /// Only the chip named in the payload
    Single = 0,
    /// Every chip on the chain
    All = 1,
}

/// Operation, bits 3-0 of the header.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    SetAddress = 0,
    Write = 1,
    Read = 2,
    Inactive = 3,
}

/// Decoded header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: FrameKind,
    pub group: Group,
    pub operation: Operation,
}

impl Header {
    pub const fn new(kind: FrameKind, group: Group, operation: Operation) -> Self {
        Self {
            kind,
            group,
            operation,
        }
    }

    /// Header for a command frame.
    pub const fn command(group: Group, operation: Operation) -> Self {
        Self::new(FrameKind::Command, group, operation)
    }

    /// Header used for every job frame.
    pub const fn job() -> Self {
        Self::new(FrameKind::Job, Group::Single, Operation::Write)
    }
}

impl From<Header> for u8 {
    fn from(header: Header) -> u8 {
        let mut flags = 0u8;
        let field = flags.view_bits_mut::<Lsb0>();
        field[5..7].store(header.kind as u8);
        field[4..5].store(header.group as u8);
        field[0..4].store(header.operation as u8);
        flags
    }
}

impl TryFrom<u8> for Header {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        let field = byte.view_bits::<Lsb0>();
        if field[7] {
            return Err(ProtocolError::InvalidHeader(byte));
        }

        let kind = FrameKind::from_repr(field[5..7].load::<u8>());
        let group = Group::from_repr(field[4..5].load::<u8>());
        let operation = Operation::from_repr(field[0..4].load::<u8>());

        match (kind, group, operation) {
            (Some(kind), Some(group), Some(operation)) => Ok(Header::new(kind, group, operation)),
            _ => Err(ProtocolError::InvalidHeader(byte)),
        }
    }
}

/// One logical frame: a header and its payload.
///
/// Length field and checksum are derived when the frame is encoded, so a
/// `Frame` can never carry an inconsistent length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: Header, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Value of the length byte: payload plus header, length and checksum.
    pub fn length_field(&self) -> usize {
        self.payload.len() + self.header.kind.length_overhead()
    }

    /// Total bytes on the wire, preamble included.
    pub fn wire_len(&self) -> usize {
        self.payload.len() + self.header.kind.frame_overhead()
    }
}

/// Encode `payload` under `header` into a complete frame, using the default
/// frame bound.
pub fn encode(header: Header, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    FrameCodec::default().encode_frame(&Frame::new(header, Bytes::copy_from_slice(payload)))
}

/// Decode exactly one frame from `bytes`.
///
/// Unlike the streaming [`Decoder`], nothing is skipped: a bad preamble,
/// a short buffer, a wrong checksum or bytes left over after the frame are
/// all reported as errors.
pub fn decode(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    let (frame, used) = parse_frame(bytes)?;
    if used != bytes.len() {
        return Err(ProtocolError::TrailingBytes {
            extra: bytes.len() - used,
        });
    }
    Ok(frame)
}

/// Parse the frame at the start of `bytes`, returning it along with the
/// number of bytes it occupies.
fn parse_frame(bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    if bytes.len() < PREFIX_LEN {
        return Err(ProtocolError::Truncated {
            need: PREFIX_LEN,
            have: bytes.len(),
        });
    }

    if bytes[..2] != PREAMBLE {
        return Err(ProtocolError::BadSync {
            expected: PREAMBLE,
            found: [bytes[0], bytes[1]],
        });
    }

    let header = Header::try_from(bytes[2])?;
    let length_field = bytes[3];
    let overhead = header.kind.length_overhead();
    if (length_field as usize) < overhead {
        return Err(ProtocolError::InvalidLength(length_field));
    }

    let total = PREAMBLE.len() + length_field as usize;
    if bytes.len() < total {
        return Err(ProtocolError::Truncated {
            need: total,
            have: bytes.len(),
        });
    }

    let crc_start = total - header.kind.checksum_len();
    let body = &bytes[PREAMBLE.len()..crc_start];
    let (computed, received) = match header.kind {
        FrameKind::Job => (
            crc16(body),
            u16::from_be_bytes([bytes[crc_start], bytes[crc_start + 1]]),
        ),
        FrameKind::Command => (crc5(body) as u16, bytes[crc_start] as u16),
    };
    if computed != received {
        return Err(ProtocolError::ChecksumMismatch { computed, received });
    }

    let payload = Bytes::copy_from_slice(&bytes[PREFIX_LEN..crc_start]);
    Ok((Frame { header, payload }, total))
}

/// Codec for host frames with a configurable upper bound on frame size.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Encode a frame into a fresh buffer.
    ///
    /// The whole frame is assembled in memory so that it can be handed to the
    /// transport in a single write.
    pub fn encode_frame(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        let mut dst = BytesMut::with_capacity(frame.wire_len());
        self.put_frame(frame, &mut dst)?;
        Ok(dst.freeze())
    }

    fn put_frame(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let wire_len = frame.wire_len();
        // The length byte caps frames at 257 bytes regardless of the bound.
        if wire_len > self.max_frame_len || frame.length_field() > u8::MAX as usize {
            return Err(ProtocolError::PayloadTooLarge {
                len: wire_len,
                max: self.max_frame_len,
            });
        }

        dst.reserve(wire_len);
        dst.put_slice(&PREAMBLE);

        let start_pos = dst.len();
        dst.put_u8(frame.header.into());
        dst.put_u8(frame.length_field() as u8);
        dst.put_slice(&frame.payload);

        match frame.header.kind {
            FrameKind::Job => {
                let crc = crc16(&dst[start_pos..]);
                // CRC16 goes out high byte first
                dst.put_u16(crc);
            }
            FrameKind::Command => {
                let crc = crc5(&dst[start_pos..]);
                dst.put_u8(crc);
            }
        }

        trace!(
            header = ?frame.header,
            bytes = wire_len,
            frame = %HexBytes(&dst[start_pos - PREAMBLE.len()..]),
            "Encoded BM13xx frame"
        );

        Ok(())
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Ok(self.put_frame(&frame, dst)?)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Ok(None) asks to be called again, potentially with more data. An
        // invalid frame drops one byte so the search resumes at the next
        // candidate preamble.
        const CALL_AGAIN: Result<Option<Frame>, Error> = Ok(None);

        loop {
            if src.len() < PREFIX_LEN {
                return CALL_AGAIN;
            }

            // A length byte past the bound can only be line noise; waiting for
            // it to fill would stall every frame queued behind it.
            if src[..2] == PREAMBLE && PREAMBLE.len() + src[3] as usize > self.max_frame_len {
                trace!(length = src[3], "Length exceeds frame bound, skipping one byte");
                src.advance(1);
                continue;
            }

            match parse_frame(src) {
                Ok((frame, used)) => {
                    src.advance(used);
                    return Ok(Some(frame));
                }
                Err(ProtocolError::Truncated { .. }) => return CALL_AGAIN,
                Err(err) => {
                    trace!(error = %err, "Frame sync lost, skipping one byte");
                    src.advance(1);
                }
            }
        }
    }
}
