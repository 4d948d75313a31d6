//! Work dispatched to the chain.

use bytes::{BufMut, BytesMut};

use super::error::ProtocolError;
use super::frame::{Frame, Header};

/// Size of one SHA-256 midstate.
pub const MIDSTATE_LEN: usize = 32;

/// One dispatchable unit of work.
///
/// Encoded as the payload of a job frame:
///
/// ```text
/// job_id | midstate_count | starting_nonce(4 LE) | nbits(4 LE) | ntime(4 LE)
///        | merkle4(4) | midstate(32) x midstate_count
/// ```
///
/// With the default 64-byte frame bound only single-midstate jobs fit; chains
/// fed several midstates per job need a larger bound on the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Carried on the wire unchanged; chips echo it in nonce responses.
    pub job_id: u8,
    pub starting_nonce: u32,
    /// Compact difficulty bits of the block header.
    pub nbits: u32,
    pub ntime: u32,
    /// Last four bytes of the merkle root, which fall outside the midstate.
    pub merkle4: [u8; 4],
    pub midstates: Vec<[u8; MIDSTATE_LEN]>,
}

impl JobDescriptor {
    /// Midstate count must be 1, 2 or 4.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self.midstates.len() {
            1 | 2 | 4 => Ok(()),
            n => Err(ProtocolError::InvalidMidstateCount(n)),
        }
    }

    pub fn payload(&self) -> Result<BytesMut, ProtocolError> {
        self.validate()?;

        let mut dst = BytesMut::with_capacity(18 + MIDSTATE_LEN * self.midstates.len());
        dst.put_u8(self.job_id);
        dst.put_u8(self.midstates.len() as u8);
        dst.put_u32_le(self.starting_nonce);
        dst.put_u32_le(self.nbits);
        dst.put_u32_le(self.ntime);
        dst.put_slice(&self.merkle4);
        for midstate in &self.midstates {
            dst.put_slice(midstate);
        }
        Ok(dst)
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Ok(Frame::new(Header::job(), self.payload()?.freeze()))
    }
}
