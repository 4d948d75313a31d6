//! BM13xx family chip support.
//!
//! Wire protocol for chains of BM13xx mining chips (BM1366, BM1370, etc):
//! checksums, host frames, the command catalog, jobs and chip responses.

pub mod command;
pub mod crc;
pub mod error;
pub mod frame;
pub mod job;
pub mod register;
pub mod response;

pub use command::{ChainCommand, Target};
pub use error::ProtocolError;
pub use frame::{decode, encode, Frame, FrameCodec, FrameKind, Group, Header, Operation};
pub use job::JobDescriptor;
pub use register::{BaudRate, DifficultyMask, Frequency, VersionMask};
pub use response::{Response, ResponseCodec};
