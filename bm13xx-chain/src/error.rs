//! Crate-wide error type.

use thiserror::Error;

use crate::asic::bm13xx::ProtocolError;
use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("No response within the read timeout")]
    ProtocolTimeout,

    #[error("Chain initialization failed in state {state}: {source}")]
    InitializationFailed {
        state: SessionState,
        #[source]
        source: Box<Error>,
    },

    #[error("No chain at {path}: {source}")]
    NotFound {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation needs a {expected} session, session is {actual}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("Chain has no chips")]
    ChainEmpty,

    #[error("No driver registered for chip family {0:?}")]
    UnknownFamily(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
