//! Host-side driver for chains of BM13xx mining ASICs on a serial link.
//!
//! The [`asic::bm13xx`] module holds the wire protocol: checksums, frames,
//! commands and chip responses. [`session`] runs the initialization sequence
//! over a [`transport`], and [`driver`] wraps a session in the interface a
//! mining host calls.

pub mod asic;
pub mod config;
pub mod driver;
pub mod error;
pub mod session;
pub mod tracing;
pub mod transport;

pub use config::ChainConfig;
pub use error::{Error, Result};
