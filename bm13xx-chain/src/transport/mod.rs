//! Byte transport between the host and a chip chain.
//!
//! A [`Transport`] is one open link, exclusively owned by the session that
//! opened it. A [`Connector`] knows how to open links by device path; the
//! driver receives one through its context so tests can substitute a
//! scripted link for real hardware.

use std::io;

use async_trait::async_trait;

#[cfg(test)]
pub mod mock;
pub mod serial;

pub use serial::{SerialChannel, SerialConfig, SerialConnector};

#[async_trait]
pub trait Transport: Send {
    /// Write a complete frame, waiting for room on the line if needed. Fails
    /// only on an I/O error or a line that accepts nothing.
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Read whatever arrives within the read timeout. Fails with
    /// [`io::ErrorKind::TimedOut`] when nothing does.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Switch the host side of the line to a new rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()>;

    /// Discard bytes received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Release the underlying handle. Calling it again does nothing.
    fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, path: &str, config: &SerialConfig) -> io::Result<Box<dyn Transport>>;
}
