//! Serial line transport.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream,
    StopBits,
};

use super::{Connector, Transport};
use crate::tracing::prelude::*;

/// Line settings applied when a chain is opened.
///
/// Data bits, parity, stop bits and flow control are fixed at 8N1 without
/// flow control; the rate and the read timeout are configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl SerialConfig {
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: Self::DEFAULT_BAUD_RATE,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
        }
    }
}

/// An open serial port, or a closed one. Never both.
pub struct SerialChannel {
    path: String,
    port: Option<SerialStream>,
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialChannel {
    /// Open `path`, drop anything already buffered on the line, then apply
    /// the line settings.
    pub fn open(path: &str, config: &SerialConfig) -> io::Result<Self> {
        let mut port = tokio_serial::new(path, config.baud_rate)
            .timeout(config.read_timeout)
            .open_native_async()?;

        port.clear(ClearBuffer::All)?;
        configure_port(&mut port, config.baud_rate)?;

        debug!(path, baud = config.baud_rate, "Opened serial channel");

        Ok(Self::from_stream(path, port, config))
    }

    /// Wrap a stream that is already open and configured.
    pub fn from_stream(path: &str, port: SerialStream, config: &SerialConfig) -> Self {
        Self {
            path: path.to_string(),
            port: Some(port),
            baud_rate: config.baud_rate,
            read_timeout: config.read_timeout,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn port(&mut self) -> io::Result<&mut SerialStream> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial channel is closed"))
    }
}

fn configure_port(port: &mut SerialStream, baud_rate: u32) -> io::Result<()> {
    port.set_baud_rate(baud_rate)?;
    port.set_data_bits(DataBits::Eight)?;
    port.set_parity(Parity::None)?;
    port.set_stop_bits(StopBits::One)?;
    port.set_flow_control(FlowControl::None)?;
    Ok(())
}

#[async_trait]
impl Transport for SerialChannel {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        // A full output buffer delays the frame, it never splits it.
        port.write_all(frame).await?;
        port.flush().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read_timeout = self.read_timeout;
        let port = self.port()?;
        match tokio::time::timeout(read_timeout, port.read(buf)).await {
            Ok(Ok(0)) | Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "no data within read timeout",
            )),
            Ok(result) => result,
        }
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.port()?.set_baud_rate(baud_rate)?;
        self.baud_rate = baud_rate;
        debug!(path = %self.path, baud = baud_rate, "Changed serial baud rate");
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.path, "Closed serial channel");
        }
    }
}

/// Opens [`SerialChannel`]s on the host's serial devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self, path: &str, config: &SerialConfig) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(SerialChannel::open(path, config)?))
    }
}
