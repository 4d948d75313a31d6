//! Scripted transport for tests.
//!
//! Every transport a [`MockConnector`] opens shares the connector's
//! [`MockState`], so a test can script received bytes and failures up front
//! and inspect the writes and closes afterwards.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Connector, SerialConfig, Transport};

#[derive(Debug, Default)]
pub struct MockState {
    pub opened: Vec<String>,
    pub writes: Vec<Vec<u8>>,
    pub write_attempts: usize,
    pub closes: usize,
    pub baud_changes: Vec<u32>,
    pub input_clears: usize,
    pub fail_open: bool,
    /// Zero-based index of the write attempt that fails.
    pub fail_on_write: Option<usize>,
    pub rx: VecDeque<u8>,
}

#[derive(Debug, Default, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_open() -> Self {
        let connector = Self::new();
        connector.state().fail_open = true;
        connector
    }

    pub fn failing_write(index: usize) -> Self {
        let connector = Self::new();
        connector.state().fail_on_write = Some(index);
        connector
    }

    pub fn push_rx(&self, bytes: &[u8]) {
        self.state().rx.extend(bytes);
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, path: &str, _config: &SerialConfig) -> io::Result<Box<dyn Transport>> {
        let mut state = self.state();
        if state.fail_open {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        state.opened.push(path.to_string());
        Ok(Box::new(MockTransport {
            state: Arc::clone(&self.state),
            open: true,
        }))
    }
}

pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl MockTransport {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        let attempt = state.write_attempts;
        state.write_attempts += 1;
        if state.fail_on_write == Some(attempt) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
        }
        state.writes.push(frame.to_vec());
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.state().baud_changes.push(baud_rate);
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let mut state = self.state();
        state.input_clears += 1;
        state.rx.clear();
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.state().closes += 1;
        }
    }
}
