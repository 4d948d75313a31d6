//! Per-chain session: the initialization sequence and the link it drives.
//!
//! A session walks `Closed → Opened → VersionMaskSet → ChainQuiesced →
//! Ready`. Any failed write moves it to `Failed`, which is terminal: the
//! transport is released and the caller has to start over with a new
//! session. Nothing is retried here.

use std::io;

use bytes::BytesMut;
use strum::Display;
use tokio_util::codec::Decoder;

use crate::asic::bm13xx::{
    ChainCommand, DifficultyMask, Frame, FrameCodec, JobDescriptor, Response, ResponseCodec,
    VersionMask,
};
use crate::config::ChainConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use crate::transport::{Connector, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Closed,
    Opened,
    VersionMaskSet,
    ChainQuiesced,
    Ready,
    Failed,
}

/// What is known about the chain, updated as each setting is confirmed sent.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub frequency: Option<f32>,
    pub asic_count: usize,
    pub version_mask: VersionMask,
    pub difficulty_mask: Option<DifficultyMask>,
    pub baud_rate: u32,
    pub state: SessionState,
}

pub struct DeviceSession {
    path: String,
    config: ChainConfig,
    codec: FrameCodec,
    responses: ResponseCodec,
    transport: Option<Box<dyn Transport>>,
    rx_buf: BytesMut,
    info: DeviceInfo,
}

impl DeviceSession {
    pub fn new(path: impl Into<String>, config: ChainConfig) -> Self {
        let info = DeviceInfo {
            frequency: None,
            asic_count: config.asic_count,
            version_mask: VersionMask::disabled(),
            difficulty_mask: None,
            baud_rate: config.serial.baud_rate,
            state: SessionState::Closed,
        };
        Self {
            path: path.into(),
            codec: FrameCodec::with_max_frame_len(config.max_frame_len),
            responses: ResponseCodec,
            transport: None,
            rx_buf: BytesMut::with_capacity(64),
            config,
            info,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> SessionState {
        self.info.state
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// `Closed → Opened`. On failure the session stays `Closed`.
    pub async fn open(&mut self, connector: &dyn Connector) -> Result<()> {
        self.expect_state(SessionState::Closed)?;

        let transport = connector
            .open(&self.path, &self.config.serial)
            .await
            .map_err(|source| Error::NotFound {
                path: self.path.clone(),
                source,
            })?;

        self.transport = Some(transport);
        self.transition(SessionState::Opened);
        Ok(())
    }

    /// Run the initialization sequence on an opened session.
    ///
    /// Any failure leaves the session `Failed` and is reported as
    /// [`Error::InitializationFailed`], naming the state the session was in
    /// when the step failed.
    pub async fn initialize(&mut self) -> Result<()> {
        self.expect_state(SessionState::Opened)?;

        let version_mask = self.info.version_mask;
        self.init_step(&ChainCommand::SetVersionMask(version_mask))
            .await?;
        self.transition(SessionState::VersionMaskSet);

        self.init_step(&ChainCommand::ChainInactive).await?;
        self.transition(SessionState::ChainQuiesced);

        if self.config.assign_addresses {
            self.assign_addresses().await?;
        }
        self.tune().await?;

        self.transition(SessionState::Ready);
        info!(
            path = %self.path,
            asic_count = self.info.asic_count,
            baud = self.info.baud_rate,
            "Chain ready"
        );
        Ok(())
    }

    async fn assign_addresses(&mut self) -> Result<()> {
        let asic_count = self.info.asic_count;
        if asic_count == 0 {
            return Err(self.init_failure(self.state(), Error::ChainEmpty));
        }

        let interval = 256 / asic_count;
        for index in 0..asic_count {
            let chip_address = (index * interval) as u8;
            trace!(index, chip_address, "Assigning chip address");
            self.init_step(&ChainCommand::SetAddress { chip_address })
                .await?;
        }
        debug!(asic_count, interval, "Assigned chip addresses");
        Ok(())
    }

    async fn tune(&mut self) -> Result<()> {
        if let Some(difficulty) = self.config.difficulty {
            let mask = DifficultyMask::new(difficulty);
            self.init_step(&ChainCommand::SetDifficultyMask(mask)).await?;
            self.info.difficulty_mask = Some(mask);
        }

        if let Some(frequency) = self.config.frequency {
            self.init_step(&ChainCommand::SetFrequency(frequency))
                .await?;
            self.info.frequency = Some(frequency.mhz());
        }

        if let Some(baud) = self.config.baud {
            self.init_step(&ChainCommand::SetBaud(baud)).await?;
            if let Some(bps) = baud.bits_per_second() {
                if let Err(e) = self.switch_host_baud(bps) {
                    return Err(self.init_failure(self.state(), e.into()));
                }
                self.info.baud_rate = bps;
            }
        }

        Ok(())
    }

    fn switch_host_baud(&mut self, bps: u32) -> io::Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport released"))?;
        transport.set_baud_rate(bps)?;
        transport.clear_input()?;
        self.rx_buf.clear();
        Ok(())
    }

    async fn init_step(&mut self, command: &ChainCommand) -> Result<()> {
        trace!(?command, "Init command");
        let state = self.state();
        let frame = command.to_frame();
        match self.send(&frame).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.init_failure(state, e)),
        }
    }

    /// Fail the session and wrap `source` with the state the step ran in.
    fn init_failure(&mut self, state: SessionState, source: Error) -> Error {
        self.fail();
        Error::InitializationFailed {
            state,
            source: Box::new(source),
        }
    }

    /// Encode a job and write it to the chain.
    ///
    /// Encoding happens entirely in memory first, so a job that cannot be
    /// encoded never reaches the wire and leaves the session `Ready`.
    pub async fn submit_work(&mut self, job: &JobDescriptor) -> Result<()> {
        self.expect_state(SessionState::Ready)?;
        if self.info.asic_count == 0 {
            return Err(Error::ChainEmpty);
        }

        let frame = job.to_frame()?;
        self.send(&frame).await?;
        trace!(job_id = job.job_id, "Job sent");
        Ok(())
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = self.codec.encode_frame(frame)?;

        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::InvalidState {
                expected: SessionState::Opened,
                actual: self.info.state,
            });
        };

        let written = transport.write_frame(&bytes).await;
        if let Err(e) = written {
            error!(path = %self.path, error = %e, "Write to chain failed");
            self.fail();
            return Err(e.into());
        }
        Ok(())
    }

    /// Wait for the next chip response.
    ///
    /// Each read waits at most the configured read timeout; if one passes
    /// without a byte arriving the call fails with
    /// [`Error::ProtocolTimeout`], which leaves the session as it was.
    pub async fn read_response(&mut self) -> Result<Response> {
        let mut chunk = [0u8; 64];
        loop {
            if let Some(response) = self.responses.decode(&mut self.rx_buf)? {
                return Ok(response);
            }

            let Some(transport) = self.transport.as_mut() else {
                return Err(Error::InvalidState {
                    expected: SessionState::Ready,
                    actual: self.info.state,
                });
            };

            let read = transport.read(&mut chunk).await;
            match read {
                Ok(n) => self.rx_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(Error::ProtocolTimeout)
                }
                Err(e) => {
                    error!(path = %self.path, error = %e, "Read from chain failed");
                    self.fail();
                    return Err(e.into());
                }
            }
        }
    }

    /// Release the transport whatever state the session is in. A `Failed`
    /// session stays `Failed`; any other becomes `Closed`.
    pub fn shutdown(&mut self) {
        let released = self.release();
        if self.info.state != SessionState::Failed {
            self.info.state = SessionState::Closed;
        }
        if released {
            info!(path = %self.path, "Chain shut down");
        }
    }

    fn fail(&mut self) {
        if self.info.state == SessionState::Failed {
            return;
        }
        warn!(path = %self.path, state = %self.info.state, "Chain session failed");
        self.info.state = SessionState::Failed;
        self.release();
    }

    fn release(&mut self) -> bool {
        match self.transport.take() {
            Some(mut transport) => {
                transport.close();
                true
            }
            None => false,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(path = %self.path, from = %self.info.state, to = %next, "Session state");
        self.info.state = next;
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.info.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected,
                actual: self.info.state,
            })
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asic::bm13xx::{BaudRate, Frequency, ProtocolError};
    use crate::transport::mock::MockConnector;

    const VERSION_MASK: [u8; 11] = [
        0x55, 0xaa, 0x51, 0x09, 0x00, 0xa4, 0x90, 0x00, 0x00, 0x00, 0x17,
    ];
    const CHAIN_INACTIVE: [u8; 7] = [0x55, 0xaa, 0x53, 0x05, 0x00, 0x00, 0x03];

    fn job() -> JobDescriptor {
        JobDescriptor {
            job_id: 1,
            starting_nonce: 0,
            nbits: 0x1705_dd01,
            ntime: 0x6650_0000,
            merkle4: [1, 2, 3, 4],
            midstates: vec![[0x11; 32]],
        }
    }

    async fn ready_session(connector: &MockConnector, config: ChainConfig) -> DeviceSession {
        let mut session = DeviceSession::new("/dev/ttyTEST", config);
        session.open(connector).await.unwrap();
        session.initialize().await.unwrap();
        session
    }

    #[test]
    fn state_names() {
        assert_eq!(SessionState::Closed.to_string(), "Closed");
        assert_eq!(SessionState::VersionMaskSet.to_string(), "VersionMaskSet");
        assert_eq!(SessionState::ChainQuiesced.to_string(), "ChainQuiesced");
        assert_eq!(SessionState::Failed.to_string(), "Failed");
    }

    #[tokio::test]
    async fn minimal_initialization_sequence() {
        let connector = MockConnector::new();
        let session = ready_session(&connector, ChainConfig::default()).await;

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(
            connector.writes(),
            vec![VERSION_MASK.to_vec(), CHAIN_INACTIVE.to_vec()]
        );
        assert_eq!(connector.state().opened, vec!["/dev/ttyTEST".to_string()]);

        let info = session.info();
        assert_eq!(info.asic_count, 1);
        assert_eq!(info.baud_rate, 115_200);
        assert_eq!(info.frequency, None);
        assert_eq!(info.difficulty_mask, None);
    }

    #[tokio::test]
    async fn open_failure_stays_closed() {
        let connector = MockConnector::failing_open();
        let mut session = DeviceSession::new("/dev/ttyTEST", ChainConfig::default());

        let err = session.open(&connector).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(connector.writes().is_empty());
        assert_eq!(connector.closes(), 0);

        session.shutdown();
        assert_eq!(connector.closes(), 0);
    }

    #[tokio::test]
    async fn version_mask_failure_fails_once_and_releases() {
        let connector = MockConnector::failing_write(0);
        let mut session = DeviceSession::new("/dev/ttyTEST", ChainConfig::default());
        session.open(&connector).await.unwrap();

        let err = session.initialize().await.unwrap_err();
        let Error::InitializationFailed { state, source } = err else {
            panic!("Expected initialization failure, got {err:?}");
        };
        assert_eq!(state, SessionState::Opened);
        assert!(matches!(*source, Error::Io(_)));

        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(connector.closes(), 1);
        assert!(connector.writes().is_empty());

        session.shutdown();
        session.shutdown();
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn chain_inactive_failure_reports_version_mask_state() {
        let connector = MockConnector::failing_write(1);
        let mut session = DeviceSession::new("/dev/ttyTEST", ChainConfig::default());
        session.open(&connector).await.unwrap();

        let err = session.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InitializationFailed {
                state: SessionState::VersionMaskSet,
                ..
            }
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(connector.writes(), vec![VERSION_MASK.to_vec()]);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn failed_session_is_terminal() {
        let connector = MockConnector::failing_write(0);
        let mut session = DeviceSession::new("/dev/ttyTEST", ChainConfig::default());
        session.open(&connector).await.unwrap();
        let _ = session.initialize().await;

        assert!(matches!(
            session.open(&connector).await,
            Err(Error::InvalidState {
                expected: SessionState::Closed,
                actual: SessionState::Failed,
            })
        ));
        assert!(matches!(
            session.submit_work(&job()).await,
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(connector.state().opened.len(), 1);
    }

    #[tokio::test]
    async fn address_assignment_spreads_addresses() {
        let connector = MockConnector::new();
        let config = ChainConfig {
            asic_count: 4,
            assign_addresses: true,
            ..ChainConfig::default()
        };
        let session = ready_session(&connector, config).await;
        assert_eq!(session.state(), SessionState::Ready);

        let writes = connector.writes();
        assert_eq!(writes.len(), 6);
        let addresses: Vec<u8> = writes[2..].iter().map(|w| w[4]).collect();
        assert_eq!(addresses, vec![0x00, 0x40, 0x80, 0xc0]);
        assert!(writes[2..].iter().all(|w| w[2] == 0x40));
        assert_eq!(writes[4], vec![0x55, 0xaa, 0x40, 0x05, 0x80, 0x00, 0x10]);
    }

    #[tokio::test]
    async fn tuning_runs_in_order_and_switches_host_baud() {
        let connector = MockConnector::new();
        let config = ChainConfig {
            difficulty: Some(256),
            frequency: Some(Frequency::from_mhz(500.0).unwrap()),
            baud: Some(BaudRate::Baud1M),
            ..ChainConfig::default()
        };
        let session = ready_session(&connector, config).await;

        let registers: Vec<u8> = connector.writes()[2..].iter().map(|w| w[5]).collect();
        assert_eq!(registers, vec![0x14, 0x08, 0x28]);
        assert_eq!(connector.state().baud_changes, vec![1_000_000]);
        assert_eq!(connector.state().input_clears, 1);

        let info = session.info();
        assert_eq!(info.difficulty_mask, Some(DifficultyMask::new(256)));
        assert_eq!(info.frequency, Some(500.0));
        assert_eq!(info.baud_rate, 1_000_000);
    }

    #[tokio::test]
    async fn tuning_failure_fails_session() {
        let connector = MockConnector::failing_write(2);
        let config = ChainConfig {
            difficulty: Some(256),
            ..ChainConfig::default()
        };
        let mut session = DeviceSession::new("/dev/ttyTEST", config);
        session.open(&connector).await.unwrap();

        let err = session.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InitializationFailed {
                state: SessionState::ChainQuiesced,
                ..
            }
        ));
        assert_eq!(session.info().difficulty_mask, None);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn submit_work_writes_one_job_frame() {
        let connector = MockConnector::new();
        let mut session = ready_session(&connector, ChainConfig::default()).await;

        session.submit_work(&job()).await.unwrap();

        let writes = connector.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[2].len(), 56);
        assert_eq!(&writes[2][..5], &[0x55, 0xaa, 0x21, 0x36, 0x01]);
    }

    #[tokio::test]
    async fn oversized_job_never_reaches_the_wire() {
        let connector = MockConnector::new();
        let mut session = ready_session(&connector, ChainConfig::default()).await;

        let mut job = job();
        job.midstates = vec![[0x22; 32]; 4];
        let err = session.submit_work(&job).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::PayloadTooLarge { .. })
        ));
        assert_eq!(connector.writes().len(), 2);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn job_write_failure_fails_session() {
        let connector = MockConnector::failing_write(2);
        let mut session = ready_session(&connector, ChainConfig::default()).await;

        assert!(matches!(
            session.submit_work(&job()).await,
            Err(Error::Io(_))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn empty_chain_rejects_jobs() {
        let connector = MockConnector::new();
        let config = ChainConfig {
            asic_count: 0,
            ..ChainConfig::default()
        };
        let mut session = ready_session(&connector, config).await;

        assert!(matches!(
            session.submit_work(&job()).await,
            Err(Error::ChainEmpty)
        ));
        assert_eq!(connector.writes().len(), 2);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn read_response_decodes_and_times_out() {
        let connector = MockConnector::new();
        let mut session = ready_session(&connector, ChainConfig::default()).await;

        connector.push_rx(&[0x00, 0xaa, 0x55, 0x18, 0x00, 0xa6, 0x40]);
        connector.push_rx(&[0x02, 0x99, 0x22, 0xf9, 0x91]);

        let response = session.read_response().await.unwrap();
        assert!(matches!(
            response,
            Response::Nonce {
                nonce: 0x40a6_0018,
                job_id: 9,
                ..
            }
        ));

        assert!(matches!(
            session.read_response().await,
            Err(Error::ProtocolTimeout)
        ));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let connector = MockConnector::new();
        let mut session = ready_session(&connector, ChainConfig::default()).await;

        session.shutdown();
        session.shutdown();
        drop(session);

        assert_eq!(connector.closes(), 1);
    }
}
