//! BM1370 chain driver.

use async_trait::async_trait;

use super::{ChainDriver, DeviceHandle, DriverContext, DriverDescriptor};
use crate::asic::bm13xx::{JobDescriptor, Response};
use crate::error::{Error, Result};
use crate::session::{DeviceSession, SessionState};
use crate::tracing::prelude::*;

pub const FAMILY: &str = "BM1370";

pub const DESCRIPTOR: DriverDescriptor = DriverDescriptor {
    family: FAMILY,
    create_fn: create,
};

fn create(context: &DriverContext) -> Box<dyn ChainDriver> {
    Box::new(Bm1370Driver::new(context.clone()))
}

pub struct Bm1370Driver {
    context: DriverContext,
    session: Option<DeviceSession>,
}

impl Bm1370Driver {
    pub fn new(context: DriverContext) -> Self {
        Self {
            context,
            session: None,
        }
    }

    fn ready_session(&mut self) -> Result<&mut DeviceSession> {
        match self.session.as_mut() {
            Some(session) => Ok(session),
            None => Err(Error::InvalidState {
                expected: SessionState::Ready,
                actual: SessionState::Closed,
            }),
        }
    }
}

#[async_trait]
impl ChainDriver for Bm1370Driver {
    fn family(&self) -> &'static str {
        FAMILY
    }

    async fn discover(&mut self, path: &str) -> Result<DeviceHandle> {
        if let Some(mut previous) = self.session.take() {
            previous.shutdown();
        }

        let session = self
            .session
            .insert(DeviceSession::new(path, self.context.config.clone()));

        session.open(self.context.connector.as_ref()).await?;
        session.initialize().await?;

        let handle = DeviceHandle {
            family: FAMILY,
            path: path.to_string(),
            asic_count: session.info().asic_count,
        };
        info!(chain = %handle, "Discovered chain");
        Ok(handle)
    }

    async fn submit_work(&mut self, job: &JobDescriptor) -> Result<()> {
        self.ready_session()?.submit_work(job).await
    }

    async fn poll_result(&mut self) -> Result<Option<Response>> {
        match self.ready_session()?.read_response().await {
            Ok(response) => Ok(Some(response)),
            Err(Error::ProtocolTimeout) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn status(&self) -> String {
        let Some(session) = &self.session else {
            return format!("{}: not initialized", FAMILY);
        };

        let info = session.info();
        match info.state {
            SessionState::Ready => {
                let mut status = format!(
                    "{} {}: Ready, {} chip(s), {} baud",
                    FAMILY,
                    session.path(),
                    info.asic_count,
                    info.baud_rate
                );
                if let Some(mhz) = info.frequency {
                    status.push_str(&format!(", {} MHz", mhz));
                }
                status
            }
            SessionState::Failed => {
                format!("{} {}: Failed, not usable", FAMILY, session.path())
            }
            state => format!("{} {}: {}", FAMILY, session.path(), state),
        }
    }

    async fn shutdown(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.shutdown();
        }
    }
}
