//! Driver facade the host controller talks to.
//!
//! Each ASIC family implements [`ChainDriver`]. Drivers are created through a
//! [`DriverRegistry`], keyed by family tag, from a [`DriverContext`] that
//! carries everything a driver needs from its surroundings.

pub mod bm1370;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::asic::bm13xx::{JobDescriptor, Response};
use crate::config::ChainConfig;
use crate::error::{Error, Result};
use crate::transport::{Connector, SerialConnector};

pub use bm1370::Bm1370Driver;

/// A chain that finished discovery and is ready for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub family: &'static str,
    pub path: String,
    pub asic_count: usize,
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} ({} chip(s))",
            self.family, self.path, self.asic_count
        )
    }
}

/// Capabilities the host controller needs from a chain driver.
#[async_trait]
pub trait ChainDriver: Send {
    /// Family tag this driver was registered under.
    fn family(&self) -> &'static str;

    /// Open the chain at `path` and run its initialization sequence once.
    ///
    /// A chain that fails here is not usable and should not be registered
    /// with the host; call [`shutdown`](Self::shutdown) and try again later.
    async fn discover(&mut self, path: &str) -> Result<DeviceHandle>;

    /// Send one job to the chain.
    async fn submit_work(&mut self, job: &JobDescriptor) -> Result<()>;

    /// Next response from the chain, or `None` if nothing arrived within
    /// the read timeout.
    async fn poll_result(&mut self) -> Result<Option<Response>>;

    /// Human-readable one-line status.
    fn status(&self) -> String;

    /// Release the chain. Safe in any state and safe to repeat.
    async fn shutdown(&mut self);
}

/// What a driver receives from the process instead of global state.
#[derive(Clone)]
pub struct DriverContext {
    pub config: ChainConfig,
    pub connector: Arc<dyn Connector>,
}

impl DriverContext {
    pub fn new(config: ChainConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    /// Context that opens real serial devices.
    pub fn serial(config: ChainConfig) -> Self {
        Self::new(config, Arc::new(SerialConnector))
    }
}

impl fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Type alias for driver factory function
pub type DriverFactoryFn = fn(&DriverContext) -> Box<dyn ChainDriver>;

/// Registration entry for one chip family.
pub struct DriverDescriptor {
    /// Family tag, e.g. "BM1370"
    pub family: &'static str,
    pub create_fn: DriverFactoryFn,
}

/// Family tag to driver factory.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<&'static str, DriverDescriptor>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every driver this crate ships.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(bm1370::DESCRIPTOR);
        registry
    }

    /// Add a driver, replacing any earlier one for the same family.
    pub fn register(&mut self, descriptor: DriverDescriptor) {
        self.drivers.insert(descriptor.family, descriptor);
    }

    pub fn families(&self) -> Vec<&'static str> {
        let mut families: Vec<_> = self.drivers.keys().copied().collect();
        families.sort_unstable();
        families
    }

    /// Build a driver for `family`. Tags are matched case-insensitively.
    pub fn create(&self, family: &str, context: &DriverContext) -> Result<Box<dyn ChainDriver>> {
        let family = family.to_ascii_uppercase();
        let descriptor = self
            .drivers
            .get(family.as_str())
            .ok_or_else(|| Error::UnknownFamily(family.clone()))?;
        Ok((descriptor.create_fn)(context))
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("families", &self.families())
            .finish()
    }
}
