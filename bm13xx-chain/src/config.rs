//! Chain configuration.
//!
//! Parses environment variables into the scalar inputs a chain needs before
//! discovery runs: where it is, what it is, and how to tune it.

use crate::asic::bm13xx::frame::DEFAULT_MAX_FRAME_LEN;
use crate::asic::bm13xx::register::{BaudRate, Frequency};
use crate::error::{Error, Result};
use crate::transport::SerialConfig;

/// Chains are addressed with one byte, so at most 256 chips.
pub const MAX_ASIC_COUNT: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    /// Serial device the chain is attached to.
    pub device_path: String,

    /// Driver family tag looked up in the registry.
    pub family: String,

    /// Number of chips on the chain.
    pub asic_count: usize,

    /// PLL frequency programmed during initialisation, if any.
    pub frequency: Option<Frequency>,

    /// ASIC difficulty programmed into the ticket mask, if any.
    pub difficulty: Option<u32>,

    /// Baud rate the chain is switched to at the end of initialisation.
    pub baud: Option<BaudRate>,

    /// Give every chip an address before declaring the chain ready.
    pub assign_addresses: bool,

    /// Upper bound on encoded frame size.
    pub max_frame_len: usize,

    pub serial: SerialConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/ttyUSB0".to_string(),
            family: "BM1370".to_string(),
            asic_count: 1,
            frequency: None,
            difficulty: None,
            baud: None,
            assign_addresses: false,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            serial: SerialConfig::default(),
        }
    }
}

impl ChainConfig {
    /// Parse configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BM13XX_DEVICE`: serial device path (default: /dev/ttyUSB0)
    /// - `BM13XX_FAMILY`: chip family (default: BM1370)
    /// - `BM13XX_ASIC_COUNT`: chips on the chain, 1-256 (default: 1)
    /// - `BM13XX_FREQUENCY`: frequency in MHz, 50-800 (default: unset)
    /// - `BM13XX_DIFFICULTY`: ASIC difficulty (default: unset)
    /// - `BM13XX_BAUD`: 115200, 1000000 or 3000000 (default: unset)
    /// - `BM13XX_ASSIGN_ADDRESSES`: true/false/1/0 (default: false)
    /// - `BM13XX_MAX_FRAME_LEN`: frame bound in bytes (default: 64)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("BM13XX_DEVICE") {
            config.device_path = path;
        }
        if let Some(family) = lookup("BM13XX_FAMILY") {
            config.family = family.to_ascii_uppercase();
        }
        if let Some(count) = lookup("BM13XX_ASIC_COUNT") {
            config.asic_count = parse("BM13XX_ASIC_COUNT", &count)?;
        }
        if let Some(mhz) = lookup("BM13XX_FREQUENCY") {
            let mhz: f32 = parse("BM13XX_FREQUENCY", &mhz)?;
            config.frequency = Some(
                Frequency::from_mhz(mhz)
                    .map_err(|e| Error::Config(format!("BM13XX_FREQUENCY: {}", e)))?,
            );
        }
        if let Some(difficulty) = lookup("BM13XX_DIFFICULTY") {
            config.difficulty = Some(parse("BM13XX_DIFFICULTY", &difficulty)?);
        }
        if let Some(baud) = lookup("BM13XX_BAUD") {
            let bps: u32 = parse("BM13XX_BAUD", &baud)?;
            config.baud = Some(
                BaudRate::try_from(bps)
                    .map_err(|e| Error::Config(format!("BM13XX_BAUD: {}", e)))?,
            );
        }
        if let Some(flag) = lookup("BM13XX_ASSIGN_ADDRESSES") {
            config.assign_addresses = parse_flag("BM13XX_ASSIGN_ADDRESSES", &flag)?;
        }
        if let Some(len) = lookup("BM13XX_MAX_FRAME_LEN") {
            config.max_frame_len = parse("BM13XX_MAX_FRAME_LEN", &len)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_ASIC_COUNT).contains(&self.asic_count) {
            return Err(Error::Config(format!(
                "asic count {} outside 1-{}",
                self.asic_count, MAX_ASIC_COUNT
            )));
        }
        // Room for the largest command frame, an 11-byte register write.
        if self.max_frame_len < 11 {
            return Err(Error::Config(format!(
                "frame bound {} too small for register writes",
                self.max_frame_len
            )));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}: invalid value {:?}", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{}: invalid flag {:?}", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 8] = [
        "BM13XX_DEVICE",
        "BM13XX_FAMILY",
        "BM13XX_ASIC_COUNT",
        "BM13XX_FREQUENCY",
        "BM13XX_DIFFICULTY",
        "BM13XX_BAUD",
        "BM13XX_ASSIGN_ADDRESSES",
        "BM13XX_MAX_FRAME_LEN",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_nothing_set() {
        clear_env();

        let config = ChainConfig::from_env().unwrap();
        assert_eq!(config, ChainConfig::default());
        assert_eq!(config.device_path, "/dev/ttyUSB0");
        assert_eq!(config.asic_count, 1);
        assert_eq!(config.max_frame_len, 64);
    }

    #[test]
    #[serial]
    fn test_full_configuration() {
        clear_env();
        std::env::set_var("BM13XX_DEVICE", "/dev/ttyACM1");
        std::env::set_var("BM13XX_FAMILY", "bm1370");
        std::env::set_var("BM13XX_ASIC_COUNT", "4");
        std::env::set_var("BM13XX_FREQUENCY", "525");
        std::env::set_var("BM13XX_DIFFICULTY", "256");
        std::env::set_var("BM13XX_BAUD", "1000000");
        std::env::set_var("BM13XX_ASSIGN_ADDRESSES", "true");
        std::env::set_var("BM13XX_MAX_FRAME_LEN", "256");

        let config = ChainConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.device_path, "/dev/ttyACM1");
        assert_eq!(config.family, "BM1370");
        assert_eq!(config.asic_count, 4);
        assert_eq!(config.frequency.map(|f| f.mhz()), Some(525.0));
        assert_eq!(config.difficulty, Some(256));
        assert_eq!(config.baud, Some(BaudRate::Baud1M));
        assert!(config.assign_addresses);
        assert_eq!(config.max_frame_len, 256);
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_config_errors() {
        for (var, value) in [
            ("BM13XX_ASIC_COUNT", "0"),
            ("BM13XX_ASIC_COUNT", "257"),
            ("BM13XX_ASIC_COUNT", "many"),
            ("BM13XX_FREQUENCY", "900"),
            ("BM13XX_BAUD", "9600"),
            ("BM13XX_ASSIGN_ADDRESSES", "maybe"),
            ("BM13XX_MAX_FRAME_LEN", "8"),
        ] {
            clear_env();
            std::env::set_var(var, value);
            let result = ChainConfig::from_env();
            clear_env();
            assert!(
                matches!(result, Err(Error::Config(_))),
                "{}={} should be rejected",
                var,
                value
            );
        }
    }

    #[test]
    fn test_lookup_without_environment() {
        let config = ChainConfig::from_lookup(|key| match key {
            "BM13XX_ASIC_COUNT" => Some("256".to_string()),
            "BM13XX_ASSIGN_ADDRESSES" => Some("1".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.asic_count, 256);
        assert!(config.assign_addresses);
    }
}
