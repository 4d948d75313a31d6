//! Chip registers and the encodings of the values written to them.
//!
//! Register writes carry four data bytes after the chip and register
//! addresses. Most registers are plain little-endian words; the version mask,
//! ticket (difficulty) mask, PLL divider and UART baud registers have the
//! layouts described on their types below.

use std::fmt;

use strum::FromRepr;

use super::error::ProtocolError;

#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegisterAddress {
    ChipId = 0x00,
    PllDivider = 0x08,
    NonceRange = 0x10,
    TicketMask = 0x14,
    MiscControl = 0x18,
    UartBaud = 0x28,
    Core = 0x3C,
    VersionMask = 0xA4,
    InitControl = 0xA8,
}

impl TryFrom<u8> for RegisterAddress {
    type Error = ProtocolError;

    fn try_from(repr: u8) -> Result<Self, Self::Error> {
        Self::from_repr(repr).ok_or(ProtocolError::InvalidRegisterAddress(repr))
    }
}

/// Known chip types in the BM13xx family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipType {
    BM1366,
    BM1368,
    BM1370,
    BM1397,
    /// Unknown chip type with raw ID bytes
    Unknown([u8; 2]),
}

impl ChipType {
    /// Get the raw chip ID bytes
    pub fn id_bytes(&self) -> [u8; 2] {
        match self {
            Self::BM1366 => [0x13, 0x66],
            Self::BM1368 => [0x13, 0x68],
            Self::BM1370 => [0x13, 0x70],
            Self::BM1397 => [0x13, 0x97],
            Self::Unknown(bytes) => *bytes,
        }
    }
}

impl From<[u8; 2]> for ChipType {
    fn from(bytes: [u8; 2]) -> Self {
        match bytes {
            [0x13, 0x66] => Self::BM1366,
            [0x13, 0x68] => Self::BM1368,
            [0x13, 0x70] => Self::BM1370,
            [0x13, 0x97] => Self::BM1397,
            _ => Self::Unknown(bytes),
        }
    }
}

/// Version-rolling mask.
///
/// On the wire the register holds a fixed control half-word that enables
/// rolling, followed by the 16 rollable version bits, both little-endian.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VersionMask {
    mask: u16,
    control: u16,
}

impl VersionMask {
    const FULL_MASK: u16 = 0xffff;
    const ENABLE_ROLLING: u16 = 0x0090;

    pub const fn new(mask: u16) -> Self {
        Self {
            mask,
            control: Self::ENABLE_ROLLING,
        }
    }

    /// Mask written during initialisation: rolling enabled, no bits rollable.
    pub const fn disabled() -> Self {
        Self::new(0)
    }

    /// All lower 16 bits rollable.
    pub const fn full_rolling() -> Self {
        Self::new(Self::FULL_MASK)
    }

    pub fn mask(&self) -> u16 {
        self.mask
    }
}

impl fmt::Debug for VersionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let control_str = if self.control == Self::ENABLE_ROLLING {
            "ENABLE_ROLLING".to_string()
        } else {
            format!("{:#06x}", self.control)
        };
        f.debug_struct("VersionMask")
            .field("mask", &format_args!("{:#06x}", self.mask))
            .field("control", &control_str)
            .finish()
    }
}

impl From<VersionMask> for [u8; 4] {
    fn from(mask: VersionMask) -> Self {
        let mut bytes = [0u8; 4];
        bytes[0..2].copy_from_slice(&mask.control.to_le_bytes());
        bytes[2..4].copy_from_slice(&mask.mask.to_le_bytes());
        bytes
    }
}

impl From<[u8; 4]> for VersionMask {
    fn from(bytes: [u8; 4]) -> Self {
        Self {
            control: u16::from_le_bytes([bytes[0], bytes[1]]),
            mask: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}

/// Nonce-acceptance threshold, programmed through the ticket mask register.
///
/// The chip reports a nonce only when the hash clears the given difficulty.
/// Only powers of two are representable: the difficulty is rounded down and
/// the register receives `difficulty - 1`, with byte order reversed and each
/// byte bit-reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyMask {
    difficulty: u32,
}

impl DifficultyMask {
    /// Rounds `difficulty` down to a power of two; zero is treated as one.
    pub const fn new(difficulty: u32) -> Self {
        Self {
            difficulty: largest_power_of_two(difficulty),
        }
    }

    /// The effective (power of two) difficulty.
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    fn mask_value(&self) -> u32 {
        self.difficulty - 1
    }

    pub fn to_wire_bytes(&self) -> [u8; 4] {
        let mask_value = self.mask_value();
        let mut bytes = [0u8; 4];
        for i in 0..4 {
            let byte = ((mask_value >> (8 * i)) & 0xff) as u8;
            bytes[3 - i] = byte.reverse_bits();
        }
        bytes
    }

    pub fn from_wire_bytes(bytes: &[u8; 4]) -> Self {
        let mut mask_value = 0u32;
        for i in 0..4 {
            mask_value |= (bytes[3 - i].reverse_bits() as u32) << (8 * i);
        }
        Self::new(mask_value.saturating_add(1))
    }
}

impl From<DifficultyMask> for [u8; 4] {
    fn from(mask: DifficultyMask) -> Self {
        mask.to_wire_bytes()
    }
}

const fn largest_power_of_two(n: u32) -> u32 {
    if n == 0 {
        1
    } else {
        1 << (31 - n.leading_zeros())
    }
}

/// Mining frequency with validation and PLL calculation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frequency {
    mhz: f32,
}

impl Frequency {
    pub const MIN_MHZ: f32 = 50.0;
    pub const MAX_MHZ: f32 = 800.0;
    /// Base crystal frequency in MHz
    const CRYSTAL_MHZ: f32 = 25.0;

    pub fn from_mhz(mhz: f32) -> Result<Self, ProtocolError> {
        if !(Self::MIN_MHZ..=Self::MAX_MHZ).contains(&mhz) {
            return Err(ProtocolError::InvalidFrequency { mhz: mhz as u32 });
        }
        Ok(Self { mhz })
    }

    pub fn mhz(&self) -> f32 {
        self.mhz
    }

    /// Search for the PLL settings closest to this frequency.
    ///
    /// ref_div is 1 or 2, both post dividers run 1..=7 with the first no
    /// smaller than the second, and fb_div stays within 0xa0..=0xef.
    pub fn calculate_pll(&self) -> PllConfig {
        let target_freq = self.mhz;
        let mut best_config = PllConfig::new(0xa0, 2, 0x55);
        let mut min_error = f32::MAX;

        for ref_div in [2u8, 1] {
            for post_div1 in (1..=7u8).rev() {
                for post_div2 in (1..=post_div1).rev() {
                    let fb_div_f = (post_div1 * post_div2) as f32 * target_freq * ref_div as f32
                        / Self::CRYSTAL_MHZ;
                    let fb_div = fb_div_f.round() as u8;

                    if !(0xa0..=0xef).contains(&fb_div) {
                        continue;
                    }

                    let actual_freq = Self::CRYSTAL_MHZ * fb_div as f32
                        / (ref_div as f32 * post_div1 as f32 * post_div2 as f32);
                    let error = (target_freq - actual_freq).abs();

                    if error < min_error && error < 1.0 {
                        min_error = error;
                        let post_div = ((post_div1 - 1) << 4) | (post_div2 - 1);
                        best_config = PllConfig::new(fb_div, ref_div, post_div);
                    }
                }
            }
        }

        best_config
    }
}

/// PLL configuration for frequency control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllConfig {
    /// VCO control flag (0x40 for VCO < 2400 MHz, 0x50 otherwise)
    pub flag: u8,
    pub fb_div: u8,
    pub ref_div: u8,
    /// Post dividers, `(post_div1 - 1) << 4 | (post_div2 - 1)`
    pub post_div: u8,
}

impl PllConfig {
    pub fn new(fb_div: u8, ref_div: u8, post_div: u8) -> Self {
        let vco_freq = (fb_div as f32) * 25.0 / (ref_div as f32);
        let flag = if vco_freq >= 2400.0 { 0x50 } else { 0x40 };

        Self {
            flag,
            fb_div,
            ref_div,
            post_div,
        }
    }

    /// Output frequency these settings produce.
    pub fn output_mhz(&self) -> f32 {
        let post_div1 = ((self.post_div >> 4) & 0xf) + 1;
        let post_div2 = (self.post_div & 0xf) + 1;
        25.0 * self.fb_div as f32
            / (self.ref_div.max(1) as f32 * post_div1 as f32 * post_div2 as f32)
    }
}

impl From<[u8; 4]> for PllConfig {
    fn from(bytes: [u8; 4]) -> Self {
        Self {
            flag: bytes[0],
            fb_div: bytes[1],
            ref_div: bytes[2],
            post_div: bytes[3],
        }
    }
}

impl From<PllConfig> for [u8; 4] {
    fn from(config: PllConfig) -> Self {
        [config.flag, config.fb_div, config.ref_div, config.post_div]
    }
}

/// UART baud rate configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudRate {
    Baud115200,
    Baud1M,
    Baud3M,
    /// Raw register value of unknown rate
    Custom(u32),
}

impl BaudRate {
    const REG_115200: u32 = 0x0000_0271;
    const REG_1M: u32 = 0x0002_3011;
    const REG_3M: u32 = 0x0000_3001;

    /// Line rate the host must switch to after writing this value.
    pub fn bits_per_second(&self) -> Option<u32> {
        match self {
            BaudRate::Baud115200 => Some(115_200),
            BaudRate::Baud1M => Some(1_000_000),
            BaudRate::Baud3M => Some(3_000_000),
            BaudRate::Custom(_) => None,
        }
    }

    pub fn register_value(&self) -> u32 {
        match self {
            BaudRate::Baud115200 => Self::REG_115200,
            BaudRate::Baud1M => Self::REG_1M,
            BaudRate::Baud3M => Self::REG_3M,
            BaudRate::Custom(val) => *val,
        }
    }

    pub fn from_register_value(value: u32) -> Self {
        match value {
            Self::REG_115200 => BaudRate::Baud115200,
            Self::REG_1M => BaudRate::Baud1M,
            Self::REG_3M => BaudRate::Baud3M,
            other => BaudRate::Custom(other),
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = ProtocolError;

    /// Select the register setting for a line rate in bits per second.
    fn try_from(bps: u32) -> Result<Self, Self::Error> {
        match bps {
            115_200 => Ok(BaudRate::Baud115200),
            1_000_000 => Ok(BaudRate::Baud1M),
            3_000_000 => Ok(BaudRate::Baud3M),
            other => Err(ProtocolError::UnsupportedBaud(other)),
        }
    }
}

impl From<BaudRate> for [u8; 4] {
    fn from(baud: BaudRate) -> Self {
        baud.register_value().to_le_bytes()
    }
}

/// A register together with its decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Register {
    ChipId {
        chip_type: ChipType,
        core_count: u8,
        address: u8,
    },
    PllDivider(PllConfig),
    TicketMask(DifficultyMask),
    UartBaud(BaudRate),
    VersionMask(VersionMask),
    /// Registers this crate reads or writes without interpreting.
    Raw {
        address: RegisterAddress,
        value: u32,
    },
}

impl Register {
    pub fn decode(address: RegisterAddress, bytes: &[u8; 4]) -> Register {
        match address {
            RegisterAddress::ChipId => Register::ChipId {
                chip_type: ChipType::from([bytes[0], bytes[1]]),
                core_count: bytes[2],
                address: bytes[3],
            },
            RegisterAddress::PllDivider => Register::PllDivider(PllConfig::from(*bytes)),
            RegisterAddress::TicketMask => {
                Register::TicketMask(DifficultyMask::from_wire_bytes(bytes))
            }
            RegisterAddress::UartBaud => {
                Register::UartBaud(BaudRate::from_register_value(u32::from_le_bytes(*bytes)))
            }
            RegisterAddress::VersionMask => Register::VersionMask(VersionMask::from(*bytes)),
            RegisterAddress::NonceRange
            | RegisterAddress::MiscControl
            | RegisterAddress::Core
            | RegisterAddress::InitControl => Register::Raw {
                address,
                value: u32::from_le_bytes(*bytes),
            },
        }
    }

    pub fn address(&self) -> RegisterAddress {
        match self {
            Register::ChipId { .. } => RegisterAddress::ChipId,
            Register::PllDivider(_) => RegisterAddress::PllDivider,
            Register::TicketMask(_) => RegisterAddress::TicketMask,
            Register::UartBaud(_) => RegisterAddress::UartBaud,
            Register::VersionMask(_) => RegisterAddress::VersionMask,
            Register::Raw { address, .. } => *address,
        }
    }

    /// The four data bytes written after the register address.
    pub fn data(&self) -> [u8; 4] {
        match self {
            Register::ChipId {
                chip_type,
                core_count,
                address,
            } => {
                let id = chip_type.id_bytes();
                [id[0], id[1], *core_count, *address]
            }
            Register::PllDivider(config) => (*config).into(),
            Register::TicketMask(mask) => (*mask).into(),
            Register::UartBaud(baud) => (*baud).into(),
            Register::VersionMask(mask) => (*mask).into(),
            Register::Raw { value, .. } => value.to_le_bytes(),
        }
    }
}
