//! Port configuration
//!
//! Line settings (baud rate, framing, parity) and the validated
//! [`PortConfig`] an [`AsyncPort`](crate::AsyncPort) is opened from.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{PortError, Result};
use crate::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS};

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    /// 5 data bits
    Five,
    /// 6 data bits
    Six,
    /// 7 data bits
    Seven,
    /// 8 data bits
    #[default]
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = PortError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(PortError::InvalidArgument(format!(
                "data bits must be 5-8, got {}",
                other
            ))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> u8 {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Number of stop bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    /// 1 stop bit
    #[default]
    One,
    /// 2 stop bits
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = PortError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(PortError::InvalidArgument(format!(
                "stop bits must be 1 or 2, got {}",
                other
            ))),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> u8 {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl Parity {
    /// Single-letter form used in "8N1" style notation
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Electrical line settings passed to the raw transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: DataBits,
    /// Stop bits per character
    pub stop_bits: StopBits,
    /// Parity mode
    pub parity: Parity,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

impl std::fmt::Display for LineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            u8::from(self.data_bits),
            self.parity.letter(),
            u8::from(self.stop_bits)
        )
    }
}

/// Complete configuration for opening an [`AsyncPort`](crate::AsyncPort)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Device path (e.g., "/dev/ttyUSB0" or "COM3")
    pub path: String,
    /// Line settings
    #[serde(default)]
    pub line: LineConfig,
    /// Receive buffer capacity in bytes (None = unbounded)
    #[serde(default)]
    pub buffer_capacity: Option<usize>,
    /// Read timeout used by the hardware transport to stay responsive to shutdown
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

impl PortConfig {
    /// Start building a configuration for the given device path
    pub fn builder(path: impl Into<String>) -> PortConfigBuilder {
        PortConfigBuilder::new(path)
    }

    /// Check the configuration for values no transport can honour
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(PortError::InvalidArgument(
                "device path must not be empty".to_string(),
            ));
        }
        if self.line.baud_rate == 0 {
            return Err(PortError::InvalidArgument(
                "baud rate must be greater than zero".to_string(),
            ));
        }
        if self.buffer_capacity == Some(0) {
            return Err(PortError::InvalidArgument(
                "buffer capacity must be greater than zero (omit it for unbounded)".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a configuration from JSON
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: PortConfig =
            serde_json::from_str(content).map_err(|e| PortError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file written by [`PortConfig::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Save as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| PortError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Fluent builder for [`PortConfig`]
#[derive(Debug, Clone)]
pub struct PortConfigBuilder {
    config: PortConfig,
}

impl PortConfigBuilder {
    /// Defaults: 9600 8N1, unbounded buffer, 100 ms read timeout
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            config: PortConfig {
                path: path.into(),
                line: LineConfig::default(),
                buffer_capacity: None,
                read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            },
        }
    }

    /// Device path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Baud rate; must be non-zero
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.line.baud_rate = baud_rate;
        self
    }

    /// Data bits per character
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.config.line.data_bits = data_bits;
        self
    }

    /// Stop bits per character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.config.line.stop_bits = stop_bits;
        self
    }

    /// Parity mode
    pub fn parity(mut self, parity: Parity) -> Self {
        self.config.line.parity = parity;
        self
    }

    /// Bound the receive buffer; overflow discards the oldest bytes
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = Some(capacity);
        self
    }

    /// Let the receive buffer grow without limit (the default)
    pub fn unbounded(mut self) -> Self {
        self.config.buffer_capacity = None;
        self
    }

    /// Hardware read timeout in milliseconds
    pub fn read_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.read_timeout_ms = timeout_ms;
        self
    }

    /// Validate and produce the configuration
    pub fn build(self) -> Result<PortConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
