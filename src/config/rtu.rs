use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::types::{DataBits, Parity, RtsType, StopBits};
use crate::errors::{ConfigError, ConfigErrorKind};

/// Serial backend configuration: device, baud/framing, and RS-485 direction
/// control (spec.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,

    /// RS-485 direction-control: which signal level means "transmitting"
    /// (spec.md §9's "pin and polarity" re-architecture note — held here as
    /// a typed field rather than a magic-tagged word).
    pub rts_type: RtsType,
    /// Settle time held before/after toggling RTS around a write.
    #[serde(with = "humantime_serde")]
    pub rts_delay: Duration,

    /// Whether to flush the serial port after writing.
    pub flush_after_write: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            rts_type: RtsType::None,
            rts_delay: Duration::from_micros(3500),
            flush_after_write: true,
        }
    }
}

impl Config {
    pub fn serial_port_info(&self) -> String {
        format!(
            "{} ({} baud, {} data bits, {} parity, {} stop bits)",
            self.device, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.trim().is_empty() {
            return Err(ConfigError::validation(
                ConfigErrorKind::InvalidBaudRate,
                "serial device path must not be empty",
            ));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::validation(
                ConfigErrorKind::InvalidBaudRate,
                "baud rate must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_baud_rate_is_rejected() {
        let config = Config {
            baud_rate: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
