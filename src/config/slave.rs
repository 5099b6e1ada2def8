use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigErrorKind};
use crate::protocol::Protocol;
use crate::transport::timing::{DEFAULT_ACK_TIMEOUT, DEFAULT_INTER_BYTE_TIMEOUT};

/// Per-instance slave configuration (spec.md §3 Instance, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub protocol: Protocol,
    /// Our own unit address (1..=247); spec.md glossary: 0 is broadcast and
    /// not valid here, 0xFF is the TCP "any" address a master may use and is
    /// always answered regardless of this field.
    pub unit: u8,
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub inter_byte_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: Protocol::Rtu,
            unit: 1,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            inter_byte_timeout: DEFAULT_INTER_BYTE_TIMEOUT,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unit == 0 || self.unit == 0xFF {
            return Err(ConfigError::validation(
                ConfigErrorKind::InvalidUnitId,
                "a slave's own unit id must be in 1..=247",
            ));
        }
        Ok(())
    }
}
