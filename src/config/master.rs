use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigErrorKind};
use crate::protocol::Protocol;
use crate::transport::timing::{DEFAULT_ACK_TIMEOUT, DEFAULT_INTER_BYTE_TIMEOUT};

/// Per-instance master configuration (spec.md §3 Instance, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub protocol: Protocol,
    /// Slave/unit address (1..=247), or 0xFF to address "any" on TCP.
    pub unit: u8,
    /// Reject responses whose unit/address doesn't match `unit`.
    pub check_unit_id: bool,
    /// Reject TCP responses whose tid/pid/unit don't match what was sent.
    pub check_mbap: bool,
    /// Drain stale inbound bytes before sending each request.
    pub flush_before_send: bool,
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
            check_unit_id: true,
            check_mbap: true,
            flush_before_send: false,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            inter_byte_timeout: DEFAULT_INTER_BYTE_TIMEOUT,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unit == 0 {
            return Err(ConfigError::validation(
                ConfigErrorKind::InvalidUnitId,
                "unit id 0 is reserved for broadcast, not a valid master target",
            ));
        }
        Ok(())
    }
}
