use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigErrorKind};

/// TCP backend configuration for the master role: the host/port this crate
/// connects out to. There is no listen/bind side here (spec.md §1
/// Non-goals: "server-side TCP listen/accept") — a slave's TCP transport is
/// always handed an already-connected stream by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::validation(
                ConfigErrorKind::InvalidTcpAddress,
                "TCP host must not be empty",
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::validation(
                ConfigErrorKind::InvalidTcpPort,
                "TCP port must not be 0",
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
    fn empty_host_is_rejected() {
        let config = Config {
            host: String::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
