use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{LoggingConfig, MasterConfig, RtuConfig, SlaveConfig, TcpConfig};
use crate::errors::ConfigError;

/// Top-level configuration for the demo binary: every per-instance config
/// this crate defines, layered the way the teacher's `RelayConfig` is.
///
/// Only one of `rtu`/`tcp` backs the instance actually running at a time
/// (selected by `master.protocol`/`slave.protocol`); both are always present
/// in the struct so either can be picked without a schema change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub rtu: RtuConfig,
    pub tcp: TcpConfig,
    pub master: MasterConfig,
    pub slave: SlaveConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Default configuration directory, mirrored from the teacher's layout.
    pub const CONFIG_DIR: &'static str = "config";
    const ENV_PREFIX: &'static str = "MODBUS_STATION";

    /// Layers environment variables (`MODBUS_STATION_*`) over
    /// `config/local.yaml` over `config/default.yaml` over built-in
    /// defaults, the way the teacher's `RelayConfig::new()` does.
    pub fn layered() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let config = ConfigBuilder::builder()
            .set_default("rtu.device", defaults.rtu.device)?
            .set_default("rtu.baud_rate", defaults.rtu.baud_rate)?
            .set_default("tcp.host", defaults.tcp.host)?
            .set_default("tcp.port", defaults.tcp.port)?
            .set_default("master.unit", defaults.master.unit as i64)?
            .set_default("slave.unit", defaults.slave.unit as i64)?
            .set_default("logging.level", defaults.logging.level)?
            .add_source(
                File::new(
                    &format!("{}/default", Self::CONFIG_DIR),
                    FileFormat::Yaml,
                )
                .required(false),
            )
            .add_source(
                File::new(&format!("{}/local", Self::CONFIG_DIR), FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a specific file, with environment variables
    /// still applied as overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rtu.validate()?;
        self.tcp.validate()?;
        self.master.validate()?;
        self.slave.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    #[serial_test::serial]
    fn default_layering_matches_built_in_defaults() {
        let config = Config::layered().unwrap();
        assert_eq!(config.tcp.port, TcpConfig::default().port);
        assert_eq!(config.rtu.baud_rate, RtuConfig::default().baud_rate);
    }

    #[test]
    #[serial_test::serial]
    fn env_var_overrides_default() {
        std::env::set_var("MODBUS_STATION_TCP__PORT", "9999");
        let config = Config::layered().unwrap();
        assert_eq!(config.tcp.port, 9999);
        std::env::remove_var("MODBUS_STATION_TCP__PORT");
    }

    #[test]
    fn from_file_overrides_specific_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("station.yaml");
        fs::write(
            &path,
            r#"
            rtu:
              device: "/dev/ttyAMA0"
              baud_rate: 19200
              data_bits: 8
              parity: "even"
              stop_bits: "one"
              rts_type: "down"
              rts_delay: "3500us"
              flush_after_write: true
            tcp:
              host: "10.0.0.5"
              port: 1502
              connect_timeout: "2s"
            master:
              protocol: "tcp"
              unit: 3
              check_unit_id: true
              check_mbap: true
              flush_before_send: false
              ack_timeout: "300ms"
              inter_byte_timeout: "32ms"
            slave:
              protocol: "rtu"
              unit: 5
              ack_timeout: "300ms"
              inter_byte_timeout: "32ms"
            logging:
              level: "debug"
              format: "pretty"
              include_location: true
              trace_frames: false
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.rtu.baud_rate, 19200);
        assert_eq!(config.tcp.host, "10.0.0.5");
        assert_eq!(config.master.unit, 3);
        assert_eq!(config.slave.unit, 5);
        assert_eq!(config.logging.level, "debug");
    }
}
