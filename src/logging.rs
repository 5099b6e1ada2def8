//! Structured logging setup, grounded in the teacher's `logging.rs`:
//! an `OffsetTime`-timestamped `tracing_subscriber` pipeline, with
//! frame-level tracing gated behind [`LoggingConfig::trace_frames`].

use time::UtcOffset;
use tracing_subscriber::{
    fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;
use crate::errors::{InitializationError, ModbusError};

/// Initializes the global `tracing` subscriber from `config`. Call once,
/// near the start of `main`; a second call will fail since the global
/// subscriber can only be installed once per process.
pub fn setup_logging(config: &LoggingConfig) -> Result<(), ModbusError> {
    config.validate().map_err(ModbusError::Config)?;

    let timer = OffsetTime::new(
        UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        time::format_description::well_known::Rfc3339,
    );

    let base_level = config.get_level_filter();
    let mut env_filter = EnvFilter::default().add_directive(base_level.into());

    if config.trace_frames {
        env_filter = env_filter
            .add_directive("modbus_station::frame=trace".parse().unwrap())
            .add_directive("modbus_station::transport=trace".parse().unwrap());
    }

    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(config.thread_ids)
        .with_thread_names(config.thread_names)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_level(true)
        .with_timer(timer)
        .with_filter(env_filter);

    Registry::default().with(layer).try_init().map_err(|e| {
        ModbusError::Init(InitializationError::logging(format!(
            "failed to initialize logging: {e}"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_fails_validation_before_subscriber_init() {
        let config = LoggingConfig {
            level: "nonsense".to_string(),
            ..Default::default()
        };
        assert!(setup_logging(&config).is_err());
    }
}
