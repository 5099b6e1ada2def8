use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    InvalidTcpAddress,
    InvalidTcpPort,
    InvalidBaudRate,
    InvalidDataBits,
    InvalidParity,
    InvalidStopBits,
    InvalidTimeout,
    InvalidUnitId,
    InvalidRtsSettings,
    InvalidLogLevel,
    InvalidLogFormat,
}

impl std::fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTcpAddress => write!(f, "invalid TCP address"),
            Self::InvalidTcpPort => write!(f, "invalid TCP port"),
            Self::InvalidBaudRate => write!(f, "invalid baud rate"),
            Self::InvalidDataBits => write!(f, "invalid data bits"),
            Self::InvalidParity => write!(f, "invalid parity"),
            Self::InvalidStopBits => write!(f, "invalid stop bits"),
            Self::InvalidTimeout => write!(f, "invalid timeout"),
            Self::InvalidUnitId => write!(f, "invalid unit id"),
            Self::InvalidRtsSettings => write!(f, "invalid RTS settings"),
            Self::InvalidLogLevel => write!(f, "invalid log level"),
            Self::InvalidLogFormat => write!(f, "invalid log format"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration error: {kind} - {details}")]
    Validation {
        kind: ConfigErrorKind,
        details: String,
    },

    #[error("configuration source error: {0}")]
    Source(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn validation(kind: ConfigErrorKind, details: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            details: details.into(),
        }
    }
}
