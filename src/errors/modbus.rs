use thiserror::Error;

use crate::pdu::{ExceptionCode, PduError};

use super::{ConfigError, FrameError, InitializationError, TransportError};

/// Top-level error type unifying every layer of this crate.
///
/// A [`ExceptionCode`] returned by a remote slave is modeled separately
/// (see `master::MasterError`) since it is not a failure of this crate
/// but a normal protocol outcome; `ModbusError` covers everything that
/// prevents a request/response cycle from completing at all.
#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("PDU error: {0}")]
    Pdu(#[from] PduError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("initialization error: {0}")]
    Init(#[from] InitializationError),

    #[error("remote slave returned exception: {0}")]
    Exception(ExceptionCode),
}

impl ModbusError {
    pub fn exception(code: ExceptionCode) -> Self {
        ModbusError::Exception(code)
    }
}
