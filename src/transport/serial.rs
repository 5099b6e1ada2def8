//! Serial (RTU) transport, grounded in the teacher's `rtu_transport.rs` and
//! `config/rtu.rs`/`config/types/*`, built on the `serialport` crate.
//!
//! The underlying port is opened with a zero read timeout so
//! `serialport::SerialPort::read` either returns available bytes immediately
//! or fails with `TimedOut`/`WouldBlock`, which this module folds into
//! `Ok(0)` to satisfy the non-blocking contract of [`super::Transport`].

use std::time::Duration;

use tracing::{debug, trace};

use crate::config::RtuConfig;
use crate::config::RtsType;
use crate::errors::{IoOperation, RtsError, SerialErrorKind, TransportError};

use super::Transport;

pub struct SerialTransport {
    config: RtuConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    pub fn new(config: RtuConfig) -> Self {
        Self { config, port: None }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }

    /// Toggles the RS-485 direction-control pin per spec.md §9's
    /// "pin and polarity" re-architecture note: `RtsType`/`rts_delay` are
    /// typed fields on the backend, not a magic-tagged word.
    fn set_rts(&mut self, asserting: bool) -> Result<(), TransportError> {
        if self.config.rts_type == RtsType::None {
            return Ok(());
        }
        let level = self.config.rts_type.to_signal_level(asserting);
        let port = self.port_mut()?;
        port.write_request_to_send(level)
            .map_err(|e| TransportError::Rts(RtsError::signal(e.to_string())))?;
        if !self.config.rts_delay.is_zero() {
            std::thread::sleep(self.config.rts_delay);
        }
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Ok(());
        }
        debug!(port = %self.config.serial_port_info(), "opening serial transport");
        let port = serialport::new(&self.config.device, self.config.baud_rate)
            .data_bits(self.config.data_bits.into())
            .parity(self.config.parity.into())
            .stop_bits(self.config.stop_bits.into())
            .timeout(Duration::ZERO)
            .open()?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.port = None;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let port = self.port_mut()?;
        match port.read(buf) {
            Ok(n) => {
                if n > 0 {
                    trace!(bytes = n, "serial read");
                }
                Ok(n)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(TransportError::Serial {
                kind: SerialErrorKind::ReadFailed,
                port: self.config.device.clone(),
                details: e.to_string(),
                source: None,
            }),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.set_rts(true)?;
        let result = (|| {
            let port = self.port_mut()?;
            port.write_all(buf)
                .map_err(|e| TransportError::Io {
                    operation: IoOperation::Write,
                    details: e.to_string(),
                    source: e,
                })?;
            if self.config.flush_after_write {
                self.port_mut()?.flush().map_err(|e| TransportError::Io {
                    operation: IoOperation::Flush,
                    details: e.to_string(),
                    source: e,
                })?;
            }
            Ok(buf.len())
        })();
        self.set_rts(false)?;
        result
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let mut scratch = [0u8; 256];
        loop {
            match self.read(&mut scratch)? {
                0 => return Ok(()),
                _ => continue,
            }
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
