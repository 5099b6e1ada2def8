//! TCP transport, grounded in the teacher's TCP handling in
//! `modbus_relay.rs`, built on `std::net::TcpStream` set non-blocking.
//!
//! Constructed either by connecting out ([`TcpTransport::connect`], master
//! role) or by wrapping an already-connected stream
//! ([`TcpTransport::from_std`], slave role) — this crate never listens or
//! accepts (spec.md §1 Non-goals: "server-side TCP listen/accept").
//!
//! Per spec.md §9's open question: a peer closing the connection (`read`
//! returning `Ok(0)`) is surfaced as [`TransportError::ConnectionClosed`],
//! distinct from "nothing available right now" (`WouldBlock`, folded to
//! `Ok(0)`) and from a hard I/O error.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::debug;

use crate::errors::{IoOperation, TransportError};

use super::Transport;

pub struct TcpTransport {
    stream: Option<TcpStream>,
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// A transport that connects out to `host:port` on `open()` (master role).
    pub fn connect(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            stream: None,
            host: host.into(),
            port,
            connect_timeout,
        }
    }

    /// Wraps an already-connected stream (slave role): `open()` is then a
    /// no-op, matching spec.md §4.5's "open may be absent."
    pub fn from_std(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nonblocking(true).map_err(|e| TransportError::Io {
            operation: IoOperation::Configure,
            details: e.to_string(),
            source: e,
        })?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".into());
        Ok(Self {
            stream: Some(stream),
            host: peer,
            port: 0,
            connect_timeout: Duration::ZERO,
        })
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        debug!(host = %self.host, port = self.port, "connecting TCP transport");
        use std::net::ToSocketAddrs;
        let addr = format!("{}:{}", self.host, self.port);
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| TransportError::Io {
                operation: IoOperation::Connect,
                details: e.to_string(),
                source: e,
            })?
            .next()
            .ok_or_else(|| TransportError::Io {
                operation: IoOperation::Connect,
                details: format!("no address resolved for {addr}"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"),
            })?;
        let stream = TcpStream::connect_timeout(&socket_addr, self.connect_timeout)?;
        stream.set_nonblocking(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream_mut()?;
        match stream.read(buf) {
            Ok(0) => Err(TransportError::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream_mut()?;
        let mut written = 0;
        while written < buf.len() {
            match stream.write(&buf[written..]) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let mut scratch = [0u8; 512];
        loop {
            match self.read(&mut scratch) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(TransportError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
