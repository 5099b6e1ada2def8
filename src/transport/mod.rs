//! The transport abstraction (spec.md §4.5): a small trait standing in for
//! the original's five-op vtable (`open`/`close`/`read`/`write`/`flush`),
//! plus the concrete backends (`serial`, `tcp`) and the timing state machine
//! built on top of it (`timing`).
//!
//! `open`/`close`/`connect` must be idempotent; `read` is strictly
//! non-blocking (`Ok(0)` means "nothing right now"); `write` may block.

pub mod serial;
pub mod tcp;
pub mod timing;

use crate::errors::TransportError;

pub trait Transport {
    /// Establishes the channel. The default no-op covers the "handle is
    /// already live at creation time" case spec.md §4.5 calls out for
    /// externally-supplied sockets — a transport built from a live handle
    /// doesn't need this to do anything.
    fn open(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Tears down the channel. Idempotent: closing an already-closed
    /// transport is a no-op, not an error.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Non-blocking read. `Ok(0)` means no bytes are available right now,
    /// not end-of-stream; a genuine closed connection or hard I/O failure is
    /// `Err`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Writes `buf` in full or fails; may block the calling thread.
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Drains whatever is currently readable, discarding it. Used to
    /// resynchronise before a new request (spec.md §4.7 step 3).
    fn flush(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}
