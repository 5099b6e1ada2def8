//! The byte-level timing state machine (spec.md §4.6): infers "frame
//! complete" from silence on the line, layered over a non-blocking
//! [`Transport`] that has no notion of Modbus framing itself.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::errors::TransportError;

use super::Transport;

/// spec.md §4.6 default.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(300);
/// spec.md §4.6 default; the RTU-standard "3.5 character times" generalised
/// to a tunable millisecond value, reused verbatim for TCP.
pub const DEFAULT_INTER_BYTE_TIMEOUT: Duration = Duration::from_millis(32);
/// Sleep quantum between empty non-blocking reads.
const POLL_QUANTUM: Duration = Duration::from_millis(2);

/// Wraps a [`Transport`] with the two-timer read loop and single-write
/// contract of spec.md §4.6.
pub struct FramedIo<T: Transport> {
    transport: T,
    ack_timeout: Duration,
    inter_byte_timeout: Duration,
}

impl<T: Transport> FramedIo<T> {
    pub fn new(transport: T, ack_timeout: Duration, inter_byte_timeout: Duration) -> Self {
        Self {
            transport,
            ack_timeout,
            inter_byte_timeout,
        }
    }

    pub fn set_timeouts(&mut self, ack_timeout: Duration, inter_byte_timeout: Duration) {
        self.ack_timeout = ack_timeout;
        self.inter_byte_timeout = inter_byte_timeout;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Writes `frame` as a single `Transport::write`; a short write (the
    /// returned count not matching `frame.len()`) is a transport error, per
    /// spec.md §4.6.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let written = self.transport.write(frame)?;
        if written != frame.len() {
            return Err(TransportError::ShortWrite {
                wrote: written,
                expected: frame.len(),
            });
        }
        Ok(())
    }

    /// Drains any bytes currently available, discarding them. Used to
    /// resynchronise before sending a new request.
    pub fn flush(&mut self) -> Result<(), TransportError> {
        self.transport.flush()
    }

    /// Collects one inbound frame into `buf`, returning the number of bytes
    /// read. `Ok(0)` means no response arrived within the ack-timeout.
    ///
    /// This is the two-timer state machine of spec.md §4.6, verbatim: `pos`
    /// bytes accumulated so far, `t_last` the timestamp of the last
    /// successful read. While `pos == 0` the ack-timeout applies; once a
    /// byte has arrived, the (usually much shorter) inter-byte timeout
    /// applies, and its first breach signals end of frame.
    pub fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut pos = 0usize;
        let mut t_last = Instant::now();
        loop {
            let n = self.transport.read(&mut buf[pos..])?;
            if n >= 1 {
                pos += n;
                t_last = Instant::now();
                continue;
            }
            let elapsed = t_last.elapsed();
            if pos == 0 {
                if elapsed >= self.ack_timeout {
                    trace!(?elapsed, "ack timeout, no response");
                    return Ok(0);
                }
            } else if elapsed >= self.inter_byte_timeout {
                trace!(pos, ?elapsed, "inter-byte timeout, frame complete");
                return Ok(pos);
            }
            std::thread::sleep(POLL_QUANTUM);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A scripted transport that hands out bytes from a queue, each after a
    /// caller-specified delay, for exercising the timing state machine
    /// without real hardware or sockets (spec.md §8 property 7).
    struct ScriptedTransport {
        events: std::collections::VecDeque<(Duration, u8)>,
        start: Instant,
        delivered: usize,
    }

    impl ScriptedTransport {
        fn new(events: Vec<(Duration, u8)>) -> Self {
            Self {
                events: events.into(),
                start: Instant::now(),
                delivered: 0,
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            if let Some((at, byte)) = self.events.front().copied() {
                if self.start.elapsed() >= at {
                    self.events.pop_front();
                    buf[0] = byte;
                    self.delivered += 1;
                    return Ok(1);
                }
            }
            Ok(0)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    #[test]
    fn inter_byte_timeout_terminates_exactly_after_gap_exceeds_configured_value() {
        let transport = ScriptedTransport::new(vec![
            (Duration::from_millis(0), 0x01),
            (Duration::from_millis(5), 0x03),
            (Duration::from_millis(10), 0x02),
            // then a gap far longer than the inter-byte timeout
        ]);
        let mut io = FramedIo::new(transport, Duration::from_millis(100), Duration::from_millis(20));
        let mut buf = [0u8; 16];
        let n = io.read_frame(&mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], &[0x01, 0x03, 0x02]);
    }

    #[test]
    fn no_bytes_ever_arriving_terminates_after_ack_timeout() {
        let transport = ScriptedTransport::new(vec![]);
        let mut io = FramedIo::new(transport, Duration::from_millis(30), Duration::from_millis(20));
        let mut buf = [0u8; 16];
        let started = Instant::now();
        let n = io.read_frame(&mut buf).unwrap();
        assert_eq!(n, 0);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn short_write_is_reported_as_transport_error() {
        struct HalfWriter;
        impl Transport for HalfWriter {
            fn close(&mut self) -> Result<(), TransportError> {
                Ok(())
            }
            fn read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
                Ok(0)
            }
            fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
                Ok(buf.len() / 2)
            }
            fn flush(&mut self) -> Result<(), TransportError> {
                Ok(())
            }
            fn is_open(&self) -> bool {
                true
            }
        }
        let mut io = FramedIo::new(HalfWriter, Duration::from_millis(10), Duration::from_millis(10));
        let result = io.write_frame(&[0x01, 0x02, 0x03, 0x04]);
        assert!(matches!(result, Err(TransportError::ShortWrite { .. })));
    }
}
