//! Frame codecs: wrap an already-encoded PDU in the RTU or MBAP envelope.
//!
//! Grounded in spec.md §4.4. Frame codecs never re-encode the PDU; they are
//! handed an encoded PDU byte slice (from [`crate::pdu`]) and only add or
//! strip the envelope (unit + CRC for RTU, the 7-byte MBAP header for TCP).
//! This mirrors the dependency order of spec.md §2: PDU codec → frame codecs.

pub mod mbap;
pub mod rtu;

/// Maximum RTU frame: 1 (unit) + 253 (max PDU) + 2 (CRC), spec.md §3.
pub const MAX_RTU_FRAME: usize = 256;

/// Maximum MBAP/TCP frame: 7 (header) + 253 (max PDU), spec.md §3.
pub const MAX_TCP_FRAME: usize = 260;
