//! The master request/response cycle (spec.md §4.7): for each high-level
//! operation, build a PDU, wrap it in the current frame format, perform
//! framed I/O, validate the reply, and extract the payload.
//!
//! Outcomes are `Result<usize, MasterError>` rather than the original's
//! signed-integer sentinel (positive/zero/negative), per spec.md §9's
//! re-architecture guidance: `Ok(count)` is the positive case,
//! `MasterError::Exception` is the negative case, and every other variant is
//! what used to be a bare `0`. [`MasterError::is_communication_failure`]
//! recovers that tri-state view for callers who want it (spec.md §7: "no
//! distinction is preserved between these subcases by the public return").

use thiserror::Error;
use tracing::{debug, warn};

use crate::bitmap;
use crate::errors::{FrameError, TransportError};
use crate::frame::{mbap, rtu, MAX_TCP_FRAME};
use crate::numeric::{get_u16, put_u16};
use crate::pdu::{self, bounds, function, ExceptionCode, PduError, Request, Response};
use crate::protocol::Protocol;
use crate::transport::timing::FramedIo;
use crate::transport::Transport;

#[derive(Error, Debug)]
pub enum MasterError {
    #[error("no response from slave (ack timeout)")]
    NoResponse,
    #[error("malformed response frame: {0}")]
    Frame(#[from] FrameError),
    #[error("malformed response PDU: {0}")]
    Pdu(#[from] PduError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("response came back shaped for a different request")]
    UnexpectedResponseShape,
    #[error("response unit id 0x{got:02X} does not match expected 0x{expected:02X}")]
    UnitMismatch { expected: u8, got: u8 },
    #[error("response transaction id 0x{got:04X} does not match expected 0x{expected:04X}")]
    TransactionMismatch { expected: u16, got: u16 },
    #[error("response protocol id 0x{0:04X} is not zero")]
    ProtocolIdMismatch(u16),
    #[error("response payload length does not match the requested quantity")]
    LengthMismatch,
    #[error("remote slave returned exception: {0}")]
    Exception(ExceptionCode),
}

impl MasterError {
    /// True for every variant that spec.md §7 lumps into the public "zero"
    /// outcome (timeout, malformed frame, mismatch, wrong length) — i.e.
    /// everything except a genuine protocol exception from the slave.
    pub fn is_communication_failure(&self) -> bool {
        !matches!(self, MasterError::Exception(_))
    }
}

/// A Modbus master (spec.md §3 Instance, master role), generic over the
/// transport so RTU and TCP share one implementation of the request cycle.
pub struct Master<T: Transport> {
    io: FramedIo<T>,
    protocol: Protocol,
    unit: u8,
    check_unit_id: bool,
    check_mbap: bool,
    flush_before_send: bool,
    transaction_id: u16,
    /// Scratch buffer for the wire frame, reused across send and receive.
    frame_buf: [u8; MAX_TCP_FRAME],
    /// Scratch buffer for the PDU: built here before framing on send, then
    /// overwritten with the decoded response PDU after receive (spec.md §3:
    /// "scratch frame buffer; scratch data buffer").
    data_buf: [u8; MAX_TCP_FRAME],
}

impl<T: Transport> Master<T> {
    pub fn new(transport: T, config: &crate::config::MasterConfig) -> Self {
        Self {
            io: FramedIo::new(transport, config.ack_timeout, config.inter_byte_timeout),
            protocol: config.protocol,
            unit: config.unit,
            check_unit_id: config.check_unit_id,
            check_mbap: config.check_mbap,
            flush_before_send: config.flush_before_send,
            transaction_id: 0,
            frame_buf: [0u8; MAX_TCP_FRAME],
            data_buf: [0u8; MAX_TCP_FRAME],
        }
    }

    pub fn open(&mut self) -> Result<(), MasterError> {
        Ok(self.io.transport_mut().open()?)
    }

    pub fn close(&mut self) -> Result<(), MasterError> {
        Ok(self.io.transport_mut().close()?)
    }

    pub fn set_unit(&mut self, unit: u8) {
        self.unit = unit;
    }

    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.protocol = protocol;
    }

    pub fn set_timeouts(&mut self, ack: std::time::Duration, inter_byte: std::time::Duration) {
        self.io.set_timeouts(ack, inter_byte);
    }

    /// Runs one full request/response cycle (spec.md §4.7 steps 2-5) and
    /// returns the number of PDU bytes of the response, staged in
    /// `self.data_buf`.
    fn exchange(&mut self, req: &Request<'_>) -> Result<usize, MasterError> {
        let pdu_len = pdu::encode_request(&mut self.data_buf, req)?;

        let frame_len = match self.protocol {
            Protocol::Rtu => rtu::encode(&mut self.frame_buf, self.unit, &self.data_buf[..pdu_len])?,
            Protocol::Tcp => {
                self.transaction_id = self.transaction_id.wrapping_add(1);
                mbap::encode(&mut self.frame_buf, self.transaction_id, self.unit, &self.data_buf[..pdu_len])?
            }
        };

        if self.flush_before_send {
            self.io.flush()?;
        }
        self.io.write_frame(&self.frame_buf[..frame_len])?;

        let n = self.io.read_frame(&mut self.frame_buf)?;
        if n == 0 {
            debug!(unit = self.unit, "master request timed out waiting for a response");
            return Err(MasterError::NoResponse);
        }

        let resp_len = match self.protocol {
            Protocol::Rtu => {
                let (unit, pdu_slice) = rtu::decode(&self.frame_buf[..n])?;
                if self.check_unit_id && unit != self.unit {
                    return Err(MasterError::UnitMismatch {
                        expected: self.unit,
                        got: unit,
                    });
                }
                let len = pdu_slice.len();
                self.data_buf[..len].copy_from_slice(pdu_slice);
                len
            }
            Protocol::Tcp => {
                let (header, pdu_slice) = mbap::decode(&self.frame_buf[..n])?;
                if self.check_mbap {
                    if header.transaction_id != self.transaction_id {
                        return Err(MasterError::TransactionMismatch {
                            expected: self.transaction_id,
                            got: header.transaction_id,
                        });
                    }
                    if header.protocol_id != 0 {
                        return Err(MasterError::ProtocolIdMismatch(header.protocol_id));
                    }
                }
                if self.check_unit_id
                    && header.unit_id != self.unit
                    && self.unit != crate::protocol::TCP_BROADCAST_UNIT
                {
                    return Err(MasterError::UnitMismatch {
                        expected: self.unit,
                        got: header.unit_id,
                    });
                }
                let len = pdu_slice.len();
                self.data_buf[..len].copy_from_slice(pdu_slice);
                len
            }
        };

        Ok(resp_len)
    }

    fn decode_response(&self, len: usize) -> Result<Response<'_>, MasterError> {
        let (resp, _) = pdu::decode_response(&self.data_buf[..len])?;
        Ok(resp)
    }

    /// Bound-checks an item count against `encode_request`'s quantity rules
    /// (spec.md §4.3) before it drives any scratch-buffer packing loop —
    /// packing must never run ahead of validation, or an oversized slice
    /// panics instead of producing `MasterError::Pdu(InvalidQuantity)`.
    fn check_quantity(len: usize, function: u8, min: u16, max: u16) -> Result<u16, MasterError> {
        if len < min as usize || len > max as usize {
            return Err(MasterError::Pdu(PduError::InvalidQuantity {
                function,
                quantity: len.min(u16::MAX as usize) as u16,
                min,
                max,
            }));
        }
        Ok(len as u16)
    }

    /// FC 0x01 (spec's `read_bits`). Returns the number of bits delivered.
    pub fn read_coils(&mut self, address: u16, quantity: u16, out: &mut [bool]) -> Result<usize, MasterError> {
        self.read_bits(function::READ_COILS, address, quantity, out)
    }

    /// FC 0x02 (spec's `read_input_bits`).
    pub fn read_discrete_inputs(&mut self, address: u16, quantity: u16, out: &mut [bool]) -> Result<usize, MasterError> {
        self.read_bits(function::READ_DISCRETE_INPUTS, address, quantity, out)
    }

    fn read_bits(&mut self, function: u8, address: u16, quantity: u16, out: &mut [bool]) -> Result<usize, MasterError> {
        let req = Request::ReadBits { function, address, quantity };
        let len = self.exchange(&req)?;
        match self.decode_response(len)? {
            Response::ReadBits { payload, .. } => {
                let expected = bitmap::packed_len(quantity as usize);
                if payload.len() != expected {
                    return Err(MasterError::LengthMismatch);
                }
                for i in 0..quantity as usize {
                    out[i] = bitmap::get_bit(payload, i);
                }
                Ok(quantity as usize)
            }
            Response::Exception { code, .. } => Err(MasterError::Exception(code)),
            _ => Err(MasterError::UnexpectedResponseShape),
        }
    }

    /// FC 0x03 (spec's `read_regs`).
    pub fn read_holding_registers(&mut self, address: u16, quantity: u16, out: &mut [u16]) -> Result<usize, MasterError> {
        self.read_registers(function::READ_HOLDING_REGISTERS, address, quantity, out)
    }

    /// FC 0x04 (spec's `read_input_regs`).
    pub fn read_input_registers(&mut self, address: u16, quantity: u16, out: &mut [u16]) -> Result<usize, MasterError> {
        self.read_registers(function::READ_INPUT_REGISTERS, address, quantity, out)
    }

    fn read_registers(&mut self, function: u8, address: u16, quantity: u16, out: &mut [u16]) -> Result<usize, MasterError> {
        let req = Request::ReadRegisters { function, address, quantity };
        let len = self.exchange(&req)?;
        match self.decode_response(len)? {
            Response::ReadRegisters { payload, .. } => {
                let expected = quantity as usize * 2;
                if payload.len() != expected {
                    return Err(MasterError::LengthMismatch);
                }
                for i in 0..quantity as usize {
                    let (v, _) = get_u16(&payload[i * 2..]);
                    out[i] = v;
                }
                Ok(quantity as usize)
            }
            Response::Exception { code, .. } => Err(MasterError::Exception(code)),
            _ => Err(MasterError::UnexpectedResponseShape),
        }
    }

    /// FC 0x05 (spec's `write_bit`).
    pub fn write_single_coil(&mut self, address: u16, value: bool) -> Result<usize, MasterError> {
        let wire_value = if value { 0xFF00 } else { 0x0000 };
        let req = Request::WriteSingleCoil { address, value: wire_value };
        let len = self.exchange(&req)?;
        match self.decode_response(len)? {
            Response::WriteSingleCoil { address: got_addr, value: got_val } => {
                if got_addr != address || got_val != wire_value {
                    warn!(address, got_addr, got_val, wire_value, "write-single-coil echo mismatch");
                    return Err(MasterError::UnexpectedResponseShape);
                }
                Ok(1)
            }
            Response::Exception { code, .. } => Err(MasterError::Exception(code)),
            _ => Err(MasterError::UnexpectedResponseShape),
        }
    }

    /// FC 0x06 (spec's `write_reg`).
    pub fn write_single_register(&mut self, address: u16, value: u16) -> Result<usize, MasterError> {
        let req = Request::WriteSingleRegister { address, value };
        let len = self.exchange(&req)?;
        match self.decode_response(len)? {
            Response::WriteSingleRegister { address: got_addr, value: got_val } => {
                if got_addr != address || got_val != value {
                    return Err(MasterError::UnexpectedResponseShape);
                }
                Ok(1)
            }
            Response::Exception { code, .. } => Err(MasterError::Exception(code)),
            _ => Err(MasterError::UnexpectedResponseShape),
        }
    }

    /// FC 0x0F (spec's `write_bits`).
    pub fn write_multiple_coils(&mut self, address: u16, bits: &[bool]) -> Result<usize, MasterError> {
        let quantity = Self::check_quantity(
            bits.len(),
            function::WRITE_MULTIPLE_COILS,
            bounds::WRITE_BITS.0,
            bounds::WRITE_BITS.1,
        )?;
        let mut packed = [0u8; 246]; // ceil(1968/8)
        let packed_len = bitmap::packed_len(bits.len());
        for (i, &bit) in bits.iter().enumerate() {
            bitmap::set_bit(&mut packed[..packed_len], i, bit);
        }
        let req = Request::WriteMultipleCoils {
            address,
            quantity,
            payload: &packed[..packed_len],
        };
        let len = self.exchange(&req)?;
        match self.decode_response(len)? {
            Response::WriteMultipleCoils { quantity: got_qty, .. } => Ok(got_qty as usize),
            Response::Exception { code, .. } => Err(MasterError::Exception(code)),
            _ => Err(MasterError::UnexpectedResponseShape),
        }
    }

    /// FC 0x10 (spec's `write_regs`).
    pub fn write_multiple_registers(&mut self, address: u16, regs: &[u16]) -> Result<usize, MasterError> {
        let quantity = Self::check_quantity(
            regs.len(),
            function::WRITE_MULTIPLE_REGISTERS,
            bounds::WRITE_REGISTERS.0,
            bounds::WRITE_REGISTERS.1,
        )?;
        let mut packed = [0u8; 246]; // 123 registers * 2 bytes
        let mut n = 0;
        for &v in regs {
            n += put_u16(&mut packed[n..], v);
        }
        let req = Request::WriteMultipleRegisters {
            address,
            quantity,
            payload: &packed[..n],
        };
        let len = self.exchange(&req)?;
        match self.decode_response(len)? {
            Response::WriteMultipleRegisters { quantity: got_qty, .. } => Ok(got_qty as usize),
            Response::Exception { code, .. } => Err(MasterError::Exception(code)),
            _ => Err(MasterError::UnexpectedResponseShape),
        }
    }

    /// FC 0x16 (spec's `mask_write_reg`).
    pub fn mask_write_register(&mut self, address: u16, and_mask: u16, or_mask: u16) -> Result<usize, MasterError> {
        let req = Request::MaskWriteRegister { address, and_mask, or_mask };
        let len = self.exchange(&req)?;
        match self.decode_response(len)? {
            Response::MaskWriteRegister { .. } => Ok(1),
            Response::Exception { code, .. } => Err(MasterError::Exception(code)),
            _ => Err(MasterError::UnexpectedResponseShape),
        }
    }

    /// FC 0x17 (spec's `write_and_read_regs`).
    pub fn read_write_multiple_registers(
        &mut self,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        write_regs: &[u16],
        out: &mut [u16],
    ) -> Result<usize, MasterError> {
        let write_quantity = Self::check_quantity(
            write_regs.len(),
            function::READ_WRITE_MULTIPLE_REGISTERS,
            bounds::RW_WRITE_REGISTERS.0,
            bounds::RW_WRITE_REGISTERS.1,
        )?;
        let mut packed = [0u8; 242]; // 121 registers * 2 bytes
        let mut n = 0;
        for &v in write_regs {
            n += put_u16(&mut packed[n..], v);
        }
        let req = Request::ReadWriteMultipleRegisters {
            read_address,
            read_quantity,
            write_address,
            write_quantity,
            payload: &packed[..n],
        };
        let len = self.exchange(&req)?;
        match self.decode_response(len)? {
            Response::ReadWriteMultipleRegisters { payload } => {
                let expected = read_quantity as usize * 2;
                if payload.len() != expected {
                    return Err(MasterError::LengthMismatch);
                }
                for i in 0..read_quantity as usize {
                    let (v, _) = get_u16(&payload[i * 2..]);
                    out[i] = v;
                }
                Ok(read_quantity as usize)
            }
            Response::Exception { code, .. } => Err(MasterError::Exception(code)),
            _ => Err(MasterError::UnexpectedResponseShape),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;
    use crate::config::MasterConfig;

    /// A transport that hands back a scripted reply in a single `read` call
    /// and records everything written to it, so the timing state machine's
    /// inter-byte timeout (not the ack timeout) ends the read.
    struct MockTransport {
        to_read: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl MockTransport {
        fn with_reply(reply: &[u8]) -> Self {
            Self {
                to_read: reply.iter().copied().collect(),
                written: Vec::new(),
            }
        }

        fn silent() -> Self {
            Self {
                to_read: VecDeque::new(),
                written: Vec::new(),
            }
        }
    }

    impl Transport for MockTransport {
        fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            let mut n = 0;
            while n < buf.len() {
                match self.to_read.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn tcp_config() -> MasterConfig {
        MasterConfig {
            protocol: Protocol::Tcp,
            unit: 1,
            check_unit_id: true,
            check_mbap: true,
            flush_before_send: false,
            ack_timeout: Duration::from_millis(20),
            inter_byte_timeout: Duration::from_millis(5),
        }
    }

    fn rtu_config() -> MasterConfig {
        MasterConfig {
            protocol: Protocol::Rtu,
            unit: 1,
            check_unit_id: true,
            check_mbap: true,
            flush_before_send: false,
            ack_timeout: Duration::from_millis(20),
            inter_byte_timeout: Duration::from_millis(5),
        }
    }

    #[test]
    fn s3_tcp_read_holding_registers_round_trip() {
        // spec.md §8 S3: request tid=1 unit=1 addr=0 qty=2, reply yields [10, 20].
        let reply = [0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14];
        let mut master = Master::new(MockTransport::with_reply(&reply), &tcp_config());
        let mut out = [0u16; 2];
        let n = master.read_holding_registers(0x0000, 2, &mut out).unwrap();
        assert_eq!(n, 2);
        assert_eq!(out, [10, 20]);
        assert_eq!(
            &master.io.transport().written[..],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02]
        );
    }

    #[test]
    fn s4_tcp_exception_response_returns_negated_code() {
        // spec.md §8 S4: same request as S3, reply is an illegal-data-address exception.
        let reply = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02];
        let mut master = Master::new(MockTransport::with_reply(&reply), &tcp_config());
        let mut out = [0u16; 2];
        let err = master.read_holding_registers(0x0000, 2, &mut out).unwrap_err();
        assert!(matches!(err, MasterError::Exception(ExceptionCode::IllegalDataAddress)));
        assert!(!err.is_communication_failure());
    }

    #[test]
    fn property8_tcp_transaction_id_mismatch_is_communication_failure() {
        let reply = [0x00, 0x63, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14];
        let mut master = Master::new(MockTransport::with_reply(&reply), &tcp_config());
        let mut out = [0u16; 2];
        let err = master.read_holding_registers(0x0000, 2, &mut out).unwrap_err();
        assert!(matches!(err, MasterError::TransactionMismatch { .. }));
        assert!(err.is_communication_failure());
    }

    #[test]
    fn property8_tcp_unit_mismatch_is_communication_failure() {
        let reply = [0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x09, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14];
        let mut master = Master::new(MockTransport::with_reply(&reply), &tcp_config());
        let mut out = [0u16; 2];
        let err = master.read_holding_registers(0x0000, 2, &mut out).unwrap_err();
        assert!(matches!(err, MasterError::UnitMismatch { .. }));
    }

    #[test]
    fn no_response_is_a_communication_failure() {
        let mut master = Master::new(MockTransport::silent(), &tcp_config());
        let mut out = [0u16; 2];
        let err = master.read_holding_registers(0x0000, 2, &mut out).unwrap_err();
        assert!(matches!(err, MasterError::NoResponse));
        assert!(err.is_communication_failure());
    }

    #[test]
    fn s2_rtu_write_single_register_round_trip() {
        // spec.md §8 S2: unit=1, addr=0x006B, val=0x0001; echo reply returns +1.
        let reply = [0x01, 0x06, 0x00, 0x6B, 0x00, 0x01, 0x39, 0xD6];
        let mut master = Master::new(MockTransport::with_reply(&reply), &rtu_config());
        let n = master.write_single_register(0x006B, 0x0001).unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            &master.io.transport().written[..],
            &[0x01, 0x06, 0x00, 0x6B, 0x00, 0x01, 0x39, 0xD6]
        );
    }

    #[test]
    fn write_multiple_coils_rejects_oversized_slice_before_packing() {
        let mut master = Master::new(MockTransport::silent(), &rtu_config());
        let bits = [false; 1969]; // one past bounds::WRITE_BITS.1
        let err = master.write_multiple_coils(0, &bits).unwrap_err();
        assert!(matches!(err, MasterError::Pdu(PduError::InvalidQuantity { .. })));
    }

    #[test]
    fn write_multiple_registers_rejects_oversized_slice_before_packing() {
        let mut master = Master::new(MockTransport::silent(), &rtu_config());
        let regs = [0u16; 124]; // one past bounds::WRITE_REGISTERS.1
        let err = master.write_multiple_registers(0, &regs).unwrap_err();
        assert!(matches!(err, MasterError::Pdu(PduError::InvalidQuantity { .. })));
    }

    #[test]
    fn read_write_multiple_registers_rejects_oversized_write_slice_before_packing() {
        let mut master = Master::new(MockTransport::silent(), &rtu_config());
        let write_regs = [0u16; 122]; // one past bounds::RW_WRITE_REGISTERS.1
        let mut out = [0u16; 1];
        let err = master
            .read_write_multiple_registers(0, 1, 0, &write_regs, &mut out)
            .unwrap_err();
        assert!(matches!(err, MasterError::Pdu(PduError::InvalidQuantity { .. })));
    }
}
