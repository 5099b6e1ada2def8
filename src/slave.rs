//! The slave dispatch engine (spec.md §4.8): decode one request frame,
//! route it through the registered [`Callbacks`], and build a reply (or
//! drop the request silently when spec.md §7's anti-amplification rule
//! applies).

use thiserror::Error;
use tracing::{trace, warn};

use crate::bitmap;
use crate::errors::TransportError;
use crate::frame::{mbap, rtu, MAX_TCP_FRAME};
use crate::numeric::{get_u16, put_u16};
use crate::pdu::{self, function, ExceptionCode, Request, Response};
use crate::protocol::{Protocol, TCP_BROADCAST_UNIT};
use crate::transport::timing::FramedIo;
use crate::transport::Transport;

#[derive(Error, Debug)]
pub enum SlaveError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

type ReadBitsFn<'a> = Box<dyn FnMut(u16, u16) -> Result<Vec<bool>, ExceptionCode> + 'a>;
type WriteBitsFn<'a> = Box<dyn FnMut(u16, &[bool]) -> Result<(), ExceptionCode> + 'a>;
type ReadRegsFn<'a> = Box<dyn FnMut(u16, u16) -> Result<Vec<u16>, ExceptionCode> + 'a>;
type WriteRegsFn<'a> = Box<dyn FnMut(u16, &[u16]) -> Result<(), ExceptionCode> + 'a>;

/// The six callback slots spec.md §3/§6 defines for the slave side. Each is
/// optional; a request landing on an unregistered slot gets
/// [`ExceptionCode::SlaveDeviceFailure`], matching "absent callback" in
/// spec.md §4.8.
#[derive(Default)]
pub struct Callbacks<'a> {
    pub read_coils: Option<ReadBitsFn<'a>>,
    pub read_discrete_inputs: Option<ReadBitsFn<'a>>,
    pub write_coils: Option<WriteBitsFn<'a>>,
    pub read_holding_registers: Option<ReadRegsFn<'a>>,
    pub read_input_registers: Option<ReadRegsFn<'a>>,
    pub write_holding_registers: Option<WriteRegsFn<'a>>,
}

impl<'a> Callbacks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_read_coils(mut self, f: impl FnMut(u16, u16) -> Result<Vec<bool>, ExceptionCode> + 'a) -> Self {
        self.read_coils = Some(Box::new(f));
        self
    }

    pub fn on_read_discrete_inputs(mut self, f: impl FnMut(u16, u16) -> Result<Vec<bool>, ExceptionCode> + 'a) -> Self {
        self.read_discrete_inputs = Some(Box::new(f));
        self
    }

    pub fn on_write_coils(mut self, f: impl FnMut(u16, &[bool]) -> Result<(), ExceptionCode> + 'a) -> Self {
        self.write_coils = Some(Box::new(f));
        self
    }

    pub fn on_read_holding_registers(mut self, f: impl FnMut(u16, u16) -> Result<Vec<u16>, ExceptionCode> + 'a) -> Self {
        self.read_holding_registers = Some(Box::new(f));
        self
    }

    pub fn on_read_input_registers(mut self, f: impl FnMut(u16, u16) -> Result<Vec<u16>, ExceptionCode> + 'a) -> Self {
        self.read_input_registers = Some(Box::new(f));
        self
    }

    pub fn on_write_holding_registers(mut self, f: impl FnMut(u16, &[u16]) -> Result<(), ExceptionCode> + 'a) -> Self {
        self.write_holding_registers = Some(Box::new(f));
        self
    }
}

/// Builds the response to `req`, writing any payload into `scratch` and
/// borrowing it back out. A free function rather than a method on `Slave`:
/// it only needs `callbacks` and `scratch`, so it sidesteps a self-borrow
/// conflict between the returned `Response<'a>` (tied to `scratch`) and the
/// rest of `Slave`'s fields.
fn dispatch_request<'a>(req: &Request<'_>, callbacks: &mut Callbacks<'_>, scratch: &'a mut [u8]) -> Response<'a> {
    match *req {
        Request::ReadBits { function: fc, address, quantity } => {
            let cb = if fc == function::READ_COILS {
                callbacks.read_coils.as_mut()
            } else {
                callbacks.read_discrete_inputs.as_mut()
            };
            let Some(cb) = cb else {
                return Response::Exception { function: fc, code: ExceptionCode::SlaveDeviceFailure };
            };
            match cb(address, quantity) {
                Ok(bits) => {
                    let len = bitmap::packed_len(bits.len());
                    for (i, bit) in bits.iter().enumerate() {
                        bitmap::set_bit(&mut scratch[..len], i, *bit);
                    }
                    Response::ReadBits { function: fc, payload: &scratch[..len] }
                }
                Err(code) => Response::Exception { function: fc, code },
            }
        }
        Request::ReadRegisters { function: fc, address, quantity } => {
            let cb = if fc == function::READ_HOLDING_REGISTERS {
                callbacks.read_holding_registers.as_mut()
            } else {
                callbacks.read_input_registers.as_mut()
            };
            let Some(cb) = cb else {
                return Response::Exception { function: fc, code: ExceptionCode::SlaveDeviceFailure };
            };
            match cb(address, quantity) {
                Ok(regs) => {
                    let mut n = 0;
                    for v in regs {
                        n += put_u16(&mut scratch[n..], v);
                    }
                    Response::ReadRegisters { function: fc, payload: &scratch[..n] }
                }
                Err(code) => Response::Exception { function: fc, code },
            }
        }
        Request::WriteSingleCoil { address, value } => {
            let Some(cb) = callbacks.write_coils.as_mut() else {
                return Response::Exception { function: function::WRITE_SINGLE_COIL, code: ExceptionCode::SlaveDeviceFailure };
            };
            if value != 0x0000 && value != 0xFF00 {
                return Response::Exception { function: function::WRITE_SINGLE_COIL, code: ExceptionCode::IllegalDataValue };
            }
            match cb(address, &[value == 0xFF00]) {
                Ok(()) => Response::WriteSingleCoil { address, value },
                Err(code) => Response::Exception { function: function::WRITE_SINGLE_COIL, code },
            }
        }
        Request::WriteSingleRegister { address, value } => {
            let Some(cb) = callbacks.write_holding_registers.as_mut() else {
                return Response::Exception { function: function::WRITE_SINGLE_REGISTER, code: ExceptionCode::SlaveDeviceFailure };
            };
            match cb(address, &[value]) {
                Ok(()) => Response::WriteSingleRegister { address, value },
                Err(code) => Response::Exception { function: function::WRITE_SINGLE_REGISTER, code },
            }
        }
        Request::WriteMultipleCoils { address, quantity, payload } => {
            let Some(cb) = callbacks.write_coils.as_mut() else {
                return Response::Exception { function: function::WRITE_MULTIPLE_COILS, code: ExceptionCode::SlaveDeviceFailure };
            };
            let bits: Vec<bool> = (0..quantity as usize).map(|i| bitmap::get_bit(payload, i)).collect();
            match cb(address, &bits) {
                Ok(()) => Response::WriteMultipleCoils { address, quantity },
                Err(code) => Response::Exception { function: function::WRITE_MULTIPLE_COILS, code },
            }
        }
        Request::WriteMultipleRegisters { address, quantity, payload } => {
            let Some(cb) = callbacks.write_holding_registers.as_mut() else {
                return Response::Exception { function: function::WRITE_MULTIPLE_REGISTERS, code: ExceptionCode::SlaveDeviceFailure };
            };
            let regs: Vec<u16> = (0..quantity as usize).map(|i| get_u16(&payload[i * 2..]).0).collect();
            match cb(address, &regs) {
                Ok(()) => Response::WriteMultipleRegisters { address, quantity },
                Err(code) => Response::Exception { function: function::WRITE_MULTIPLE_REGISTERS, code },
            }
        }
        Request::MaskWriteRegister { address, and_mask, or_mask } => {
            let (Some(reader), Some(writer)) =
                (callbacks.read_holding_registers.as_mut(), callbacks.write_holding_registers.as_mut())
            else {
                return Response::Exception { function: function::MASK_WRITE_REGISTER, code: ExceptionCode::SlaveDeviceFailure };
            };
            let current = match reader(address, 1) {
                Ok(regs) if regs.len() == 1 => regs[0],
                Ok(_) => {
                    return Response::Exception { function: function::MASK_WRITE_REGISTER, code: ExceptionCode::SlaveDeviceFailure }
                }
                Err(code) => return Response::Exception { function: function::MASK_WRITE_REGISTER, code },
            };
            let new_value = (current & and_mask) | (or_mask & !and_mask);
            match writer(address, &[new_value]) {
                Ok(()) => Response::MaskWriteRegister { address, and_mask, or_mask },
                Err(code) => Response::Exception { function: function::MASK_WRITE_REGISTER, code },
            }
        }
        Request::ReadWriteMultipleRegisters {
            read_address,
            read_quantity,
            write_address,
            write_quantity,
            payload,
        } => {
            let (Some(reader), Some(writer)) =
                (callbacks.read_holding_registers.as_mut(), callbacks.write_holding_registers.as_mut())
            else {
                return Response::Exception {
                    function: function::READ_WRITE_MULTIPLE_REGISTERS,
                    code: ExceptionCode::SlaveDeviceFailure,
                };
            };
            // Writes happen before reads (spec.md §4.8): a failing write
            // aborts before any read is attempted.
            let write_regs: Vec<u16> = (0..write_quantity as usize).map(|i| get_u16(&payload[i * 2..]).0).collect();
            if let Err(code) = writer(write_address, &write_regs) {
                return Response::Exception { function: function::READ_WRITE_MULTIPLE_REGISTERS, code };
            }
            match reader(read_address, read_quantity) {
                Ok(regs) => {
                    let mut n = 0;
                    for v in regs {
                        n += put_u16(&mut scratch[n..], v);
                    }
                    Response::ReadWriteMultipleRegisters { payload: &scratch[..n] }
                }
                Err(code) => Response::Exception { function: function::READ_WRITE_MULTIPLE_REGISTERS, code },
            }
        }
    }
}

/// A Modbus slave (spec.md §3 Instance, slave role): one transport, one
/// unit address, and the callback table an embedding application fills in.
pub struct Slave<T: Transport> {
    io: FramedIo<T>,
    protocol: Protocol,
    unit: u8,
    /// Scratch buffer for the wire frame, both directions.
    frame_buf: [u8; MAX_TCP_FRAME],
}

impl<T: Transport> Slave<T> {
    pub fn new(transport: T, config: &crate::config::SlaveConfig) -> Self {
        Self {
            io: FramedIo::new(transport, config.ack_timeout, config.inter_byte_timeout),
            protocol: config.protocol,
            unit: config.unit,
            frame_buf: [0u8; MAX_TCP_FRAME],
        }
    }

    pub fn open(&mut self) -> Result<(), SlaveError> {
        Ok(self.io.transport_mut().open()?)
    }

    pub fn close(&mut self) -> Result<(), SlaveError> {
        Ok(self.io.transport_mut().close()?)
    }

    /// Waits for one request frame and, if it is addressed to us and well
    /// formed, dispatches it through `callbacks` and replies.
    ///
    /// Returns `Ok(None)` when a request was silently dropped (no frame
    /// arrived before the ack timeout, the frame was malformed, or it was
    /// addressed to a different unit) per spec.md §7's anti-amplification
    /// rule — distinct from `Err`, which is a genuine transport failure.
    /// `Ok(Some(n))` means a reply of `n` bytes was sent.
    pub fn serve_one(&mut self, callbacks: &mut Callbacks<'_>) -> Result<Option<usize>, SlaveError> {
        let n = self.io.read_frame(&mut self.frame_buf)?;
        if n == 0 {
            return Ok(None);
        }

        let (unit_id, transaction_id, pdu_slice): (u8, u16, &[u8]) = match self.protocol {
            Protocol::Rtu => match rtu::decode(&self.frame_buf[..n]) {
                Ok((unit, pdu)) => (unit, 0, pdu),
                Err(e) => {
                    trace!(error = %e, "dropping malformed RTU frame");
                    return Ok(None);
                }
            },
            Protocol::Tcp => match mbap::decode(&self.frame_buf[..n]) {
                Ok((header, pdu)) => (header.unit_id, header.transaction_id, pdu),
                Err(e) => {
                    trace!(error = %e, "dropping malformed TCP frame");
                    return Ok(None);
                }
            },
        };

        let is_broadcast = self.protocol == Protocol::Tcp && unit_id == TCP_BROADCAST_UNIT;
        if unit_id != self.unit && !is_broadcast {
            trace!(unit = self.unit, got = unit_id, "dropping request addressed to another unit");
            return Ok(None);
        }

        // `req` borrows `pdu_slice`, which in turn borrows `self.frame_buf`;
        // that borrow is last used inside `dispatch_request` below, so by
        // the time `send_response` needs `&mut self` it has already ended.
        let req = match pdu::decode_request(pdu_slice) {
            Ok((req, _)) => req,
            Err(pdu::PduError::UnsupportedFunction(fc)) => {
                let resp = Response::Exception { function: fc, code: ExceptionCode::IllegalFunction };
                return self.send_response(&resp, transaction_id);
            }
            Err(e) => {
                trace!(error = %e, "dropping malformed request PDU");
                return Ok(None);
            }
        };

        // Scratch for the response payload: local, not a field of `self`,
        // so the `Response<'_>` it backs never conflicts with the `&mut
        // self` that `send_response` needs next.
        let mut scratch = [0u8; MAX_TCP_FRAME];
        let resp = dispatch_request(&req, callbacks, &mut scratch);
        self.send_response(&resp, transaction_id)
    }

    fn send_response(&mut self, resp: &Response<'_>, transaction_id: u16) -> Result<Option<usize>, SlaveError> {
        let mut pdu_buf = [0u8; MAX_TCP_FRAME];
        let pdu_len = match pdu::encode_response(&mut pdu_buf, resp) {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "failed to encode response PDU");
                return Ok(None);
            }
        };

        let frame_len = match self.protocol {
            Protocol::Rtu => rtu::encode(&mut self.frame_buf, self.unit, &pdu_buf[..pdu_len])?,
            Protocol::Tcp => mbap::encode(&mut self.frame_buf, transaction_id, self.unit, &pdu_buf[..pdu_len])?,
        };

        self.io.write_frame(&self.frame_buf[..frame_len])?;
        Ok(Some(frame_len))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;
    use crate::config::SlaveConfig;

    struct MockTransport {
        to_read: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl MockTransport {
        fn with_request(bytes: &[u8]) -> Self {
            Self {
                to_read: bytes.iter().copied().collect(),
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

    fn rtu_config(unit: u8) -> SlaveConfig {
        SlaveConfig {
            protocol: Protocol::Rtu,
            unit,
            ack_timeout: Duration::from_millis(20),
            inter_byte_timeout: Duration::from_millis(5),
        }
    }

    #[test]
    fn s5_write_single_coil_illegal_value_produces_expected_exception_bytes() {
        // spec.md §8 S5: fc=0x05 value=0x0001 (neither 0x0000 nor 0xFF00) -> PDU `85 03`.
        let pdu = [0x05, 0x00, 0x00, 0x00, 0x01];
        let mut frame_buf = [0u8; crate::frame::MAX_RTU_FRAME];
        let n = rtu::encode(&mut frame_buf, 1, &pdu).unwrap();

        let mut slave = Slave::new(MockTransport::with_request(&frame_buf[..n]), &rtu_config(1));
        let write_called = Cell::new(false);
        let mut callbacks = Callbacks::new().on_write_coils(|_, _| {
            write_called.set(true);
            Ok(())
        });

        let sent = slave.serve_one(&mut callbacks).unwrap();
        assert!(sent.is_some());
        assert!(!write_called.get(), "illegal value must be rejected before the callback runs");

        let written = slave.io.transport().written.clone();
        let (unit, reply_pdu) = rtu::decode(&written).unwrap();
        assert_eq!(unit, 1);
        assert_eq!(reply_pdu, &[0x85, 0x03]);
    }

    #[test]
    fn unit_mismatch_is_dropped_silently() {
        let pdu = [0x03, 0x00, 0x00, 0x00, 0x01];
        let mut frame_buf = [0u8; crate::frame::MAX_RTU_FRAME];
        let n = rtu::encode(&mut frame_buf, 9, &pdu).unwrap();

        let mut slave = Slave::new(MockTransport::with_request(&frame_buf[..n]), &rtu_config(1));
        let mut callbacks = Callbacks::new();
        let sent = slave.serve_one(&mut callbacks).unwrap();
        assert!(sent.is_none());
        assert!(slave.io.transport().written.is_empty());
    }

    #[test]
    fn s6_mask_write_register_applies_formula_and_echoes_request() {
        // spec.md §8 S6: V=0x12, AND=0xF2, OR=0x25 -> write_hold called with 0x17.
        let stored = Cell::new(0x12u16);
        let last_write = Cell::new(None::<(u16, u16)>);
        let mut callbacks = Callbacks::new()
            .on_read_holding_registers(|_addr, qty| {
                assert_eq!(qty, 1);
                Ok(vec![stored.get()])
            })
            .on_write_holding_registers(|addr, values| {
                last_write.set(Some((addr, values[0])));
                stored.set(values[0]);
                Ok(())
            });

        let req = Request::MaskWriteRegister {
            address: 0x0004,
            and_mask: 0xF2,
            or_mask: 0x25,
        };
        let mut scratch = [0u8; 16];
        let resp = dispatch_request(&req, &mut callbacks, &mut scratch);

        assert_eq!(last_write.get(), Some((0x0004, 0x17)));
        assert_eq!(
            resp,
            Response::MaskWriteRegister {
                address: 0x0004,
                and_mask: 0xF2,
                or_mask: 0x25
            }
        );
    }

    #[test]
    fn property9_mask_write_formula_holds_for_arbitrary_values() {
        for (v, a, o) in [(0x0000u16, 0x0000u16, 0x0000u16), (0xFFFF, 0x00FF, 0xFF00), (0x1234, 0xFF00, 0x00AB)] {
            let stored = Cell::new(v);
            let mut callbacks = Callbacks::new()
                .on_read_holding_registers(|_, _| Ok(vec![stored.get()]))
                .on_write_holding_registers(|_, values| {
                    stored.set(values[0]);
                    Ok(())
                });
            let req = Request::MaskWriteRegister {
                address: 0,
                and_mask: a,
                or_mask: o,
            };
            let mut scratch = [0u8; 16];
            let _ = dispatch_request(&req, &mut callbacks, &mut scratch);
            assert_eq!(stored.get(), (v & a) | (o & !a));
        }
    }

    #[test]
    fn property10_read_write_registers_observes_writes_before_reads_on_overlap() {
        let regs = RefCell::new(vec![0u16; 10]);
        let mut callbacks = Callbacks::new()
            .on_read_holding_registers(|addr, qty| {
                let regs = regs.borrow();
                Ok(regs[addr as usize..addr as usize + qty as usize].to_vec())
            })
            .on_write_holding_registers(|addr, values| {
                let mut regs = regs.borrow_mut();
                regs[addr as usize..addr as usize + values.len()].copy_from_slice(values);
                Ok(())
            });

        let mut write_payload = [0u8; 4];
        let mut n = 0;
        n += put_u16(&mut write_payload[n..], 0xAAAA);
        put_u16(&mut write_payload[n..], 0xBBBB);

        let req = Request::ReadWriteMultipleRegisters {
            read_address: 0,
            read_quantity: 2,
            write_address: 0,
            write_quantity: 2,
            payload: &write_payload,
        };
        let mut scratch = [0u8; 16];
        match dispatch_request(&req, &mut callbacks, &mut scratch) {
            Response::ReadWriteMultipleRegisters { payload } => {
                assert_eq!(payload, &[0xAA, 0xAA, 0xBB, 0xBB]);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unsupported_function_code_produces_illegal_function_exception() {
        let pdu = [0x07, 0x00]; // FC 0x07 (read exception status): accepted at decode, not dispatched.
        let mut frame_buf = [0u8; crate::frame::MAX_RTU_FRAME];
        let n = rtu::encode(&mut frame_buf, 1, &pdu).unwrap();

        let mut slave = Slave::new(MockTransport::with_request(&frame_buf[..n]), &rtu_config(1));
        let mut callbacks = Callbacks::new();
        slave.serve_one(&mut callbacks).unwrap();

        let written = slave.io.transport().written.clone();
        let (_, reply_pdu) = rtu::decode(&written).unwrap();
        assert_eq!(reply_pdu, &[0x87, 0x01]);
    }
}
