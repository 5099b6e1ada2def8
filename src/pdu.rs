//! The Modbus PDU codec: function-code-dispatched encode/decode of
//! request/response pairs, and exception responses.
//!
//! Grounded in spec.md §4.3. One variant per PDU *shape*, shared across
//! function codes that share it (FC 0x01/0x02 are both `ReadBits`
//! requests, FC 0x03/0x04 are both `ReadRegisters` requests), per the
//! re-architecture note in spec.md §9.

use thiserror::Error;

use crate::numeric::{get_u16, get_u8, put_u16, put_u8};

/// Function codes this core dispatches, plus two it only recognizes
/// at decode time (spec.md §6: "FC 0x07 and 0x11 are accepted at
/// decode but not dispatched in this core").
pub mod function {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    pub const MASK_WRITE_REGISTER: u8 = 0x16;
    pub const READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;
    pub const READ_EXCEPTION_STATUS: u8 = 0x07;
    pub const REPORT_SLAVE_ID: u8 = 0x11;
    pub const EXCEPTION_BIT: u8 = 0x80;
}

/// Standard Modbus exception codes (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ExceptionCode {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ExceptionCode {
    type Error = PduError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::SlaveDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::SlaveDeviceBusy,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetDeviceFailedToRespond,
            other => return Err(PduError::UnknownExceptionCode(other)),
        })
    }
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::SlaveDeviceFailure => "slave device failure",
            Self::Acknowledge => "acknowledge",
            Self::SlaveDeviceBusy => "slave device busy",
            Self::MemoryParityError => "memory parity error",
            Self::GatewayPathUnavailable => "gateway path unavailable",
            Self::GatewayTargetDeviceFailedToRespond => "gateway target device failed to respond",
        };
        write!(f, "{text}")
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PduError {
    #[error("PDU too short: {len} bytes")]
    TooShort { len: usize },

    #[error("buffer too small: need {need}, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("unsupported function code 0x{0:02X}")]
    UnsupportedFunction(u8),

    #[error("quantity {quantity} out of range {min}..={max} for function 0x{function:02X}")]
    InvalidQuantity {
        function: u8,
        quantity: u16,
        min: u16,
        max: u16,
    },

    #[error("byte count {got} does not match expected {expected}")]
    InvalidByteCount { expected: usize, got: usize },

    #[error("invalid write-single-coil value 0x{0:04X}")]
    InvalidCoilValue(u16),

    #[error("unknown exception code 0x{0:02X}")]
    UnknownExceptionCode(u8),

    #[error("malformed PDU")]
    Malformed,
}

fn check_capacity(have: usize, need: usize) -> Result<(), PduError> {
    if have < need {
        Err(PduError::BufferTooSmall { need, have })
    } else {
        Ok(())
    }
}

fn check_len(buf: &[u8], need: usize) -> Result<(), PduError> {
    if buf.len() < need {
        Err(PduError::TooShort { len: buf.len() })
    } else {
        Ok(())
    }
}

fn validate_quantity(function: u8, quantity: u16, min: u16, max: u16) -> Result<(), PduError> {
    if quantity < min || quantity > max {
        Err(PduError::InvalidQuantity {
            function,
            quantity,
            min,
            max,
        })
    } else {
        Ok(())
    }
}

/// Quantity bounds per spec.md §4.3.
pub mod bounds {
    pub const READ_BITS: (u16, u16) = (1, 2000);
    pub const READ_REGISTERS: (u16, u16) = (1, 125);
    pub const WRITE_BITS: (u16, u16) = (1, 1968);
    pub const WRITE_REGISTERS: (u16, u16) = (1, 123);
    pub const RW_READ_REGISTERS: (u16, u16) = (1, 125);
    pub const RW_WRITE_REGISTERS: (u16, u16) = (1, 121);
}

/// A Modbus request PDU. `'a` ties write payloads to the caller's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// FC 0x01 (read coils) or 0x02 (read discrete inputs).
    ReadBits { function: u8, address: u16, quantity: u16 },
    /// FC 0x03 (read holding registers) or 0x04 (read input registers).
    ReadRegisters { function: u8, address: u16, quantity: u16 },
    /// FC 0x05. `value` must be `0xFF00` or `0x0000`.
    WriteSingleCoil { address: u16, value: u16 },
    /// FC 0x06.
    WriteSingleRegister { address: u16, value: u16 },
    /// FC 0x0F. `payload` is LSB-first bit-packed, `ceil(quantity/8)` bytes.
    WriteMultipleCoils {
        address: u16,
        quantity: u16,
        payload: &'a [u8],
    },
    /// FC 0x10. `payload` is big-endian u16s, `2 * quantity` bytes.
    WriteMultipleRegisters {
        address: u16,
        quantity: u16,
        payload: &'a [u8],
    },
    /// FC 0x16.
    MaskWriteRegister {
        address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    /// FC 0x17. `payload` is the write half, big-endian u16s.
    ReadWriteMultipleRegisters {
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        write_quantity: u16,
        payload: &'a [u8],
    },
}

/// A Modbus response PDU, or a standard exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response<'a> {
    /// FC 0x01/0x02 response: bit-packed payload.
    ReadBits { function: u8, payload: &'a [u8] },
    /// FC 0x03/0x04 response: big-endian register payload.
    ReadRegisters { function: u8, payload: &'a [u8] },
    WriteSingleCoil { address: u16, value: u16 },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
    MaskWriteRegister {
        address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    /// FC 0x17 response: only the read half is echoed back.
    ReadWriteMultipleRegisters { payload: &'a [u8] },
    Exception { function: u8, code: ExceptionCode },
}

impl<'a> Request<'a> {
    /// The function code this request carries on the wire.
    pub fn function_code(&self) -> u8 {
        match self {
            Request::ReadBits { function, .. } | Request::ReadRegisters { function, .. } => {
                *function
            }
            Request::WriteSingleCoil { .. } => function::WRITE_SINGLE_COIL,
            Request::WriteSingleRegister { .. } => function::WRITE_SINGLE_REGISTER,
            Request::WriteMultipleCoils { .. } => function::WRITE_MULTIPLE_COILS,
            Request::WriteMultipleRegisters { .. } => function::WRITE_MULTIPLE_REGISTERS,
            Request::MaskWriteRegister { .. } => function::MASK_WRITE_REGISTER,
            Request::ReadWriteMultipleRegisters { .. } => function::READ_WRITE_MULTIPLE_REGISTERS,
        }
    }
}

/// Encodes `req` into `buf`, returning the number of bytes written.
pub fn encode_request(buf: &mut [u8], req: &Request<'_>) -> Result<usize, PduError> {
    match *req {
        Request::ReadBits {
            function,
            address,
            quantity,
        } => {
            validate_quantity(function, quantity, bounds::READ_BITS.0, bounds::READ_BITS.1)?;
            check_capacity(buf.len(), 5)?;
            let mut n = put_u8(buf, function);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], quantity);
            Ok(n)
        }
        Request::ReadRegisters {
            function,
            address,
            quantity,
        } => {
            validate_quantity(
                function,
                quantity,
                bounds::READ_REGISTERS.0,
                bounds::READ_REGISTERS.1,
            )?;
            check_capacity(buf.len(), 5)?;
            let mut n = put_u8(buf, function);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], quantity);
            Ok(n)
        }
        Request::WriteSingleCoil { address, value } => {
            if value != 0x0000 && value != 0xFF00 {
                return Err(PduError::InvalidCoilValue(value));
            }
            check_capacity(buf.len(), 5)?;
            let mut n = put_u8(buf, function::WRITE_SINGLE_COIL);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], value);
            Ok(n)
        }
        Request::WriteSingleRegister { address, value } => {
            check_capacity(buf.len(), 5)?;
            let mut n = put_u8(buf, function::WRITE_SINGLE_REGISTER);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], value);
            Ok(n)
        }
        Request::WriteMultipleCoils {
            address,
            quantity,
            payload,
        } => {
            validate_quantity(
                function::WRITE_MULTIPLE_COILS,
                quantity,
                bounds::WRITE_BITS.0,
                bounds::WRITE_BITS.1,
            )?;
            let expected = crate::bitmap::packed_len(quantity as usize);
            if payload.len() != expected {
                return Err(PduError::InvalidByteCount {
                    expected,
                    got: payload.len(),
                });
            }
            check_capacity(buf.len(), 6 + payload.len())?;
            let mut n = put_u8(buf, function::WRITE_MULTIPLE_COILS);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], quantity);
            n += put_u8(&mut buf[n..], payload.len() as u8);
            buf[n..n + payload.len()].copy_from_slice(payload);
            Ok(n + payload.len())
        }
        Request::WriteMultipleRegisters {
            address,
            quantity,
            payload,
        } => {
            validate_quantity(
                function::WRITE_MULTIPLE_REGISTERS,
                quantity,
                bounds::WRITE_REGISTERS.0,
                bounds::WRITE_REGISTERS.1,
            )?;
            let expected = quantity as usize * 2;
            if payload.len() != expected {
                return Err(PduError::InvalidByteCount {
                    expected,
                    got: payload.len(),
                });
            }
            check_capacity(buf.len(), 6 + payload.len())?;
            let mut n = put_u8(buf, function::WRITE_MULTIPLE_REGISTERS);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], quantity);
            n += put_u8(&mut buf[n..], payload.len() as u8);
            buf[n..n + payload.len()].copy_from_slice(payload);
            Ok(n + payload.len())
        }
        Request::MaskWriteRegister {
            address,
            and_mask,
            or_mask,
        } => {
            check_capacity(buf.len(), 7)?;
            let mut n = put_u8(buf, function::MASK_WRITE_REGISTER);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], and_mask);
            n += put_u16(&mut buf[n..], or_mask);
            Ok(n)
        }
        Request::ReadWriteMultipleRegisters {
            read_address,
            read_quantity,
            write_address,
            write_quantity,
            payload,
        } => {
            validate_quantity(
                function::READ_WRITE_MULTIPLE_REGISTERS,
                read_quantity,
                bounds::RW_READ_REGISTERS.0,
                bounds::RW_READ_REGISTERS.1,
            )?;
            validate_quantity(
                function::READ_WRITE_MULTIPLE_REGISTERS,
                write_quantity,
                bounds::RW_WRITE_REGISTERS.0,
                bounds::RW_WRITE_REGISTERS.1,
            )?;
            let expected = write_quantity as usize * 2;
            if payload.len() != expected {
                return Err(PduError::InvalidByteCount {
                    expected,
                    got: payload.len(),
                });
            }
            check_capacity(buf.len(), 10 + payload.len())?;
            let mut n = put_u8(buf, function::READ_WRITE_MULTIPLE_REGISTERS);
            n += put_u16(&mut buf[n..], read_address);
            n += put_u16(&mut buf[n..], read_quantity);
            n += put_u16(&mut buf[n..], write_address);
            n += put_u16(&mut buf[n..], write_quantity);
            n += put_u8(&mut buf[n..], payload.len() as u8);
            buf[n..n + payload.len()].copy_from_slice(payload);
            Ok(n + payload.len())
        }
    }
}

/// Decodes a request PDU from `buf`, returning the request and bytes consumed.
pub fn decode_request(buf: &[u8]) -> Result<(Request<'_>, usize), PduError> {
    check_len(buf, 2)?;
    let (function, _) = get_u8(buf);
    match function {
        function::READ_COILS | function::READ_DISCRETE_INPUTS => {
            check_len(buf, 5)?;
            let (address, _) = get_u16(&buf[1..]);
            let (quantity, _) = get_u16(&buf[3..]);
            validate_quantity(function, quantity, bounds::READ_BITS.0, bounds::READ_BITS.1)?;
            Ok((
                Request::ReadBits {
                    function,
                    address,
                    quantity,
                },
                5,
            ))
        }
        function::READ_HOLDING_REGISTERS | function::READ_INPUT_REGISTERS => {
            check_len(buf, 5)?;
            let (address, _) = get_u16(&buf[1..]);
            let (quantity, _) = get_u16(&buf[3..]);
            validate_quantity(
                function,
                quantity,
                bounds::READ_REGISTERS.0,
                bounds::READ_REGISTERS.1,
            )?;
            Ok((
                Request::ReadRegisters {
                    function,
                    address,
                    quantity,
                },
                5,
            ))
        }
        function::WRITE_SINGLE_COIL => {
            // Unlike `encode_request`, decode does *not* reject a non-canonical
            // value here: a slave must still decode the request to build an
            // 0x03 (illegal data value) exception reply (spec.md §4.8/S5)
            // rather than silently dropping it as a malformed frame.
            check_len(buf, 5)?;
            let (address, _) = get_u16(&buf[1..]);
            let (value, _) = get_u16(&buf[3..]);
            Ok((Request::WriteSingleCoil { address, value }, 5))
        }
        function::WRITE_SINGLE_REGISTER => {
            check_len(buf, 5)?;
            let (address, _) = get_u16(&buf[1..]);
            let (value, _) = get_u16(&buf[3..]);
            Ok((Request::WriteSingleRegister { address, value }, 5))
        }
        function::WRITE_MULTIPLE_COILS => {
            check_len(buf, 6)?;
            let (address, _) = get_u16(&buf[1..]);
            let (quantity, _) = get_u16(&buf[3..]);
            let (byte_count, _) = get_u8(&buf[5..]);
            let byte_count = byte_count as usize;
            check_len(buf, 6 + byte_count)?;
            validate_quantity(
                function::WRITE_MULTIPLE_COILS,
                quantity,
                bounds::WRITE_BITS.0,
                bounds::WRITE_BITS.1,
            )?;
            let expected = crate::bitmap::packed_len(quantity as usize);
            if byte_count != expected {
                return Err(PduError::InvalidByteCount {
                    expected,
                    got: byte_count,
                });
            }
            Ok((
                Request::WriteMultipleCoils {
                    address,
                    quantity,
                    payload: &buf[6..6 + byte_count],
                },
                6 + byte_count,
            ))
        }
        function::WRITE_MULTIPLE_REGISTERS => {
            check_len(buf, 6)?;
            let (address, _) = get_u16(&buf[1..]);
            let (quantity, _) = get_u16(&buf[3..]);
            let (byte_count, _) = get_u8(&buf[5..]);
            let byte_count = byte_count as usize;
            check_len(buf, 6 + byte_count)?;
            validate_quantity(
                function::WRITE_MULTIPLE_REGISTERS,
                quantity,
                bounds::WRITE_REGISTERS.0,
                bounds::WRITE_REGISTERS.1,
            )?;
            let expected = quantity as usize * 2;
            if byte_count != expected {
                return Err(PduError::InvalidByteCount {
                    expected,
                    got: byte_count,
                });
            }
            Ok((
                Request::WriteMultipleRegisters {
                    address,
                    quantity,
                    payload: &buf[6..6 + byte_count],
                },
                6 + byte_count,
            ))
        }
        function::MASK_WRITE_REGISTER => {
            check_len(buf, 7)?;
            let (address, _) = get_u16(&buf[1..]);
            let (and_mask, _) = get_u16(&buf[3..]);
            let (or_mask, _) = get_u16(&buf[5..]);
            Ok((
                Request::MaskWriteRegister {
                    address,
                    and_mask,
                    or_mask,
                },
                7,
            ))
        }
        function::READ_WRITE_MULTIPLE_REGISTERS => {
            check_len(buf, 10)?;
            let (read_address, _) = get_u16(&buf[1..]);
            let (read_quantity, _) = get_u16(&buf[3..]);
            let (write_address, _) = get_u16(&buf[5..]);
            let (write_quantity, _) = get_u16(&buf[7..]);
            let (byte_count, _) = get_u8(&buf[9..]);
            let byte_count = byte_count as usize;
            check_len(buf, 10 + byte_count)?;
            validate_quantity(
                function::READ_WRITE_MULTIPLE_REGISTERS,
                read_quantity,
                bounds::RW_READ_REGISTERS.0,
                bounds::RW_READ_REGISTERS.1,
            )?;
            validate_quantity(
                function::READ_WRITE_MULTIPLE_REGISTERS,
                write_quantity,
                bounds::RW_WRITE_REGISTERS.0,
                bounds::RW_WRITE_REGISTERS.1,
            )?;
            let expected = write_quantity as usize * 2;
            if byte_count != expected {
                return Err(PduError::InvalidByteCount {
                    expected,
                    got: byte_count,
                });
            }
            Ok((
                Request::ReadWriteMultipleRegisters {
                    read_address,
                    read_quantity,
                    write_address,
                    write_quantity,
                    payload: &buf[10..10 + byte_count],
                },
                10 + byte_count,
            ))
        }
        other => Err(PduError::UnsupportedFunction(other)),
    }
}

/// Encodes `resp` into `buf`, returning the number of bytes written.
pub fn encode_response(buf: &mut [u8], resp: &Response<'_>) -> Result<usize, PduError> {
    match *resp {
        Response::ReadBits { function, payload } | Response::ReadRegisters { function, payload } => {
            check_capacity(buf.len(), 2 + payload.len())?;
            let mut n = put_u8(buf, function);
            n += put_u8(&mut buf[n..], payload.len() as u8);
            buf[n..n + payload.len()].copy_from_slice(payload);
            Ok(n + payload.len())
        }
        Response::WriteSingleCoil { address, value } => {
            check_capacity(buf.len(), 5)?;
            let mut n = put_u8(buf, function::WRITE_SINGLE_COIL);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], value);
            Ok(n)
        }
        Response::WriteSingleRegister { address, value } => {
            check_capacity(buf.len(), 5)?;
            let mut n = put_u8(buf, function::WRITE_SINGLE_REGISTER);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], value);
            Ok(n)
        }
        Response::WriteMultipleCoils { address, quantity } => {
            check_capacity(buf.len(), 5)?;
            let mut n = put_u8(buf, function::WRITE_MULTIPLE_COILS);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], quantity);
            Ok(n)
        }
        Response::WriteMultipleRegisters { address, quantity } => {
            check_capacity(buf.len(), 5)?;
            let mut n = put_u8(buf, function::WRITE_MULTIPLE_REGISTERS);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], quantity);
            Ok(n)
        }
        Response::MaskWriteRegister {
            address,
            and_mask,
            or_mask,
        } => {
            check_capacity(buf.len(), 7)?;
            let mut n = put_u8(buf, function::MASK_WRITE_REGISTER);
            n += put_u16(&mut buf[n..], address);
            n += put_u16(&mut buf[n..], and_mask);
            n += put_u16(&mut buf[n..], or_mask);
            Ok(n)
        }
        Response::ReadWriteMultipleRegisters { payload } => {
            check_capacity(buf.len(), 2 + payload.len())?;
            let mut n = put_u8(buf, function::READ_WRITE_MULTIPLE_REGISTERS);
            n += put_u8(&mut buf[n..], payload.len() as u8);
            buf[n..n + payload.len()].copy_from_slice(payload);
            Ok(n + payload.len())
        }
        Response::Exception { function, code } => {
            check_capacity(buf.len(), 2)?;
            let mut n = put_u8(buf, function | function::EXCEPTION_BIT);
            n += put_u8(&mut buf[n..], code.code());
            Ok(n)
        }
    }
}

/// Decodes a response PDU from `buf`, returning the response and bytes consumed.
pub fn decode_response(buf: &[u8]) -> Result<(Response<'_>, usize), PduError> {
    check_len(buf, 2)?;
    let (function, _) = get_u8(buf);

    if function & function::EXCEPTION_BIT != 0 {
        let base = function & !function::EXCEPTION_BIT;
        let code = ExceptionCode::try_from(buf[1])?;
        return Ok((
            Response::Exception {
                function: base,
                code,
            },
            2,
        ));
    }

    match function {
        function::READ_COILS | function::READ_DISCRETE_INPUTS | function::READ_HOLDING_REGISTERS
        | function::READ_INPUT_REGISTERS => {
            check_len(buf, 2)?;
            let (byte_count, _) = get_u8(&buf[1..]);
            let byte_count = byte_count as usize;
            check_len(buf, 2 + byte_count)?;
            let payload = &buf[2..2 + byte_count];
            let resp = if matches!(
                function,
                function::READ_COILS | function::READ_DISCRETE_INPUTS
            ) {
                Response::ReadBits { function, payload }
            } else {
                Response::ReadRegisters { function, payload }
            };
            Ok((resp, 2 + byte_count))
        }
        function::WRITE_SINGLE_COIL => {
            check_len(buf, 5)?;
            let (address, _) = get_u16(&buf[1..]);
            let (value, _) = get_u16(&buf[3..]);
            Ok((Response::WriteSingleCoil { address, value }, 5))
        }
        function::WRITE_SINGLE_REGISTER => {
            check_len(buf, 5)?;
            let (address, _) = get_u16(&buf[1..]);
            let (value, _) = get_u16(&buf[3..]);
            Ok((Response::WriteSingleRegister { address, value }, 5))
        }
        function::WRITE_MULTIPLE_COILS => {
            check_len(buf, 5)?;
            let (address, _) = get_u16(&buf[1..]);
            let (quantity, _) = get_u16(&buf[3..]);
            Ok((Response::WriteMultipleCoils { address, quantity }, 5))
        }
        function::WRITE_MULTIPLE_REGISTERS => {
            check_len(buf, 5)?;
            let (address, _) = get_u16(&buf[1..]);
            let (quantity, _) = get_u16(&buf[3..]);
            Ok((Response::WriteMultipleRegisters { address, quantity }, 5))
        }
        function::MASK_WRITE_REGISTER => {
            check_len(buf, 7)?;
            let (address, _) = get_u16(&buf[1..]);
            let (and_mask, _) = get_u16(&buf[3..]);
            let (or_mask, _) = get_u16(&buf[5..]);
            Ok((
                Response::MaskWriteRegister {
                    address,
                    and_mask,
                    or_mask,
                },
                7,
            ))
        }
        function::READ_WRITE_MULTIPLE_REGISTERS => {
            check_len(buf, 2)?;
            let (byte_count, _) = get_u8(&buf[1..]);
            let byte_count = byte_count as usize;
            check_len(buf, 2 + byte_count)?;
            Ok((
                Response::ReadWriteMultipleRegisters {
                    payload: &buf[2..2 + byte_count],
                },
                2 + byte_count,
            ))
        }
        other => Err(PduError::UnsupportedFunction(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_holding_registers_request_roundtrip() {
        let req = Request::ReadRegisters {
            function: function::READ_HOLDING_REGISTERS,
            address: 0x006B,
            quantity: 3,
        };
        let mut buf = [0u8; 64];
        let n = encode_request(&mut buf, &req).unwrap();
        assert_eq!(&buf[..n], &[0x03, 0x00, 0x6B, 0x00, 0x03]);
        let (decoded, consumed) = decode_request(&buf[..n]).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(consumed, n);
    }

    #[test]
    fn read_response_roundtrip_preserves_payload_bytes() {
        let payload = [0x00, 0x64, 0x00, 0x65];
        let resp = Response::ReadRegisters {
            function: function::READ_HOLDING_REGISTERS,
            payload: &payload,
        };
        let mut buf = [0u8; 64];
        let n = encode_response(&mut buf, &resp).unwrap();
        assert_eq!(&buf[..2], &[0x03, 0x04]);
        let (decoded, consumed) = decode_response(&buf[..n]).unwrap();
        match decoded {
            Response::ReadRegisters { payload: got, .. } => assert_eq!(got, &payload),
            _ => panic!("wrong variant"),
        }
        assert_eq!(consumed, n);
    }

    #[test]
    fn write_multiple_registers_request_roundtrip() {
        let payload = [0x00, 0x0A, 0x01, 0x02];
        let req = Request::WriteMultipleRegisters {
            address: 0x0010,
            quantity: 2,
            payload: &payload,
        };
        let mut buf = [0u8; 64];
        let n = encode_request(&mut buf, &req).unwrap();
        let (decoded, consumed) = decode_request(&buf[..n]).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(consumed, n);
    }

    #[test]
    fn exception_response_is_two_bytes_with_high_bit_set() {
        let resp = Response::Exception {
            function: function::READ_HOLDING_REGISTERS,
            code: ExceptionCode::IllegalDataAddress,
        };
        let mut buf = [0u8; 16];
        let n = encode_response(&mut buf, &resp).unwrap();
        assert_eq!(n, 2);
        assert_eq!(buf[0], 0x83);
        assert_eq!(buf[1], 0x02);
        let (decoded, consumed) = decode_response(&buf[..n]).unwrap();
        assert_eq!(consumed, 2);
        match decoded {
            Response::Exception { function, code } => {
                assert_eq!(function, function::READ_HOLDING_REGISTERS);
                assert_eq!(code, ExceptionCode::IllegalDataAddress);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unsupported_function_is_distinguished_from_malformed() {
        let buf = [0x2B, 0x00];
        assert_eq!(
            decode_request(&buf),
            Err(PduError::UnsupportedFunction(0x2B))
        );
        let short = [0x03];
        assert!(matches!(
            decode_request(&short),
            Err(PduError::TooShort { .. })
        ));
    }

    #[test]
    fn quantity_bounds_are_enforced_on_encode_and_decode() {
        let too_many = Request::ReadRegisters {
            function: function::READ_HOLDING_REGISTERS,
            address: 0,
            quantity: 126,
        };
        let mut buf = [0u8; 16];
        assert!(matches!(
            encode_request(&mut buf, &too_many),
            Err(PduError::InvalidQuantity { .. })
        ));

        // Hand-crafted wire bytes requesting 126 registers.
        let wire = [0x03, 0x00, 0x00, 0x00, 0x7E];
        assert!(matches!(
            decode_request(&wire),
            Err(PduError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn write_single_coil_decode_accepts_non_canonical_value_for_slave_validation() {
        // spec.md §8 S5: a slave must decode this to build an 0x03 exception
        // reply, not drop it as malformed.
        let wire = [0x05, 0x00, 0x00, 0x00, 0x01];
        let (decoded, consumed) = decode_request(&wire).unwrap();
        assert_eq!(
            decoded,
            Request::WriteSingleCoil {
                address: 0,
                value: 0x0001
            }
        );
        assert_eq!(consumed, 5);
    }

    #[test]
    fn write_single_coil_rejects_non_canonical_values() {
        let bad = Request::WriteSingleCoil {
            address: 0,
            value: 0x0001,
        };
        let mut buf = [0u8; 16];
        assert!(matches!(
            encode_request(&mut buf, &bad),
            Err(PduError::InvalidCoilValue(0x0001))
        ));
    }
}
