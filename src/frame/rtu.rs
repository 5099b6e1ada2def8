//! Modbus RTU framing: `unit(1) | PDU | crc_lo(1) | crc_hi(1)` (spec.md §4.4,
//! §6). CRC-16/Modbus over `unit + PDU`, placed on the wire little-endian.

use crate::errors::FrameError;
use crate::numeric::crc16_modbus;

use super::MAX_RTU_FRAME;

/// Minimum RTU frame: 1 (unit) + 2 (shortest PDU, an exception) + 2 (CRC).
const MIN_RTU_FRAME: usize = 5;

/// Writes `unit` + `pdu` + CRC16 (LE) into `buf`, returning the frame length.
pub fn encode(buf: &mut [u8], unit: u8, pdu: &[u8]) -> Result<usize, FrameError> {
    let frame_len = 1 + pdu.len() + 2;
    if buf.len() < frame_len || frame_len > MAX_RTU_FRAME {
        return Err(FrameError::buffer_overflow(format!(
            "RTU frame of {frame_len} bytes does not fit in a {}-byte buffer",
            buf.len().min(MAX_RTU_FRAME)
        )));
    }
    buf[0] = unit;
    buf[1..1 + pdu.len()].copy_from_slice(pdu);
    let crc = crc16_modbus(&buf[..1 + pdu.len()]);
    buf[1 + pdu.len()..frame_len].copy_from_slice(&crc.to_le_bytes());
    Ok(frame_len)
}

/// Validates and unwraps an RTU frame, returning `(unit, pdu_slice)`.
///
/// The trailing CRC is checked over `len - 2` leading bytes against the
/// little-endian CRC on the wire; a mismatch is a frame-format failure, not
/// a silently-accepted frame (spec.md §4.4).
pub fn decode(buf: &[u8]) -> Result<(u8, &[u8]), FrameError> {
    if buf.len() < MIN_RTU_FRAME {
        return Err(FrameError::too_short(
            format!("RTU frame of {} bytes is shorter than the {MIN_RTU_FRAME}-byte minimum", buf.len()),
            buf,
        ));
    }
    let covered = &buf[..buf.len() - 2];
    let calculated = crc16_modbus(covered);
    let received = u16::from_le_bytes([buf[buf.len() - 2], buf[buf.len() - 1]]);
    if calculated != received {
        return Err(FrameError::crc(calculated, received, buf));
    }
    Ok((buf[0], &covered[1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_read_holding_registers_request_matches_literal_wire_bytes() {
        // spec.md §8 S1.
        let pdu = [0x03, 0x00, 0x6B, 0x00, 0x03];
        let mut buf = [0u8; MAX_RTU_FRAME];
        let n = encode(&mut buf, 0x01, &pdu).unwrap();
        assert_eq!(&buf[..n], &[0x01, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x74, 0x17]);
    }

    #[test]
    fn s1_read_holding_registers_response_decodes_to_expected_values() {
        let wire = [0x01, 0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64, 0xAF, 0x07];
        let (unit, pdu) = decode(&wire).unwrap();
        assert_eq!(unit, 0x01);
        assert_eq!(pdu, &[0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64]);
    }

    #[test]
    fn s2_write_single_register_frame_matches_literal_wire_bytes() {
        let pdu = [0x06, 0x00, 0x6B, 0x00, 0x01];
        let mut buf = [0u8; MAX_RTU_FRAME];
        let n = encode(&mut buf, 0x01, &pdu).unwrap();
        assert_eq!(&buf[..n], &[0x01, 0x06, 0x00, 0x6B, 0x00, 0x01, 0x39, 0xD6]);
    }

    #[test]
    fn round_trip_is_identity_on_value() {
        let pdu = [0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x00, 0x14];
        let mut buf = [0u8; MAX_RTU_FRAME];
        let n = encode(&mut buf, 0x11, &pdu).unwrap();
        let (unit, decoded_pdu) = decode(&buf[..n]).unwrap();
        assert_eq!(unit, 0x11);
        assert_eq!(decoded_pdu, &pdu[..]);
    }

    #[test]
    fn single_bit_flip_in_crc_region_is_rejected() {
        let pdu = [0x03, 0x00, 0x6B, 0x00, 0x03];
        let mut buf = [0u8; MAX_RTU_FRAME];
        let n = encode(&mut buf, 0x01, &pdu).unwrap();
        buf[2] ^= 0x01;
        assert!(decode(&buf[..n]).is_err());
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(decode(&[0x01, 0x03, 0x00, 0x00]).is_err());
    }
}
