//! Modbus TCP/MBAP framing: `tid(2,BE) | pid(2,BE) | dlen(2,BE) | unit(1) |
//! PDU` where `dlen = 1 + pdu_len` (spec.md §4.4, §6).
//!
//! Protocol-id validation and transaction-id/unit-id matching are policy
//! choices left to the caller (the master cycle), not enforced here — see
//! spec.md §4.4: "exposed to the caller."

use crate::errors::FrameError;

use super::MAX_TCP_FRAME;

pub const HEADER_LEN: usize = 7;

/// Fields of the 7-byte MBAP header, minus the PDU that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub unit_id: u8,
}

/// Writes the MBAP header and `pdu` into `buf`, returning the frame length.
pub fn encode(buf: &mut [u8], transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Result<usize, FrameError> {
    let frame_len = HEADER_LEN + pdu.len();
    if buf.len() < frame_len || frame_len > MAX_TCP_FRAME {
        return Err(FrameError::buffer_overflow(format!(
            "MBAP frame of {frame_len} bytes does not fit in a {}-byte buffer",
            buf.len().min(MAX_TCP_FRAME)
        )));
    }
    let dlen = (pdu.len() + 1) as u16;
    buf[0..2].copy_from_slice(&transaction_id.to_be_bytes());
    buf[2..4].copy_from_slice(&0u16.to_be_bytes());
    buf[4..6].copy_from_slice(&dlen.to_be_bytes());
    buf[6] = unit_id;
    buf[HEADER_LEN..frame_len].copy_from_slice(pdu);
    Ok(frame_len)
}

/// Validates and unwraps an MBAP frame, returning `(header, pdu_slice)`.
///
/// A `dlen` implying a PDU longer than what's actually in `buf` is a short
/// frame and rejected (spec.md §4.4); `dlen == 0` is likewise rejected since
/// it cannot even cover the unit-id byte MBAP counts as payload.
pub fn decode(buf: &[u8]) -> Result<(MbapHeader, &[u8]), FrameError> {
    if buf.len() < HEADER_LEN + 2 {
        return Err(FrameError::too_short(
            format!(
                "MBAP frame of {} bytes is shorter than the {}-byte minimum",
                buf.len(),
                HEADER_LEN + 2
            ),
            buf,
        ));
    }
    let transaction_id = u16::from_be_bytes([buf[0], buf[1]]);
    let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
    let dlen = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let unit_id = buf[6];

    let pdu_len = dlen.checked_sub(1).ok_or_else(|| {
        FrameError::invalid_header("MBAP dlen of 0 cannot cover the unit-id byte", buf)
    })?;
    if buf.len() < HEADER_LEN + pdu_len {
        return Err(FrameError::too_short(
            format!("MBAP dlen={dlen} implies a PDU longer than the {} bytes received", buf.len() - HEADER_LEN),
            buf,
        ));
    }

    Ok((
        MbapHeader {
            transaction_id,
            protocol_id,
            unit_id,
        },
        &buf[HEADER_LEN..HEADER_LEN + pdu_len],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_read_holding_registers_request_matches_literal_wire_bytes() {
        // spec.md §8 S3.
        let pdu = [0x03, 0x00, 0x00, 0x00, 0x02];
        let mut buf = [0u8; MAX_TCP_FRAME];
        let n = encode(&mut buf, 0x0001, 0x01, &pdu).unwrap();
        assert_eq!(
            &buf[..n],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02]
        );
    }

    #[test]
    fn s3_response_decodes_to_expected_header_and_pdu() {
        let wire = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14,
        ];
        let (header, pdu) = decode(&wire).unwrap();
        assert_eq!(header.transaction_id, 1);
        assert_eq!(header.protocol_id, 0);
        assert_eq!(header.unit_id, 1);
        assert_eq!(pdu, &[0x03, 0x04, 0x00, 0x0A, 0x00, 0x14]);
    }

    #[test]
    fn mbap_length_law_holds_for_every_encoded_frame() {
        for pdu_len in [2usize, 5, 100, 253] {
            let pdu = vec![0u8; pdu_len];
            let mut buf = [0u8; MAX_TCP_FRAME];
            let n = encode(&mut buf, 7, 3, &pdu).unwrap();
            let dlen = u16::from_be_bytes([buf[4], buf[5]]) as usize;
            assert_eq!(dlen, n - 6);
        }
    }

    #[test]
    fn round_trip_is_identity_on_value() {
        let pdu = [0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x00, 0x14];
        let mut buf = [0u8; MAX_TCP_FRAME];
        let n = encode(&mut buf, 42, 9, &pdu).unwrap();
        let (header, decoded_pdu) = decode(&buf[..n]).unwrap();
        assert_eq!(header.transaction_id, 42);
        assert_eq!(header.unit_id, 9);
        assert_eq!(decoded_pdu, &pdu[..]);
    }

    #[test]
    fn short_frame_with_dlen_exceeding_available_bytes_is_rejected() {
        let wire = [0x00, 0x01, 0x00, 0x00, 0x00, 0x7F, 0x01, 0x03];
        assert!(decode(&wire).is_err());
    }
}
