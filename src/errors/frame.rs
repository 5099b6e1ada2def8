use thiserror::Error;

use super::{FrameFormatKind, FrameSizeKind};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame size error: {kind} - {details}")]
    Size {
        kind: FrameSizeKind,
        details: String,
        frame_data: Option<Vec<u8>>,
    },

    #[error("Frame format error: {kind} - {details}")]
    Format {
        kind: FrameFormatKind,
        details: String,
        frame_data: Option<Vec<u8>>,
    },

    #[error("CRC error: calculated={calculated:04X}, received={received:04X}, frame={frame_hex}")]
    Crc {
        calculated: u16,
        received: u16,
        frame_hex: String,
    },
}

impl FrameError {
    pub fn too_short(details: impl Into<String>, frame: &[u8]) -> Self {
        FrameError::Size {
            kind: FrameSizeKind::TooShort,
            details: details.into(),
            frame_data: Some(frame.to_vec()),
        }
    }

    pub fn buffer_overflow(details: impl Into<String>) -> Self {
        FrameError::Size {
            kind: FrameSizeKind::BufferOverflow,
            details: details.into(),
            frame_data: None,
        }
    }

    pub fn invalid_format(details: impl Into<String>, frame: &[u8]) -> Self {
        FrameError::Format {
            kind: FrameFormatKind::InvalidFormat,
            details: details.into(),
            frame_data: Some(frame.to_vec()),
        }
    }

    pub fn invalid_header(details: impl Into<String>, frame: &[u8]) -> Self {
        FrameError::Format {
            kind: FrameFormatKind::InvalidHeader,
            details: details.into(),
            frame_data: Some(frame.to_vec()),
        }
    }

    pub fn crc(calculated: u16, received: u16, frame: &[u8]) -> Self {
        FrameError::Crc {
            calculated,
            received,
            frame_hex: hex::encode(frame),
        }
    }
}


