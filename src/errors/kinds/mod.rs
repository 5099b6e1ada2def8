mod frame_format;
mod frame_size;
mod serial_error;

pub use frame_format::FrameFormatKind;
pub use frame_size::FrameSizeKind;
pub use serial_error::SerialErrorKind;
