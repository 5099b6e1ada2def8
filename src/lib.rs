pub mod bitmap;
pub mod config;
pub mod errors;
pub mod frame;
pub mod logging;
pub mod master;
pub mod numeric;
pub mod pdu;
pub mod protocol;
pub mod slave;
pub mod transport;

pub use config::{
    DataBits, LoggingConfig, MasterConfig, Parity, RtsType, RtuConfig, SlaveConfig, StationConfig,
    StopBits, TcpConfig,
};
pub use errors::{ConfigError, FrameError, InitializationError, ModbusError, TransportError};
pub use master::{Master, MasterError};
pub use pdu::{ExceptionCode, PduError, Request, Response};
pub use protocol::Protocol;
pub use slave::{Callbacks, Slave, SlaveError};
pub use transport::serial::SerialTransport;
pub use transport::tcp::TcpTransport;
pub use transport::Transport;
