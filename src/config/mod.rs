mod logging;
mod master;
mod rtu;
mod slave;
mod station;
mod tcp;
mod types;

pub use logging::Config as LoggingConfig;
pub use master::Config as MasterConfig;
pub use rtu::Config as RtuConfig;
pub use slave::Config as SlaveConfig;
pub use station::Config as StationConfig;
pub use tcp::Config as TcpConfig;
pub use types::{DataBits, Parity, RtsType, StopBits};
