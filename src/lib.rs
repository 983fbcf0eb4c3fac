pub mod alert;
pub mod config;
pub mod connection;
pub mod error;
pub mod logger;
pub mod negotiator;
pub mod session;
pub mod streaming;
pub mod transport;
pub mod types;

pub use alert::{AlertPlayer, AlertProcedure, LogAlertPlayer};
pub use config::{AlertConfig, ConfigError, MonitorConfig};
pub use error::{Result, SessionError};
pub use logger::{LogRecord, SampleLogger};
pub use session::{DeviceSessionHandle, MessageLevel, OperatorMessage, SessionSnapshot};
pub use transport::{SensorTransport, SimulatedStrap, SimulatedTransport, TransportEvent};
pub use types::*;
