pub mod channel;
pub mod config;
pub mod correction;
pub mod dispatch;
pub mod manager;
pub mod poll;
pub mod protocol;
pub mod sink;

pub use config::{EngineConfig, PortConfig, VoltageRange};
pub use manager::models::{ModuleState, TelemetryRecord};
pub use manager::{EngineError, PortManager, SubmitResponse};
pub use protocol::{CommandRequest, CommandType};
