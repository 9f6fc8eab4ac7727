pub mod codec;
pub mod command;
pub mod status;

pub use codec::{MonitorReading, Reply};
pub use command::{CommandRequest, CommandType};
pub use status::StatusFlags;

/// Module error reply codes (4-digit field of an `hxx` reply).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFault {
    Uart,
    Timeout,
    Syntax,
    Checksum,
    Command,
    Parameter,
    ParameterSize,
    Other(u16),
}

impl DeviceFault {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => DeviceFault::Uart,
            2 => DeviceFault::Timeout,
            3 => DeviceFault::Syntax,
            4 => DeviceFault::Checksum,
            5 => DeviceFault::Command,
            6 => DeviceFault::Parameter,
            7 => DeviceFault::ParameterSize,
            other => DeviceFault::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            DeviceFault::Uart => 1,
            DeviceFault::Timeout => 2,
            DeviceFault::Syntax => 3,
            DeviceFault::Checksum => 4,
            DeviceFault::Command => 5,
            DeviceFault::Parameter => 6,
            DeviceFault::ParameterSize => 7,
            DeviceFault::Other(code) => *code,
        }
    }
}

impl std::fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceFault::Uart => "UART error",
            DeviceFault::Timeout => "device timeout",
            DeviceFault::Syntax => "syntax error",
            DeviceFault::Checksum => "checksum error",
            DeviceFault::Command => "unknown command",
            DeviceFault::Parameter => "bad parameter",
            DeviceFault::ParameterSize => "bad parameter size",
            DeviceFault::Other(_) => "unlisted fault",
        };
        write!(f, "{} (code {:04})", name, self.code())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Reply too short ({0} bytes)")]
    TooShort(usize),

    #[error("Reply framing invalid: {0}")]
    BadFraming(String),

    #[error("Reply checksum mismatch (calculated {calculated}, received {received})")]
    ChecksumMismatch { calculated: String, received: String },

    #[error("Invalid hex field '{0}' in reply")]
    BadHexField(String),

    #[error("Reply payload incomplete for '{echo}' ({got} of {want} chars)")]
    ShortPayload {
        echo: String,
        got: usize,
        want: usize,
    },

    #[error("Unexpected reply '{got}' to command '{sent}'")]
    UnexpectedEcho { sent: String, got: String },

    #[error("Module reported {0}")]
    Fault(DeviceFault),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
