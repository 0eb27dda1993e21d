use std::fmt;
use std::io;

use echld_frame::FrameError;
use echld_payload::ErrorCode;
use echld_supervisor::EchldError;
use echld_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const NOT_FOUND: i32 = 51;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => NOT_FOUND,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::BrokenPipe => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::UnknownType { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn echld_error(context: &str, err: EchldError) -> CliError {
    match err {
        EchldError::Transport(err) => transport_error(context, err),
        EchldError::Frame(err) => frame_error(context, err),
        EchldError::Decode(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        EchldError::Encode(err) => CliError::new(USAGE, format!("{context}: {err}")),
        EchldError::Param(err) => CliError::new(USAGE, format!("{context}: {err}")),
        EchldError::UnknownWorker(_) => CliError::new(USAGE, format!("{context}: {err}")),
        EchldError::ShutdownFailed(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

/// Exit status for an `Error` reply from the dispatcher or a worker.
pub fn remote_error(context: &str, code: ErrorCode, text: &str) -> CliError {
    let exit = match code {
        ErrorCode::UnknownParam
        | ErrorCode::ReadOnlyParam
        | ErrorCode::WriteOnlyParam
        | ErrorCode::InvalidParam
        | ErrorCode::UnknownWorker
        | ErrorCode::WrongMessage => USAGE,
        ErrorCode::CannotOpenFile | ErrorCode::CannotOpenInterface => NOT_FOUND,
        ErrorCode::Decode | ErrorCode::ProtocolViolation => DATA_INVALID,
        ErrorCode::CannotCreatePipe | ErrorCode::CannotFork => TRANSPORT_ERROR,
        ErrorCode::TimedOut => TIMEOUT,
        _ => FAILURE,
    };
    CliError::new(exit, format!("{context}: {code}: {text}"))
}
