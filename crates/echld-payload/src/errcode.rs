use std::fmt;

use crate::error::DecodeError;

/// Error codes carried in the integer field of an `Error` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Command not legal in the current state.
    WrongMessage = 1,
    NotImplemented = 2,
    /// Payload failed to decode.
    Decode = 3,
    UnknownWorker = 4,
    WorkerExists = 5,
    TableFull = 6,
    CannotCreatePipe = 7,
    CannotFork = 8,
    /// A worker sent a frame it had no business sending.
    ProtocolViolation = 9,
    WorkerDied = 10,
    UnknownParam = 11,
    ReadOnlyParam = 12,
    WriteOnlyParam = 13,
    InvalidParam = 14,
    CannotOpenFile = 15,
    CannotOpenInterface = 16,
    TimedOut = 17,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 17] = [
        ErrorCode::WrongMessage,
        ErrorCode::NotImplemented,
        ErrorCode::Decode,
        ErrorCode::UnknownWorker,
        ErrorCode::WorkerExists,
        ErrorCode::TableFull,
        ErrorCode::CannotCreatePipe,
        ErrorCode::CannotFork,
        ErrorCode::ProtocolViolation,
        ErrorCode::WorkerDied,
        ErrorCode::UnknownParam,
        ErrorCode::ReadOnlyParam,
        ErrorCode::WriteOnlyParam,
        ErrorCode::InvalidParam,
        ErrorCode::CannotOpenFile,
        ErrorCode::CannotOpenInterface,
        ErrorCode::TimedOut,
    ];

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.as_i32() == value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::WrongMessage => "wrong_message",
            ErrorCode::NotImplemented => "not_implemented",
            ErrorCode::Decode => "decode",
            ErrorCode::UnknownWorker => "unknown_worker",
            ErrorCode::WorkerExists => "worker_exists",
            ErrorCode::TableFull => "table_full",
            ErrorCode::CannotCreatePipe => "cannot_create_pipe",
            ErrorCode::CannotFork => "cannot_fork",
            ErrorCode::ProtocolViolation => "protocol_violation",
            ErrorCode::WorkerDied => "worker_died",
            ErrorCode::UnknownParam => "unknown_param",
            ErrorCode::ReadOnlyParam => "read_only_param",
            ErrorCode::WriteOnlyParam => "write_only_param",
            ErrorCode::InvalidParam => "invalid_param",
            ErrorCode::CannotOpenFile => "cannot_open_file",
            ErrorCode::CannotOpenInterface => "cannot_open_interface",
            ErrorCode::TimedOut => "timed_out",
        }
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = DecodeError;

    fn try_from(value: i32) -> Result<Self, DecodeError> {
        Self::from_i32(value).ok_or(DecodeError::UnknownErrorCode(value))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
