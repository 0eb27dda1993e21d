use echld_frame::FrameError;
use echld_payload::{DecodeError, EncodeError, ErrorCode};
use echld_transport::TransportError;

use crate::params::ParamError;

/// Errors raised by the supervisor roles.
#[derive(Debug, thiserror::Error)]
pub enum EchldError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Payload decoding error.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A message could not be encoded, so it was not sent.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Parameter lookup or assignment failed.
    #[error("{0}")]
    Param(#[from] ParamError),

    #[error("unknown worker {0}")]
    UnknownWorker(u16),

    #[error("worker {0} already exists")]
    WorkerExists(u16),

    #[error("worker table full ({max} workers)")]
    TableFull { max: usize },

    /// The dispatcher pipe is closed.
    #[error("dispatcher disconnected")]
    Disconnected,

    #[error("shutdown failed: {0}")]
    ShutdownFailed(String),
}

impl EchldError {
    /// Wire error code reported for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            EchldError::Transport(TransportError::Pipe(_)) => ErrorCode::CannotCreatePipe,
            EchldError::Transport(TransportError::Fork(_)) => ErrorCode::CannotFork,
            EchldError::Transport(_) => ErrorCode::WorkerDied,
            EchldError::Frame(_) => ErrorCode::ProtocolViolation,
            EchldError::Decode(_) | EchldError::Encode(_) => ErrorCode::Decode,
            EchldError::Param(err) => err.code(),
            EchldError::UnknownWorker(_) => ErrorCode::UnknownWorker,
            EchldError::WorkerExists(_) => ErrorCode::WorkerExists,
            EchldError::TableFull { .. } => ErrorCode::TableFull,
            EchldError::Disconnected | EchldError::ShutdownFailed(_) => ErrorCode::WorkerDied,
        }
    }
}

pub type Result<T> = std::result::Result<T, EchldError>;
