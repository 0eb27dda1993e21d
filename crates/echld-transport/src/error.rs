/// Errors that can occur in pipe, poll and process operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to create an anonymous pipe.
    #[error("failed to create pipe: {0}")]
    Pipe(std::io::Error),

    /// The readiness wait failed.
    #[error("poll failed: {0}")]
    Poll(std::io::Error),

    /// `fork()` failed.
    #[error("fork failed: {0}")]
    Fork(std::io::Error),

    /// Installing or resetting a signal disposition failed.
    #[error("signal setup failed: {0}")]
    Signal(std::io::Error),

    /// Sending a signal to a process failed.
    #[error("failed to signal pid {pid}: {source}")]
    Kill { pid: i32, source: std::io::Error },

    /// `waitpid()` failed.
    #[error("waitpid failed: {0}")]
    Wait(std::io::Error),

    /// An I/O error occurred on a descriptor.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
