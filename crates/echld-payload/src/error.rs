/// Errors produced while decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A string starting at `offset` has no NUL before the end of the payload.
    #[error("string at offset {offset} is not NUL-terminated")]
    MissingTerminator { offset: usize },

    /// An integer needed more bytes than the payload has left.
    #[error("truncated integer at offset {offset} ({available} of 4 bytes)")]
    Truncated { offset: usize, available: usize },

    /// A string is not valid UTF-8.
    #[error("string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    /// A bulk parameter name without a value.
    #[error("parameter '{name}' has no value")]
    UnpairedParam { name: String },

    /// Bytes left over after the last field of a fixed shape.
    #[error("{count} trailing bytes after payload")]
    TrailingBytes { count: usize },

    /// An `Error` payload carrying a code outside the known set.
    #[error("unknown error code {0}")]
    UnknownErrorCode(i32),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Errors produced while encoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// A string field would be cut short by its own NUL on the wire.
    #[error("string at offset {offset} contains a NUL at byte {position}")]
    InteriorNul { offset: usize, position: usize },
}
