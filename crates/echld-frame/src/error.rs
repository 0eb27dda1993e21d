/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the 24-bit length field or the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A complete frame was read but its type byte is not part of the protocol.
    ///
    /// The frame has been consumed; the stream is still in sync.
    #[error("unknown message type 0x{msg_type:02x} (worker {worker_id}, request {request_id})")]
    UnknownType {
        msg_type: u8,
        worker_id: u16,
        request_id: u16,
    },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the pipe (possibly in the middle of a frame).
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
