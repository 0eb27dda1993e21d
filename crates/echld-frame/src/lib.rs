//! Length-prefixed framing for the echld pipe protocol.
//!
//! Every message is framed with an 8-byte header:
//! - a 32-bit little-endian word holding the message type in its high byte
//!   and the 24-bit payload length in the low three bytes
//! - a 16-bit little-endian worker id
//! - a 16-bit little-endian request id
//!
//! The reader tolerates partial reads on non-blocking descriptors and never
//! consumes bytes past the end of the current frame.

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, Header, HEADER_SIZE, MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use message::MessageType;
pub use reader::{FrameReader, ReadOutcome};
pub use writer::FrameWriter;
