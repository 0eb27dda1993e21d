use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::MessageType;

/// Frame header: type+length word (4) + worker id (2) + request id (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest payload the 24-bit length field can describe.
pub const MAX_PAYLOAD: usize = 0x00FF_FFFF;

const LENGTH_MASK: u32 = 0x00FF_FFFF;

/// The fixed 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw type byte (validated separately so unknown types can be skipped).
    pub msg_type: u8,
    /// Payload length in bytes, at most [`MAX_PAYLOAD`].
    pub length: u32,
    pub worker_id: u16,
    pub request_id: u16,
}

impl Header {
    /// Serialize the header.
    ///
    /// ```text
    /// ┌────────────────────────────┬───────────┬────────────┐
    /// │ type << 24 | length (4B LE)│ worker(2B)│ request(2B)│
    /// └────────────────────────────┴───────────┴────────────┘
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let word = (u32::from(self.msg_type) << 24) | (self.length & LENGTH_MASK);
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&word.to_le_bytes());
        out[4..6].copy_from_slice(&self.worker_id.to_le_bytes());
        out[6..8].copy_from_slice(&self.request_id.to_le_bytes());
        out
    }

    /// Parse a header from exactly [`HEADER_SIZE`] bytes.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Self {
            msg_type: (word >> 24) as u8,
            length: word & LENGTH_MASK,
            worker_id: u16::from_le_bytes([bytes[4], bytes[5]]),
            request_id: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }
}

/// One complete header + payload unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageType,
    pub worker_id: u16,
    pub request_id: u16,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(
        kind: MessageType,
        worker_id: u16,
        request_id: u16,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind,
            worker_id,
            request_id,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// The header describing this frame.
    ///
    /// Fails if the payload does not fit the 24-bit length field.
    pub fn header(&self) -> Result<Header> {
        check_length(self.payload.len(), MAX_PAYLOAD)?;
        Ok(Header {
            msg_type: self.kind.as_u8(),
            length: self.payload.len() as u32,
            worker_id: self.worker_id,
            request_id: self.request_id,
        })
    }
}

pub(crate) fn check_length(size: usize, max: usize) -> Result<()> {
    let max = max.min(MAX_PAYLOAD);
    if size > max {
        return Err(FrameError::PayloadTooLarge { size, max });
    }
    Ok(())
}

/// Encode a frame into the wire format.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let header = frame.header()?;
    dst.reserve(frame.wire_size());
    dst.put_slice(&header.encode());
    dst.put_slice(&frame.payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success (and on [`FrameError::UnknownType`]) the frame bytes are consumed.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&src[..HEADER_SIZE]);
    let header = Header::decode(&raw);

    let total = HEADER_SIZE + header.length as usize;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(header.length as usize).freeze();

    frame_from_parts(header, payload).map(Some)
}

pub(crate) fn frame_from_parts(header: Header, payload: Bytes) -> Result<Frame> {
    let kind = MessageType::from_u8(header.msg_type).ok_or(FrameError::UnknownType {
        msg_type: header.msg_type,
        worker_id: header.worker_id,
        request_id: header.request_id,
    })?;
    Ok(Frame {
        kind,
        worker_id: header.worker_id,
        request_id: header.request_id,
        payload,
    })
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default and hard ceiling: [`MAX_PAYLOAD`].
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
        }
    }
}
