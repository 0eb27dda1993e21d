use std::io::{ErrorKind, Read};

use bytes::Bytes;
use echld_transport::PipeReader;
use tracing::trace;

use crate::codec::{check_length, frame_from_parts, Frame, FrameConfig, Header, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Result of one [`FrameReader::read_frame`] call.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete frame was assembled and the buffer reset.
    Frame(Frame),
    /// More bytes are needed; call again when the descriptor is readable.
    Incomplete,
}

/// Incrementally assembles frames from a (typically non-blocking) stream.
///
/// The buffer is addressed by the `write_pos` offset only, so growing it
/// never invalidates anything. Reads never ask for more than the bytes
/// missing from the current frame, so nothing of the next frame is consumed.
pub struct FrameReader<T> {
    inner: T,
    buf: Vec<u8>,
    write_pos: usize,
    config: FrameConfig,
}

enum Fill {
    Read,
    Blocked,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: vec![0u8; INITIAL_BUFFER_CAPACITY],
            write_pos: 0,
            config,
        }
    }

    /// Make progress on the current frame.
    ///
    /// Reads the missing header bytes, then (once the header is complete)
    /// the missing payload bytes. `WouldBlock` and short reads yield
    /// [`ReadOutcome::Incomplete`]. End of stream is
    /// [`FrameError::ConnectionClosed`].
    pub fn read_frame(&mut self) -> Result<ReadOutcome> {
        if self.write_pos < HEADER_SIZE {
            if let Fill::Blocked = self.fill(HEADER_SIZE)? {
                return Ok(ReadOutcome::Incomplete);
            }
            if self.write_pos < HEADER_SIZE {
                return Ok(ReadOutcome::Incomplete);
            }
        }

        let header = self.header();
        let length = header.length as usize;
        if let Err(err) = check_length(length, self.config.max_payload_size) {
            self.reset();
            return Err(err);
        }

        let total = HEADER_SIZE + length;
        if self.write_pos < total {
            self.ensure_capacity(total);
            if let Fill::Blocked = self.fill(total)? {
                return Ok(ReadOutcome::Incomplete);
            }
            if self.write_pos < total {
                return Ok(ReadOutcome::Incomplete);
            }
        }

        let payload = Bytes::copy_from_slice(&self.buf[HEADER_SIZE..total]);
        self.reset();
        trace!(
            msg_type = header.msg_type,
            worker_id = header.worker_id,
            request_id = header.request_id,
            length,
            "frame complete"
        );

        frame_from_parts(header, payload).map(ReadOutcome::Frame)
    }

    /// Bytes of the current, incomplete frame held in the buffer.
    pub fn buffered(&self) -> usize {
        self.write_pos
    }

    /// Current buffer capacity.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn header(&self) -> Header {
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&self.buf[..HEADER_SIZE]);
        Header::decode(&raw)
    }

    /// One read towards `target` buffered bytes.
    fn fill(&mut self, target: usize) -> Result<Fill> {
        loop {
            match self.inner.read(&mut self.buf[self.write_pos..target]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    self.write_pos += n;
                    return Ok(Fill::Read);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(Fill::Blocked),
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    fn ensure_capacity(&mut self, needed: usize) {
        let mut capacity = self.buf.len().max(1);
        while capacity < needed {
            capacity *= 2;
        }
        if capacity != self.buf.len() {
            self.buf.resize(capacity, 0);
        }
    }

    fn reset(&mut self) {
        self.write_pos = 0;
    }
}

impl FrameReader<PipeReader> {
    /// Create a frame reader over a pipe, switching it to non-blocking mode.
    pub fn from_pipe(pipe: PipeReader) -> Result<Self> {
        pipe.set_nonblocking(true).map_err(transport_to_frame_error)?;
        Ok(Self::new(pipe))
    }
}

fn transport_to_frame_error(err: echld_transport::TransportError) -> FrameError {
    match err {
        echld_transport::TransportError::Io(io) => FrameError::Io(io),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
