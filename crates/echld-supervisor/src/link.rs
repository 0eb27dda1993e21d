use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};

use echld_frame::{Frame, FrameReader, FrameWriter, ReadOutcome, Result};
use echld_payload::Message;
use echld_transport::{Duplex, PipeReader, PipeWriter};
use tracing::debug;

/// Both directions of one pipe pair, framed.
pub struct Endpoint<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R: Read, W: Write> Endpoint<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// Make progress on the next incoming frame.
    pub fn recv(&mut self) -> Result<ReadOutcome> {
        self.reader.read_frame()
    }

    /// Encode and send a message. Nothing is written if encoding fails.
    pub fn send(
        &mut self,
        worker_id: u16,
        request_id: u16,
        message: &Message,
    ) -> crate::error::Result<usize> {
        let payload = message.encode()?;
        debug!(worker_id, request_id, kind = %message.kind(), "send");
        Ok(self
            .writer
            .write_frame(message.kind(), worker_id, request_id, &payload)?)
    }

    /// Forward a frame unchanged.
    pub fn relay(&mut self, frame: &Frame) -> Result<usize> {
        debug!(
            worker_id = frame.worker_id,
            request_id = frame.request_id,
            kind = %frame.kind,
            len = frame.payload.len(),
            "relay"
        );
        self.writer.send(frame)
    }

    /// Bytes of a partially received frame.
    pub fn buffered(&self) -> usize {
        self.reader.buffered()
    }

    pub fn reader_mut(&mut self) -> &mut FrameReader<R> {
        &mut self.reader
    }

    pub fn writer_mut(&mut self) -> &mut FrameWriter<W> {
        &mut self.writer
    }
}

impl Endpoint<PipeReader, PipeWriter> {
    /// Frame one side of a pipe pair. The read end becomes non-blocking.
    pub fn from_duplex(duplex: Duplex) -> Result<Self> {
        Ok(Self {
            reader: FrameReader::from_pipe(duplex.reader)?,
            writer: FrameWriter::new(duplex.writer),
        })
    }

    /// Descriptor to poll for incoming frames.
    pub fn read_fd(&self) -> RawFd {
        self.reader.get_ref().as_raw_fd()
    }

    pub fn raw_fds(&self) -> [RawFd; 2] {
        [self.read_fd(), self.writer.get_ref().as_raw_fd()]
    }
}
