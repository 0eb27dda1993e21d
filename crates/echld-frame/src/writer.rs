use std::io::{ErrorKind, IoSlice, Write};

use tracing::trace;

use crate::codec::{check_length, Frame, FrameConfig, Header, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::message::MessageType;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Write one frame: the 8-byte header and the payload in a single
    /// vectored write, finishing any short write.
    ///
    /// Returns the number of bytes written (header included).
    pub fn write_frame(
        &mut self,
        kind: MessageType,
        worker_id: u16,
        request_id: u16,
        payload: &[u8],
    ) -> Result<usize> {
        check_length(payload.len(), self.config.max_payload_size)?;

        let header = Header {
            msg_type: kind.as_u8(),
            length: payload.len() as u32,
            worker_id,
            request_id,
        }
        .encode();
        let total = HEADER_SIZE + payload.len();

        let mut written = 0usize;
        while written < total {
            let result = if written < HEADER_SIZE {
                self.inner.write_vectored(&[
                    IoSlice::new(&header[written..]),
                    IoSlice::new(payload),
                ])
            } else {
                self.inner.write(&payload[written - HEADER_SIZE..])
            };
            match result {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(FrameError::ConnectionClosed)
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        trace!(%kind, worker_id, request_id, total, "frame written");
        self.flush()?;
        Ok(total)
    }

    /// Write an already assembled frame.
    pub fn send(&mut self, frame: &Frame) -> Result<usize> {
        self.write_frame(frame.kind, frame.worker_id, frame.request_id, &frame.payload)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::{Bytes, BytesMut};

    use super::*;
    use crate::codec::{decode_frame, MAX_PAYLOAD};

    fn decode_all(bytes: Vec<u8>) -> Vec<Frame> {
        let mut wire = BytesMut::from(bytes.as_slice());
        let mut frames = Vec::new();
        while let Some(frame) = decode_frame(&mut wire).unwrap() {
            frames.push(frame);
        }
        assert!(wire.is_empty());
        frames
    }

    #[test]
    fn write_single_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let written = writer.write_frame(MessageType::Ping, 1, 5, b"x").unwrap();
        assert_eq!(written, HEADER_SIZE + 1);

        let frames = decode_all(writer.into_inner().into_inner());
        assert_eq!(
            frames,
            vec![Frame::new(MessageType::Ping, 1, 5, Bytes::from_static(b"x"))]
        );
    }

    #[test]
    fn header_only_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        assert_eq!(
            writer.write_frame(MessageType::Close, 3, 9, b"").unwrap(),
            HEADER_SIZE
        );
        assert_eq!(writer.into_inner().into_inner().len(), HEADER_SIZE);
    }

    #[test]
    fn payload_over_24_bits_is_rejected_before_writing() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let err = writer
            .write_frame(MessageType::Buffer, 1, 1, &payload)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(writer.into_inner().into_inner().is_empty());
    }

    #[test]
    fn configured_limit_applies() {
        let cfg = FrameConfig {
            max_payload_size: 4,
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);
        let err = writer
            .write_frame(MessageType::Notify, 1, 0, b"oversized")
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
    }

    #[test]
    fn short_writes_are_completed() {
        let mut writer = FrameWriter::new(TrickleWriter::default());
        let frame = Frame::new(MessageType::Tree, 2, 7, vec![0x5A; 100]);
        writer.send(&frame).unwrap();

        let inner = writer.into_inner();
        assert!(inner.calls > 2);
        assert_eq!(decode_all(inner.data), vec![frame]);
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.write_frame(MessageType::Hello, 1, 0, b"").unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_and_would_block() {
        let mut writer = FrameWriter::new(FlakyWriter {
            failures: vec![ErrorKind::Interrupted, ErrorKind::WouldBlock],
            data: Vec::new(),
        });
        writer.write_frame(MessageType::Pong, 1, 5, b"x").unwrap();
        assert_eq!(writer.into_inner().data.len(), HEADER_SIZE + 1);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.write_frame(MessageType::Ping, 1, 1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn broken_pipe_is_connection_closed() {
        echld_transport::ignore_sigpipe().unwrap();
        let (reader, writer) = echld_transport::pipe().unwrap();
        drop(reader);

        let mut writer = FrameWriter::new(writer);
        let err = writer.write_frame(MessageType::Ping, 1, 1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn written_bytes_read_back() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_frame(MessageType::Param, 4, 2, b"a\0b\0").unwrap();

        let bytes = writer.into_inner().into_inner();
        let mut reader = crate::reader::FrameReader::new(Cursor::new(bytes));
        match reader.read_frame().unwrap() {
            crate::reader::ReadOutcome::Frame(frame) => {
                assert_eq!(frame.kind, MessageType::Param);
                assert_eq!(frame.payload.as_ref(), b"a\0b\0");
            }
            crate::reader::ReadOutcome::Incomplete => panic!("cursor holds a full frame"),
        }
    }

    #[derive(Default)]
    struct TrickleWriter {
        data: Vec<u8>,
        calls: usize,
    }

    impl Write for TrickleWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.calls += 1;
            let n = buf.len().min(3);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FlakyWriter {
        failures: Vec<ErrorKind>,
        data: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.failures.pop() {
                return Err(std::io::Error::from(kind));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
