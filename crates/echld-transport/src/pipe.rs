use std::fs::File;
use std::io::{IoSlice, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use tracing::debug;

use crate::error::{Result, TransportError};

/// Read end of an anonymous pipe.
#[derive(Debug)]
pub struct PipeReader {
    file: File,
}

/// Write end of an anonymous pipe.
#[derive(Debug)]
pub struct PipeWriter {
    file: File,
}

/// One side of a bidirectional pipe pair: what this side reads, the other
/// side writes, and vice versa.
#[derive(Debug)]
pub struct Duplex {
    pub reader: PipeReader,
    pub writer: PipeWriter,
}

/// Create an anonymous pipe.
///
/// Both ends are blocking; callers switch the read end to non-blocking mode
/// when it is driven by a [`crate::PollSet`].
pub fn pipe() -> Result<(PipeReader, PipeWriter)> {
    let mut fds = [-1 as libc::c_int; 2];
    // SAFETY: `fds` is a valid, writable array of two descriptors as required by pipe(2).
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(TransportError::Pipe(std::io::Error::last_os_error()));
    }

    // SAFETY: pipe(2) succeeded, so both descriptors are open and exclusively owned here.
    let (read_fd, write_fd) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    debug!(read_fd = fds[0], write_fd = fds[1], "created pipe");

    Ok((
        PipeReader {
            file: File::from(read_fd),
        },
        PipeWriter {
            file: File::from(write_fd),
        },
    ))
}

/// Create two cross-wired pipes and return both sides.
pub fn duplex() -> Result<(Duplex, Duplex)> {
    let (left_reader, right_writer) = pipe()?;
    let (right_reader, left_writer) = pipe()?;
    Ok((
        Duplex {
            reader: left_reader,
            writer: left_writer,
        },
        Duplex {
            reader: right_reader,
            writer: right_writer,
        },
    ))
}

/// Close raw descriptors inherited across `fork()` that this process does not own.
///
/// Only meant for a freshly forked child that will never run the destructors
/// of the parent's owners of these descriptors.
pub fn close_fds(fds: &[RawFd]) {
    for &fd in fds {
        if fd >= 0 {
            // SAFETY: closing a descriptor number has no memory-safety implications;
            // the owning objects in this forked image are never dropped.
            unsafe {
                libc::close(fd);
            }
        }
    }
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> Result<()> {
    // SAFETY: F_GETFL on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    // SAFETY: F_SETFL with flags derived from F_GETFL on the same descriptor.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

impl PipeReader {
    /// Switch the read end between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        set_nonblocking(self.file.as_raw_fd(), nonblocking)
    }
}

impl PipeWriter {
    /// Switch the write end between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        set_nonblocking(self.file.as_raw_fd(), nonblocking)
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> std::io::Result<usize> {
        self.file.write_vectored(bufs)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl AsRawFd for PipeReader {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsRawFd for PipeWriter {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for PipeReader {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsFd for PipeWriter {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Duplex {
    /// Raw descriptors of both ends, for closing after `fork()`.
    pub fn raw_fds(&self) -> [RawFd; 2] {
        [self.reader.as_raw_fd(), self.writer.as_raw_fd()]
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;

    #[test]
    fn pipe_roundtrip() {
        let (mut reader, mut writer) = pipe().unwrap();
        writer.write_all(b"hello").unwrap();

        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn nonblocking_read_would_block() {
        let (mut reader, _writer) = pipe().unwrap();
        reader.set_nonblocking(true).unwrap();

        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn read_returns_zero_after_writer_dropped() {
        let (mut reader, writer) = pipe().unwrap();
        drop(writer);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn duplex_sides_are_cross_wired() {
        let (mut left, mut right) = duplex().unwrap();

        left.writer.write_all(b"to-right").unwrap();
        right.writer.write_all(b"to-left").unwrap();

        let mut buf = [0u8; 8];
        right.reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"to-right");

        let mut buf = [0u8; 7];
        left.reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"to-left");
    }

    #[test]
    fn vectored_write_concatenates_slices() {
        let (mut reader, mut writer) = pipe().unwrap();
        let written = writer
            .write_vectored(&[IoSlice::new(b"head"), IoSlice::new(b"body")])
            .unwrap();
        assert_eq!(written, 8);

        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"headbody");
    }
}
