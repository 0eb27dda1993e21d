//! SIGCHLD delivery as a pollable descriptor (the self-pipe trick).
//!
//! The handler itself only writes one byte to a non-blocking pipe; all
//! reaping happens in the owner's event loop after `poll` reports the pipe
//! readable.

use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::pipe::{pipe, PipeReader, PipeWriter};

/// Write end of the active self-pipe, or -1. The only process-wide state in echld;
/// a signal handler has no other way to reach its owner.
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut libc::c_int {
    // SAFETY: always returns the calling thread's errno slot.
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    // SAFETY: always returns the calling thread's errno slot.
    unsafe { libc::__error() }
}

extern "C" fn on_sigchld(_signal: libc::c_int) {
    let fd = WAKE_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    ))]
    // SAFETY: reading errno of the interrupted thread; restored below.
    let saved = unsafe { *errno_location() };
    let byte = 1u8;
    // SAFETY: write(2) is async-signal-safe; the buffer is a live local. A full
    // pipe (EAGAIN) is fine: a wakeup is already pending.
    unsafe {
        libc::write(fd, (&byte as *const u8).cast::<libc::c_void>(), 1);
    }
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    ))]
    // SAFETY: restoring the value read above.
    unsafe {
        *errno_location() = saved;
    }
}

fn set_disposition(signal: libc::c_int, handler: libc::sighandler_t) -> Result<()> {
    // SAFETY: a zeroed sigaction is a valid starting point; every field we rely on is set below.
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler;
    action.sa_flags = libc::SA_RESTART;
    // SAFETY: `sa_mask` is a valid sigset_t inside `action`.
    unsafe {
        libc::sigemptyset(&mut action.sa_mask);
    }
    // SAFETY: `action` is fully initialized; the old action is not requested.
    let rc = unsafe { libc::sigaction(signal, &action, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(TransportError::Signal(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Turns child state changes into readability of a descriptor.
///
/// Only one watch may be active per process; installing a second one
/// redirects wakeups to the newest watch.
#[derive(Debug)]
pub struct ChildWatch {
    reader: PipeReader,
    writer: PipeWriter,
}

impl ChildWatch {
    /// Create the self-pipe and install the SIGCHLD handler.
    pub fn install() -> Result<Self> {
        let (reader, writer) = pipe()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;

        WAKE_FD.store(writer.as_raw_fd(), Ordering::SeqCst);
        set_disposition(libc::SIGCHLD, on_sigchld as libc::sighandler_t)?;
        debug!(fd = reader.as_raw_fd(), "installed SIGCHLD watch");

        Ok(Self { reader, writer })
    }

    /// Descriptor that becomes readable after a SIGCHLD.
    pub fn fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Consume pending wakeups. Returns how many signals were coalesced.
    pub fn drain(&mut self) -> usize {
        let mut total = 0usize;
        let mut buf = [0u8; 64];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return total,
                Ok(n) => total += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => return total,
            }
        }
    }

    /// Raw descriptors of the self-pipe, for closing after `fork()`.
    pub fn raw_fds(&self) -> [RawFd; 2] {
        [self.reader.as_raw_fd(), self.writer.as_raw_fd()]
    }
}

impl Drop for ChildWatch {
    fn drop(&mut self) {
        let _ = WAKE_FD.compare_exchange(
            self.writer.as_raw_fd(),
            -1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let _ = set_disposition(libc::SIGCHLD, libc::SIG_DFL);
    }
}

/// Restore default SIGCHLD handling and forget any inherited self-pipe.
///
/// Called first thing in a freshly forked child so its own children do not
/// wake the parent's loop.
pub fn reset_child_signals() -> Result<()> {
    WAKE_FD.store(-1, Ordering::SeqCst);
    set_disposition(libc::SIGCHLD, libc::SIG_DFL)
}

/// Make writes to a closed pipe fail with `EPIPE` instead of killing the process.
pub fn ignore_sigpipe() -> Result<()> {
    set_disposition(libc::SIGPIPE, libc::SIG_IGN)
}

/// Ignore SIGINT. Inherited by children forked afterwards, so a terminal
/// Ctrl-C reaches only the process that kept its handler.
pub fn ignore_interrupts() -> Result<()> {
    set_disposition(libc::SIGINT, libc::SIG_IGN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_on_empty_watch_is_zero() {
        let (reader, writer) = pipe().unwrap();
        reader.set_nonblocking(true).unwrap();
        let mut watch = ChildWatch { reader, writer };
        assert_eq!(watch.drain(), 0);
        // Never installed: dropping must leave the global untouched.
        drop(watch);
    }

    #[test]
    fn handler_writes_wakeup_byte() {
        let (reader, writer) = pipe().unwrap();
        reader.set_nonblocking(true).unwrap();
        writer.set_nonblocking(true).unwrap();
        let mut watch = ChildWatch { reader, writer };

        let previous = WAKE_FD.swap(watch.writer.as_raw_fd(), Ordering::SeqCst);
        on_sigchld(libc::SIGCHLD);
        on_sigchld(libc::SIGCHLD);
        WAKE_FD.store(previous, Ordering::SeqCst);

        assert_eq!(watch.drain(), 2);
        std::mem::forget(watch);
    }
}
