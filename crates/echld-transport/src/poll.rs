use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::{Result, TransportError};

/// Index of a descriptor registered in a [`PollSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(usize);

/// Readiness reported for one registered descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    revents: libc::c_short,
}

impl Readiness {
    /// Data (or end of file) is available to read.
    pub fn is_readable(&self) -> bool {
        self.revents & libc::POLLIN != 0
    }

    /// The peer closed its end.
    pub fn is_hung_up(&self) -> bool {
        self.revents & libc::POLLHUP != 0
    }

    /// An error condition or invalid descriptor.
    pub fn is_error(&self) -> bool {
        self.revents & (libc::POLLERR | libc::POLLNVAL) != 0
    }

    /// Anything at all was reported.
    pub fn is_ready(&self) -> bool {
        self.revents != 0
    }
}

/// A set of descriptors waited on for readability with `poll(2)`.
///
/// Rebuilt on every loop iteration by its owner; there is no persistent
/// registration state.
#[derive(Debug, Default)]
pub struct PollSet {
    fds: Vec<libc::pollfd>,
}

impl PollSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor for readability (errors and hangups are always reported).
    pub fn register(&mut self, fd: RawFd) -> Token {
        self.fds.push(libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        });
        Token(self.fds.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Wait until at least one descriptor is ready or the timeout elapses.
    ///
    /// Returns the number of ready descriptors. A wait interrupted by a
    /// signal returns `Ok(0)` so the caller re-runs its loop.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<usize> {
        for entry in &mut self.fds {
            entry.revents = 0;
        }

        let timeout_ms = match timeout {
            Some(timeout) => timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        // SAFETY: `fds` points to `len` initialized pollfd entries owned by this set.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(TransportError::Poll(err));
        }
        Ok(rc as usize)
    }

    /// Readiness of a registered descriptor after the last [`PollSet::wait`].
    pub fn readiness(&self, token: Token) -> Readiness {
        self.fds
            .get(token.0)
            .map(|entry| Readiness {
                revents: entry.revents,
            })
            .unwrap_or_default()
    }

    /// Descriptors that reported any readiness after the last wait.
    pub fn ready_fds(&self) -> Vec<RawFd> {
        self.fds
            .iter()
            .filter(|entry| entry.revents != 0)
            .map(|entry| entry.fd)
            .collect()
    }
}
