use std::fmt;

use tracing::debug;

use crate::error::{Result, TransportError};

/// OS process identifier.
pub type Pid = libc::pid_t;

/// Which side of a `fork()` the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    /// The original process; carries the child's pid.
    Parent(Pid),
    /// The newly created process.
    Child,
}

/// Signals echld sends to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

impl Signal {
    /// The platform signal number.
    pub fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// How a child process left the running state, as reported by `waitpid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Normal exit with a status code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled(i32),
    /// Stopped by a signal (still alive, not reapable).
    Stopped(i32),
}

impl ExitReason {
    fn from_status(status: libc::c_int) -> Option<Self> {
        if libc::WIFEXITED(status) {
            Some(Self::Exited(libc::WEXITSTATUS(status)))
        } else if libc::WIFSIGNALED(status) {
            Some(Self::Signaled(libc::WTERMSIG(status)))
        } else if libc::WIFSTOPPED(status) {
            Some(Self::Stopped(libc::WSTOPSIG(status)))
        } else {
            None
        }
    }

    /// Short word describing the reason: `exited`, `signaled` or `stopped`.
    pub fn kind(&self) -> &'static str {
        match self {
            ExitReason::Exited(_) => "exited",
            ExitReason::Signaled(_) => "signaled",
            ExitReason::Stopped(_) => "stopped",
        }
    }

    /// Exit code or signal number.
    pub fn code(&self) -> i32 {
        match *self {
            ExitReason::Exited(code) | ExitReason::Signaled(code) | ExitReason::Stopped(code) => {
                code
            }
        }
    }

    /// A clean `exit(0)`.
    pub fn is_success(&self) -> bool {
        matches!(self, ExitReason::Exited(0))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Exited(code) => write!(f, "exited (code {code})"),
            ExitReason::Signaled(signal) => write!(f, "signaled (signal {signal})"),
            ExitReason::Stopped(signal) => write!(f, "stopped (signal {signal})"),
        }
    }
}

/// Fork the calling process.
///
/// # Safety
///
/// The child starts with a copy of the parent's memory but only the calling
/// thread. If other threads hold locks (allocator, stdio), the child may
/// deadlock touching them. Call from a single-threaded process, or make sure
/// the child only runs code that cannot contend with other threads.
pub unsafe fn fork() -> Result<Fork> {
    // SAFETY: upheld by the caller as documented above.
    let pid = unsafe { libc::fork() };
    match pid {
        -1 => Err(TransportError::Fork(std::io::Error::last_os_error())),
        0 => Ok(Fork::Child),
        pid => {
            debug!(pid, "forked child");
            Ok(Fork::Parent(pid))
        }
    }
}

/// Send a signal to a process.
///
/// A process that already exited (`ESRCH`) is not an error.
pub fn kill(pid: Pid, signal: Signal) -> Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal.as_raw()) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(TransportError::Kill { pid, source: err });
    }
    debug!(pid, ?signal, "signaled process");
    Ok(())
}

/// Collect one child state change without blocking.
///
/// Returns `Ok(None)` when no child has changed state or there are no children.
pub fn try_reap() -> Result<Option<(Pid, ExitReason)>> {
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: `status` is a valid writable int.
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG | libc::WUNTRACED) };
        if pid == 0 {
            return Ok(None);
        }
        if pid < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ECHILD) => return Ok(None),
                Some(libc::EINTR) => continue,
                _ => return Err(TransportError::Wait(err)),
            }
        }
        if let Some(reason) = ExitReason::from_status(status) {
            return Ok(Some((pid, reason)));
        }
    }
}

/// Block until the given child terminates and return how it ended.
///
/// Returns `Ok(None)` if the pid is not (or no longer) a child of this process.
pub fn reap(pid: Pid) -> Result<Option<ExitReason>> {
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: `status` is a valid writable int.
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ECHILD) => return Ok(None),
                Some(libc::EINTR) => continue,
                _ => return Err(TransportError::Wait(err)),
            }
        }
        if let Some(reason) = ExitReason::from_status(status) {
            return Ok(Some(reason));
        }
    }
}

/// Non-blocking check whether a specific child has terminated.
pub fn try_reap_pid(pid: Pid) -> Result<Option<ExitReason>> {
    let mut status: libc::c_int = 0;
    // SAFETY: `status` is a valid writable int.
    let rc = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ECHILD) {
            return Ok(None);
        }
        return Err(TransportError::Wait(err));
    }
    if rc == 0 {
        return Ok(None);
    }
    Ok(ExitReason::from_status(status))
}

/// Pid of the calling process.
pub fn current_pid() -> Pid {
    // SAFETY: getpid(2) cannot fail.
    unsafe { libc::getpid() }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    #[test]
    fn exit_reason_display() {
        assert_eq!(ExitReason::Exited(3).to_string(), "exited (code 3)");
        assert_eq!(ExitReason::Signaled(9).to_string(), "signaled (signal 9)");
        assert_eq!(ExitReason::Stopped(19).to_string(), "stopped (signal 19)");
        assert_eq!(ExitReason::Signaled(9).kind(), "signaled");
        assert_eq!(ExitReason::Stopped(19).code(), 19);
        assert!(ExitReason::Exited(0).is_success());
        assert!(!ExitReason::Exited(1).is_success());
    }

    #[test]
    fn kill_and_reap_child() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as Pid;

        kill(pid, Signal::Kill).unwrap();
        let reason = reap(pid).unwrap();
        assert_eq!(reason, Some(ExitReason::Signaled(libc::SIGKILL)));
    }

    #[test]
    fn reap_reports_exit_code() {
        let child = Command::new("sh").args(["-c", "exit 7"]).spawn().unwrap();
        let pid = child.id() as Pid;

        assert_eq!(reap(pid).unwrap(), Some(ExitReason::Exited(7)));
    }

    #[test]
    fn reap_of_unknown_pid_is_none() {
        assert_eq!(reap(current_pid()).unwrap(), None);
    }
}
