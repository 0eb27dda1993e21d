//! Unix process and pipe primitives for echld.
//!
//! This is the lowest layer of echld and the only crate that talks to
//! `libc` directly:
//! - anonymous pipes ([`pipe`], [`duplex`])
//! - readiness multiplexing ([`PollSet`])
//! - process control ([`fork`], [`kill`], [`try_reap`], [`reap`])
//! - SIGCHLD wakeups ([`ChildWatch`])
//!
//! Everything above this crate is safe Rust.

#[cfg(not(unix))]
compile_error!("echld-transport requires a Unix platform (fork, pipes, SIGCHLD)");

pub mod error;
pub mod pipe;
pub mod poll;
pub mod process;
pub mod signal;

pub use error::{Result, TransportError};
pub use pipe::{close_fds, duplex, pipe, Duplex, PipeReader, PipeWriter};
pub use poll::{PollSet, Readiness, Token};
pub use process::{
    current_pid, fork, kill, reap, try_reap, try_reap_pid, ExitReason, Fork, Pid, Signal,
};
pub use signal::{ignore_interrupts, ignore_sigpipe, reset_child_signals, ChildWatch};
