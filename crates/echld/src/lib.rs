//! Supervised capture workers behind a forked dispatcher.
//!
//! An embedding application owns a [`supervisor::Controller`]. The controller
//! forks a dispatcher process, which in turn forks one worker process per
//! worker id and relays framed messages between them.
//!
//! # Crate Structure
//!
//! - [`transport`]: pipes, `poll`, `fork`, signals and reaping
//! - [`frame`]: the 8-byte frame header and incremental frame reader/writer
//! - [`payload`]: typed messages and their payload encoding
//! - [`supervisor`]: controller, dispatcher and worker roles

/// Re-export transport types.
pub mod transport {
    pub use echld_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use echld_frame::*;
}

/// Re-export payload types.
pub mod payload {
    pub use echld_payload::*;
}

/// Re-export supervisor types.
pub mod supervisor {
    pub use echld_supervisor::*;
}

pub use echld_payload::{ErrorCode, Message, Params};
pub use echld_supervisor::{Controller, ControllerConfig, EchldError, Event, WorkerState};
