//! Process supervision for echld.
//!
//! Three roles share this crate, one per process:
//! - the [`Controller`] lives in the embedding application and correlates
//!   requests with replies
//! - the [`Dispatcher`] is forked by the controller, owns the worker table
//!   and relays frames in both directions
//! - the [`Worker`] runtime is forked by the dispatcher, one per worker id
//!
//! All three are single-threaded loops around `poll`.

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod link;
pub mod params;
pub mod state;
pub mod worker;

pub use config::{ControllerConfig, DispatcherConfig, WorkerConfig, MAX_SPAWN_DELAY};
pub use controller::{
    Controller, Event, HandlerCallback, HandlerId, HandlerOutcome, RequestCallback,
    RequestOutcome,
};
pub use dispatcher::{run_dispatcher, Dispatcher, SlotId, WorkerSlot};
pub use error::{EchldError, Result};
pub use link::Endpoint;
pub use params::{Access, Param, ParamError, ParamResult, ParamSet};
pub use state::WorkerState;
pub use worker::{run_worker, Flow, Worker, WorkerContext};

/// Worker id that addresses the dispatcher itself.
pub const DISPATCHER_ID: u16 = 0;
