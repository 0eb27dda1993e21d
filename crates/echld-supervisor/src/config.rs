use std::time::Duration;

/// Worker runtime configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bytes read from an open file per loop iteration.
    pub read_chunk: usize,
    /// Poll timeout while a file is being read.
    pub tick: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            read_chunk: 64 * 1024,
            tick: Duration::from_millis(5),
        }
    }
}

/// Longest pause the dispatcher takes after forking a worker. The dispatcher
/// is single-threaded, so nothing else is serviced meanwhile.
pub const MAX_SPAWN_DELAY: Duration = Duration::from_secs(5);

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Size of the worker table.
    pub max_workers: usize,
    /// Pause between forking a worker and forwarding its configuration,
    /// capped at [`MAX_SPAWN_DELAY`].
    pub spawn_delay: Duration,
    /// Upper bound on one `poll`; children are reaped at least this often.
    pub poll_interval: Duration,
    /// Handed to every forked worker.
    pub worker: WorkerConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: 16,
            spawn_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(250),
            worker: WorkerConfig::default(),
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// A request without a reply after this long receives `TimedOut`.
    pub request_timeout: Duration,
    /// How long [`crate::Controller::shutdown`] waits before killing the dispatcher.
    pub shutdown_timeout: Duration,
    /// Handed to the forked dispatcher.
    pub dispatcher: DispatcherConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(2),
            dispatcher: DispatcherConfig::default(),
        }
    }
}
