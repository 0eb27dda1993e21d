//! The controller: the embedder's handle on the dispatcher.
//!
//! A [`Controller`] is not a loop of its own. The embedder either polls
//! [`Controller::fds`] and calls [`Controller::pump`], or calls
//! [`Controller::wait`]. Replies are matched to requests by
//! `(worker_id, request_id)`; everything else goes to handlers registered
//! per `(worker_id, message type)`.

use std::collections::BTreeMap;
use std::fmt;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use bytes::Bytes;
use echld_frame::{Frame, FrameError, MessageType, ReadOutcome};
use echld_payload::{ErrorCode, Message, Params};
use echld_transport::{
    duplex, fork, ignore_sigpipe, kill, reap, reset_child_signals, try_reap_pid, Duplex,
    ExitReason, Fork, Pid, PipeReader, PipeWriter, PollSet, Signal,
};
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::dispatcher::run_dispatcher;
use crate::error::{EchldError, Result};
use crate::link::Endpoint;
use crate::state::WorkerState;
use crate::DISPATCHER_ID;

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);
const DISPATCHER_GONE: &str = "dispatcher gone";

/// A decoded frame as delivered to callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub worker_id: u16,
    /// Zero for events nobody asked for.
    pub request_id: u16,
    pub message: Message,
}

impl Event {
    fn from_frame(frame: &Frame) -> Self {
        let message = Message::from_frame(frame).unwrap_or_else(|err| {
            Message::error(
                ErrorCode::Decode,
                format!("cannot decode {}: {err}", frame.kind),
            )
        });
        Self {
            worker_id: frame.worker_id,
            request_id: frame.request_id,
            message,
        }
    }

    pub fn kind(&self) -> MessageType {
        self.message.kind()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}] {}",
            self.worker_id, self.request_id, self.message
        )
    }
}

/// Returned by a request callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The request is answered; forget it.
    Done,
    /// Keep the request pending and restart its timeout.
    KeepListening,
}

/// Returned by a handler callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Continue,
    /// Do not offer this event to later handlers.
    Stop,
}

pub type RequestCallback = Box<dyn FnMut(&Event) -> RequestOutcome>;
pub type HandlerCallback = Box<dyn FnMut(&Event) -> HandlerOutcome>;

/// Identifies a registered handler for [`Controller::detach_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

struct Pending {
    kind: MessageType,
    issued_at: Instant,
    callback: RequestCallback,
}

struct Handler {
    id: HandlerId,
    kind: MessageType,
    callback: HandlerCallback,
}

#[derive(Default)]
struct WorkerView {
    state: WorkerState,
    pending: BTreeMap<u16, Pending>,
    handlers: Vec<Handler>,
}

impl WorkerView {
    fn is_unused(&self) -> bool {
        self.state == WorkerState::Free && self.pending.is_empty() && self.handlers.is_empty()
    }
}

pub struct Controller {
    config: ControllerConfig,
    link: Endpoint<PipeReader, PipeWriter>,
    dispatcher: Option<Pid>,
    views: BTreeMap<u16, WorkerView>,
    next_request: u16,
    next_handler: u64,
    connected: bool,
    closing: bool,
}

impl Controller {
    /// Fork a dispatcher and connect to it.
    ///
    /// SIGPIPE is ignored in the calling process so a dead dispatcher shows
    /// up as a write error instead of killing the embedder.
    pub fn spawn(config: ControllerConfig) -> Result<Self> {
        ignore_sigpipe()?;
        let (ours, theirs) = duplex()?;

        // SAFETY: the child only runs the dispatcher loop and exits; it never
        // returns into the embedder.
        match unsafe { fork() }? {
            Fork::Child => {
                drop(ours);
                if let Err(err) = reset_child_signals() {
                    warn!(%err, "cannot reset signal handlers");
                }
                std::process::exit(run_dispatcher(theirs, config.dispatcher.clone()));
            }
            Fork::Parent(pid) => {
                drop(theirs);
                info!(pid, "dispatcher forked");
                Self::attach(ours, Some(pid), config).inspect_err(|_| {
                    let _ = kill(pid, Signal::Kill);
                    let _ = reap(pid);
                })
            }
        }
    }

    /// Drive a dispatcher reachable through `link`. When `dispatcher` is
    /// given, that process is reaped by [`Controller::shutdown`] and killed
    /// on drop.
    pub fn attach(link: Duplex, dispatcher: Option<Pid>, config: ControllerConfig) -> Result<Self> {
        Ok(Self {
            config,
            link: Endpoint::from_duplex(link)?,
            dispatcher,
            views: BTreeMap::new(),
            next_request: 0,
            next_handler: 0,
            connected: true,
            closing: false,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn dispatcher_pid(&self) -> Option<Pid> {
        self.dispatcher
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Descriptors the embedder should poll for readability.
    pub fn fds(&self) -> Vec<RawFd> {
        if self.connected {
            vec![self.link.read_fd()]
        } else {
            Vec::new()
        }
    }

    /// Tracked state of a worker; `Free` when unknown.
    pub fn worker_state(&self, worker_id: u16) -> WorkerState {
        self.views
            .get(&worker_id)
            .map_or(WorkerState::Free, |view| view.state)
    }

    /// Lowest worker id with no live worker behind it.
    pub fn free_worker_id(&self) -> Option<u16> {
        (1..=u16::MAX).find(|id| !self.worker_state(*id).is_live())
    }

    /// Requests still waiting for a reply from `worker_id`.
    pub fn pending_requests(&self, worker_id: u16) -> usize {
        self.views.get(&worker_id).map_or(0, |view| view.pending.len())
    }

    /// Send a request. The callback sees the reply, or a `TimedOut` event if
    /// none arrives within the request timeout.
    ///
    /// A message that cannot be encoded is refused with
    /// [`EchldError::Encode`] and nothing is recorded.
    pub fn send_request(
        &mut self,
        worker_id: u16,
        message: &Message,
        callback: impl FnMut(&Event) -> RequestOutcome + 'static,
    ) -> Result<u16> {
        if !self.connected {
            return Err(EchldError::Disconnected);
        }
        let request_id = self.next_request_id(worker_id);
        self.link.send(worker_id, request_id, message)?;

        let kind = message.kind();
        let view = self.views.entry(worker_id).or_default();
        if kind == MessageType::NewWorker && worker_id != DISPATCHER_ID {
            view.state = WorkerState::Creating;
        }
        view.pending.insert(
            request_id,
            Pending {
                kind,
                issued_at: Instant::now(),
                callback: Box::new(callback),
            },
        );
        Ok(request_id)
    }

    fn next_request_id(&mut self, worker_id: u16) -> u16 {
        let view = self.views.get(&worker_id);
        for _ in 0..u16::MAX {
            self.next_request = self.next_request.wrapping_add(1);
            if self.next_request == 0 {
                continue;
            }
            if !view.is_some_and(|v| v.pending.contains_key(&self.next_request)) {
                break;
            }
        }
        self.next_request
    }

    /// Call `callback` for every `kind` event from `worker_id`, until detached.
    pub fn register_handler(
        &mut self,
        worker_id: u16,
        kind: MessageType,
        callback: impl FnMut(&Event) -> HandlerOutcome + 'static,
    ) -> HandlerId {
        self.next_handler += 1;
        let id = HandlerId(self.next_handler);
        self.views.entry(worker_id).or_default().handlers.push(Handler {
            id,
            kind,
            callback: Box::new(callback),
        });
        id
    }

    /// Remove a handler. Returns `false` if it was already gone.
    pub fn detach_handler(&mut self, id: HandlerId) -> bool {
        let Some((&worker_id, view)) = self
            .views
            .iter_mut()
            .find(|(_, view)| view.handlers.iter().any(|h| h.id == id))
        else {
            return false;
        };
        view.handlers.retain(|h| h.id != id);
        self.prune(worker_id);
        true
    }

    /// Create a worker with its initial parameters. Its `Hello` answers the request.
    pub fn new_worker(
        &mut self,
        worker_id: u16,
        params: Params,
        callback: impl FnMut(&Event) -> RequestOutcome + 'static,
    ) -> Result<u16> {
        if worker_id == DISPATCHER_ID {
            return Err(EchldError::UnknownWorker(worker_id));
        }
        self.send_request(worker_id, &Message::NewWorker(params), callback)
    }

    pub fn ping(
        &mut self,
        worker_id: u16,
        data: impl Into<Bytes>,
        callback: impl FnMut(&Event) -> RequestOutcome + 'static,
    ) -> Result<u16> {
        self.send_request(worker_id, &Message::Ping(data.into()), callback)
    }

    pub fn get_param(
        &mut self,
        worker_id: u16,
        name: &str,
        callback: impl FnMut(&Event) -> RequestOutcome + 'static,
    ) -> Result<u16> {
        self.send_request(worker_id, &Message::GetParam(name.to_string()), callback)
    }

    pub fn set_param(
        &mut self,
        worker_id: u16,
        name: &str,
        value: &str,
        callback: impl FnMut(&Event) -> RequestOutcome + 'static,
    ) -> Result<u16> {
        let message = Message::SetParam {
            name: name.to_string(),
            value: value.to_string(),
        };
        self.send_request(worker_id, &message, callback)
    }

    pub fn close_worker(
        &mut self,
        worker_id: u16,
        callback: impl FnMut(&Event) -> RequestOutcome + 'static,
    ) -> Result<u16> {
        if worker_id == DISPATCHER_ID {
            return Err(EchldError::UnknownWorker(worker_id));
        }
        self.send_request(worker_id, &Message::Close, callback)
    }

    /// Process what is ready: one frame if the dispatcher pipe is among
    /// `readable`, then request timeouts. Returns the number of events
    /// delivered.
    pub fn pump(&mut self, readable: &[RawFd]) -> usize {
        let mut delivered = 0;
        if self.connected && readable.contains(&self.link.read_fd()) {
            delivered += self.read_one();
        }
        delivered + self.expire_requests()
    }

    /// Poll the dispatcher pipe for up to `timeout` and pump once.
    ///
    /// The wait is cut short when a pending request is due to expire.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<usize> {
        if !self.connected {
            return Err(EchldError::Disconnected);
        }
        let timeout = match (timeout, self.next_expiry()) {
            (Some(timeout), Some(expiry)) => Some(timeout.min(expiry)),
            (None, expiry) => expiry,
            (timeout, None) => timeout,
        };

        let fd = self.link.read_fd();
        let mut set = PollSet::new();
        let token = set.register(fd);
        set.wait(timeout)?;

        let readable = if set.readiness(token).is_ready() {
            vec![fd]
        } else {
            Vec::new()
        };
        Ok(self.pump(&readable))
    }

    /// Keep waiting until `done` returns true or `timeout` passes.
    /// Returns the last answer of `done`.
    pub fn wait_for(&mut self, timeout: Duration, mut done: impl FnMut() -> bool) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            match self.wait(Some(deadline - now)) {
                Ok(_) => {}
                Err(EchldError::Disconnected) => return Ok(done()),
                Err(err) => return Err(err),
            }
        }
    }

    fn next_expiry(&self) -> Option<Duration> {
        let timeout = self.config.request_timeout;
        self.views
            .values()
            .flat_map(|view| view.pending.values())
            .map(|pending| timeout.saturating_sub(pending.issued_at.elapsed()))
            .min()
    }

    fn read_one(&mut self) -> usize {
        match self.link.recv() {
            Ok(ReadOutcome::Frame(frame)) => {
                let event = Event::from_frame(&frame);
                debug!(
                    worker_id = event.worker_id,
                    request_id = event.request_id,
                    kind = %frame.kind,
                    "from dispatcher"
                );
                self.deliver(event);
                1
            }
            Ok(ReadOutcome::Incomplete) => 0,
            Err(FrameError::UnknownType {
                msg_type,
                worker_id,
                request_id,
            }) => {
                warn!(msg_type, worker_id, request_id, "unknown message type from dispatcher");
                self.deliver(Event {
                    worker_id,
                    request_id,
                    message: Message::error(
                        ErrorCode::Decode,
                        format!("unknown message type 0x{msg_type:02x}"),
                    ),
                });
                1
            }
            Err(FrameError::ConnectionClosed) => self.dispatcher_lost("connection closed"),
            Err(err) => self.dispatcher_lost(&err.to_string()),
        }
    }

    fn deliver(&mut self, event: Event) {
        let worker_id = event.worker_id;
        let kind = event.kind();
        let view = self.views.entry(worker_id).or_default();

        if worker_id != DISPATCHER_ID {
            if kind == MessageType::WorkerDead {
                view.state = WorkerState::Free;
            } else if let Some(next) = view.state.after_event(kind) {
                debug!(worker_id, from = %view.state, to = %next, "tracked state");
                view.state = next;
            }
        }

        if event.request_id != 0 {
            if let Some(mut pending) = view.pending.remove(&event.request_id) {
                if pending.kind == MessageType::NewWorker
                    && kind == MessageType::Error
                    && view.state == WorkerState::Creating
                {
                    view.state = WorkerState::Free;
                }
                if (pending.callback)(&event) == RequestOutcome::KeepListening {
                    pending.issued_at = Instant::now();
                    view.pending.insert(event.request_id, pending);
                }
            }
        }

        for handler in view.handlers.iter_mut().filter(|h| h.kind == kind) {
            if (handler.callback)(&event) == HandlerOutcome::Stop {
                break;
            }
        }

        if kind == MessageType::WorkerDead && worker_id != DISPATCHER_ID {
            info!(worker_id, reason = %event.message, "worker gone");
            self.views.remove(&worker_id);
        } else {
            self.prune(worker_id);
        }
    }

    fn expire_requests(&mut self) -> usize {
        let timeout = self.config.request_timeout;
        let expired: Vec<(u16, u16)> = self
            .views
            .iter()
            .flat_map(|(&worker_id, view)| {
                view.pending
                    .iter()
                    .filter(move |(_, pending)| pending.issued_at.elapsed() >= timeout)
                    .map(move |(&request_id, _)| (worker_id, request_id))
            })
            .collect();

        for &(worker_id, request_id) in &expired {
            let Some(view) = self.views.get_mut(&worker_id) else {
                continue;
            };
            let Some(mut pending) = view.pending.remove(&request_id) else {
                continue;
            };
            warn!(worker_id, request_id, kind = %pending.kind, "request timed out");
            let event = Event {
                worker_id,
                request_id,
                message: Message::TimedOut(format!(
                    "{} request timed out after {:?}",
                    pending.kind, timeout
                )),
            };
            (pending.callback)(&event);
            for handler in view
                .handlers
                .iter_mut()
                .filter(|h| h.kind == MessageType::TimedOut)
            {
                if (handler.callback)(&event) == HandlerOutcome::Stop {
                    break;
                }
            }
            self.prune(worker_id);
        }
        expired.len()
    }

    fn prune(&mut self, worker_id: u16) {
        if self.views.get(&worker_id).is_some_and(WorkerView::is_unused) {
            self.views.remove(&worker_id);
        }
    }

    /// The dispatcher pipe failed. Every live worker is reported dead.
    fn dispatcher_lost(&mut self, reason: &str) -> usize {
        if !self.connected {
            return 0;
        }
        self.connected = false;
        let text = if self.closing {
            info!(reason, "dispatcher disconnected");
            "OK"
        } else {
            error!(reason, "dispatcher lost");
            DISPATCHER_GONE
        };

        let live: Vec<u16> = self
            .views
            .iter()
            .filter(|(&id, view)| id != DISPATCHER_ID && view.state.is_live())
            .map(|(&id, _)| id)
            .collect();
        let mut delivered = 0;
        for worker_id in live {
            self.deliver(Event {
                worker_id,
                request_id: 0,
                message: Message::WorkerDead(text.to_string()),
            });
            delivered += 1;
        }
        if !self.closing {
            self.deliver(Event {
                worker_id: DISPATCHER_ID,
                request_id: 0,
                message: Message::error(ErrorCode::WorkerDied, DISPATCHER_GONE),
            });
            delivered += 1;
        }
        delivered
    }

    /// Close the dispatcher and reap it.
    ///
    /// Sends `Close`, keeps delivering events while the dispatcher winds its
    /// workers down, and kills it if it is still running after the shutdown
    /// timeout. Returns how the dispatcher process ended, when this
    /// controller owns it.
    pub fn shutdown(&mut self) -> Result<Option<ExitReason>> {
        self.closing = true;
        if self.connected {
            if let Err(err) = self.send_request(DISPATCHER_ID, &Message::Close, |_| RequestOutcome::Done) {
                debug!(%err, "cannot send close to dispatcher");
            }
        }
        let deadline = Instant::now() + self.config.shutdown_timeout;

        let Some(pid) = self.dispatcher else {
            self.drain(deadline)?;
            return Ok(None);
        };

        while Instant::now() < deadline {
            if let Some(reason) = try_reap_pid(pid)? {
                self.dispatcher = None;
                info!(pid, %reason, "dispatcher exited");
                self.drain(deadline)?;
                return Ok(Some(reason));
            }
            if self.connected {
                self.wait(Some(SHUTDOWN_POLL))?;
            } else {
                std::thread::sleep(SHUTDOWN_POLL);
            }
        }

        warn!(pid, "dispatcher still running, killing it");
        kill(pid, Signal::Kill).map_err(|err| EchldError::ShutdownFailed(err.to_string()))?;
        let reason = reap(pid)?.unwrap_or(ExitReason::Signaled(Signal::Kill.as_raw()));
        self.dispatcher = None;
        self.drain(Instant::now() + SHUTDOWN_POLL * 10)?;
        Ok(Some(reason))
    }

    /// Deliver remaining frames until the pipe closes or `deadline` passes.
    fn drain(&mut self, deadline: Instant) -> Result<()> {
        while self.connected {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.wait(Some(deadline - now))?;
        }
        Ok(())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(pid) = self.dispatcher.take() {
            debug!(pid, "killing dispatcher on drop");
            let _ = kill(pid, Signal::Kill);
            let _ = reap(pid);
        }
    }
}
