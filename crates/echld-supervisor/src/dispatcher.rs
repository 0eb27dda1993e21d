//! The dispatcher process: owns the worker table and every worker's pipes.
//!
//! Frames from the controller addressed to worker 0 are executed here; all
//! others are relayed to the addressed worker. Frames from workers are
//! checked, tracked and relayed back. Process deaths, whether noticed through
//! SIGCHLD or a closed pipe, all end in [`Dispatcher::reap_dead_worker`].

use std::os::fd::RawFd;
use std::time::Duration;

use echld_frame::{Frame, FrameError, MessageType, ReadOutcome};
use echld_payload::{ErrorCode, Message};
use echld_transport::{
    close_fds, current_pid, duplex, fork, ignore_interrupts, ignore_sigpipe, kill, reap,
    reset_child_signals, try_reap, ChildWatch, Duplex, ExitReason, Fork, Pid, PipeReader,
    PipeWriter, PollSet, Signal, Token,
};
use tracing::{debug, error, info, info_span, warn};

use crate::config::{DispatcherConfig, MAX_SPAWN_DELAY};
use crate::error::{EchldError, Result};
use crate::link::Endpoint;
use crate::params::{Param, ParamError, ParamResult, ParamSet};
use crate::state::WorkerState;
use crate::worker::{run_worker, Flow, NET_CLASS_DIR};
use crate::DISPATCHER_ID;

/// Index into the dispatcher's worker table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A live worker as the dispatcher sees it.
pub struct WorkerSlot {
    pub id: u16,
    pub pid: Pid,
    pub state: WorkerState,
    link: Endpoint<PipeReader, PipeWriter>,
    /// Set once `waitpid` collected the process; its pid must not be signaled again.
    reaped: bool,
    /// Last optimistic transition whose reply has not arrived yet.
    unconfirmed: Option<Unconfirmed>,
}

/// A tracked transition applied when a command was relayed, undone if the
/// worker answers that request with `Error`.
#[derive(Debug, Clone, Copy)]
struct Unconfirmed {
    request_id: u16,
    from: WorkerState,
    to: WorkerState,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    controller: Endpoint<PipeReader, PipeWriter>,
    slots: Vec<Option<WorkerSlot>>,
    watch: Option<ChildWatch>,
    closing: bool,
    pid: Pid,
}

fn get_version(_: &Dispatcher) -> ParamResult {
    Ok(env!("CARGO_PKG_VERSION").to_string())
}

fn get_pid(d: &Dispatcher) -> ParamResult {
    Ok(d.pid.to_string())
}

fn get_max_workers(d: &Dispatcher) -> ParamResult {
    Ok(d.slots.len().to_string())
}

fn get_workers(d: &Dispatcher) -> ParamResult {
    let workers: Vec<String> = d
        .slots
        .iter()
        .flatten()
        .map(|slot| format!("{}:{}", slot.id, slot.state))
        .collect();
    Ok(workers.join(" "))
}

fn get_spawn_delay(d: &Dispatcher) -> ParamResult {
    Ok(d.config.spawn_delay.as_millis().to_string())
}

fn set_spawn_delay(d: &mut Dispatcher, value: &str) -> ParamResult {
    let ms: u64 = value.trim().parse().map_err(|_| {
        ParamError::invalid("spawn_delay_ms", format!("'{value}' is not a number"))
    })?;
    let delay = Duration::from_millis(ms);
    if delay > MAX_SPAWN_DELAY {
        return Err(ParamError::invalid(
            "spawn_delay_ms",
            format!("{ms} exceeds the limit of {} ms", MAX_SPAWN_DELAY.as_millis()),
        ));
    }
    d.config.spawn_delay = delay;
    Ok(ms.to_string())
}

fn get_cwd(_: &Dispatcher) -> ParamResult {
    std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .map_err(|err| ParamError::invalid("cwd", err.to_string()))
}

fn set_cwd(d: &mut Dispatcher, value: &str) -> ParamResult {
    std::env::set_current_dir(value)
        .map_err(|err| ParamError::invalid("cwd", format!("{value}: {err}")))?;
    get_cwd(d)
}

fn get_interfaces(_: &Dispatcher) -> ParamResult {
    let Ok(entries) = std::fs::read_dir(NET_CLASS_DIR) else {
        return Ok(String::new());
    };
    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names.join(" "))
}

const DISPATCHER_PARAM_TABLE: &[Param<Dispatcher>] = &[
    Param::read_only("version", "echld version", get_version),
    Param::read_only("pid", "process id of the dispatcher", get_pid),
    Param::read_only("max_workers", "size of the worker table", get_max_workers),
    Param::read_only("workers", "live workers as id:state", get_workers),
    Param::read_write(
        "spawn_delay_ms",
        "pause after forking a worker, in milliseconds",
        get_spawn_delay,
        set_spawn_delay,
    ),
    Param::read_write("cwd", "working directory inherited by new workers", get_cwd, set_cwd),
    Param::read_only("interfaces", "network interfaces available for capture", get_interfaces),
];

static DISPATCHER_PARAMS: ParamSet<Dispatcher> = ParamSet::new(DISPATCHER_PARAM_TABLE);

impl Dispatcher {
    /// Take over the dispatcher side of the controller pipe pair.
    pub fn new(controller: Duplex, config: DispatcherConfig) -> Result<Self> {
        let controller = Endpoint::from_duplex(controller)?;
        let slots = (0..config.max_workers).map(|_| None).collect();
        Ok(Self {
            config,
            controller,
            slots,
            watch: None,
            closing: false,
            pid: current_pid(),
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn slot(&self, slot: SlotId) -> Option<&WorkerSlot> {
        self.slots.get(slot.0).and_then(Option::as_ref)
    }

    pub fn find_worker(&self, worker_id: u16) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|w| w.id == worker_id))
            .map(SlotId)
    }

    fn find_pid(&self, pid: Pid) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|w| w.pid == pid))
            .map(SlotId)
    }

    pub fn live_workers(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Run the event loop until told to close or the controller goes away.
    /// Returns the process exit status.
    pub fn run(mut self) -> i32 {
        match self.run_loop() {
            Ok(code) => code,
            Err(err) => {
                error!(%err, "dispatcher failed");
                self.shutdown();
                1
            }
        }
    }

    fn run_loop(&mut self) -> Result<i32> {
        self.watch = Some(ChildWatch::install()?);
        info!(
            pid = self.pid,
            max_workers = self.slots.len(),
            "dispatcher running"
        );

        loop {
            self.reap_children()?;

            let mut set = PollSet::new();
            let control = set.register(self.controller.read_fd());
            let wake = self.watch.as_ref().map(|watch| set.register(watch.fd()));
            let workers: Vec<(SlotId, Pid, Token)> = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| {
                    slot.as_ref()
                        .map(|w| (SlotId(index), w.pid, set.register(w.link.read_fd())))
                })
                .collect();

            set.wait(Some(self.config.poll_interval))?;

            if let Some(wake) = wake {
                if set.readiness(wake).is_ready() {
                    if let Some(watch) = self.watch.as_mut() {
                        watch.drain();
                    }
                    self.reap_children()?;
                }
            }

            if set.readiness(control).is_ready() {
                if let Flow::Exit(code) = self.service_controller()? {
                    return Ok(code);
                }
            }

            for (slot, pid, token) in workers {
                let same_worker = self.slot(slot).is_some_and(|w| w.pid == pid);
                if same_worker && set.readiness(token).is_ready() {
                    self.service_worker(slot)?;
                }
            }
        }
    }

    fn service_controller(&mut self) -> Result<Flow> {
        loop {
            match self.controller.recv() {
                Ok(ReadOutcome::Frame(frame)) => {
                    if let Flow::Exit(code) = self.handle_from_controller(frame)? {
                        return Ok(Flow::Exit(code));
                    }
                }
                Ok(ReadOutcome::Incomplete) => return Ok(Flow::Continue),
                Err(FrameError::ConnectionClosed) => {
                    error!("controller pipe closed");
                    self.shutdown();
                    return Ok(Flow::Exit(1));
                }
                Err(FrameError::UnknownType {
                    msg_type,
                    worker_id,
                    request_id,
                }) => {
                    warn!(msg_type, worker_id, request_id, "unknown message type from controller");
                    self.error_to_controller(
                        worker_id,
                        request_id,
                        ErrorCode::WrongMessage,
                        format!("unknown message type 0x{msg_type:02x}"),
                    )?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Route one frame from the controller.
    pub fn handle_from_controller(&mut self, frame: Frame) -> Result<Flow> {
        debug!(
            worker_id = frame.worker_id,
            request_id = frame.request_id,
            kind = %frame.kind,
            "from controller"
        );
        if frame.worker_id == DISPATCHER_ID {
            return self.handle_own_command(&frame);
        }

        let Some(slot) = self.find_worker(frame.worker_id) else {
            if frame.kind == MessageType::NewWorker {
                self.create_worker(&frame)?;
            } else {
                let err = EchldError::UnknownWorker(frame.worker_id);
                self.error_to_controller(frame.worker_id, frame.request_id, err.code(), err.to_string())?;
            }
            return Ok(Flow::Continue);
        };

        if frame.kind == MessageType::NewWorker {
            let err = EchldError::WorkerExists(frame.worker_id);
            self.error_to_controller(frame.worker_id, frame.request_id, err.code(), err.to_string())?;
            return Ok(Flow::Continue);
        }

        self.relay_to_worker(slot, &frame)?;
        Ok(Flow::Continue)
    }

    fn handle_own_command(&mut self, frame: &Frame) -> Result<Flow> {
        let rid = frame.request_id;
        let message = match Message::from_frame(frame) {
            Ok(message) => message,
            Err(err) => {
                self.error_to_controller(DISPATCHER_ID, rid, ErrorCode::Decode, err.to_string())?;
                return Ok(Flow::Continue);
            }
        };

        let reply = match message {
            Message::Ping(raw) => Message::Pong(raw),
            Message::GetParam(name) => match DISPATCHER_PARAMS.get(self, &name) {
                Ok(value) => Message::Param { name, value },
                Err(err) => Message::error(err.code(), err.to_string()),
            },
            Message::SetParam { name, value } => {
                match DISPATCHER_PARAMS.set(self, &name, &value) {
                    Ok(value) => {
                        info!(%name, %value, "dispatcher parameter set");
                        Message::Param { name, value }
                    }
                    Err(err) => Message::error(err.code(), err.to_string()),
                }
            }
            Message::Close => {
                info!("close requested");
                self.to_controller(DISPATCHER_ID, rid, &Message::Closing)?;
                self.shutdown();
                return Ok(Flow::Exit(0));
            }
            other => Message::error(
                ErrorCode::WrongMessage,
                format!("{} is not a dispatcher command", other.kind()),
            ),
        };
        self.to_controller(DISPATCHER_ID, rid, &reply)?;
        Ok(Flow::Continue)
    }

    fn create_worker(&mut self, frame: &Frame) -> Result<()> {
        let worker_id = frame.worker_id;
        let slot = match self.spawn_worker(worker_id) {
            Ok(slot) => slot,
            Err(err) => {
                warn!(worker_id, %err, "cannot create worker");
                return self.error_to_controller(worker_id, frame.request_id, err.code(), err.to_string());
            }
        };
        let delay = self.config.spawn_delay.min(MAX_SPAWN_DELAY);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.relay_to_worker(slot, frame)
    }

    /// Fork a worker for `worker_id` and record it as `Creating`.
    pub fn spawn_worker(&mut self, worker_id: u16) -> Result<SlotId> {
        if worker_id == DISPATCHER_ID {
            return Err(EchldError::UnknownWorker(worker_id));
        }
        if self.find_worker(worker_id).is_some() {
            return Err(EchldError::WorkerExists(worker_id));
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(EchldError::TableFull {
                max: self.slots.len(),
            })?;

        let (ours, theirs) = duplex()?;

        // SAFETY: the dispatcher is single-threaded, and the child never
        // returns into the dispatcher loop.
        match unsafe { fork() }? {
            Fork::Child => {
                drop(ours);
                close_fds(&self.inherited_fds());
                if let Err(err) = reset_child_signals() {
                    warn!(worker_id, %err, "cannot reset signal handlers");
                }
                let code = run_worker(worker_id, theirs, self.config.worker.clone());
                std::process::exit(code);
            }
            Fork::Parent(pid) => {
                drop(theirs);
                let link = match Endpoint::from_duplex(ours) {
                    Ok(link) => link,
                    Err(err) => {
                        let _ = kill(pid, Signal::Kill);
                        let _ = reap(pid);
                        return Err(err.into());
                    }
                };
                info!(worker_id, pid, slot = index, "worker forked");
                self.slots[index] = Some(WorkerSlot {
                    id: worker_id,
                    pid,
                    state: WorkerState::Creating,
                    link,
                    reaped: false,
                    unconfirmed: None,
                });
                Ok(SlotId(index))
            }
        }
    }

    /// Descriptors a new worker inherits but must not keep.
    fn inherited_fds(&self) -> Vec<RawFd> {
        let mut fds = self.controller.raw_fds().to_vec();
        for slot in self.slots.iter().flatten() {
            fds.extend(slot.link.raw_fds());
        }
        if let Some(watch) = &self.watch {
            fds.extend(watch.raw_fds());
        }
        fds
    }

    fn relay_to_worker(&mut self, slot: SlotId, frame: &Frame) -> Result<()> {
        let Some(worker) = self.slots[slot.0].as_mut() else {
            return Ok(());
        };
        match worker.link.relay(frame) {
            Ok(_) => {
                if let Some(next) = worker.state.after_command(frame.kind) {
                    debug!(worker_id = worker.id, from = %worker.state, to = %next, "tracked state");
                    if frame.request_id != 0 {
                        worker.unconfirmed = Some(Unconfirmed {
                            request_id: frame.request_id,
                            from: worker.state,
                            to: next,
                        });
                    }
                    worker.state = next;
                }
                Ok(())
            }
            Err(err) => {
                warn!(worker_id = worker.id, pid = worker.pid, %err, "cannot write to worker");
                self.worker_gone(slot)
            }
        }
    }

    fn service_worker(&mut self, slot: SlotId) -> Result<()> {
        loop {
            let Some(worker) = self.slots[slot.0].as_mut() else {
                return Ok(());
            };
            match worker.link.recv() {
                Ok(ReadOutcome::Frame(frame)) => self.handle_from_worker(slot, frame)?,
                Ok(ReadOutcome::Incomplete) => return Ok(()),
                Err(FrameError::UnknownType { msg_type, .. }) => {
                    let reason = format!(
                        "worker {} sent unknown message type 0x{msg_type:02x}",
                        worker.id
                    );
                    self.protocol_violation(slot, &reason)?;
                }
                Err(FrameError::PayloadTooLarge { size, .. }) => {
                    let reason = format!("worker {} sent an oversized frame ({size} bytes)", worker.id);
                    self.protocol_violation(slot, &reason)?;
                }
                Err(FrameError::ConnectionClosed | FrameError::Io(_)) => {
                    return self.worker_gone(slot);
                }
            }
        }
    }

    /// Check, track and relay one frame a worker sent.
    pub fn handle_from_worker(&mut self, slot: SlotId, frame: Frame) -> Result<()> {
        let Some(worker) = self.slots[slot.0].as_mut() else {
            return Ok(());
        };
        if worker.state == WorkerState::Errored {
            debug!(worker_id = worker.id, kind = %frame.kind, "dropping frame from errored worker");
            return Ok(());
        }
        if frame.worker_id != worker.id {
            let reason = format!(
                "worker {} sent a frame for worker {}",
                worker.id, frame.worker_id
            );
            return self.protocol_violation(slot, &reason);
        }
        if frame.kind.is_command() {
            let reason = format!("worker {} sent command {}", worker.id, frame.kind);
            return self.protocol_violation(slot, &reason);
        }

        if let Some(pending) = worker.unconfirmed {
            if frame.request_id == pending.request_id {
                worker.unconfirmed = None;
                if frame.kind == MessageType::Error && worker.state == pending.to {
                    debug!(
                        worker_id = worker.id,
                        from = %pending.to,
                        to = %pending.from,
                        "command refused, state restored"
                    );
                    worker.state = pending.from;
                }
            }
        }
        if let Some(next) = worker.state.after_event(frame.kind) {
            debug!(worker_id = worker.id, from = %worker.state, to = %next, "tracked state");
            worker.state = next;
        }
        self.controller.relay(&frame)?;
        Ok(())
    }

    fn protocol_violation(&mut self, slot: SlotId, reason: &str) -> Result<()> {
        let Some(worker) = self.slots[slot.0].as_mut() else {
            return Ok(());
        };
        warn!(worker_id = worker.id, pid = worker.pid, reason, "protocol violation, killing worker");
        worker.state = WorkerState::Errored;
        let (id, pid, reaped) = (worker.id, worker.pid, worker.reaped);
        if !reaped {
            if let Err(err) = kill(pid, Signal::Kill) {
                warn!(worker_id = id, pid, %err, "cannot kill worker");
            }
        }
        self.error_to_controller(id, 0, ErrorCode::ProtocolViolation, reason.to_string())
    }

    /// The worker's pipe failed: make sure the process is gone, then report it.
    fn worker_gone(&mut self, slot: SlotId) -> Result<()> {
        let Some(worker) = self.slot(slot) else {
            return Ok(());
        };
        let (id, pid) = (worker.id, worker.pid);
        debug!(worker_id = id, pid, "worker pipe closed");
        if let Err(err) = kill(pid, Signal::Kill) {
            warn!(worker_id = id, pid, %err, "cannot kill worker");
        }
        let reason = reap(pid)?.unwrap_or(ExitReason::Signaled(Signal::Kill.as_raw()));
        self.reap_dead_worker(pid, reason)
    }

    /// Relay whatever a dead worker managed to write before it went away.
    fn drain_worker(&mut self, slot: SlotId) -> Result<()> {
        let mut last = usize::MAX;
        loop {
            let Some(worker) = self.slots[slot.0].as_mut() else {
                return Ok(());
            };
            match worker.link.recv() {
                Ok(ReadOutcome::Frame(frame)) => {
                    last = usize::MAX;
                    self.handle_from_worker(slot, frame)?;
                }
                Ok(ReadOutcome::Incomplete) => {
                    let buffered = worker.link.buffered();
                    if buffered == last {
                        return Ok(());
                    }
                    last = buffered;
                }
                Err(_) => return Ok(()),
            }
        }
    }

    /// Collect every child that changed state.
    pub fn reap_children(&mut self) -> Result<()> {
        while let Some((pid, reason)) = try_reap()? {
            self.reap_dead_worker(pid, reason)?;
        }
        Ok(())
    }

    /// Report a worker's death and free its slot.
    ///
    /// Sends exactly one `WorkerDead` for the worker: `OK` if it was closing
    /// or the dispatcher is shutting down, otherwise the exit reason, followed
    /// by an `Error(WorkerDied)` on the dispatcher's id.
    pub fn reap_dead_worker(&mut self, pid: Pid, reason: ExitReason) -> Result<()> {
        let Some(slot) = self.find_pid(pid) else {
            debug!(pid, %reason, "reaped a process without a slot");
            return Ok(());
        };

        if let ExitReason::Stopped(_) = reason {
            if let Err(err) = kill(pid, Signal::Kill) {
                warn!(pid, %err, "cannot kill stopped worker");
            }
        } else if let Some(worker) = self.slots[slot.0].as_mut() {
            worker.reaped = true;
        }

        self.drain_worker(slot)?;
        let shutting_down = self.closing;
        let Some(mut worker) = self.slots[slot.0].take() else {
            return Ok(());
        };
        let last_state = worker.state;
        worker.state = last_state.after_exit(shutting_down);

        let expected = worker.state == WorkerState::Closed || shutting_down;
        let text = if expected {
            info!(worker_id = worker.id, pid, state = %worker.state, %reason, "worker exited");
            "OK".to_string()
        } else {
            warn!(worker_id = worker.id, pid, state = %last_state, %reason, "worker died");
            reason.to_string()
        };

        self.to_controller(worker.id, 0, &Message::WorkerDead(text))?;
        if !expected {
            self.error_to_controller(
                DISPATCHER_ID,
                0,
                ErrorCode::WorkerDied,
                format!("worker {} {}", worker.id, reason),
            )?;
        }
        Ok(())
    }

    /// Kill and reap every worker, reporting each as `WorkerDead("OK")`.
    pub fn shutdown(&mut self) {
        self.closing = true;
        info!(live = self.live_workers(), "shutting down");
        for index in 0..self.slots.len() {
            let Some(worker) = self.slots[index].as_ref() else {
                continue;
            };
            let (id, pid) = (worker.id, worker.pid);
            if let Err(err) = kill(pid, Signal::Kill) {
                warn!(worker_id = id, pid, %err, "cannot kill worker");
            }
            let reason = match reap(pid) {
                Ok(Some(reason)) => reason,
                Ok(None) | Err(_) => ExitReason::Signaled(Signal::Kill.as_raw()),
            };
            if let Err(err) = self.reap_dead_worker(pid, reason) {
                debug!(worker_id = id, %err, "cannot report worker death");
            }
            self.slots[index] = None;
        }
    }

    fn to_controller(&mut self, worker_id: u16, request_id: u16, message: &Message) -> Result<()> {
        self.controller.send(worker_id, request_id, message)?;
        Ok(())
    }

    fn error_to_controller(
        &mut self,
        worker_id: u16,
        request_id: u16,
        code: ErrorCode,
        text: String,
    ) -> Result<()> {
        self.to_controller(worker_id, request_id, &Message::error(code, text))
    }

    #[cfg(test)]
    fn adopt(
        &mut self,
        id: u16,
        pid: Pid,
        state: WorkerState,
        link: Endpoint<PipeReader, PipeWriter>,
    ) -> SlotId {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .expect("test table has room");
        self.slots[index] = Some(WorkerSlot {
            id,
            pid,
            state,
            link,
            reaped: false,
            unconfirmed: None,
        });
        SlotId(index)
    }
}

/// Entry point of the forked dispatcher process. Returns its exit status.
pub fn run_dispatcher(link: Duplex, config: DispatcherConfig) -> i32 {
    let _span = info_span!("dispatcher", pid = current_pid()).entered();
    if let Err(err) = ignore_sigpipe() {
        warn!(%err, "cannot ignore SIGPIPE");
    }
    // Ctrl-C belongs to the controller; it closes us with a Close frame.
    if let Err(err) = ignore_interrupts() {
        warn!(%err, "cannot ignore SIGINT");
    }
    match Dispatcher::new(link, config) {
        Ok(dispatcher) => dispatcher.run(),
        Err(err) => {
            error!(%err, "cannot start dispatcher");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process::{Child, Command};

    use bytes::Bytes;
    use echld_payload::Params;

    use super::*;

    struct Harness {
        dispatcher: Dispatcher,
        controller: Endpoint<PipeReader, PipeWriter>,
    }

    struct FakeWorker {
        slot: SlotId,
        child: Child,
        link: Endpoint<PipeReader, PipeWriter>,
    }

    fn harness(max_workers: usize) -> Harness {
        let (ours, theirs) = duplex().unwrap();
        let config = DispatcherConfig {
            max_workers,
            ..DispatcherConfig::default()
        };
        Harness {
            dispatcher: Dispatcher::new(theirs, config).unwrap(),
            controller: Endpoint::from_duplex(ours).unwrap(),
        }
    }

    impl Harness {
        fn adopt(&mut self, id: u16, state: WorkerState) -> FakeWorker {
            let child = Command::new("sleep").arg("30").spawn().unwrap();
            let (ours, theirs) = duplex().unwrap();
            let slot = self.dispatcher.adopt(
                id,
                child.id() as Pid,
                state,
                Endpoint::from_duplex(ours).unwrap(),
            );
            FakeWorker {
                slot,
                child,
                link: Endpoint::from_duplex(theirs).unwrap(),
            }
        }

        fn command(&mut self, worker_id: u16, request_id: u16, message: Message) -> Flow {
            self.dispatcher
                .handle_from_controller(message.to_frame(worker_id, request_id).unwrap())
                .unwrap()
        }

        fn state(&self, slot: SlotId) -> Option<WorkerState> {
            self.dispatcher.slot(slot).map(|w| w.state)
        }
    }

    fn received(endpoint: &mut Endpoint<PipeReader, PipeWriter>) -> Vec<(u16, u16, Message)> {
        let mut out = Vec::new();
        while let ReadOutcome::Frame(frame) = endpoint.recv().unwrap() {
            let message = Message::from_frame(&frame).unwrap();
            out.push((frame.worker_id, frame.request_id, message));
        }
        out
    }

    fn error_code(message: &Message) -> ErrorCode {
        match message {
            Message::Error { code, .. } => *code,
            other => panic!("expected an error, got {other}"),
        }
    }

    #[test]
    fn dispatcher_answers_ping_itself() {
        let mut h = harness(2);
        h.command(0, 5, Message::Ping(Bytes::from_static(b"x")));
        assert_eq!(
            received(&mut h.controller),
            vec![(0, 5, Message::Pong(Bytes::from_static(b"x")))]
        );
    }

    #[test]
    fn dispatcher_parameters() {
        let mut h = harness(4);
        let _w = h.adopt(1, WorkerState::Idle);

        h.command(0, 1, Message::GetParam("version".into()));
        h.command(0, 2, Message::GetParam("workers".into()));
        h.command(0, 3, Message::GetParam("max_workers".into()));
        h.command(
            0,
            4,
            Message::SetParam {
                name: "spawn_delay_ms".into(),
                value: "25".into(),
            },
        );
        h.command(
            0,
            5,
            Message::SetParam {
                name: "version".into(),
                value: "9".into(),
            },
        );

        let out = received(&mut h.controller);
        let param = |name: &str, value: &str| Message::Param {
            name: name.into(),
            value: value.into(),
        };
        assert_eq!(out[0].2, param("version", env!("CARGO_PKG_VERSION")));
        assert_eq!(out[1].2, param("workers", "1:idle"));
        assert_eq!(out[2].2, param("max_workers", "4"));
        assert_eq!(out[3].2, param("spawn_delay_ms", "25"));
        assert_eq!(error_code(&out[4].2), ErrorCode::ReadOnlyParam);
        assert_eq!(h.dispatcher.config().spawn_delay, Duration::from_millis(25));
    }

    #[test]
    fn spawn_delay_is_bounded() {
        let mut h = harness(1);
        let set = |value: &str| Message::SetParam {
            name: "spawn_delay_ms".into(),
            value: value.into(),
        };
        h.command(0, 1, set("5000"));
        h.command(0, 2, set("5001"));
        h.command(0, 3, set("3600000"));

        let out = received(&mut h.controller);
        assert_eq!(
            out[0].2,
            Message::Param {
                name: "spawn_delay_ms".into(),
                value: "5000".into()
            }
        );
        assert_eq!(error_code(&out[1].2), ErrorCode::InvalidParam);
        assert_eq!(error_code(&out[2].2), ErrorCode::InvalidParam);
        assert_eq!(h.dispatcher.config().spawn_delay, MAX_SPAWN_DELAY);
    }

    #[test]
    fn unknown_worker_and_duplicate_creation() {
        let mut h = harness(4);
        let _w = h.adopt(1, WorkerState::Idle);

        h.command(3, 7, Message::GetParam("pid".into()));
        h.command(1, 8, Message::NewWorker(Params::new()));

        let out = received(&mut h.controller);
        assert_eq!((out[0].0, out[0].1), (3, 7));
        assert_eq!(error_code(&out[0].2), ErrorCode::UnknownWorker);
        assert_eq!((out[1].0, out[1].1), (1, 8));
        assert_eq!(error_code(&out[1].2), ErrorCode::WorkerExists);
    }

    #[test]
    fn full_table_refuses_new_workers() {
        let mut h = harness(1);
        let _w = h.adopt(1, WorkerState::Idle);

        h.command(2, 3, Message::NewWorker(Params::new()));
        let out = received(&mut h.controller);
        assert_eq!((out[0].0, out[0].1), (2, 3));
        assert_eq!(error_code(&out[0].2), ErrorCode::TableFull);
        assert_eq!(h.dispatcher.live_workers(), 1);
    }

    #[test]
    fn relayed_commands_update_tracked_state() {
        let mut h = harness(2);
        let mut w = h.adopt(1, WorkerState::Idle);

        h.command(1, 4, Message::OpenFile("/tmp/x.pcap".into()));
        assert_eq!(h.state(w.slot), Some(WorkerState::Reading));

        // Not legal from Reading: relayed, state kept.
        h.command(1, 5, Message::OpenInterface("lo".into()));
        assert_eq!(h.state(w.slot), Some(WorkerState::Reading));

        h.command(1, 6, Message::Close);
        assert_eq!(h.state(w.slot), Some(WorkerState::Closing));

        let relayed: Vec<_> = received(&mut w.link)
            .into_iter()
            .map(|(id, rid, m)| (id, rid, m.kind()))
            .collect();
        assert_eq!(
            relayed,
            vec![
                (1, 4, MessageType::OpenFile),
                (1, 5, MessageType::OpenInterface),
                (1, 6, MessageType::Close)
            ]
        );
        assert!(received(&mut h.controller).is_empty());
        let _ = w.child.kill();
        let _ = w.child.wait();
    }

    #[test]
    fn refused_command_restores_tracked_state() {
        let mut h = harness(2);
        let mut w = h.adopt(1, WorkerState::Idle);

        h.command(1, 4, Message::OpenFile("/nonexistent/capture.pcap".into()));
        assert_eq!(h.state(w.slot), Some(WorkerState::Reading));

        // An error for some other request leaves the transition alone.
        w.link
            .send(1, 0, &Message::error(ErrorCode::InvalidParam, "snaplen"))
            .unwrap();
        h.dispatcher.service_worker(w.slot).unwrap();
        assert_eq!(h.state(w.slot), Some(WorkerState::Reading));

        w.link
            .send(
                1,
                4,
                &Message::error(ErrorCode::CannotOpenFile, "/nonexistent/capture.pcap"),
            )
            .unwrap();
        h.dispatcher.service_worker(w.slot).unwrap();
        assert_eq!(h.state(w.slot), Some(WorkerState::Idle));

        h.command(0, 5, Message::GetParam("workers".into()));
        let out = received(&mut h.controller);
        assert_eq!(out.len(), 3);
        assert_eq!((out[1].0, out[1].1), (1, 4));
        assert_eq!(error_code(&out[1].2), ErrorCode::CannotOpenFile);
        assert_eq!(
            out[2].2,
            Message::Param {
                name: "workers".into(),
                value: "1:idle".into()
            }
        );
        let _ = w.child.kill();
        let _ = w.child.wait();
    }

    #[test]
    fn confirmed_command_is_not_undone_later() {
        let mut h = harness(2);
        let mut w = h.adopt(1, WorkerState::Ready);

        h.command(1, 8, Message::StartCapture(Params::new()));
        w.link.send(1, 8, &Message::CaptureStarted).unwrap();
        w.link
            .send(1, 8, &Message::error(ErrorCode::WrongMessage, "late"))
            .unwrap();
        h.dispatcher.service_worker(w.slot).unwrap();
        assert_eq!(h.state(w.slot), Some(WorkerState::Capturing));
        let _ = w.child.kill();
        let _ = w.child.wait();
    }

    #[test]
    fn worker_events_are_tracked_and_relayed() {
        let mut h = harness(2);
        let mut w = h.adopt(1, WorkerState::Creating);

        w.link.send(1, 9, &Message::Hello).unwrap();
        w.link.send(1, 0, &Message::Notify("warming up".into())).unwrap();
        h.dispatcher.service_worker(w.slot).unwrap();

        assert_eq!(h.state(w.slot), Some(WorkerState::Idle));
        assert_eq!(
            received(&mut h.controller),
            vec![
                (1, 9, Message::Hello),
                (1, 0, Message::Notify("warming up".into()))
            ]
        );
        let _ = w.child.kill();
        let _ = w.child.wait();
    }

    #[test]
    fn misaddressed_frame_kills_the_worker() {
        let mut h = harness(2);
        let mut w = h.adopt(1, WorkerState::Idle);
        let pid = w.child.id() as Pid;

        w.link.send(2, 0, &Message::Hello).unwrap();
        h.dispatcher.service_worker(w.slot).unwrap();
        assert_eq!(h.state(w.slot), Some(WorkerState::Errored));

        let out = received(&mut h.controller);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 1);
        assert_eq!(error_code(&out[0].2), ErrorCode::ProtocolViolation);

        // The pipe closing completes the death: one WorkerDead plus WorkerDied.
        drop(w.link);
        h.dispatcher.service_worker(w.slot).unwrap();
        assert!(h.dispatcher.slot(w.slot).is_none());

        let out = received(&mut h.controller);
        assert_eq!(
            out[0],
            (1, 0, Message::WorkerDead("signaled (signal 9)".into()))
        );
        assert_eq!(out[1].0, 0);
        assert_eq!(error_code(&out[1].2), ErrorCode::WorkerDied);
        assert_eq!(out.len(), 2);
        assert!(h.dispatcher.find_pid(pid).is_none());
    }

    #[test]
    fn expected_death_reports_ok_and_frees_the_slot() {
        let mut h = harness(2);
        let mut w = h.adopt(1, WorkerState::Closing);
        let pid = w.child.id() as Pid;
        w.child.kill().unwrap();
        w.child.wait().unwrap();

        h.dispatcher
            .reap_dead_worker(pid, ExitReason::Exited(0))
            .unwrap();
        assert_eq!(
            received(&mut h.controller),
            vec![(1, 0, Message::WorkerDead("OK".into()))]
        );
        assert_eq!(h.dispatcher.find_worker(1), None);
    }

    #[test]
    fn unexpected_death_is_also_a_dispatcher_error() {
        let mut h = harness(2);
        let mut w = h.adopt(4, WorkerState::Capturing);
        let pid = w.child.id() as Pid;
        w.child.kill().unwrap();
        w.child.wait().unwrap();

        h.dispatcher
            .reap_dead_worker(pid, ExitReason::Exited(3))
            .unwrap();
        let out = received(&mut h.controller);
        assert_eq!(out[0], (4, 0, Message::WorkerDead("exited (code 3)".into())));
        assert_eq!((out[1].0, out[1].1), (0, 0));
        assert_eq!(error_code(&out[1].2), ErrorCode::WorkerDied);
    }

    #[test]
    fn last_words_are_relayed_before_the_death() {
        let mut h = harness(2);
        let mut w = h.adopt(1, WorkerState::Idle);
        let pid = w.child.id() as Pid;

        w.link.send(1, 6, &Message::Closing).unwrap();
        drop(w.link);
        w.child.kill().unwrap();
        w.child.wait().unwrap();

        h.dispatcher
            .reap_dead_worker(pid, ExitReason::Exited(0))
            .unwrap();
        assert_eq!(
            received(&mut h.controller),
            vec![
                (1, 6, Message::Closing),
                (1, 0, Message::WorkerDead("OK".into()))
            ]
        );
    }

    #[test]
    fn reaping_a_stranger_is_ignored() {
        let mut h = harness(1);
        h.dispatcher
            .reap_dead_worker(999_999, ExitReason::Exited(0))
            .unwrap();
        assert!(received(&mut h.controller).is_empty());
    }

    #[test]
    fn shutdown_reports_every_worker_ok() {
        let mut h = harness(3);
        let _a = h.adopt(1, WorkerState::Idle);
        let _b = h.adopt(2, WorkerState::Capturing);

        h.dispatcher.shutdown();
        assert!(h.dispatcher.is_closing());
        assert_eq!(h.dispatcher.live_workers(), 0);

        let mut out = received(&mut h.controller);
        out.sort_by_key(|(id, _, _)| *id);
        assert_eq!(
            out,
            vec![
                (1, 0, Message::WorkerDead("OK".into())),
                (2, 0, Message::WorkerDead("OK".into()))
            ]
        );
    }

    #[test]
    fn close_to_dispatcher_replies_and_exits() {
        let mut h = harness(1);
        assert_eq!(h.command(0, 2, Message::Close), Flow::Exit(0));
        assert_eq!(received(&mut h.controller), vec![(0, 2, Message::Closing)]);
    }

    #[test]
    fn non_commands_to_dispatcher_are_wrong() {
        let mut h = harness(1);
        h.command(0, 3, Message::Eof);
        let out = received(&mut h.controller);
        assert_eq!(error_code(&out[0].2), ErrorCode::WrongMessage);
    }
}
