//! The worker process: executes commands relayed by the dispatcher.
//!
//! A worker owns nothing but its control pipe pair and, while reading, one
//! open file. Every command is answered on the request id it arrived with;
//! events the worker produces on its own (`Notify`, `Eof`, rejected
//! configuration) use request id 0.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use echld_frame::{Frame, FrameError, MessageType, ReadOutcome};
use echld_payload::{ErrorCode, Message, Params};
use echld_transport::{current_pid, ignore_sigpipe, Duplex, Pid, PipeReader, PipeWriter, PollSet};
use tracing::{debug, info, info_span, warn};

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::link::Endpoint;
use crate::params::{format_flag, parse_flag, Param, ParamError, ParamResult, ParamSet};
use crate::state::WorkerState;

const DEFAULT_PROFILE: &str = "Default";
const DEFAULT_SNAPLEN: u32 = 65_535;
pub(crate) const NET_CLASS_DIR: &str = "/sys/class/net";

/// What the owner of a loop should do after handling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Leave the loop and exit the process with this status.
    Exit(i32),
}

/// Everything the worker's parameters can see.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub id: u16,
    pub pid: Pid,
    pub state: WorkerState,
    profile: String,
    dfilter: String,
    quiet: bool,
    snaplen: u32,
    file: Option<String>,
    interface: Option<String>,
    bytes_read: u64,
    notes: BTreeMap<i32, String>,
}

impl WorkerContext {
    pub fn new(id: u16, pid: Pid) -> Self {
        Self {
            id,
            pid,
            state: WorkerState::Creating,
            profile: DEFAULT_PROFILE.to_string(),
            dfilter: String::new(),
            quiet: false,
            snaplen: DEFAULT_SNAPLEN,
            file: None,
            interface: None,
            bytes_read: 0,
            notes: BTreeMap::new(),
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn note(&self, frame: i32) -> Option<&str> {
        self.notes.get(&frame).map(String::as_str)
    }

    fn require_state(&self, name: &str, allowed: &[WorkerState]) -> std::result::Result<(), ParamError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(ParamError::WrongState {
            name: name.to_string(),
            state: self.state,
        })
    }
}

fn get_pid(ctx: &WorkerContext) -> ParamResult {
    Ok(ctx.pid.to_string())
}

fn get_state(ctx: &WorkerContext) -> ParamResult {
    Ok(ctx.state.to_string())
}

fn get_profile(ctx: &WorkerContext) -> ParamResult {
    Ok(ctx.profile.clone())
}

fn set_profile(ctx: &mut WorkerContext, value: &str) -> ParamResult {
    ctx.require_state("profile", &[WorkerState::Creating, WorkerState::Idle])?;
    if value.is_empty() {
        return Err(ParamError::invalid("profile", "empty profile name"));
    }
    ctx.profile = value.to_string();
    Ok(ctx.profile.clone())
}

fn get_dfilter(ctx: &WorkerContext) -> ParamResult {
    Ok(ctx.dfilter.clone())
}

fn set_dfilter(ctx: &mut WorkerContext, value: &str) -> ParamResult {
    if matches!(ctx.state, WorkerState::Reading | WorkerState::Capturing) {
        return Err(ParamError::WrongState {
            name: "dfilter".to_string(),
            state: ctx.state,
        });
    }
    ctx.dfilter = value.to_string();
    Ok(ctx.dfilter.clone())
}

fn get_quiet(ctx: &WorkerContext) -> ParamResult {
    Ok(format_flag(ctx.quiet))
}

fn set_quiet(ctx: &mut WorkerContext, value: &str) -> ParamResult {
    ctx.quiet = parse_flag("quiet", value)?;
    Ok(format_flag(ctx.quiet))
}

fn get_snaplen(ctx: &WorkerContext) -> ParamResult {
    Ok(ctx.snaplen.to_string())
}

fn set_snaplen(ctx: &mut WorkerContext, value: &str) -> ParamResult {
    ctx.require_state(
        "snaplen",
        &[WorkerState::Creating, WorkerState::Idle, WorkerState::Ready],
    )?;
    let snaplen: u32 = value
        .trim()
        .parse()
        .map_err(|_| ParamError::invalid("snaplen", format!("'{value}' is not a number")))?;
    if snaplen == 0 {
        return Err(ParamError::invalid("snaplen", "must be positive"));
    }
    ctx.snaplen = snaplen;
    Ok(snaplen.to_string())
}

fn get_file(ctx: &WorkerContext) -> ParamResult {
    Ok(ctx.file.clone().unwrap_or_default())
}

fn get_interface(ctx: &WorkerContext) -> ParamResult {
    Ok(ctx.interface.clone().unwrap_or_default())
}

fn get_bytes_read(ctx: &WorkerContext) -> ParamResult {
    Ok(ctx.bytes_read.to_string())
}

fn get_notes(ctx: &WorkerContext) -> ParamResult {
    let notes: Vec<String> = ctx
        .notes
        .iter()
        .map(|(frame, note)| format!("{frame}:{note}"))
        .collect();
    Ok(notes.join("\n"))
}

const WORKER_PARAM_TABLE: &[Param<WorkerContext>] = &[
    Param::read_only("pid", "process id of the worker", get_pid),
    Param::read_only("state", "current lifecycle state", get_state),
    Param::read_write(
        "profile",
        "configuration profile (before opening a source)",
        get_profile,
        set_profile,
    ),
    Param::read_write(
        "dfilter",
        "display filter (not while reading or capturing)",
        get_dfilter,
        set_dfilter,
    ),
    Param::read_write("quiet", "suppress progress notifications (TRUE/FALSE)", get_quiet, set_quiet),
    Param::read_write(
        "snaplen",
        "capture snapshot length (before capturing)",
        get_snaplen,
        set_snaplen,
    ),
    Param::read_only("file", "file being read", get_file),
    Param::read_only("interface", "interface opened for capture", get_interface),
    Param::read_only("bytes_read", "bytes consumed from the open file", get_bytes_read),
    Param::read_only("notes", "frame notes, one frame:note per line", get_notes),
];

static WORKER_PARAMS: ParamSet<WorkerContext> = ParamSet::new(WORKER_PARAM_TABLE);

/// A worker's command handler over one framed link.
pub struct Worker<R, W> {
    ctx: WorkerContext,
    link: Endpoint<R, W>,
    config: WorkerConfig,
    source: Option<File>,
}

impl<R: Read, W: Write> Worker<R, W> {
    pub fn new(id: u16, link: Endpoint<R, W>, config: WorkerConfig) -> Self {
        Self {
            ctx: WorkerContext::new(id, current_pid()),
            link,
            config,
            source: None,
        }
    }

    pub fn id(&self) -> u16 {
        self.ctx.id
    }

    pub fn state(&self) -> WorkerState {
        self.ctx.state
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    pub fn link_mut(&mut self) -> &mut Endpoint<R, W> {
        &mut self.link
    }

    /// Whether a file is open and being consumed.
    pub fn is_reading(&self) -> bool {
        self.source.is_some()
    }

    /// Execute one command frame.
    pub fn handle_frame(&mut self, frame: &Frame) -> Result<Flow> {
        let rid = frame.request_id;
        if frame.worker_id != self.ctx.id {
            warn!(
                worker_id = self.ctx.id,
                addressed = frame.worker_id,
                "frame for another worker"
            );
        }

        let message = match Message::from_frame(frame) {
            Ok(message) => message,
            Err(err) => {
                self.reply(rid, &Message::error(ErrorCode::Decode, err.to_string()))?;
                return Ok(Flow::Continue);
            }
        };
        let kind = message.kind();
        debug!(worker_id = self.ctx.id, request_id = rid, %kind, state = %self.ctx.state, "command");

        if !kind.is_command() {
            self.reply(
                rid,
                &Message::error(ErrorCode::WrongMessage, format!("{kind} is not a command")),
            )?;
            return Ok(Flow::Continue);
        }
        if !self.ctx.state.accepts(kind) {
            self.reply(
                rid,
                &Message::error(
                    ErrorCode::WrongMessage,
                    format!("{kind} not allowed while {}", self.ctx.state),
                ),
            )?;
            return Ok(Flow::Continue);
        }

        match message {
            Message::Ping(raw) => self.reply(rid, &Message::Pong(raw))?,
            Message::Close => {
                self.ctx.state = WorkerState::Closing;
                self.reply(rid, &Message::Closing)?;
                info!(worker_id = self.ctx.id, "closing");
                return Ok(Flow::Exit(0));
            }
            Message::GetParam(name) => {
                let reply = match WORKER_PARAMS.get(&self.ctx, &name) {
                    Ok(value) => Message::Param { name, value },
                    Err(err) => Message::error(err.code(), err.to_string()),
                };
                self.reply(rid, &reply)?;
            }
            Message::SetParam { name, value } => {
                let reply = match WORKER_PARAMS.set(&mut self.ctx, &name, &value) {
                    Ok(value) => Message::Param { name, value },
                    Err(err) => Message::error(err.code(), err.to_string()),
                };
                self.reply(rid, &reply)?;
            }
            Message::NewWorker(params) => {
                self.configure(&params)?;
                self.ctx.state = WorkerState::Idle;
                info!(worker_id = self.ctx.id, pid = self.ctx.pid, profile = %self.ctx.profile, "worker ready");
                self.reply(rid, &Message::Hello)?;
            }
            Message::OpenFile(path) => self.open_file(rid, path)?,
            Message::OpenInterface(name) => self.open_interface(rid, name)?,
            Message::StartCapture(params) => {
                self.configure(&params)?;
                self.ctx.state = WorkerState::Capturing;
                self.reply(rid, &Message::CaptureStarted)?;
            }
            Message::StopCapture => {
                self.ctx.state = WorkerState::Done;
                self.reply(rid, &Message::CaptureStopped)?;
            }
            Message::AddNote { frame, note } => {
                self.ctx.notes.insert(frame, note);
                self.reply(rid, &Message::NoteAdded(frame))?;
            }
            other => {
                self.reply(
                    rid,
                    &Message::error(
                        ErrorCode::NotImplemented,
                        format!("{} needs a dissection engine", other.kind()),
                    ),
                )?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Consume one chunk of the open file; at end of file report and finish.
    pub fn read_chunk(&mut self) -> Result<()> {
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };
        let mut buf = vec![0u8; self.config.read_chunk.max(1)];
        let outcome = loop {
            match source.read(&mut buf) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        match outcome {
            Ok(0) => self.finish_reading(None),
            Ok(n) => {
                self.ctx.bytes_read += n as u64;
                Ok(())
            }
            Err(err) => self.finish_reading(Some(err)),
        }
    }

    fn finish_reading(&mut self, failure: Option<std::io::Error>) -> Result<()> {
        self.source = None;
        let file = self.ctx.file.clone().unwrap_or_default();
        if let Some(err) = failure {
            warn!(worker_id = self.ctx.id, %file, %err, "read failed");
            self.reply(0, &Message::error(ErrorCode::CannotOpenFile, format!("{file}: {err}")))?;
        }
        if !self.ctx.quiet {
            self.reply(0, &Message::Notify(format!("read {} bytes", self.ctx.bytes_read)))?;
        }
        self.ctx.state = WorkerState::Done;
        info!(worker_id = self.ctx.id, %file, bytes = self.ctx.bytes_read, "end of file");
        self.reply(0, &Message::Eof)
    }

    fn configure(&mut self, params: &Params) -> Result<()> {
        for err in WORKER_PARAMS.apply(&mut self.ctx, params) {
            warn!(worker_id = self.ctx.id, %err, "rejected parameter");
            self.reply(0, &Message::error(err.code(), err.to_string()))?;
        }
        Ok(())
    }

    fn open_file(&mut self, rid: u16, path: String) -> Result<()> {
        match File::open(&path) {
            Ok(file) => {
                self.source = Some(file);
                self.ctx.file = Some(path.clone());
                self.ctx.bytes_read = 0;
                self.ctx.state = WorkerState::Reading;
                info!(worker_id = self.ctx.id, %path, "file opened");
                self.reply(rid, &Message::FileOpened(path))
            }
            Err(err) => self.reply(
                rid,
                &Message::error(ErrorCode::CannotOpenFile, format!("{path}: {err}")),
            ),
        }
    }

    fn open_interface(&mut self, rid: u16, name: String) -> Result<()> {
        if let Err(reason) = check_interface(&name) {
            return self.reply(
                rid,
                &Message::error(ErrorCode::CannotOpenInterface, format!("{name}: {reason}")),
            );
        }
        self.ctx.interface = Some(name.clone());
        self.ctx.state = WorkerState::Ready;
        self.reply(rid, &Message::InterfaceOpened(name))
    }

    fn reply(&mut self, request_id: u16, message: &Message) -> Result<()> {
        self.link.send(self.ctx.id, request_id, message)?;
        Ok(())
    }
}

fn check_interface(name: &str) -> std::result::Result<(), &'static str> {
    if name.trim().is_empty() || name.contains('/') {
        return Err("invalid interface name");
    }
    let class = Path::new(NET_CLASS_DIR);
    if class.is_dir() && !class.join(name).exists() {
        return Err("no such interface");
    }
    Ok(())
}

impl Worker<PipeReader, PipeWriter> {
    /// Run until `Close` or until the control pipe fails. Returns the exit status.
    pub fn run(mut self) -> i32 {
        match self.run_loop() {
            Ok(code) => code,
            Err(err) => {
                warn!(worker_id = self.ctx.id, %err, "worker stopped");
                1
            }
        }
    }

    fn run_loop(&mut self) -> Result<i32> {
        let fd = self.link.read_fd();
        loop {
            let mut set = PollSet::new();
            let control = set.register(fd);
            let timeout = self.is_reading().then_some(self.config.tick);
            set.wait(timeout)?;

            if set.readiness(control).is_ready() {
                if let Flow::Exit(code) = self.service_control()? {
                    return Ok(code);
                }
            }
            if self.is_reading() {
                self.read_chunk()?;
            }
        }
    }

    fn service_control(&mut self) -> Result<Flow> {
        loop {
            match self.link.recv() {
                Ok(ReadOutcome::Frame(frame)) => {
                    if let Flow::Exit(code) = self.handle_frame(&frame)? {
                        return Ok(Flow::Exit(code));
                    }
                }
                Ok(ReadOutcome::Incomplete) => return Ok(Flow::Continue),
                Err(FrameError::ConnectionClosed) => {
                    warn!(worker_id = self.ctx.id, "control pipe closed");
                    return Ok(Flow::Exit(1));
                }
                Err(FrameError::UnknownType {
                    msg_type,
                    request_id,
                    ..
                }) => {
                    let text = format!("unknown message type 0x{msg_type:02x}");
                    self.reply(request_id, &Message::error(ErrorCode::WrongMessage, text))?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Entry point of a forked worker process. Returns its exit status.
pub fn run_worker(id: u16, link: Duplex, config: WorkerConfig) -> i32 {
    let _span = info_span!("worker", worker_id = id, pid = current_pid()).entered();
    if let Err(err) = ignore_sigpipe() {
        warn!(worker_id = id, %err, "cannot ignore SIGPIPE");
    }
    let link = match Endpoint::from_duplex(link) {
        Ok(link) => link,
        Err(err) => {
            warn!(worker_id = id, %err, "cannot set up control pipe");
            return 1;
        }
    };
    debug!(worker_id = id, pid = current_pid(), "worker started");
    Worker::new(id, link, config).run()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;
    use echld_frame::decode_frame;

    use super::*;

    type TestWorker = Worker<std::io::Empty, Cursor<Vec<u8>>>;

    fn worker() -> TestWorker {
        Worker::new(
            1,
            Endpoint::new(std::io::empty(), Cursor::new(Vec::new())),
            WorkerConfig {
                read_chunk: 4,
                ..WorkerConfig::default()
            },
        )
    }

    fn send(worker: &mut TestWorker, rid: u16, message: Message) -> Flow {
        worker.handle_frame(&message.to_frame(1, rid).unwrap()).unwrap()
    }

    /// Every frame written so far, decoded; clears the output.
    fn replies(worker: &mut TestWorker) -> Vec<(u16, Message)> {
        let cursor = worker.link_mut().writer_mut().get_mut();
        let mut wire = BytesMut::from(cursor.get_ref().as_slice());
        cursor.get_mut().clear();
        cursor.set_position(0);

        let mut out = Vec::new();
        while let Some(frame) = decode_frame(&mut wire).unwrap() {
            assert_eq!(frame.worker_id, 1);
            out.push((frame.request_id, Message::from_frame(&frame).unwrap()));
        }
        out
    }

    fn idle_worker() -> TestWorker {
        let mut w = worker();
        send(&mut w, 1, Message::NewWorker(Params::new()));
        replies(&mut w);
        w
    }

    fn error_code(message: &Message) -> ErrorCode {
        match message {
            Message::Error { code, .. } => *code,
            other => panic!("expected an error, got {other}"),
        }
    }

    #[test]
    fn configuration_makes_the_worker_idle() {
        let mut w = worker();
        let params = Params::new().with("profile", "Classic").with("quiet", "TRUE");
        send(&mut w, 7, Message::NewWorker(params));

        assert_eq!(replies(&mut w), vec![(7, Message::Hello)]);
        assert_eq!(w.state(), WorkerState::Idle);
        assert_eq!(WORKER_PARAMS.get(w.context(), "profile").unwrap(), "Classic");
        assert_eq!(WORKER_PARAMS.get(w.context(), "quiet").unwrap(), "TRUE");
    }

    #[test]
    fn rejected_configuration_is_reported_before_hello() {
        let mut w = worker();
        let params = Params::new().with("snaplen", "0").with("color", "blue");
        send(&mut w, 2, Message::NewWorker(params));

        let out = replies(&mut w);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].0, 0);
        assert_eq!(error_code(&out[0].1), ErrorCode::InvalidParam);
        assert_eq!(error_code(&out[1].1), ErrorCode::UnknownParam);
        assert_eq!(out[2], (2, Message::Hello));
    }

    #[test]
    fn ping_echoes_payload_in_any_state() {
        let mut w = worker();
        send(&mut w, 5, Message::Ping(bytes::Bytes::from_static(b"x")));
        assert_eq!(
            replies(&mut w),
            vec![(5, Message::Pong(bytes::Bytes::from_static(b"x")))]
        );
        assert_eq!(w.state(), WorkerState::Creating);
    }

    #[test]
    fn illegal_command_leaves_state_alone() {
        let mut w = idle_worker();
        send(&mut w, 3, Message::StartCapture(Params::new()));
        let out = replies(&mut w);
        assert_eq!(out.len(), 1);
        assert_eq!(error_code(&out[0].1), ErrorCode::WrongMessage);
        assert_eq!(w.state(), WorkerState::Idle);
    }

    fn sample_command(kind: MessageType) -> Message {
        match kind {
            MessageType::NewWorker => Message::NewWorker(Params::new()),
            MessageType::Close => Message::Close,
            MessageType::SetParam => Message::SetParam {
                name: "quiet".into(),
                value: "TRUE".into(),
            },
            MessageType::GetParam => Message::GetParam("state".into()),
            MessageType::Ping => Message::Ping(bytes::Bytes::from_static(b"p")),
            MessageType::OpenFile => Message::OpenFile("/nonexistent/echld/gate.pcap".into()),
            MessageType::OpenInterface => Message::OpenInterface("lo".into()),
            MessageType::StartCapture => Message::StartCapture(Params::new()),
            MessageType::GetSummary => Message::GetSummary("1".into()),
            MessageType::GetTree => Message::GetTree("1".into()),
            MessageType::GetBuffer => Message::GetBuffer("1".into()),
            MessageType::StopCapture => Message::StopCapture,
            MessageType::AddNote => Message::AddNote {
                frame: 1,
                note: "seen".into(),
            },
            MessageType::ApplyFilter => Message::ApplyFilter("tcp".into()),
            MessageType::SaveFile => Message::SaveFile {
                path: "/tmp/out.pcap".into(),
                format: "pcap".into(),
                range: "all".into(),
            },
            other => panic!("{other} is not a command"),
        }
    }

    #[test]
    fn every_illegal_command_state_pair_is_refused() {
        let commands = MessageType::ALL.into_iter().filter(|kind| kind.is_command());
        let mut refused = 0;
        for kind in commands {
            for state in WorkerState::ALL {
                let mut w = worker();
                w.ctx.state = state;
                let flow = send(&mut w, 9, sample_command(kind));
                let out = replies(&mut w);

                if state.accepts(kind) {
                    assert!(
                        out.iter().all(|(_, m)| m.kind() != MessageType::Error
                            || error_code(m) != ErrorCode::WrongMessage),
                        "{kind} while {state} should run, got {out:?}"
                    );
                    continue;
                }
                refused += 1;
                assert_eq!(flow, Flow::Continue, "{kind} while {state}");
                assert_eq!(out.len(), 1, "{kind} while {state}: {out:?}");
                assert_eq!(out[0].0, 9);
                assert_eq!(
                    error_code(&out[0].1),
                    ErrorCode::WrongMessage,
                    "{kind} while {state}"
                );
                assert_eq!(w.state(), state, "{kind} while {state}");
            }
        }
        assert!(refused > 0);
    }

    #[test]
    fn dfilter_is_locked_while_capturing() {
        let mut w = idle_worker();
        send(
            &mut w,
            2,
            Message::SetParam {
                name: "dfilter".into(),
                value: "tcp".into(),
            },
        );
        assert_eq!(
            replies(&mut w),
            vec![(
                2,
                Message::Param {
                    name: "dfilter".into(),
                    value: "tcp".into()
                }
            )]
        );

        w.ctx.state = WorkerState::Capturing;
        send(
            &mut w,
            3,
            Message::SetParam {
                name: "dfilter".into(),
                value: "udp".into(),
            },
        );
        let out = replies(&mut w);
        assert_eq!(error_code(&out[0].1), ErrorCode::WrongMessage);
        assert_eq!(w.state(), WorkerState::Capturing);
        assert_eq!(WORKER_PARAMS.get(w.context(), "dfilter").unwrap(), "tcp");
    }

    #[test]
    fn read_only_parameters() {
        let mut w = idle_worker();
        send(
            &mut w,
            4,
            Message::SetParam {
                name: "pid".into(),
                value: "1".into(),
            },
        );
        let out = replies(&mut w);
        assert_eq!(error_code(&out[0].1), ErrorCode::ReadOnlyParam);

        send(&mut w, 5, Message::GetParam("state".into()));
        assert_eq!(
            replies(&mut w),
            vec![(
                5,
                Message::Param {
                    name: "state".into(),
                    value: "idle".into()
                }
            )]
        );
    }

    #[test]
    fn reading_a_file_to_the_end() {
        let path = std::env::temp_dir().join(format!("echld-worker-read-{}", std::process::id()));
        std::fs::write(&path, b"0123456789").unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let mut w = idle_worker();
        send(&mut w, 6, Message::OpenFile(path_str.clone()));
        assert_eq!(replies(&mut w), vec![(6, Message::FileOpened(path_str))]);
        assert_eq!(w.state(), WorkerState::Reading);

        // 10 bytes in 4-byte chunks, then the end-of-file read.
        for _ in 0..4 {
            w.read_chunk().unwrap();
        }
        assert!(!w.is_reading());
        assert_eq!(w.context().bytes_read(), 10);
        assert_eq!(
            replies(&mut w),
            vec![
                (0, Message::Notify("read 10 bytes".into())),
                (0, Message::Eof)
            ]
        );
        assert_eq!(w.state(), WorkerState::Done);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_reported() {
        let mut w = idle_worker();
        send(&mut w, 8, Message::OpenFile("/nonexistent/echld/file".into()));
        let out = replies(&mut w);
        assert_eq!(error_code(&out[0].1), ErrorCode::CannotOpenFile);
        assert_eq!(w.state(), WorkerState::Idle);
    }

    #[test]
    fn capture_lifecycle_and_notes() {
        let mut w = idle_worker();
        send(&mut w, 1, Message::OpenInterface("lo".into()));
        send(&mut w, 2, Message::StartCapture(Params::new().with("snaplen", "96")));
        send(
            &mut w,
            3,
            Message::AddNote {
                frame: 4,
                note: "retransmission".into(),
            },
        );
        send(&mut w, 4, Message::StopCapture);
        send(&mut w, 5, Message::GetTree("4".into()));

        let out = replies(&mut w);
        let kinds: Vec<_> = out.iter().map(|(_, m)| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                MessageType::InterfaceOpened,
                MessageType::CaptureStarted,
                MessageType::NoteAdded,
                MessageType::CaptureStopped,
                MessageType::Error,
            ]
        );
        assert_eq!(error_code(&out[4].1), ErrorCode::NotImplemented);
        assert_eq!(w.state(), WorkerState::Done);
        assert_eq!(w.context().note(4), Some("retransmission"));
        assert_eq!(WORKER_PARAMS.get(w.context(), "snaplen").unwrap(), "96");
    }

    #[test]
    fn empty_interface_name_is_rejected() {
        let mut w = idle_worker();
        send(&mut w, 1, Message::OpenInterface(" ".into()));
        let out = replies(&mut w);
        assert_eq!(error_code(&out[0].1), ErrorCode::CannotOpenInterface);
        assert_eq!(w.state(), WorkerState::Idle);
    }

    #[test]
    fn close_replies_then_exits() {
        let mut w = idle_worker();
        assert_eq!(send(&mut w, 9, Message::Close), Flow::Exit(0));
        assert_eq!(replies(&mut w), vec![(9, Message::Closing)]);
        assert_eq!(w.state(), WorkerState::Closing);
    }

    #[test]
    fn undecodable_payload_keeps_the_worker_running() {
        let mut w = idle_worker();
        let frame = Frame::new(MessageType::SetParam, 1, 4, &b"dfilter"[..]);
        assert_eq!(w.handle_frame(&frame).unwrap(), Flow::Continue);
        let out = replies(&mut w);
        assert_eq!(error_code(&out[0].1), ErrorCode::Decode);
        assert_eq!(w.state(), WorkerState::Idle);
    }

    #[test]
    fn events_are_not_commands() {
        let mut w = idle_worker();
        send(&mut w, 2, Message::Hello);
        let out = replies(&mut w);
        assert_eq!(error_code(&out[0].1), ErrorCode::WrongMessage);
    }
}
