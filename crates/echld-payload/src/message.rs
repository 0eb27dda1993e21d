use std::fmt;

use bytes::Bytes;
use echld_frame::{Frame, MessageType};

use crate::errcode::ErrorCode;
use crate::error::{EncodeError, Result};
use crate::params::Params;
use crate::wire::{PayloadReader, PayloadWriter};

/// A decoded protocol message: one variant per [`MessageType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Error { code: ErrorCode, text: String },
    TimedOut(String),
    /// Creation request; the params configure the new worker.
    NewWorker(Params),
    Hello,
    /// Final event for a worker. The text is `OK` for an expected exit.
    WorkerDead(String),
    Close,
    Closing,
    SetParam { name: String, value: String },
    GetParam(String),
    Param { name: String, value: String },
    Ping(Bytes),
    Pong(Bytes),
    OpenFile(String),
    FileOpened(String),
    OpenInterface(String),
    InterfaceOpened(String),
    StartCapture(Params),
    CaptureStarted,
    Notify(String),
    GetSummary(String),
    PacketSummary(String),
    GetTree(String),
    Tree { frame: i32, tree: String },
    GetBuffer(String),
    Buffer {
        frame: i32,
        name: String,
        range: String,
        data: String,
    },
    Eof,
    StopCapture,
    CaptureStopped,
    AddNote { frame: i32, note: String },
    NoteAdded(i32),
    ApplyFilter(String),
    PacketList(String),
    SaveFile {
        path: String,
        format: String,
        range: String,
    },
    FileSaved(String),
}

impl Message {
    /// Shorthand for an `Error` message.
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Message::Error {
            code,
            text: text.into(),
        }
    }

    /// Wire type of this message.
    pub fn kind(&self) -> MessageType {
        match self {
            Message::Error { .. } => MessageType::Error,
            Message::TimedOut(_) => MessageType::TimedOut,
            Message::NewWorker(_) => MessageType::NewWorker,
            Message::Hello => MessageType::Hello,
            Message::WorkerDead(_) => MessageType::WorkerDead,
            Message::Close => MessageType::Close,
            Message::Closing => MessageType::Closing,
            Message::SetParam { .. } => MessageType::SetParam,
            Message::GetParam(_) => MessageType::GetParam,
            Message::Param { .. } => MessageType::Param,
            Message::Ping(_) => MessageType::Ping,
            Message::Pong(_) => MessageType::Pong,
            Message::OpenFile(_) => MessageType::OpenFile,
            Message::FileOpened(_) => MessageType::FileOpened,
            Message::OpenInterface(_) => MessageType::OpenInterface,
            Message::InterfaceOpened(_) => MessageType::InterfaceOpened,
            Message::StartCapture(_) => MessageType::StartCapture,
            Message::CaptureStarted => MessageType::CaptureStarted,
            Message::Notify(_) => MessageType::Notify,
            Message::GetSummary(_) => MessageType::GetSummary,
            Message::PacketSummary(_) => MessageType::PacketSummary,
            Message::GetTree(_) => MessageType::GetTree,
            Message::Tree { .. } => MessageType::Tree,
            Message::GetBuffer(_) => MessageType::GetBuffer,
            Message::Buffer { .. } => MessageType::Buffer,
            Message::Eof => MessageType::Eof,
            Message::StopCapture => MessageType::StopCapture,
            Message::CaptureStopped => MessageType::CaptureStopped,
            Message::AddNote { .. } => MessageType::AddNote,
            Message::NoteAdded(_) => MessageType::NoteAdded,
            Message::ApplyFilter(_) => MessageType::ApplyFilter,
            Message::PacketList(_) => MessageType::PacketList,
            Message::SaveFile { .. } => MessageType::SaveFile,
            Message::FileSaved(_) => MessageType::FileSaved,
        }
    }

    /// Serialize the payload.
    ///
    /// Fails if a string field contains a NUL, since the receiver would see
    /// only the part before it.
    pub fn encode(&self) -> std::result::Result<Bytes, EncodeError> {
        let mut out = PayloadWriter::new();
        match self {
            Message::Error { code, text } => {
                out.put_int(code.as_i32()).put_str(text);
            }
            Message::TimedOut(s)
            | Message::WorkerDead(s)
            | Message::Notify(s)
            | Message::GetParam(s)
            | Message::OpenFile(s)
            | Message::FileOpened(s)
            | Message::OpenInterface(s)
            | Message::InterfaceOpened(s)
            | Message::GetSummary(s)
            | Message::PacketSummary(s)
            | Message::GetTree(s)
            | Message::GetBuffer(s)
            | Message::ApplyFilter(s)
            | Message::PacketList(s)
            | Message::FileSaved(s) => {
                out.put_str(s);
            }
            Message::SetParam { name, value } | Message::Param { name, value } => {
                out.put_str(name).put_str(value);
            }
            Message::Tree { frame, tree } => {
                out.put_int(*frame).put_str(tree);
            }
            Message::AddNote { frame, note } => {
                out.put_int(*frame).put_str(note);
            }
            Message::NoteAdded(frame) => {
                out.put_int(*frame);
            }
            Message::Buffer {
                frame,
                name,
                range,
                data,
            } => {
                out.put_int(*frame).put_str(name).put_str(range).put_str(data);
            }
            Message::SaveFile {
                path,
                format,
                range,
            } => {
                out.put_str(path).put_str(format).put_str(range);
            }
            Message::NewWorker(params) | Message::StartCapture(params) => {
                params.encode_into(&mut out);
            }
            Message::Ping(raw) | Message::Pong(raw) => return Ok(raw.clone()),
            Message::Hello
            | Message::Close
            | Message::Closing
            | Message::CaptureStarted
            | Message::Eof
            | Message::StopCapture
            | Message::CaptureStopped => {}
        }
        out.finish()
    }

    /// Parse a payload of the given type.
    ///
    /// Fixed shapes must consume the payload exactly. Shapes without fields
    /// ignore whatever bytes they carry.
    pub fn decode(kind: MessageType, payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let message = match kind {
            MessageType::Hello => return Ok(Message::Hello),
            MessageType::Close => return Ok(Message::Close),
            MessageType::Closing => return Ok(Message::Closing),
            MessageType::CaptureStarted => return Ok(Message::CaptureStarted),
            MessageType::Eof => return Ok(Message::Eof),
            MessageType::StopCapture => return Ok(Message::StopCapture),
            MessageType::CaptureStopped => return Ok(Message::CaptureStopped),
            MessageType::Ping => return Ok(Message::Ping(Bytes::copy_from_slice(payload))),
            MessageType::Pong => return Ok(Message::Pong(Bytes::copy_from_slice(payload))),
            MessageType::NewWorker => Message::NewWorker(Params::decode_from(&mut r)?),
            MessageType::StartCapture => Message::StartCapture(Params::decode_from(&mut r)?),
            MessageType::Error => {
                let code = ErrorCode::try_from(r.read_int()?)?;
                Message::Error {
                    code,
                    text: r.read_string()?,
                }
            }
            MessageType::TimedOut => Message::TimedOut(r.read_string()?),
            MessageType::WorkerDead => Message::WorkerDead(r.read_string()?),
            MessageType::Notify => Message::Notify(r.read_string()?),
            MessageType::GetParam => Message::GetParam(r.read_string()?),
            MessageType::OpenFile => Message::OpenFile(r.read_string()?),
            MessageType::FileOpened => Message::FileOpened(r.read_string()?),
            MessageType::OpenInterface => Message::OpenInterface(r.read_string()?),
            MessageType::InterfaceOpened => Message::InterfaceOpened(r.read_string()?),
            MessageType::GetSummary => Message::GetSummary(r.read_string()?),
            MessageType::PacketSummary => Message::PacketSummary(r.read_string()?),
            MessageType::GetTree => Message::GetTree(r.read_string()?),
            MessageType::GetBuffer => Message::GetBuffer(r.read_string()?),
            MessageType::ApplyFilter => Message::ApplyFilter(r.read_string()?),
            MessageType::PacketList => Message::PacketList(r.read_string()?),
            MessageType::FileSaved => Message::FileSaved(r.read_string()?),
            MessageType::SetParam => Message::SetParam {
                name: r.read_string()?,
                value: r.read_string()?,
            },
            MessageType::Param => Message::Param {
                name: r.read_string()?,
                value: r.read_string()?,
            },
            MessageType::Tree => Message::Tree {
                frame: r.read_int()?,
                tree: r.read_string()?,
            },
            MessageType::AddNote => Message::AddNote {
                frame: r.read_int()?,
                note: r.read_string()?,
            },
            MessageType::NoteAdded => Message::NoteAdded(r.read_int()?),
            MessageType::Buffer => Message::Buffer {
                frame: r.read_int()?,
                name: r.read_string()?,
                range: r.read_string()?,
                data: r.read_string()?,
            },
            MessageType::SaveFile => Message::SaveFile {
                path: r.read_string()?,
                format: r.read_string()?,
                range: r.read_string()?,
            },
        };
        r.finish()?;
        Ok(message)
    }

    /// Decode the payload of a received frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        Self::decode(frame.kind, &frame.payload)
    }

    /// Wrap this message in a frame addressed to `worker_id`.
    pub fn to_frame(
        &self,
        worker_id: u16,
        request_id: u16,
    ) -> std::result::Result<Frame, EncodeError> {
        Ok(Frame::new(self.kind(), worker_id, request_id, self.encode()?))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        match self {
            Message::Error { code, text } => write!(f, "{kind} {code}: {text}"),
            Message::TimedOut(s)
            | Message::WorkerDead(s)
            | Message::Notify(s)
            | Message::GetParam(s)
            | Message::OpenFile(s)
            | Message::FileOpened(s)
            | Message::OpenInterface(s)
            | Message::InterfaceOpened(s)
            | Message::GetSummary(s)
            | Message::PacketSummary(s)
            | Message::GetTree(s)
            | Message::GetBuffer(s)
            | Message::ApplyFilter(s)
            | Message::PacketList(s)
            | Message::FileSaved(s) => write!(f, "{kind} {s:?}"),
            Message::SetParam { name, value } | Message::Param { name, value } => {
                write!(f, "{kind} {name}={value}")
            }
            Message::NewWorker(params) | Message::StartCapture(params) => {
                write!(f, "{kind} [{params}]")
            }
            Message::Ping(raw) | Message::Pong(raw) => write!(f, "{kind} ({} bytes)", raw.len()),
            Message::Tree { frame, .. } => write!(f, "{kind} frame {frame}"),
            Message::Buffer { frame, name, .. } => write!(f, "{kind} frame {frame} {name:?}"),
            Message::AddNote { frame, note } => write!(f, "{kind} frame {frame} {note:?}"),
            Message::NoteAdded(frame) => write!(f, "{kind} frame {frame}"),
            Message::SaveFile { path, format, .. } => write!(f, "{kind} {path:?} ({format})"),
            Message::Hello
            | Message::Close
            | Message::Closing
            | Message::CaptureStarted
            | Message::Eof
            | Message::StopCapture
            | Message::CaptureStopped => write!(f, "{kind}"),
        }
    }
}
