//! Message type bytes.
//!
//! The set is closed: a type byte not listed here is a protocol error.
//! Commands flow controller → worker, the rest flow back.

use std::fmt;

/// Every message type of the echld protocol, with its wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    Error = b'!',
    TimedOut = b'/',
    NewWorker = b'*',
    Hello = b'@',
    WorkerDead = b'#',
    Close = b'Q',
    Closing = b'q',
    SetParam = b'>',
    GetParam = b'<',
    Param = b'p',
    Ping = b'}',
    Pong = b'{',
    OpenFile = b'O',
    FileOpened = b'o',
    OpenInterface = b'C',
    InterfaceOpened = b'c',
    StartCapture = b'R',
    CaptureStarted = b'r',
    Notify = b'%',
    GetSummary = b'S',
    PacketSummary = b's',
    GetTree = b'G',
    Tree = b't',
    GetBuffer = b'B',
    Buffer = b'b',
    Eof = b'z',
    StopCapture = b'X',
    CaptureStopped = b'x',
    AddNote = b'N',
    NoteAdded = b'n',
    ApplyFilter = b'A',
    PacketList = b'l',
    SaveFile = b'W',
    FileSaved = b'w',
}

impl MessageType {
    /// All message types, in declaration order.
    pub const ALL: [MessageType; 34] = [
        MessageType::Error,
        MessageType::TimedOut,
        MessageType::NewWorker,
        MessageType::Hello,
        MessageType::WorkerDead,
        MessageType::Close,
        MessageType::Closing,
        MessageType::SetParam,
        MessageType::GetParam,
        MessageType::Param,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::OpenFile,
        MessageType::FileOpened,
        MessageType::OpenInterface,
        MessageType::InterfaceOpened,
        MessageType::StartCapture,
        MessageType::CaptureStarted,
        MessageType::Notify,
        MessageType::GetSummary,
        MessageType::PacketSummary,
        MessageType::GetTree,
        MessageType::Tree,
        MessageType::GetBuffer,
        MessageType::Buffer,
        MessageType::Eof,
        MessageType::StopCapture,
        MessageType::CaptureStopped,
        MessageType::AddNote,
        MessageType::NoteAdded,
        MessageType::ApplyFilter,
        MessageType::PacketList,
        MessageType::SaveFile,
        MessageType::FileSaved,
    ];

    /// Wire byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_u8() == byte)
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Error => "ERROR",
            MessageType::TimedOut => "TIMED_OUT",
            MessageType::NewWorker => "NEW_WORKER",
            MessageType::Hello => "HELLO",
            MessageType::WorkerDead => "WORKER_DEAD",
            MessageType::Close => "CLOSE",
            MessageType::Closing => "CLOSING",
            MessageType::SetParam => "SET_PARAM",
            MessageType::GetParam => "GET_PARAM",
            MessageType::Param => "PARAM",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::OpenFile => "OPEN_FILE",
            MessageType::FileOpened => "FILE_OPENED",
            MessageType::OpenInterface => "OPEN_INTERFACE",
            MessageType::InterfaceOpened => "INTERFACE_OPENED",
            MessageType::StartCapture => "START_CAPTURE",
            MessageType::CaptureStarted => "CAPTURE_STARTED",
            MessageType::Notify => "NOTIFY",
            MessageType::GetSummary => "GET_SUMMARY",
            MessageType::PacketSummary => "PACKET_SUMMARY",
            MessageType::GetTree => "GET_TREE",
            MessageType::Tree => "TREE",
            MessageType::GetBuffer => "GET_BUFFER",
            MessageType::Buffer => "BUFFER",
            MessageType::Eof => "EOF",
            MessageType::StopCapture => "STOP_CAPTURE",
            MessageType::CaptureStopped => "CAPTURE_STOPPED",
            MessageType::AddNote => "ADD_NOTE",
            MessageType::NoteAdded => "NOTE_ADDED",
            MessageType::ApplyFilter => "APPLY_FILTER",
            MessageType::PacketList => "PACKET_LIST",
            MessageType::SaveFile => "SAVE_FILE",
            MessageType::FileSaved => "FILE_SAVED",
        }
    }

    /// Whether this type is a command sent towards a worker or the dispatcher.
    pub fn is_command(self) -> bool {
        matches!(
            self,
            MessageType::NewWorker
                | MessageType::Close
                | MessageType::SetParam
                | MessageType::GetParam
                | MessageType::Ping
                | MessageType::OpenFile
                | MessageType::OpenInterface
                | MessageType::StartCapture
                | MessageType::GetSummary
                | MessageType::GetTree
                | MessageType::GetBuffer
                | MessageType::StopCapture
                | MessageType::AddNote
                | MessageType::ApplyFilter
                | MessageType::SaveFile
        )
    }

    /// The success reply a command expects. Failure is always [`MessageType::Error`].
    pub fn reply(self) -> Option<MessageType> {
        let reply = match self {
            MessageType::NewWorker => MessageType::Hello,
            MessageType::Close => MessageType::Closing,
            MessageType::SetParam | MessageType::GetParam => MessageType::Param,
            MessageType::Ping => MessageType::Pong,
            MessageType::OpenFile => MessageType::FileOpened,
            MessageType::OpenInterface => MessageType::InterfaceOpened,
            MessageType::StartCapture => MessageType::CaptureStarted,
            MessageType::GetSummary => MessageType::PacketSummary,
            MessageType::GetTree => MessageType::Tree,
            MessageType::GetBuffer => MessageType::Buffer,
            MessageType::StopCapture => MessageType::CaptureStopped,
            MessageType::AddNote => MessageType::NoteAdded,
            MessageType::ApplyFilter => MessageType::PacketList,
            MessageType::SaveFile => MessageType::FileSaved,
            _ => return None,
        };
        Some(reply)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(byte: u8) -> std::result::Result<Self, u8> {
        Self::from_u8(byte).ok_or(byte)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn wire_bytes_are_unique() {
        let bytes: HashSet<u8> = MessageType::ALL.iter().map(|t| t.as_u8()).collect();
        assert_eq!(bytes.len(), MessageType::ALL.len());
    }

    #[test]
    fn from_u8_matches_every_type() {
        for kind in MessageType::ALL {
            assert_eq!(MessageType::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::try_from(b'?'), Err(b'?'));
    }

    #[test]
    fn every_command_has_a_reply() {
        for kind in MessageType::ALL.iter().filter(|k| k.is_command()) {
            let reply = kind.reply().expect("commands must have a reply");
            assert!(!reply.is_command(), "{kind} replies with a command");
        }
        assert_eq!(MessageType::Hello.reply(), None);
    }

    #[test]
    fn names_and_display() {
        assert_eq!(MessageType::WorkerDead.name(), "WORKER_DEAD");
        assert_eq!(MessageType::Ping.to_string(), "PING");
        assert_eq!(MessageType::Ping.as_u8(), b'}');
    }
}
