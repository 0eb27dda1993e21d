//! The worker lifecycle.
//!
//! One table drives all three roles: the worker uses [`WorkerState::accepts`]
//! to gate commands, the dispatcher applies [`WorkerState::after_command`]
//! optimistically when relaying, and both dispatcher and controller follow
//! [`WorkerState::after_event`] on replies.

use std::fmt;

use echld_frame::MessageType;

/// Lifecycle state of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WorkerState {
    /// Slot available.
    #[default]
    Free,
    /// Forked, waiting for its configuration.
    Creating,
    Idle,
    /// Interface opened, capture not started.
    Ready,
    Reading,
    Capturing,
    Done,
    Closing,
    Closed,
    Errored,
}

impl WorkerState {
    pub const ALL: [WorkerState; 10] = [
        WorkerState::Free,
        WorkerState::Creating,
        WorkerState::Idle,
        WorkerState::Ready,
        WorkerState::Reading,
        WorkerState::Capturing,
        WorkerState::Done,
        WorkerState::Closing,
        WorkerState::Closed,
        WorkerState::Errored,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Free => "free",
            WorkerState::Creating => "creating",
            WorkerState::Idle => "idle",
            WorkerState::Ready => "ready",
            WorkerState::Reading => "reading",
            WorkerState::Capturing => "capturing",
            WorkerState::Done => "done",
            WorkerState::Closing => "closing",
            WorkerState::Closed => "closed",
            WorkerState::Errored => "errored",
        }
    }

    /// `Closed` and `Errored` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Closed | WorkerState::Errored)
    }

    /// Occupies a slot and has not reached a terminal state.
    pub fn is_live(self) -> bool {
        self != WorkerState::Free && !self.is_terminal()
    }

    /// Whether a worker in this state executes `command`.
    pub fn accepts(self, command: MessageType) -> bool {
        use MessageType as M;
        use WorkerState as S;

        match command {
            M::Ping | M::Close | M::SetParam | M::GetParam => self.is_live(),
            M::NewWorker => self == S::Creating,
            M::OpenFile | M::OpenInterface => self == S::Idle,
            M::StartCapture => self == S::Ready,
            M::StopCapture => self == S::Capturing,
            M::GetSummary | M::GetTree | M::GetBuffer | M::AddNote => {
                matches!(self, S::Capturing | S::Reading | S::Done)
            }
            M::ApplyFilter | M::SaveFile => self == S::Done,
            _ => false,
        }
    }

    /// State after `command` succeeds, when it changes the state.
    pub fn after_command(self, command: MessageType) -> Option<WorkerState> {
        if !self.accepts(command) {
            return None;
        }
        let next = match command {
            MessageType::OpenFile => WorkerState::Reading,
            MessageType::OpenInterface => WorkerState::Ready,
            MessageType::StartCapture => WorkerState::Capturing,
            MessageType::StopCapture => WorkerState::Done,
            MessageType::Close => WorkerState::Closing,
            _ => return None,
        };
        Some(next)
    }

    /// Final state of a worker whose process has ended.
    ///
    /// Only a worker that was closing, or that the dispatcher stopped while
    /// shutting down, ends `Closed`. Any other exit is an error.
    pub fn after_exit(self, shutting_down: bool) -> WorkerState {
        match self {
            WorkerState::Closing | WorkerState::Closed => WorkerState::Closed,
            WorkerState::Errored => WorkerState::Errored,
            _ if shutting_down => WorkerState::Closed,
            _ => WorkerState::Errored,
        }
    }

    /// State implied by an event a worker sent.
    ///
    /// A closing or finished worker does not move back.
    pub fn after_event(self, event: MessageType) -> Option<WorkerState> {
        if self == WorkerState::Closing || self.is_terminal() {
            return None;
        }
        let next = match event {
            MessageType::Hello => WorkerState::Idle,
            MessageType::FileOpened => WorkerState::Reading,
            MessageType::InterfaceOpened => WorkerState::Ready,
            MessageType::CaptureStarted => WorkerState::Capturing,
            MessageType::Eof | MessageType::CaptureStopped => WorkerState::Done,
            MessageType::Closing => WorkerState::Closing,
            _ => return None,
        };
        (next != self).then_some(next)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dissection_requests_need_packets() {
        for state in [WorkerState::Idle, WorkerState::Ready, WorkerState::Creating] {
            assert!(!state.accepts(MessageType::GetTree), "{state}");
        }
        for state in [WorkerState::Reading, WorkerState::Capturing, WorkerState::Done] {
            assert!(state.accepts(MessageType::AddNote), "{state}");
        }
        assert!(!WorkerState::Capturing.accepts(MessageType::SaveFile));
    }

    #[test]
    fn always_allowed_commands_need_a_live_worker() {
        assert!(WorkerState::Capturing.accepts(MessageType::Ping));
        assert!(WorkerState::Creating.accepts(MessageType::Close));
        assert!(!WorkerState::Free.accepts(MessageType::Ping));
        assert!(!WorkerState::Errored.accepts(MessageType::GetParam));
    }

    #[test]
    fn optimistic_transitions_respect_the_table() {
        assert_eq!(
            WorkerState::Idle.after_command(MessageType::OpenFile),
            Some(WorkerState::Reading)
        );
        assert_eq!(WorkerState::Capturing.after_command(MessageType::OpenFile), None);
        assert_eq!(
            WorkerState::Ready.after_command(MessageType::StartCapture),
            Some(WorkerState::Capturing)
        );
        assert_eq!(
            WorkerState::Done.after_command(MessageType::Close),
            Some(WorkerState::Closing)
        );
        assert_eq!(WorkerState::Idle.after_command(MessageType::Ping), None);
    }

    #[test]
    fn events_drive_tracked_state() {
        assert_eq!(
            WorkerState::Creating.after_event(MessageType::Hello),
            Some(WorkerState::Idle)
        );
        assert_eq!(
            WorkerState::Reading.after_event(MessageType::Eof),
            Some(WorkerState::Done)
        );
        assert_eq!(WorkerState::Closing.after_event(MessageType::Hello), None);
        assert_eq!(WorkerState::Idle.after_event(MessageType::Pong), None);
        assert_eq!(WorkerState::Idle.after_event(MessageType::Hello), None);
    }

    #[test]
    fn exits_end_in_a_terminal_state() {
        assert_eq!(WorkerState::Closing.after_exit(false), WorkerState::Closed);
        assert_eq!(WorkerState::Capturing.after_exit(false), WorkerState::Errored);
        assert_eq!(WorkerState::Capturing.after_exit(true), WorkerState::Closed);
        assert_eq!(WorkerState::Errored.after_exit(true), WorkerState::Errored);
        for state in WorkerState::ALL {
            assert!(state.after_exit(false).is_terminal(), "{state}");
        }
    }

    #[test]
    fn liveness() {
        assert!(!WorkerState::Free.is_live());
        assert!(WorkerState::Closing.is_live());
        assert!(WorkerState::Closed.is_terminal());
        assert_eq!(WorkerState::default(), WorkerState::Free);
    }
}
