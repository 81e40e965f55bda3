//! Notifications for the embedding UI, delivered over a channel instead of
//! being rendered here.

use tokio::sync::mpsc;
use tracing::debug;

use crate::session::{CallRole, ChatMessage};

/// Why a call attempt finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Local user hung up.
    HungUp,
    /// The session record vanished while the call was live.
    RemoteLeft,
    /// The record transitioned to `ended` (remote hang-up).
    Ended,
    /// The peer connection failed or closed underneath us.
    ConnectionFailed,
}

/// UI-facing call events.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Matchmaking started, waiting for a partner.
    Searching,
    /// Paired: the session went active.
    Matched { session_id: String, role: CallRole },
    /// Peer connection reached the connected state.
    Connected,
    /// The pending slot was taken away; a new search starts shortly.
    SearchRestarting,
    CallEnded(EndReason),
    /// Full chat history, sorted by timestamp.
    Messages(Vec<ChatMessage>),
    MicToggled { enabled: bool },
    CameraToggled { enabled: bool },
    /// Transcription collaborator failed; the report still went through with
    /// a sentinel transcription.
    TranscriptionFailed,
    ReportSubmitted,
}

/// Cheap-clone sender half handed to internal tasks.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl EventSink {
    pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<CallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, rx)
    }

    /// Best-effort: a dropped receiver only means nobody is watching.
    pub fn emit(&self, event: CallEvent) {
        debug!(?event, "emitting call event");
        let _ = self.tx.send(event);
    }
}
