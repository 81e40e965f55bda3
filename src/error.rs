use thiserror::Error;

use crate::store::StoreError;

/// Failures surfaced by call operations.
///
/// Only `MediaUnavailable` and report-path errors block the user; the rest
/// degrade to logged best-effort continuations or silent retries inside the
/// matchmaker. Any failure path still runs full local teardown so camera,
/// microphone and the peer connection are never left acquired.
#[derive(Debug, Error)]
pub enum CallError {
    /// Camera/microphone permission denied or no such device exists.
    /// Retryable via an explicit user action only.
    #[error("camera or microphone unavailable: {0}")]
    MediaUnavailable(String),

    /// Lost the race to claim a pending session. Handled inside the
    /// matchmaker by restarting the search; never surfaced to the user.
    #[error("pending session was claimed by another participant")]
    ClaimConflict,

    /// A best-effort signaling write (candidate append, ended transition)
    /// did not go through. Logged, non-fatal; teardown proceeds regardless.
    #[error("signaling store write failed: {0}")]
    StoreWriteFailed(String),

    /// The transcription collaborator errored. The report is still submitted
    /// with a sentinel transcription.
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// The peer connection could not be built or negotiated.
    #[error("peer connection failed: {0}")]
    PeerConnectionFailed(String),

    /// A call-scoped operation (toggle, message, report) was invoked with no
    /// active call, or before a remote participant joined.
    #[error("no active call")]
    NoActiveCall,
}

impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => CallError::ClaimConflict,
            other => CallError::StoreWriteFailed(other.to_string()),
        }
    }
}

impl From<webrtc::Error> for CallError {
    fn from(err: webrtc::Error) -> Self {
        CallError::PeerConnectionFailed(err.to_string())
    }
}
