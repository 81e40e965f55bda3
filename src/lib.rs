//! pairlink - matchmaking and signaling core for anonymous one-to-one
//! video calls.
//!
//! Pairs a waiting participant with a newcomer through an atomic claim on a
//! shared signaling store, relays the offer/answer/candidate handshake to
//! establish a direct peer link, tracks the session lifecycle under
//! concurrent termination from either side, and captures a remote-audio
//! transcript for abuse reports.
//!
//! # Architecture
//!
//! - `store`: typed contract over the external signaling store; all pairing
//!   and termination writes are conditional transactions on the record's
//!   status, with no locks across processes
//! - `matchmaker`: find-or-create pairing, claim-race handling
//! - `peer`: the peer-connection controller and candidate bookkeeping
//! - `monitor`: one lifecycle task per call attempt, fed by snapshots and
//!   channel-delivered peer events
//! - `transcript`: remote-audio buffering, PCM/WAV conversion, transcription
//!   handoff
//! - `client`: the operations facade (`start_call`, `cancel_finding`,
//!   `hang_up`, `report_call`, the toggles, chat)
//!
//! The store, local media capture and transcription are consumed through
//! traits; the embedding client supplies real implementations.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod matchmaker;
pub mod media;
mod monitor;
pub mod peer;
pub mod session;
pub mod store;
pub mod transcript;
pub mod utils;

// Re-export the main surface at the crate root.
pub use client::CallClient;
pub use error::CallError;
pub use events::{CallEvent, EndReason};
pub use media::{LocalMedia, MediaCapture, MediaDeviceKind};
pub use peer::{LinkPhase, PeerEvent, PeerLink};
pub use session::{
    CallRole, CallStatus, CandidatePayload, ChatMessage, Report, Session, SessionDescription,
};
pub use store::{SignalingStore, StoreError};
pub use transcript::{
    HttpTranscriber, TranscriptRecorder, TranscriptResult, Transcriber, Transcription,
};
