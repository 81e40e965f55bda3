//! Typed access contract for the signaling store.
//!
//! The store itself is an external collaborator (a durable document store
//! with conditional transactions and snapshot subscriptions, collection
//! `calls/{id}` plus sub-path `calls/{id}/messages` and a separate `reports`
//! collection). Everything that affects pairing or termination is a
//! conditional operation keyed on the record's current status; that is the
//! sole concurrency-control primitive across clients.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::session::{CallRole, CandidatePayload, ChatMessage, Report, Session, SessionDescription};

/// Store failures, as observed by this client.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record does not exist (deleted, or never created).
    #[error("session record not found")]
    NotFound,

    /// A conditional transaction aborted because the precondition no longer
    /// held (e.g. the session was no longer `pending` at claim time).
    #[error("conditional store transaction aborted")]
    Conflict,

    /// Transport or backend failure.
    #[error("signaling store unavailable: {0}")]
    Unavailable(String),
}

/// Session repository over the signaling store.
///
/// Snapshot subscriptions deliver the *full* current document on every
/// change (`None` once the record is deleted); consumers must tolerate
/// re-delivery and deduplicate by value.
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Create a fresh session record.
    async fn create_session(&self, session: &Session) -> Result<(), StoreError>;

    /// At most one `pending` session whose participants do not include
    /// `participant` (self-pairing is forbidden).
    async fn find_pending_excluding(&self, participant: &str)
        -> Result<Option<Session>, StoreError>;

    /// Atomic claim: re-read the record, abort with [`StoreError::Conflict`]
    /// unless it is still `pending`, then set it `active`, append
    /// `participant` and write `answer`, all in one transaction. At most one
    /// concurrent claimant commits. Returns the committed record.
    async fn claim_session(
        &self,
        id: &str,
        participant: &str,
        answer: SessionDescription,
    ) -> Result<Session, StoreError>;

    /// Conditionally transition `active → ended` and stamp `ended_at`.
    /// Returns false (not an error) if the record was not `active`;
    /// repeated calls are no-ops.
    async fn end_if_active(&self, id: &str) -> Result<bool, StoreError>;

    /// Delete the record only if it is still `pending`. Returns false if a
    /// joiner claimed it concurrently or it is already gone.
    async fn delete_if_pending(&self, id: &str) -> Result<bool, StoreError>;

    /// Append a locally discovered candidate to the set owned by `role`
    /// (offerer → `offer_candidates`, joiner → `answer_candidates`).
    /// [`StoreError::NotFound`] here means the session was already torn
    /// down; callers treat that as non-fatal.
    async fn append_candidate(
        &self,
        id: &str,
        role: CallRole,
        candidate: CandidatePayload,
    ) -> Result<(), StoreError>;

    /// Continuous full-snapshot subscription to one session record.
    async fn watch_session(
        &self,
        id: &str,
    ) -> Result<watch::Receiver<Option<Session>>, StoreError>;

    /// Append one chat message under `calls/{call_id}/messages`.
    async fn append_message(&self, call_id: &str, message: ChatMessage)
        -> Result<(), StoreError>;

    /// Continuous full-snapshot subscription to the message sub-stream.
    /// Delivery order is not guaranteed to match timestamp order.
    async fn watch_messages(
        &self,
        call_id: &str,
    ) -> Result<watch::Receiver<Vec<ChatMessage>>, StoreError>;

    /// Append-only write to the independent `reports` collection.
    async fn submit_report(&self, report: &Report) -> Result<(), StoreError>;
}
