use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a session record. `Pending → Active` happens exactly once,
/// under the claim transaction; `Active → Ended` is idempotent.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Active,
    Ended,
}

/// Which side of the handshake this participant plays. Derived solely from
/// array position in `Session::participants` and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    /// First entrant; created the session and the offer.
    Offerer,
    /// Second entrant; claimed the session and supplied the answer.
    Joiner,
}

/// Opaque connection description as stored on the session record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// SDP body.
    pub body: String,
    /// "offer" or "answer".
    pub kind: String,
}

/// Opaque connectivity candidate as stored on the session record.
///
/// Hash/Eq by value: the store re-delivers the full candidate set on every
/// change notification, so consumers deduplicate structurally.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidatePayload {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// One matchmaking-and-media attempt between two participants.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Session {
    pub id: String,
    /// First entrant is the offerer, second the joiner. Length 1 or 2.
    pub participants: Vec<String>,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
    /// Appended to by the offerer only.
    #[serde(default)]
    pub offer_candidates: Vec<CandidatePayload>,
    /// Appended to by the joiner only.
    #[serde(default)]
    pub answer_candidates: Vec<CandidatePayload>,
}

impl Session {
    /// Fresh record awaiting a second participant.
    pub fn new_pending(id: String, participant: String, offer: SessionDescription) -> Self {
        Session {
            id,
            participants: vec![participant],
            status: CallStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            offer: Some(offer),
            answer: None,
            offer_candidates: Vec::new(),
            answer_candidates: Vec::new(),
        }
    }

    /// Role of `participant`, from array position.
    pub fn role_of(&self, participant: &str) -> Option<CallRole> {
        match self.participants.iter().position(|p| p == participant) {
            Some(0) => Some(CallRole::Offerer),
            Some(1) => Some(CallRole::Joiner),
            _ => None,
        }
    }

    /// The participant that is not `me`, once both have joined.
    pub fn other_participant(&self, me: &str) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.as_str() != me)
            .map(String::as_str)
    }

    /// The candidate set written by the *other* side: the offerer watches
    /// `answer_candidates`, the joiner watches `offer_candidates`.
    pub fn remote_candidates(&self, local_role: CallRole) -> &[CandidatePayload] {
        match local_role {
            CallRole::Offerer => &self.answer_candidates,
            CallRole::Joiner => &self.offer_candidates,
        }
    }
}

/// One chat message under a session, ordered by timestamp for display.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Abuse report, written to its own collection so it survives session
/// deletion.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Report {
    pub call_id: String,
    pub reporter_id: String,
    pub reported_user_id: String,
    pub chat_history: Vec<ChatMessage>,
    pub transcription: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
}
