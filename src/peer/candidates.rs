use std::collections::HashSet;

use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};

use crate::session::CandidatePayload;

/// Per-attempt candidate bookkeeping.
///
/// The store re-delivers the *full* candidate set on every change, so every
/// snapshot is filtered against the set of candidates already applied.
/// Candidates that arrive before the remote description is set are queued
/// and flushed once it lands.
#[derive(Default)]
pub struct CandidateTracker {
    seen: HashSet<CandidatePayload>,
    pending: Vec<CandidatePayload>,
}

impl CandidateTracker {
    pub fn new() -> Self {
        CandidateTracker::default()
    }

    /// Candidates from `snapshot` not observed before, in snapshot order.
    /// Marks them seen, so replaying the same snapshot yields nothing.
    pub fn fresh(&mut self, snapshot: &[CandidatePayload]) -> Vec<CandidatePayload> {
        snapshot
            .iter()
            .filter(|c| self.seen.insert((*c).clone()))
            .cloned()
            .collect()
    }

    /// Hold a candidate until the remote description is applied.
    pub fn queue(&mut self, candidate: CandidatePayload) {
        self.pending.push(candidate);
    }

    pub fn drain_pending(&mut self) -> Vec<CandidatePayload> {
        std::mem::take(&mut self.pending)
    }
}

pub fn payload_from_candidate(candidate: &RTCIceCandidate) -> Option<CandidatePayload> {
    let init = candidate.to_json().ok()?;
    Some(CandidatePayload {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
    })
}

pub fn init_from_payload(payload: &CandidatePayload) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: payload.candidate.clone(),
        sdp_mid: payload.sdp_mid.clone(),
        sdp_mline_index: payload.sdp_mline_index,
        username_fragment: None,
    }
}
