use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::config::{ICE_CANDIDATE_POOL_SIZE, STUN_SERVERS};
use crate::error::CallError;
use crate::media::LocalMedia;
use crate::peer::candidates::{init_from_payload, payload_from_candidate, CandidateTracker};
use crate::session::{CandidatePayload, SessionDescription};

/// Peer-link state for one call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    /// No connection yet.
    Idle,
    /// Acquiring camera/microphone; no peer connection exists.
    AwaitingLocalMedia,
    /// Local offer generated, waiting for the remote answer.
    Offering,
    /// Remote offer applied, local answer generated.
    Answering,
    Connected,
    Closed,
}

/// Events forwarded out of the webrtc callbacks to the lifecycle monitor.
/// The peer-connection handle itself never crosses the channel.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local connectivity candidate was discovered.
    LocalCandidate(CandidatePayload),
    ConnectionState(RTCPeerConnectionState),
    /// A remote media stream arrived.
    RemoteTrack { audio: bool },
}

/// Owns the peer-connection object for one call attempt.
///
/// Local tracks are attached at construction, strictly before any
/// offer/answer is generated; attaching afterwards would produce a
/// description with no media lines and force a renegotiation.
pub struct PeerLink {
    pc: Arc<RTCPeerConnection>,
    phase: Arc<Mutex<LinkPhase>>,
    tracker: Mutex<CandidateTracker>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

impl PeerLink {
    /// Build the connection, attach `media`'s tracks and register the
    /// candidate/track/state callbacks.
    pub async fn new(media: &LocalMedia) -> Result<Self, CallError> {
        let mut engine = MediaEngine::default();
        engine.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut engine)?;
        let api = APIBuilder::new()
            .with_media_engine(engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config()).await?);

        // Tracks first; descriptions are generated only after this point.
        for track in media.tracks() {
            pc.add_track(track).await?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let phase = Arc::new(Mutex::new(LinkPhase::Idle));

        let cand_tx = tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(c) = &candidate {
                if let Some(payload) = payload_from_candidate(c) {
                    let _ = cand_tx.send(PeerEvent::LocalCandidate(payload));
                }
            } else {
                debug!("ICE candidate gathering completed");
            }
            Box::pin(async {})
        }));

        let state_tx = tx.clone();
        let state_phase = phase.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(?state, "peer connection state changed");
            if state == RTCPeerConnectionState::Connected {
                let mut phase = state_phase.lock().unwrap();
                if *phase != LinkPhase::Closed {
                    *phase = LinkPhase::Connected;
                }
            }
            let _ = state_tx.send(PeerEvent::ConnectionState(state));
            Box::pin(async {})
        }));

        let track_tx = tx;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let audio = track.kind() == RTPCodecType::Audio;
                debug!(audio, "remote track arrived");
                let _ = track_tx.send(PeerEvent::RemoteTrack { audio });
                Box::pin(async {})
            },
        ));

        Ok(PeerLink {
            pc,
            phase,
            tracker: Mutex::new(CandidateTracker::new()),
            events_rx: Mutex::new(Some(rx)),
        })
    }

    /// Take the event receiver for the monitor task. Yields `Some` once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    pub fn phase(&self) -> LinkPhase {
        *self.phase.lock().unwrap()
    }

    /// Offerer path: generate the local offer.
    pub async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| CallError::PeerConnectionFailed("local offer not set".into()))?;
        *self.phase.lock().unwrap() = LinkPhase::Offering;
        Ok(from_rtc(&local))
    }

    /// Joiner path: apply the remote offer and generate the local answer.
    pub async fn accept_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, CallError> {
        self.pc.set_remote_description(to_rtc(offer)?).await?;
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer).await?;
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| CallError::PeerConnectionFailed("local answer not set".into()))?;
        *self.phase.lock().unwrap() = LinkPhase::Answering;
        self.flush_pending().await;
        Ok(from_rtc(&local))
    }

    /// Offerer path: apply the remote answer exactly once. The record is
    /// re-observed on every snapshot, so the signaling state is the guard:
    /// anything other than "local offer set, no remote yet" is a no-op.
    /// Returns whether the answer was applied.
    pub async fn apply_remote_answer(
        &self,
        answer: &SessionDescription,
    ) -> Result<bool, CallError> {
        if self.pc.signaling_state() != RTCSignalingState::HaveLocalOffer
            || self.pc.remote_description().await.is_some()
        {
            return Ok(false);
        }
        self.pc.set_remote_description(to_rtc(answer)?).await?;
        debug!("remote answer applied");
        self.flush_pending().await;
        Ok(true)
    }

    /// Apply a full remote-candidate snapshot, each distinct candidate
    /// exactly once. Candidates observed before the remote description is
    /// set are queued and flushed afterwards.
    pub async fn apply_remote_candidates(&self, snapshot: &[CandidatePayload]) {
        let fresh = self.tracker.lock().unwrap().fresh(snapshot);
        if fresh.is_empty() {
            return;
        }

        if self.pc.remote_description().await.is_none() {
            let mut tracker = self.tracker.lock().unwrap();
            for candidate in fresh {
                tracker.queue(candidate);
            }
            return;
        }

        for candidate in fresh {
            self.add_candidate(&candidate).await;
        }
    }

    async fn flush_pending(&self) {
        let pending = self.tracker.lock().unwrap().drain_pending();
        for candidate in pending {
            self.add_candidate(&candidate).await;
        }
    }

    async fn add_candidate(&self, candidate: &CandidatePayload) {
        if let Err(e) = self.pc.add_ice_candidate(init_from_payload(candidate)).await {
            // Non-fatal: the connection may already be established or
            // closing underneath us.
            warn!(error = %e, "failed to add remote candidate");
        }
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn close(&self) {
        {
            let mut phase = self.phase.lock().unwrap();
            if *phase == LinkPhase::Closed {
                return;
            }
            *phase = LinkPhase::Closed;
        }
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "error closing peer connection");
        }
    }
}

fn rtc_config() -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: STUN_SERVERS.iter().map(|s| (*s).to_string()).collect(),
            ..Default::default()
        }],
        ice_candidate_pool_size: ICE_CANDIDATE_POOL_SIZE,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, CallError> {
    match desc.kind.as_str() {
        "offer" => Ok(RTCSessionDescription::offer(desc.body.clone())?),
        "answer" => Ok(RTCSessionDescription::answer(desc.body.clone())?),
        other => Err(CallError::PeerConnectionFailed(format!(
            "unsupported description kind: {other}"
        ))),
    }
}

fn from_rtc(desc: &RTCSessionDescription) -> SessionDescription {
    SessionDescription {
        body: desc.sdp.clone(),
        kind: desc.sdp_type.to_string(),
    }
}
