//! Shared fakes for integration tests: an in-memory signaling store with
//! the same conditional-transaction semantics as the real backend, plus
//! media and transcription stand-ins.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use pairlink::{
    CallError, CallEvent, CallRole, CallStatus, CandidatePayload, ChatMessage, LocalMedia,
    MediaCapture, MediaDeviceKind, Report, Session, SessionDescription, SignalingStore,
    StoreError, Transcriber, Transcription,
};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Drain the event stream until `pred` matches, discarding everything else.
pub async fn next_matching<F>(
    rx: &mut mpsc::UnboundedReceiver<CallEvent>,
    pred: F,
) -> CallEvent
where
    F: Fn(&CallEvent) -> bool,
{
    timeout(EVENT_TIMEOUT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for call event")
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn wait_until<F>(check: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within timeout");
        }
        sleep(Duration::from_millis(25)).await;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    session_watch: HashMap<String, watch::Sender<Option<Session>>>,
    messages: HashMap<String, Vec<ChatMessage>>,
    message_watch: HashMap<String, watch::Sender<Vec<ChatMessage>>>,
    reports: Vec<Report>,
}

impl Inner {
    fn notify_session(&mut self, id: &str) {
        let snapshot = self.sessions.get(id).cloned();
        if let Some(tx) = self.session_watch.get(id) {
            tx.send_replace(snapshot);
        }
    }

    fn notify_messages(&mut self, id: &str) {
        let snapshot = self.messages.get(id).cloned().unwrap_or_default();
        if let Some(tx) = self.message_watch.get(id) {
            tx.send_replace(snapshot);
        }
    }
}

/// In-memory signaling store. A single mutex serializes every transaction,
/// which is exactly the at-most-one-commit guarantee the contract asks of
/// the real backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryStore::default())
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.inner.lock().unwrap().sessions.get(id).cloned()
    }

    pub fn pending_sessions(&self) -> Vec<Session> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .values()
            .filter(|s| s.status == CallStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.inner.lock().unwrap().reports.clone()
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.insert(session.id.clone(), session.clone());
        inner.notify_session(&session.id);
        Ok(())
    }

    async fn find_pending_excluding(
        &self,
        participant: &str,
    ) -> Result<Option<Session>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut pending: Vec<&Session> = inner
            .sessions
            .values()
            .filter(|s| {
                s.status == CallStatus::Pending
                    && !s.participants.iter().any(|p| p == participant)
            })
            .collect();
        pending.sort_by_key(|s| s.started_at);
        Ok(pending.first().map(|s| (*s).clone()))
    }

    async fn claim_session(
        &self,
        id: &str,
        participant: &str,
        answer: SessionDescription,
    ) -> Result<Session, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.sessions.get_mut(id).ok_or(StoreError::NotFound)?;
        if session.status != CallStatus::Pending {
            return Err(StoreError::Conflict);
        }
        session.status = CallStatus::Active;
        session.participants.push(participant.to_string());
        session.answer = Some(answer);
        let committed = session.clone();
        inner.notify_session(id);
        Ok(committed)
    }

    async fn end_if_active(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(session) = inner.sessions.get_mut(id) else {
            return Ok(false);
        };
        if session.status != CallStatus::Active {
            return Ok(false);
        }
        session.status = CallStatus::Ended;
        session.ended_at = Some(Utc::now());
        inner.notify_session(id);
        Ok(true)
    }

    async fn delete_if_pending(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let deletable = matches!(
            inner.sessions.get(id),
            Some(s) if s.status == CallStatus::Pending
        );
        if !deletable {
            return Ok(false);
        }
        inner.sessions.remove(id);
        inner.notify_session(id);
        Ok(true)
    }

    async fn append_candidate(
        &self,
        id: &str,
        role: CallRole,
        candidate: CandidatePayload,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.sessions.get_mut(id).ok_or(StoreError::NotFound)?;
        let set = match role {
            CallRole::Offerer => &mut session.offer_candidates,
            CallRole::Joiner => &mut session.answer_candidates,
        };
        if !set.contains(&candidate) {
            set.push(candidate);
        }
        inner.notify_session(id);
        Ok(())
    }

    async fn watch_session(
        &self,
        id: &str,
    ) -> Result<watch::Receiver<Option<Session>>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.sessions.get(id).cloned();
        let tx = inner
            .session_watch
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(snapshot.clone()).0);
        tx.send_replace(snapshot);
        Ok(tx.subscribe())
    }

    async fn append_message(
        &self,
        call_id: &str,
        message: ChatMessage,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sessions.contains_key(call_id) {
            return Err(StoreError::NotFound);
        }
        inner
            .messages
            .entry(call_id.to_string())
            .or_default()
            .push(message);
        inner.notify_messages(call_id);
        Ok(())
    }

    async fn watch_messages(
        &self,
        call_id: &str,
    ) -> Result<watch::Receiver<Vec<ChatMessage>>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.messages.get(call_id).cloned().unwrap_or_default();
        let tx = inner
            .message_watch
            .entry(call_id.to_string())
            .or_insert_with(|| watch::channel(snapshot.clone()).0);
        tx.send_replace(snapshot);
        Ok(tx.subscribe())
    }

    async fn submit_report(&self, report: &Report) -> Result<(), StoreError> {
        self.inner.lock().unwrap().reports.push(report.clone());
        Ok(())
    }
}

/// Capture stand-in producing real (sample-fed) local tracks, counting how
/// many times hardware was released.
pub struct FakeMedia {
    pub releases: Arc<AtomicUsize>,
    pub deny: bool,
    /// Simulated device-open latency, for tests that overlap operations
    /// with a slow acquisition.
    pub acquire_delay: Option<Duration>,
}

impl FakeMedia {
    pub fn granted() -> (Arc<Self>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(FakeMedia {
                releases: releases.clone(),
                deny: false,
                acquire_delay: None,
            }),
            releases,
        )
    }

    pub fn granted_slow(delay: Duration) -> (Arc<Self>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(FakeMedia {
                releases: releases.clone(),
                deny: false,
                acquire_delay: Some(delay),
            }),
            releases,
        )
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(FakeMedia {
            releases: Arc::new(AtomicUsize::new(0)),
            deny: true,
            acquire_delay: None,
        })
    }
}

#[async_trait]
impl MediaCapture for FakeMedia {
    async fn devices(&self) -> Result<Vec<MediaDeviceKind>, CallError> {
        if self.deny {
            return Ok(Vec::new());
        }
        Ok(vec![MediaDeviceKind::AudioInput, MediaDeviceKind::VideoInput])
    }

    async fn acquire(&self, video: bool, audio: bool) -> Result<LocalMedia, CallError> {
        if self.deny {
            return Err(CallError::MediaUnavailable("permission denied".into()));
        }
        if let Some(delay) = self.acquire_delay {
            sleep(delay).await;
        }
        let audio_track = audio.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                "audio".to_owned(),
                "pairlink".to_owned(),
            ))
        });
        let video_track = video.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                "pairlink".to_owned(),
            ))
        });
        let releases = self.releases.clone();
        Ok(LocalMedia::new(audio_track, video_track).with_stop_hook(move || {
            releases.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Transcription stand-in with a switchable failure mode.
pub struct FakeTranscriber {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl FakeTranscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeTranscriber {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _wav_base64: &str) -> Result<Transcription, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::TranscriptionFailed("upstream error".into()));
        }
        Ok(Transcription {
            transcription: "a test conversation".into(),
        })
    }
}

/// A plausible pending session written straight into the store, for tests
/// that race claims without running full clients.
pub fn seeded_pending(id: &str, owner: &str) -> Session {
    Session::new_pending(
        id.to_string(),
        owner.to_string(),
        SessionDescription {
            body: "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\n".into(),
            kind: "offer".into(),
        },
    )
}
