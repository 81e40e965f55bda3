//! Call operations facade.
//!
//! One `CallClient` per logged-in participant. The client owns at most one
//! call attempt at a time; every exit path (user hang-up, remote
//! departure, connection failure, lost slot) releases the local media,
//! closes the peer connection and stops the monitor task, and is safe to
//! run concurrently with the others.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{REMATCH_DELAY, REPORT_STATUS_PENDING, TEARDOWN_STORE_TIMEOUT, TRANSCRIPT_SAMPLE_RATE};
use crate::error::CallError;
use crate::events::{CallEvent, EndReason, EventSink};
use crate::matchmaker::{self, MatchOutcome};
use crate::media::{LocalMedia, MediaCapture, MediaDeviceKind};
use crate::monitor::{self, MonitorContext, MonitorExit};
use crate::peer::{LinkPhase, PeerLink};
use crate::session::{CallRole, CallStatus, ChatMessage, Report, Session};
use crate::store::SignalingStore;
use crate::transcript::{TranscriptRecorder, TranscriptResult, Transcriber};
use crate::utils::random_id;

/// State of one live call attempt.
struct ActiveCall {
    session_id: String,
    role: CallRole,
    link: Arc<PeerLink>,
    media: Arc<LocalMedia>,
    recorder: Arc<TranscriptRecorder>,
    latest_session: Arc<StdMutex<Session>>,
    messages: Arc<StdMutex<Vec<ChatMessage>>>,
    monitor: Option<JoinHandle<()>>,
}

/// Cheap-clone handle to one participant's call machinery.
#[derive(Clone)]
pub struct CallClient {
    runtime: Arc<CallRuntime>,
}

struct CallRuntime {
    user_id: String,
    store: Arc<dyn SignalingStore>,
    media: Arc<dyn MediaCapture>,
    transcriber: Arc<dyn Transcriber>,
    events: EventSink,
    active: Mutex<Option<ActiveCall>>,
    /// Reserves the attempt slot for the whole of `start_call`, including
    /// the media-acquisition suspension, so overlapping invocations cannot
    /// each create a session record.
    starting: AtomicBool,
    acquiring: AtomicBool,
    reporting: AtomicBool,
}

impl CallClient {
    /// Build a client and the event stream the embedding UI consumes.
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn SignalingStore>,
        media: Arc<dyn MediaCapture>,
        transcriber: Arc<dyn Transcriber>,
    ) -> (CallClient, mpsc::UnboundedReceiver<CallEvent>) {
        let (events, rx) = EventSink::channel();
        let runtime = Arc::new(CallRuntime {
            user_id: user_id.into(),
            store,
            media,
            transcriber,
            events,
            active: Mutex::new(None),
            starting: AtomicBool::new(false),
            acquiring: AtomicBool::new(false),
            reporting: AtomicBool::new(false),
        });
        (CallClient { runtime }, rx)
    }

    /// Verify capture hardware exists and permission is granted, without
    /// starting a call. Acquires and immediately releases the devices.
    pub async fn check_permissions(&self) -> Result<(), CallError> {
        let devices = self.runtime.media.devices().await?;
        if !devices.contains(&MediaDeviceKind::VideoInput) {
            return Err(CallError::MediaUnavailable("no camera present".into()));
        }
        let probe = self.runtime.media.acquire(true, true).await?;
        probe.release();
        Ok(())
    }

    /// Acquire local media and find or become a waiting partner.
    pub async fn start_call(&self) -> Result<(), CallError> {
        self.runtime.clone().start_call().await
    }

    /// Abandon a still-pending search. The delete is conditioned on the
    /// record still being `pending`; a concurrent claim silently wins, but
    /// local resources are released either way.
    pub async fn cancel_finding(&self) -> Result<(), CallError> {
        let Some(call) = self.runtime.active.lock().await.take() else {
            return Ok(());
        };
        match timeout(
            TEARDOWN_STORE_TIMEOUT,
            matchmaker::cancel_finding(self.runtime.store.as_ref(), &call.session_id),
        )
        .await
        {
            Ok(Ok(deleted)) => debug!(session_id = %call.session_id, deleted, "search cancelled"),
            Ok(Err(e)) => warn!(error = %e, "cancel delete failed"),
            Err(_) => warn!("cancel delete timed out"),
        }
        self.runtime.teardown(call, true).await;
        Ok(())
    }

    /// End the current call. With `preserve_record` the session record is
    /// left untouched (the report flow owns it); otherwise an `active`
    /// record is transitioned to `ended`, or a still-`pending` one deleted,
    /// best-effort. Local resources are released unconditionally; calling
    /// this with no active call is a no-op.
    pub async fn hang_up(&self, preserve_record: bool) -> Result<(), CallError> {
        let Some(call) = self.runtime.active.lock().await.take() else {
            return Ok(());
        };
        if !preserve_record {
            self.runtime.finalize_record(&call.session_id).await;
        }
        self.runtime.teardown(call, true).await;
        // The report flow already notified with `ReportSubmitted`; an end
        // notification on top of it would read as a second dismissal.
        if !self.runtime.reporting.load(Ordering::SeqCst) {
            self.runtime.events.emit(CallEvent::CallEnded(EndReason::HungUp));
        }
        Ok(())
    }

    /// Report the remote participant: transcribe the captured audio, write
    /// a report with the chat history, then hang up preserving the session
    /// record for the moderators.
    pub async fn report_call(&self) -> Result<(), CallError> {
        let (session_id, recorder, latest_session, messages) = {
            let guard = self.runtime.active.lock().await;
            let call = guard.as_ref().ok_or(CallError::NoActiveCall)?;
            (
                call.session_id.clone(),
                call.recorder.clone(),
                call.latest_session.clone(),
                call.messages.clone(),
            )
        };

        self.runtime.reporting.store(true, Ordering::SeqCst);
        let result = self
            .runtime
            .submit_report(&session_id, &recorder, &latest_session, &messages)
            .await;

        // The record is preserved for the moderation queue whether or not
        // the submission went through.
        let _ = self.hang_up(true).await;
        self.runtime.reporting.store(false, Ordering::SeqCst);
        result
    }

    /// Flip the microphone without renegotiation; returns the new state.
    pub async fn toggle_mic(&self) -> Result<bool, CallError> {
        let guard = self.runtime.active.lock().await;
        let call = guard.as_ref().ok_or(CallError::NoActiveCall)?;
        let enabled = call.media.toggle_mic();
        self.runtime.events.emit(CallEvent::MicToggled { enabled });
        Ok(enabled)
    }

    /// Flip the camera without renegotiation; returns the new state.
    pub async fn toggle_camera(&self) -> Result<bool, CallError> {
        let guard = self.runtime.active.lock().await;
        let call = guard.as_ref().ok_or(CallError::NoActiveCall)?;
        let enabled = call.media.toggle_camera();
        self.runtime.events.emit(CallEvent::CameraToggled { enabled });
        Ok(enabled)
    }

    /// Append a chat message under the current session.
    pub async fn send_message(&self, text: &str) -> Result<(), CallError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let session_id = {
            let guard = self.runtime.active.lock().await;
            guard
                .as_ref()
                .ok_or(CallError::NoActiveCall)?
                .session_id
                .clone()
        };
        let message = ChatMessage {
            id: random_id(),
            text: text.to_string(),
            sender_id: self.runtime.user_id.clone(),
            timestamp: Utc::now(),
        };
        self.runtime.store.append_message(&session_id, message).await?;
        Ok(())
    }

    /// Recorder handle for the decoded-audio pipeline to push blocks into.
    pub async fn transcript_recorder(&self) -> Option<Arc<TranscriptRecorder>> {
        self.runtime
            .active
            .lock()
            .await
            .as_ref()
            .map(|c| c.recorder.clone())
    }

    /// Current peer-link phase, `Idle` when no attempt is running.
    pub async fn phase(&self) -> LinkPhase {
        if self.runtime.acquiring.load(Ordering::SeqCst) {
            return LinkPhase::AwaitingLocalMedia;
        }
        match self.runtime.active.lock().await.as_ref() {
            Some(call) => call.link.phase(),
            None => LinkPhase::Idle,
        }
    }

    /// Whether this client is the waiting side of a still-pending session.
    pub async fn is_finding(&self) -> bool {
        match self.runtime.active.lock().await.as_ref() {
            Some(call) => {
                call.latest_session.lock().unwrap().status == CallStatus::Pending
            }
            None => false,
        }
    }

    /// Id of the current session, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.runtime
            .active
            .lock()
            .await
            .as_ref()
            .map(|c| c.session_id.clone())
    }
}

impl CallRuntime {
    /// Boxed: the monitor exit path schedules a restart through this same
    /// entry point, and an `async fn` here would make the spawned futures'
    /// types refer to themselves.
    fn start_call(
        self: Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CallError>> + Send>> {
        Box::pin(async move {
            // Reserve the slot before the first suspension point; a second
            // invocation arriving mid-acquisition must not create its own
            // session record on top of this one.
            if self.starting.swap(true, Ordering::SeqCst) {
                warn!("start_call ignored: a call attempt is already starting");
                return Ok(());
            }
            if self.active.lock().await.is_some() {
                self.starting.store(false, Ordering::SeqCst);
                warn!("start_call ignored: a call attempt is already running");
                return Ok(());
            }

            // Media first; matchmaking must not proceed without it.
            self.acquiring.store(true, Ordering::SeqCst);
            let media = match self.media.acquire(true, true).await {
                Ok(m) => Arc::new(m),
                Err(e) => {
                    self.acquiring.store(false, Ordering::SeqCst);
                    self.starting.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            };
            self.acquiring.store(false, Ordering::SeqCst);
            self.events.emit(CallEvent::Searching);

            let media_for_links = media.clone();
            let result = matchmaker::find_or_create(self.store.as_ref(), &self.user_id, || {
                let media = media_for_links.clone();
                async move { PeerLink::new(&media).await }
            })
            .await;

            let (outcome, link) = match result {
                Ok(v) => v,
                Err(e) => {
                    media.release();
                    self.starting.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            };
            let link = Arc::new(link);

            let attached = self.attach(outcome, link.clone(), media.clone()).await;
            self.starting.store(false, Ordering::SeqCst);
            if let Err(e) = attached {
                link.close().await;
                media.release();
                return Err(e);
            }
            Ok(())
        })
    }

    /// Wire the settled pairing into an `ActiveCall` and start its monitor.
    async fn attach(
        self: &Arc<Self>,
        outcome: MatchOutcome,
        link: Arc<PeerLink>,
        media: Arc<LocalMedia>,
    ) -> Result<(), CallError> {
        let session = outcome.session;
        let role = outcome.role;

        let peer_events = link.take_events().ok_or_else(|| {
            CallError::PeerConnectionFailed("peer event channel already taken".into())
        })?;
        let session_watch = self.store.watch_session(&session.id).await?;
        let message_watch = self.store.watch_messages(&session.id).await?;

        let latest_session = Arc::new(StdMutex::new(session.clone()));
        let messages = Arc::new(StdMutex::new(Vec::new()));
        let recorder = Arc::new(TranscriptRecorder::new(TRANSCRIPT_SAMPLE_RATE));

        let ctx = MonitorContext {
            session_id: session.id.clone(),
            role,
            store: self.store.clone(),
            link: link.clone(),
            recorder: recorder.clone(),
            events: self.events.clone(),
            peer_events,
            session_watch,
            message_watch,
            latest_session: latest_session.clone(),
            messages: messages.clone(),
        };

        let call = ActiveCall {
            session_id: session.id.clone(),
            role,
            link,
            media,
            recorder,
            latest_session,
            messages,
            monitor: None,
        };
        *self.active.lock().await = Some(call);

        let runtime = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let exit = monitor::run(ctx).await;
            if let Some(rt) = runtime.upgrade() {
                rt.on_monitor_exit(exit).await;
            }
        });
        if let Some(call) = self.active.lock().await.as_mut() {
            call.monitor = Some(handle);
        }

        if role == CallRole::Joiner {
            self.events.emit(CallEvent::Matched {
                session_id: session.id,
                role,
            });
        }
        Ok(())
    }

    async fn on_monitor_exit(self: Arc<Self>, exit: MonitorExit) {
        match exit {
            MonitorExit::Shutdown => {}
            MonitorExit::SlotTaken => {
                // A local cancel or hang-up may have deleted the record and
                // emptied the slot before this exit landed; only an attempt
                // still in its slot restarts the search.
                let Some(call) = self.active.lock().await.take() else {
                    return;
                };
                info!(session_id = %call.session_id, "pending slot taken away, restarting search");
                self.teardown(call, false).await;
                self.events.emit(CallEvent::SearchRestarting);
                let runtime = self.clone();
                tokio::spawn(async move {
                    sleep(REMATCH_DELAY).await;
                    if let Err(e) = runtime.start_call().await {
                        warn!(error = %e, "failed to restart matchmaking");
                    }
                });
            }
            MonitorExit::RemoteLeft => {
                if let Some(call) = self.active.lock().await.take() {
                    self.teardown(call, false).await;
                    self.events.emit(CallEvent::CallEnded(EndReason::RemoteLeft));
                }
            }
            MonitorExit::Ended => {
                if let Some(call) = self.active.lock().await.take() {
                    self.teardown(call, false).await;
                    // The report flow drives this transition itself and
                    // must not double-notify.
                    if !self.reporting.load(Ordering::SeqCst) {
                        self.events.emit(CallEvent::CallEnded(EndReason::Ended));
                    }
                }
            }
            MonitorExit::ConnectionFailed => {
                if let Some(call) = self.active.lock().await.take() {
                    // The remote may be unreachable; settle the record
                    // ourselves rather than waiting for it.
                    self.finalize_record(&call.session_id).await;
                    self.teardown(call, false).await;
                    self.events
                        .emit(CallEvent::CallEnded(EndReason::ConnectionFailed));
                }
            }
        }
    }

    /// Best-effort record settlement: `active → ended`, or delete a
    /// still-pending record. Failures and timeouts are logged, never fatal.
    async fn finalize_record(&self, session_id: &str) {
        match timeout(TEARDOWN_STORE_TIMEOUT, self.store.end_if_active(session_id)).await {
            Ok(Ok(true)) => {
                debug!(session_id, "session marked ended");
                return;
            }
            Ok(Ok(false)) => {}
            Ok(Err(e)) => {
                warn!(session_id, error = %e, "failed to mark session ended");
                return;
            }
            Err(_) => {
                warn!(session_id, "ending session timed out");
                return;
            }
        }
        match timeout(
            TEARDOWN_STORE_TIMEOUT,
            self.store.delete_if_pending(session_id),
        )
        .await
        {
            Ok(Ok(deleted)) => debug!(session_id, deleted, "pending session delete"),
            Ok(Err(e)) => warn!(session_id, error = %e, "failed to delete pending session"),
            Err(_) => warn!(session_id, "pending session delete timed out"),
        }
    }

    /// Release everything local. Each step is individually idempotent, and
    /// the `ActiveCall` has already been taken out of its slot, so a second
    /// teardown finds nothing to do.
    async fn teardown(&self, mut call: ActiveCall, abort_monitor: bool) {
        if abort_monitor {
            if let Some(handle) = call.monitor.take() {
                handle.abort();
            }
        }
        call.link.close().await;
        call.media.release();
        call.recorder.clear();
        debug!(session_id = %call.session_id, role = ?call.role, "call attempt torn down");
    }

    async fn submit_report(
        &self,
        session_id: &str,
        recorder: &TranscriptRecorder,
        latest_session: &StdMutex<Session>,
        messages: &StdMutex<Vec<ChatMessage>>,
    ) -> Result<(), CallError> {
        let transcript = recorder.finish(self.transcriber.as_ref()).await;
        if transcript == TranscriptResult::Failed {
            self.events.emit(CallEvent::TranscriptionFailed);
        }

        let reported_user_id = {
            let session = latest_session.lock().unwrap();
            session
                .other_participant(&self.user_id)
                .ok_or(CallError::NoActiveCall)?
                .to_string()
        };
        let chat_history = messages.lock().unwrap().clone();

        let report = Report {
            call_id: session_id.to_string(),
            reporter_id: self.user_id.clone(),
            reported_user_id,
            chat_history,
            transcription: transcript.text().to_string(),
            timestamp: Utc::now(),
            status: REPORT_STATUS_PENDING.to_string(),
        };
        self.store.submit_report(&report).await?;
        info!(session_id, "report submitted");
        self.events.emit(CallEvent::ReportSubmitted);
        Ok(())
    }
}
