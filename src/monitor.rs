//! Session lifecycle monitor: one task per call attempt.
//!
//! Consumes session snapshots, message snapshots and peer events on a
//! single task, applying remote descriptions/candidates and deciding when
//! the attempt is over. The peer-connection handle is only ever touched
//! from this task or the owning client, never from webrtc callbacks.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::events::{CallEvent, EventSink};
use crate::peer::{PeerEvent, PeerLink};
use crate::session::{CallRole, ChatMessage, Session};
use crate::store::SignalingStore;
use crate::transcript::TranscriptRecorder;

/// Why the monitor loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorExit {
    /// The pending record vanished before anyone joined: the slot was taken
    /// away (offerer cancelled from another tab, janitor cleanup, ...).
    /// Not an error; matchmaking restarts.
    SlotTaken,
    /// The record vanished while the call was live: abnormal peer departure.
    RemoteLeft,
    /// The record transitioned to `ended`.
    Ended,
    /// The peer connection failed, disconnected or closed underneath us.
    ConnectionFailed,
    /// Event sources went away; the attempt is being torn down elsewhere.
    Shutdown,
}

pub(crate) struct MonitorContext {
    pub session_id: String,
    pub role: CallRole,
    pub store: Arc<dyn SignalingStore>,
    pub link: Arc<PeerLink>,
    pub recorder: Arc<TranscriptRecorder>,
    pub events: EventSink,
    pub peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    pub session_watch: watch::Receiver<Option<Session>>,
    pub message_watch: watch::Receiver<Vec<ChatMessage>>,
    /// Latest observed session record, shared with the report flow.
    pub latest_session: Arc<Mutex<Session>>,
    /// Latest sorted chat history, shared with the report flow.
    pub messages: Arc<Mutex<Vec<ChatMessage>>>,
}

pub(crate) async fn run(mut ctx: MonitorContext) -> MonitorExit {
    // The joiner observed `active` inside its own claim transaction; the
    // offerer is still waiting for one.
    let mut matched = ctx.role == CallRole::Joiner;

    // The record may have changed between the claim/create and the
    // subscription, so the initial snapshot counts too.
    let initial = ctx.session_watch.borrow().clone();
    if let Some(exit) = handle_snapshot(&mut ctx, initial, &mut matched).await {
        return exit;
    }

    loop {
        tokio::select! {
            changed = ctx.session_watch.changed() => {
                if changed.is_err() {
                    return MonitorExit::Shutdown;
                }
                let snapshot = ctx.session_watch.borrow_and_update().clone();
                if let Some(exit) = handle_snapshot(&mut ctx, snapshot, &mut matched).await {
                    return exit;
                }
            }
            changed = ctx.message_watch.changed() => {
                if changed.is_err() {
                    return MonitorExit::Shutdown;
                }
                let mut history = ctx.message_watch.borrow_and_update().clone();
                // Arrival order at the client is not timestamp order.
                history.sort_by(|a, b| {
                    a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id))
                });
                *ctx.messages.lock().unwrap() = history.clone();
                ctx.events.emit(CallEvent::Messages(history));
            }
            event = ctx.peer_events.recv() => {
                let Some(event) = event else {
                    return MonitorExit::Shutdown;
                };
                if let Some(exit) = handle_peer_event(&ctx, event).await {
                    return exit;
                }
            }
        }
    }
}

async fn handle_snapshot(
    ctx: &mut MonitorContext,
    snapshot: Option<Session>,
    matched: &mut bool,
) -> Option<MonitorExit> {
    let Some(session) = snapshot else {
        return Some(if *matched {
            MonitorExit::RemoteLeft
        } else {
            MonitorExit::SlotTaken
        });
    };

    *ctx.latest_session.lock().unwrap() = session.clone();

    match session.status {
        crate::session::CallStatus::Ended => return Some(MonitorExit::Ended),
        crate::session::CallStatus::Active if !*matched => {
            *matched = true;
            info!(session_id = %ctx.session_id, "partner joined");
            ctx.events.emit(CallEvent::Matched {
                session_id: ctx.session_id.clone(),
                role: ctx.role,
            });
        }
        _ => {}
    }

    // Offerer side: the answer appears on the record once a joiner commits.
    // `apply_remote_answer` is internally exactly-once.
    if ctx.role == CallRole::Offerer {
        if let Some(answer) = &session.answer {
            match ctx.link.apply_remote_answer(answer).await {
                Ok(true) => debug!(session_id = %ctx.session_id, "applied remote answer"),
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "failed to apply remote answer");
                    return Some(MonitorExit::ConnectionFailed);
                }
            }
        }
    }

    ctx.link
        .apply_remote_candidates(session.remote_candidates(ctx.role))
        .await;
    None
}

async fn handle_peer_event(ctx: &MonitorContext, event: PeerEvent) -> Option<MonitorExit> {
    match event {
        PeerEvent::LocalCandidate(candidate) => {
            // Best-effort: the record may already be gone mid-teardown.
            if let Err(e) = ctx
                .store
                .append_candidate(&ctx.session_id, ctx.role, candidate)
                .await
            {
                debug!(error = %e, "candidate append failed (session may be gone)");
            }
            None
        }
        PeerEvent::ConnectionState(state) => match state {
            RTCPeerConnectionState::Connected => {
                ctx.events.emit(CallEvent::Connected);
                None
            }
            // Do not wait for the remote to update the record; it may be
            // unreachable. Hang up locally right away.
            RTCPeerConnectionState::Failed
            | RTCPeerConnectionState::Disconnected
            | RTCPeerConnectionState::Closed => Some(MonitorExit::ConnectionFailed),
            _ => None,
        },
        PeerEvent::RemoteTrack { audio } => {
            if audio && ctx.recorder.arm() {
                info!(session_id = %ctx.session_id, "remote audio arrived, transcript capture armed");
            }
            None
        }
    }
}
