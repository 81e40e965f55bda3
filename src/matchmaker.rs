//! Find-or-create pairing against the signaling store.
//!
//! A joiner claims a pending session through a single conditional
//! transaction; the loser of a race never retries the same session: it
//! backs off briefly, re-queries, and eventually falls through to creating
//! its own pending session, which is the guaranteed exit of the loop.

use std::future::Future;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::{CLAIM_BACKOFF, CLAIM_BACKOFF_JITTER_MS};
use crate::error::CallError;
use crate::peer::PeerLink;
use crate::session::{CallRole, Session};
use crate::store::{SignalingStore, StoreError};
use crate::utils::random_id;

/// A settled pairing: the committed session record and this side's role.
pub struct MatchOutcome {
    pub session: Session,
    pub role: CallRole,
}

/// Pair `local_participant` with a waiting stranger, or become the waiting
/// side. `make_link` produces a fresh peer link per attempt; a link that
/// lost a claim race has already consumed a remote offer and cannot be
/// reused.
pub async fn find_or_create<F, Fut>(
    store: &dyn SignalingStore,
    local_participant: &str,
    mut make_link: F,
) -> Result<(MatchOutcome, PeerLink), CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PeerLink, CallError>>,
{
    loop {
        match store.find_pending_excluding(local_participant).await? {
            Some(candidate) => {
                let offer = candidate.offer.clone().ok_or_else(|| {
                    CallError::StoreWriteFailed("pending session has no offer".into())
                })?;

                let link = make_link().await?;
                let answer = link.accept_offer(&offer).await?;

                match store
                    .claim_session(&candidate.id, local_participant, answer)
                    .await
                {
                    Ok(session) => {
                        info!(session_id = %session.id, "claimed pending session");
                        return Ok((
                            MatchOutcome {
                                session,
                                role: CallRole::Joiner,
                            },
                            link,
                        ));
                    }
                    Err(StoreError::Conflict) | Err(StoreError::NotFound) => {
                        // Lost the race (or the offerer cancelled). Discard
                        // this link and restart from a fresh query.
                        debug!(session_id = %candidate.id, "claim lost, restarting search");
                        link.close().await;
                        backoff().await;
                        continue;
                    }
                    Err(e) => {
                        link.close().await;
                        return Err(e.into());
                    }
                }
            }
            None => {
                let link = make_link().await?;
                let offer = link.create_offer().await?;
                let session =
                    Session::new_pending(random_id(), local_participant.to_string(), offer);
                if let Err(e) = store.create_session(&session).await {
                    link.close().await;
                    return Err(e.into());
                }
                info!(session_id = %session.id, "created pending session, waiting for partner");
                return Ok((
                    MatchOutcome {
                        session,
                        role: CallRole::Offerer,
                    },
                    link,
                ));
            }
        }
    }
}

/// Delete a still-pending session. Conditioned on status, so a concurrent
/// claim silently wins; returns whether the record was actually deleted.
pub async fn cancel_finding(
    store: &dyn SignalingStore,
    session_id: &str,
) -> Result<bool, CallError> {
    match store.delete_if_pending(session_id).await {
        Ok(deleted) => Ok(deleted),
        Err(StoreError::NotFound) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Jittered delay so many losers of one race do not hammer the store in
/// lockstep.
async fn backoff() {
    let jitter = rand::rng().random_range(0..CLAIM_BACKOFF_JITTER_MS);
    sleep(CLAIM_BACKOFF + std::time::Duration::from_millis(jitter)).await;
}
