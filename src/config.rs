// Tunables for matchmaking, signaling and transcript capture.

use std::time::Duration;

/// Public STUN servers used when the embedder supplies nothing else.
pub const STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Pre-gathered ICE candidate pool, matches the aggressive browser setting.
pub const ICE_CANDIDATE_POOL_SIZE: u8 = 10;

/// Base delay before re-querying after a lost claim race.
pub const CLAIM_BACKOFF: Duration = Duration::from_millis(500);

/// Random jitter added on top of `CLAIM_BACKOFF` so racing losers spread out.
pub const CLAIM_BACKOFF_JITTER_MS: u64 = 500;

/// Delay before restarting matchmaking after a pending slot was taken away.
pub const REMATCH_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on store writes during teardown; past this the write is
/// abandoned and local cleanup proceeds.
pub const TEARDOWN_STORE_TIMEOUT: Duration = Duration::from_secs(3);

/// Sample rate of decoded remote audio handed to the transcript recorder.
/// Opus decodes at 48 kHz; embedders with a different pipeline pass their own
/// rate to `TranscriptRecorder::new`.
pub const TRANSCRIPT_SAMPLE_RATE: u32 = 48_000;

/// Substitute transcription when no remote audio ever arrived.
pub const NO_AUDIO_SENTINEL: &str = "No audio was recorded.";

/// Substitute transcription when the transcription collaborator errored.
pub const TRANSCRIPTION_FAILED_SENTINEL: &str = "Transcription failed.";

/// Report records start out awaiting moderator review.
pub const REPORT_STATUS_PENDING: &str = "pending";
