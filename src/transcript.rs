//! Transcript capture for abuse reports.
//!
//! Buffers decoded remote audio blocks while a call is live, and on report
//! converts them to 16-bit PCM in a WAV container and hands the base64 body
//! to the transcription collaborator. The buffer is cleared unconditionally
//! on every handoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{NO_AUDIO_SENTINEL, TRANSCRIPTION_FAILED_SENTINEL};
use crate::error::CallError;

/// Successful collaborator response.
#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    pub transcription: String,
}

/// External transcription collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// `wav_base64` is a complete PCM16 WAV file, base64-encoded.
    async fn transcribe(&self, wav_base64: &str) -> Result<Transcription, CallError>;
}

/// Outcome of a transcript handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptResult {
    /// Nothing was ever captured; the collaborator was not invoked.
    NoAudio,
    Transcribed(String),
    /// Collaborator failed; the report proceeds with a sentinel.
    Failed,
}

impl TranscriptResult {
    /// Text to embed in the report.
    pub fn text(&self) -> &str {
        match self {
            TranscriptResult::NoAudio => NO_AUDIO_SENTINEL,
            TranscriptResult::Transcribed(t) => t,
            TranscriptResult::Failed => TRANSCRIPTION_FAILED_SENTINEL,
        }
    }
}

/// Buffers fixed-size blocks of decoded remote audio in arrival order.
/// Arrival order is wall-clock order for a single stream, so blocks are
/// never reordered.
pub struct TranscriptRecorder {
    sample_rate: u32,
    armed: AtomicBool,
    blocks: Mutex<Vec<Vec<f32>>>,
}

impl TranscriptRecorder {
    pub fn new(sample_rate: u32) -> Self {
        TranscriptRecorder {
            sample_rate,
            armed: AtomicBool::new(false),
            blocks: Mutex::new(Vec::new()),
        }
    }

    /// Activate capture; called when the first remote audio track arrives.
    /// Returns true only on the first activation.
    pub fn arm(&self) -> bool {
        !self.armed.swap(true, Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Append one block of decoded samples in the range [-1, 1]. Ignored
    /// until the recorder is armed.
    pub fn push_block(&self, samples: &[f32]) {
        if !self.is_armed() || samples.is_empty() {
            return;
        }
        self.blocks.lock().unwrap().push(samples.to_vec());
    }

    pub fn has_audio(&self) -> bool {
        !self.blocks.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.blocks.lock().unwrap().clear();
    }

    /// Concatenate, convert to PCM16 WAV and hand off. The buffer is taken
    /// (and therefore cleared) before the collaborator is invoked, so a
    /// failure cannot leave stale audio behind.
    pub async fn finish(&self, transcriber: &dyn Transcriber) -> TranscriptResult {
        let blocks = std::mem::take(&mut *self.blocks.lock().unwrap());
        if blocks.is_empty() {
            return TranscriptResult::NoAudio;
        }

        let total: usize = blocks.iter().map(Vec::len).sum();
        let mut merged = Vec::with_capacity(total);
        for block in &blocks {
            merged.extend_from_slice(block);
        }

        let pcm = pcm16_from_f32(&merged);
        let wav = encode_wav_pcm16(&pcm, self.sample_rate, 1);
        let encoded = general_purpose::STANDARD.encode(&wav);
        debug!(
            samples = pcm.len(),
            wav_bytes = wav.len(),
            "handing transcript to collaborator"
        );

        match transcriber.transcribe(&encoded).await {
            Ok(t) => TranscriptResult::Transcribed(t.transcription),
            Err(e) => {
                warn!(error = %e, "transcription collaborator failed");
                TranscriptResult::Failed
            }
        }
    }
}

/// Float samples to 16-bit signed PCM, clamping at the range boundary
/// before scaling so out-of-range input cannot wrap around.
pub fn pcm16_from_f32(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// Minimal uncompressed WAV container: 44-byte RIFF header plus
/// little-endian PCM16 data.
pub fn encode_wav_pcm16(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * u32::from(channels) * 2;
    let block_align = channels * 2;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Reference collaborator: JSON POST of a WAV data URI, expecting
/// `{"transcription": "..."}` back.
pub struct HttpTranscriber {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTranscriber {
    pub fn new(endpoint: impl Into<String>) -> Self {
        HttpTranscriber {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav_base64: &str) -> Result<Transcription, CallError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "audioDataUri": format!("data:audio/wav;base64,{wav_base64}"),
            }))
            .send()
            .await
            .map_err(|e| CallError::TranscriptionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CallError::TranscriptionFailed(format!(
                "transcription endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<Transcription>()
            .await
            .map_err(|e| CallError::TranscriptionFailed(e.to_string()))
    }
}
