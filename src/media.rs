//! Local media capture seam.
//!
//! Actual device access (camera/microphone, decoding, sample pumping) is the
//! embedder's concern; this module owns the track handles for one call
//! attempt and guarantees they are released exactly once on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::CallError;

/// Capture capability, as reported by device enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDeviceKind {
    AudioInput,
    VideoInput,
}

/// Access to the local capture hardware.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Enumerate capture capabilities, for the pre-call permission check.
    async fn devices(&self) -> Result<Vec<MediaDeviceKind>, CallError>;

    /// Acquire camera and/or microphone. Fails with
    /// [`CallError::MediaUnavailable`] when permission is denied or no
    /// device exists; callers must not proceed with matchmaking.
    async fn acquire(&self, video: bool, audio: bool) -> Result<LocalMedia, CallError>;
}

type StopHook = Box<dyn FnOnce() + Send>;

/// Local tracks for one call attempt.
///
/// Mute/camera toggles flip flags in place, without renegotiation; the
/// capture pipeline consults them before writing samples. Both flags start
/// enabled on every new attempt; mute state deliberately does not survive
/// a teardown/restart.
pub struct LocalMedia {
    audio: Option<Arc<TrackLocalStaticSample>>,
    video: Option<Arc<TrackLocalStaticSample>>,
    mic_enabled: AtomicBool,
    camera_enabled: AtomicBool,
    stop: Mutex<Option<StopHook>>,
}

impl LocalMedia {
    pub fn new(
        audio: Option<Arc<TrackLocalStaticSample>>,
        video: Option<Arc<TrackLocalStaticSample>>,
    ) -> Self {
        LocalMedia {
            audio,
            video,
            mic_enabled: AtomicBool::new(true),
            camera_enabled: AtomicBool::new(true),
            stop: Mutex::new(None),
        }
    }

    /// Register the hardware-release hook. Invoked at most once, from
    /// [`LocalMedia::release`].
    pub fn with_stop_hook(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.stop.lock().unwrap() = Some(Box::new(hook));
        self
    }

    /// All tracks, for attaching to the peer connection *before* any
    /// description is generated.
    pub fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        let mut out: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();
        if let Some(a) = &self.audio {
            out.push(a.clone());
        }
        if let Some(v) = &self.video {
            out.push(v.clone());
        }
        out
    }

    pub fn audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio.clone()
    }

    pub fn video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video.clone()
    }

    /// Flip microphone state; returns the new enabled value.
    pub fn toggle_mic(&self) -> bool {
        !self.mic_enabled.fetch_xor(true, Ordering::SeqCst)
    }

    /// Flip camera state; returns the new enabled value.
    pub fn toggle_camera(&self) -> bool {
        !self.camera_enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled.load(Ordering::SeqCst)
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled.load(Ordering::SeqCst)
    }

    /// Return the hardware. Idempotent: the stop hook is taken out of its
    /// slot, so repeated calls do nothing.
    pub fn release(&self) {
        if let Some(hook) = self.stop.lock().unwrap().take() {
            debug!("releasing local media");
            hook();
        }
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.release();
    }
}
