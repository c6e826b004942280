use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::device::MediaKind;

/// Frames buffered per subscriber before the slowest one starts lagging
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Same shape and timestamp, every sample zeroed
    pub fn silenced(&self) -> Self {
        Self {
            samples: vec![0; self.samples.len()],
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp_ms: self.timestamp_ms,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        frames * 1000 / self.sample_rate as u64
    }
}

/// One live capture track
///
/// Disabling a track mutes it without releasing the device: audio tracks keep
/// delivering frames, but silent ones. Stopping is final.
#[derive(Debug)]
pub struct MediaTrack {
    id: String,
    kind: MediaKind,
    device_id: String,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
    frames: broadcast::Sender<AudioFrame>,
}

impl MediaTrack {
    pub fn new(kind: MediaKind, device_id: impl Into<String>, label: impl Into<String>) -> Arc<Self> {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            device_id: device_id.into(),
            label: label.into(),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            frames,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Release the device. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stopped {} track {} ({})", self.kind, self.id, self.device_id);
        }
    }

    pub fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Receive the frames this track produces from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.subscribe()
    }

    /// Deliver a captured frame to subscribers
    ///
    /// Returns false once the track is stopped so producers can exit.
    pub fn push_frame(&self, frame: AudioFrame) -> bool {
        if !self.is_live() {
            return false;
        }
        let frame = if self.is_enabled() { frame } else { frame.silenced() };
        // No subscribers is fine; the frame is simply dropped.
        let _ = self.frames.send(frame);
        true
    }
}

/// A set of capture tracks acquired together
#[derive(Debug)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == MediaKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == MediaKind::Video)
    }

    /// First live audio track, the one analysers and recorders read
    pub fn primary_audio_track(&self) -> Option<&Arc<MediaTrack>> {
        self.audio_tracks().find(|t| t.is_live())
    }

    pub fn has_video(&self) -> bool {
        self.video_tracks().any(|t| t.is_live())
    }

    /// True while any track is still live
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
