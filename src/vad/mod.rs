//! Voice activity heuristic
//!
//! Samples the microphone spectrum on a fixed cadence and calls it speech when
//! the mean bin magnitude exceeds a threshold. Ambient noise above the
//! threshold counts as speech; there is no smoothing beyond the cadence.

mod analyzer;

pub use analyzer::{FrequencyAnalyzer, DEFAULT_FFT_SIZE};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::media::MediaStream;

/// Mean magnitude (0-255 scale) above which the user counts as speaking
pub const SPEAKING_THRESHOLD: f32 = 15.0;

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Detector settings
#[derive(Debug, Clone)]
pub struct VadConfig {
    pub threshold: f32,
    pub interval: Duration,
    pub fft_size: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: SPEAKING_THRESHOLD,
            interval: SAMPLE_INTERVAL,
            fft_size: DEFAULT_FFT_SIZE,
        }
    }
}

/// Mean of the frequency bins; 0 for an empty spectrum
pub fn mean_magnitude(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32
}

/// Speaking when unmuted and the mean is above the default threshold
pub fn is_speaking(bins: &[u8], muted: bool) -> bool {
    is_speaking_with(bins, muted, SPEAKING_THRESHOLD)
}

pub fn is_speaking_with(bins: &[u8], muted: bool, threshold: f32) -> bool {
    !muted && mean_magnitude(bins) > threshold
}

/// Drives the sampling loop against one stream at a time
///
/// The mute flag is shared with whoever owns mute state; the detector only
/// reads it.
pub struct VoiceActivityDetector {
    config: VadConfig,
    muted: Arc<AtomicBool>,
    speaking: Arc<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl VoiceActivityDetector {
    pub fn new(muted: Arc<AtomicBool>, config: VadConfig) -> Self {
        let (speaking, _) = watch::channel(false);
        Self {
            config,
            muted,
            speaking: Arc::new(speaking),
            task: None,
        }
    }

    /// Start sampling the stream's first audio track
    ///
    /// Any loop attached to a previous stream is cancelled first.
    pub fn attach(&mut self, stream: &MediaStream) {
        self.detach();

        let Some(track) = stream.primary_audio_track() else {
            warn!("Stream {} has no live audio track, voice activity disabled", stream.id());
            return;
        };

        // Subscribe before spawning so no frame between now and the first tick is lost
        let mut frames = track.subscribe();
        let muted = Arc::clone(&self.muted);
        let speaking = Arc::clone(&self.speaking);
        let config = self.config.clone();
        let track_id = track.id().to_string();
        let weak_track = Arc::downgrade(track);

        info!("Voice activity detection attached to track {}", track_id);

        self.task = Some(tokio::spawn(async move {
            let mut analyzer = FrequencyAnalyzer::new(config.fft_size);
            let mut ticker = tokio::time::interval(config.interval);

            loop {
                ticker.tick().await;

                let mut closed = false;
                loop {
                    match frames.try_recv() {
                        Ok(frame) => analyzer.push_frame(&frame),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Lagged(skipped)) => {
                            debug!("Voice activity sampler skipped {} frames", skipped);
                        }
                        Err(TryRecvError::Closed) => {
                            closed = true;
                            break;
                        }
                    }
                }

                let bins = analyzer.byte_frequency_data();
                let now_speaking =
                    is_speaking_with(&bins, muted.load(Ordering::SeqCst), config.threshold);
                speaking.send_if_modified(|current| {
                    if *current != now_speaking {
                        *current = now_speaking;
                        true
                    } else {
                        false
                    }
                });

                let live = weak_track.upgrade().is_some_and(|t| t.is_live());
                if closed || !live {
                    break;
                }
            }

            speaking.send_replace(false);
            debug!("Voice activity sampler for track {} stopped", track_id);
        }));
    }

    /// Cancel the sampling loop and report silence
    pub fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Voice activity detection detached");
        }
        self.speaking.send_replace(false);
    }

    pub fn is_attached(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.speaking.subscribe()
    }
}

impl Drop for VoiceActivityDetector {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
