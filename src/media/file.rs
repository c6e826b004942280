// File-backed capture platform
//
// Each configured audio device is an audio file that gets decoded once per
// acquisition and replayed in real time, looping, until its track stops.
// Video devices carry no frame data; they exist so camera selection, pause
// and permission bookkeeping behave like they do with real hardware.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::device::{MediaConstraints, MediaDevice, MediaKind};
use super::platform::MediaPlatform;
use super::stream::{AudioFrame, MediaStream, MediaTrack};
use crate::error::MediaError;

/// Sample rate used for devices without a backing file
const SILENT_SAMPLE_RATE: u32 = 16000;

/// One configured device
#[derive(Debug, Clone, Deserialize)]
pub struct FileDevice {
    pub id: String,
    pub label: String,
    pub kind: MediaKind,
    /// Audio file to replay; audio devices without one produce silence
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl FileDevice {
    fn descriptor(&self) -> MediaDevice {
        MediaDevice::new(self.id.clone(), self.kind, self.label.clone())
    }
}

/// Decoded, interleaved PCM ready for playback
#[derive(Debug)]
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    fn silence() -> Self {
        Self {
            samples: Vec::new(),
            sample_rate: SILENT_SAMPLE_RATE,
            channels: 1,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels.max(1) as f64)
    }
}

/// Capture platform whose devices are audio files
pub struct FilePlatform {
    devices: RwLock<Vec<FileDevice>>,
    permission_granted: AtomicBool,
    frame_ms: u64,
    changes: broadcast::Sender<()>,
}

impl FilePlatform {
    pub fn new(devices: Vec<FileDevice>, frame_ms: u64) -> Self {
        let (changes, _) = broadcast::channel(16);

        info!(
            "File platform initialized: {} devices, {}ms frames",
            devices.len(),
            frame_ms
        );

        Self {
            devices: RwLock::new(devices),
            permission_granted: AtomicBool::new(true),
            frame_ms: frame_ms.max(1),
            changes,
        }
    }

    /// Grant or revoke capture permission for future acquisitions
    pub fn set_permission_granted(&self, granted: bool) {
        self.permission_granted.store(granted, Ordering::SeqCst);
    }

    /// Plug in a device
    pub fn add_device(&self, device: FileDevice) {
        info!("Device added: {} ({})", device.label, device.id);
        if let Ok(mut devices) = self.devices.write() {
            devices.push(device);
        }
        let _ = self.changes.send(());
    }

    /// Unplug a device. Streams already acquired from it keep playing.
    pub fn remove_device(&self, id: &str) {
        info!("Device removed: {}", id);
        if let Ok(mut devices) = self.devices.write() {
            devices.retain(|d| d.id != id);
        }
        let _ = self.changes.send(());
    }

    fn find_device(&self, kind: MediaKind, id: Option<&str>) -> Result<FileDevice, MediaError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| MediaError::DeviceUnavailable("device table poisoned".to_string()))?;

        let found = match id {
            Some(id) => devices.iter().find(|d| d.kind == kind && d.id == id),
            None => devices.iter().find(|d| d.kind == kind),
        };

        found.cloned().ok_or_else(|| match id {
            Some(id) => MediaError::DeviceUnavailable(format!("no {} device with id {}", kind, id)),
            None => MediaError::DeviceUnavailable(format!("no {} input device present", kind)),
        })
    }
}

#[async_trait::async_trait]
impl MediaPlatform for FilePlatform {
    async fn enumerate_devices(&self) -> Result<Vec<MediaDevice>, MediaError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| MediaError::DeviceUnavailable("device table poisoned".to_string()))?;
        Ok(devices.iter().map(FileDevice::descriptor).collect())
    }

    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        if !self.permission_granted.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied(
                "capture permission has not been granted".to_string(),
            ));
        }

        let audio_device = self.find_device(MediaKind::Audio, constraints.audio_device_id.as_deref())?;
        let video_device = if constraints.video {
            Some(self.find_device(MediaKind::Video, constraints.video_device_id.as_deref())?)
        } else {
            None
        };

        let audio = match audio_device.path.clone() {
            Some(path) => {
                let decoded = tokio::task::spawn_blocking(move || decode_file(&path))
                    .await
                    .map_err(|e| MediaError::DeviceUnavailable(format!("decoder task failed: {}", e)))?;
                decoded.map_err(|e| {
                    MediaError::DeviceUnavailable(format!("{}: {:#}", audio_device.label, e))
                })?
            }
            None => DecodedAudio::silence(),
        };

        let audio_track = MediaTrack::new(MediaKind::Audio, &audio_device.id, &audio_device.label);
        spawn_playback(&audio_track, Arc::new(audio), self.frame_ms);

        let mut tracks = vec![audio_track];
        if let Some(video_device) = video_device {
            tracks.push(MediaTrack::new(MediaKind::Video, &video_device.id, &video_device.label));
        }

        Ok(MediaStream::new(tracks))
    }

    fn device_changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Decode any supported audio file into interleaved i16 PCM
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    info!("Opening audio file: {}", path.display());

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Unsupported audio format")?;
    let mut format = probed.format;

    let track = format.default_track().context("File has no audio track")?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params.sample_rate.context("Unknown sample rate")?;
    let mut channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .context("Unsupported codec")?;

    let mut samples: Vec<i16> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e).context("Failed to read audio packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(e).context("Failed to decode audio"),
        }
    }

    let audio = DecodedAudio {
        samples,
        sample_rate,
        channels,
    };

    info!(
        "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
        audio.duration_seconds(),
        audio.sample_rate,
        audio.channels,
        audio.samples.len()
    );

    Ok(audio)
}

/// Replay decoded audio into the track at real-time pace
///
/// The task holds only a weak reference, so it exits once the track is
/// stopped or every owner has dropped it.
fn spawn_playback(track: &Arc<MediaTrack>, audio: Arc<DecodedAudio>, frame_ms: u64) {
    let weak = Arc::downgrade(track);
    let track_id = track.id().to_string();

    tokio::spawn(async move {
        let channels = audio.channels.max(1) as usize;
        let samples_per_frame = (audio.sample_rate as u64 * frame_ms / 1000) as usize * channels;
        let mut ticker = tokio::time::interval(Duration::from_millis(frame_ms));
        let mut position = 0usize;
        let mut timestamp_ms = 0u64;

        loop {
            ticker.tick().await;

            let Some(track) = weak.upgrade() else {
                break;
            };

            let samples = next_window(&audio.samples, &mut position, samples_per_frame);
            let frame = AudioFrame {
                samples,
                sample_rate: audio.sample_rate,
                channels: audio.channels,
                timestamp_ms,
            };

            if !track.push_frame(frame) {
                break;
            }
            timestamp_ms += frame_ms;
        }

        debug!("Playback for track {} stopped", track_id);
    });
}

/// Next `len` samples from a looping source; silence if the source is empty
fn next_window(source: &[i16], position: &mut usize, len: usize) -> Vec<i16> {
    if source.is_empty() {
        return vec![0; len];
    }

    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let end = (*position + len - out.len()).min(source.len());
        out.extend_from_slice(&source[*position..end]);
        *position = if end == source.len() { 0 } else { end };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_window_wraps_around() {
        let source = [1, 2, 3, 4, 5];
        let mut position = 3;
        assert_eq!(next_window(&source, &mut position, 4), vec![4, 5, 1, 2]);
        assert_eq!(position, 2);
    }

    #[test]
    fn test_next_window_empty_source_is_silence() {
        let mut position = 0;
        assert_eq!(next_window(&[], &mut position, 3), vec![0, 0, 0]);
    }
}
