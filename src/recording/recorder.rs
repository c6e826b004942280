use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::encoder::{
    extension_for, select_mime_type, EncoderFactory, EncoderOptions, MediaEncoder,
    DEFAULT_BITS_PER_SECOND, MIME_CANDIDATES,
};
use crate::error::RecorderFault;
use crate::media::{AudioFrame, MediaStream};

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Encodings to try, most preferred first
    pub mime_candidates: Vec<String>,
    /// Target bitrate handed to the encoder
    pub bits_per_second: u32,
    /// How often `stop` checks whether the final chunk has flushed
    pub flush_poll: Duration,
    /// Where `download` writes files
    pub download_dir: PathBuf,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mime_candidates: MIME_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            bits_per_second: DEFAULT_BITS_PER_SECOND,
            flush_poll: Duration::from_millis(100),
            download_dir: PathBuf::from("recordings"),
        }
    }
}

/// A finished recording held in memory
#[derive(Debug, Clone)]
pub struct RecordingFile {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl RecordingFile {
    pub fn extension(&self) -> &'static str {
        extension_for(&self.mime_type)
    }
}

/// Captures the live stream into in-memory chunks
pub struct LocalRecorder {
    factory: Arc<dyn EncoderFactory>,
    config: RecorderConfig,
    buffer: Arc<Mutex<Vec<Vec<u8>>>>,
    recording: Arc<AtomicBool>,
    mime_type: Option<String>,
    stop_tx: Option<oneshot::Sender<()>>,
    source_tx: Option<mpsc::Sender<broadcast::Receiver<AudioFrame>>>,
    task: Option<JoinHandle<()>>,
}

impl LocalRecorder {
    pub fn new(factory: Arc<dyn EncoderFactory>, config: RecorderConfig) -> Self {
        Self {
            factory,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            recording: Arc::new(AtomicBool::new(false)),
            mime_type: None,
            stop_tx: None,
            source_tx: None,
            task: None,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Begin capturing the stream's audio
    ///
    /// Clears any previous recording. Does nothing (and reports
    /// `NoActiveStream`) when the stream has no live audio track.
    pub fn start(&mut self, stream: &MediaStream) -> Result<(), RecorderFault> {
        if self.stop_tx.is_some() {
            warn!("Recording already started");
            return Ok(());
        }

        let Some(track) = stream.primary_audio_track() else {
            warn!("Cannot record stream {}: no live audio track", stream.id());
            return Err(RecorderFault::NoActiveStream);
        };

        self.clear();

        let mime_type = select_mime_type(self.factory.as_ref(), &self.config.mime_candidates)
            .ok_or_else(|| RecorderFault::UnsupportedEncoding(self.config.mime_candidates.clone()))?
            .to_string();

        let encoder = self.factory.create(&EncoderOptions {
            mime_type: mime_type.clone(),
            bits_per_second: self.config.bits_per_second,
        })?;

        let frames = track.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (source_tx, source_rx) = mpsc::channel(4);
        self.recording.store(true, Ordering::SeqCst);

        let buffer = Arc::clone(&self.buffer);
        let recording = Arc::clone(&self.recording);
        self.task = Some(tokio::spawn(capture(
            frames, source_rx, encoder, stop_rx, buffer, recording,
        )));
        self.stop_tx = Some(stop_tx);
        self.source_tx = Some(source_tx);

        info!(
            "Recording started: {} at {} bps",
            mime_type, self.config.bits_per_second
        );
        self.mime_type = Some(mime_type);

        Ok(())
    }

    /// Keep recording from another stream's audio, in the same file
    ///
    /// Used when the capture device changes mid-call. No-op while idle.
    pub fn switch_stream(&mut self, stream: &MediaStream) -> Result<(), RecorderFault> {
        let Some(source_tx) = &self.source_tx else {
            return Ok(());
        };
        let track = stream
            .primary_audio_track()
            .ok_or(RecorderFault::NoActiveStream)?;

        source_tx
            .try_send(track.subscribe())
            .map_err(|e| RecorderFault::Encoder(format!("capture task unavailable: {}", e)))?;
        info!("Recording moved to track {} ({})", track.id(), track.device_id());
        Ok(())
    }

    /// Ask the encoder to finalize and wait for its data to land
    ///
    /// Polls rather than sleeping a fixed time: returns as soon as a chunk
    /// is buffered, or with `NoData` once capture has ended without one.
    pub async fn stop(&mut self) -> Result<(), RecorderFault> {
        let Some(stop_tx) = self.stop_tx.take() else {
            debug!("Recorder not active, nothing to stop");
            return Ok(());
        };
        self.source_tx = None;

        let _ = stop_tx.send(());
        info!("Recording stopped, waiting for data");

        loop {
            if self.chunk_count() > 0 {
                self.task = None;
                return Ok(());
            }

            let finished = self.task.as_ref().map_or(true, |t| t.is_finished());
            if finished {
                self.task = None;
                // The final chunk may have landed between the two checks
                if self.chunk_count() > 0 {
                    return Ok(());
                }
                warn!("Recorder finished without producing data");
                return Err(RecorderFault::NoData);
            }

            tokio::time::sleep(self.config.flush_poll).await;
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn chunk_count(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Encoding chosen by the last `start`
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Concatenate the buffered chunks into one file
    ///
    /// Returns `None` (and logs) when nothing was captured.
    pub fn materialize(&self) -> Option<RecordingFile> {
        let bytes: Vec<u8> = match self.buffer.lock() {
            Ok(buffer) => buffer.concat(),
            Err(_) => {
                error!("Recording buffer poisoned");
                return None;
            }
        };

        if bytes.is_empty() {
            warn!("No recording data available; was the recording stopped?");
            return None;
        }

        let mime_type = self
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());

        Some(RecordingFile { mime_type, bytes })
    }

    /// Write the recording to `<download_dir>/<file_stem>.<ext>`
    pub fn download(&self, file_stem: &str) -> Result<Option<PathBuf>, RecorderFault> {
        let Some(file) = self.materialize() else {
            return Ok(None);
        };

        std::fs::create_dir_all(&self.config.download_dir)?;
        let path = self
            .config
            .download_dir
            .join(format!("{}.{}", file_stem, file.extension()));
        std::fs::write(&path, &file.bytes)?;

        info!(
            "Recording saved: {} ({} bytes, {})",
            path.display(),
            file.bytes.len(),
            file.mime_type
        );

        Ok(Some(path))
    }

    fn clear(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }
}

/// Feed frames to the encoder until told to stop, then flush its output
async fn capture(
    mut frames: broadcast::Receiver<AudioFrame>,
    mut sources: mpsc::Receiver<broadcast::Receiver<AudioFrame>>,
    mut encoder: Box<dyn MediaEncoder>,
    mut stop_rx: oneshot::Receiver<()>,
    buffer: Arc<Mutex<Vec<Vec<u8>>>>,
    recording: Arc<AtomicBool>,
) {
    let mut frame_count = 0u64;

    loop {
        // A pending source switch wins over the old track closing; frames
        // already delivered are encoded before a stop is honoured.
        tokio::select! {
            biased;

            Some(next) = sources.recv() => {
                debug!("Recorder switched capture source");
                frames = next;
            }
            received = frames.recv() => match received {
                Ok(frame) => {
                    if let Err(e) = encoder.push(&frame) {
                        error!("Recording failed: {}", e);
                        break;
                    }
                    frame_count += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Recorder fell behind, {} frames dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut stop_rx => break,
        }
    }

    recording.store(false, Ordering::SeqCst);

    let mime_type = encoder.mime_type().to_string();
    match encoder.finish() {
        Ok(bytes) if !bytes.is_empty() => {
            info!(
                "Saving recording chunk: {} bytes of {} from {} frames",
                bytes.len(),
                mime_type,
                frame_count
            );
            if let Ok(mut buffer) = buffer.lock() {
                buffer.push(bytes);
            }
        }
        Ok(_) => warn!("Encoder produced no data ({} frames)", frame_count),
        Err(e) => error!("Failed to finalize recording: {}", e),
    }
}
