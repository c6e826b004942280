//! Device and stream ownership
//!
//! `DeviceManager` is the single owner of the live capture stream. Everything
//! else borrows it through `current_stream()` and must not stop its tracks.
//! Acquiring a new stream always releases the old one first, so device locks
//! never leak across device switches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::debounce::Debouncer;
use super::device::{MediaConstraints, MediaDevice, MediaKind};
use super::platform::MediaPlatform;
use super::stream::MediaStream;
use crate::error::MediaError;

/// Device manager settings
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Request a camera track alongside the microphone
    pub video: bool,
    /// How often to verify the live stream still matches the selection
    pub permission_check_interval: Duration,
    /// Quiet period before reacting to device topology changes
    pub device_change_debounce: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            video: false,
            permission_check_interval: Duration::from_secs(1),
            device_change_debounce: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    stream: Option<Arc<MediaStream>>,
    enabled: bool,
    ready: bool,
    audio_devices: Vec<MediaDevice>,
    video_devices: Vec<MediaDevice>,
    selected_audio: Option<String>,
    selected_video: Option<String>,
}

struct Shared {
    platform: Arc<dyn MediaPlatform>,
    config: DeviceConfig,
    state: Mutex<ManagerState>,
    /// Current stream, republished on every acquisition and release
    stream_tx: watch::Sender<Option<Arc<MediaStream>>>,
    audio_allowed: AtomicBool,
    video_allowed: AtomicBool,
}

impl Shared {
    async fn refresh_devices(&self) -> Result<(), MediaError> {
        let devices = self.platform.enumerate_devices().await?;
        let (audio, video): (Vec<MediaDevice>, Vec<MediaDevice>) =
            devices.into_iter().partition(|d| d.kind == MediaKind::Audio);

        let mut state = self.state.lock().await;
        state.audio_devices = audio;
        state.video_devices = video;

        if state.selected_audio.is_none() {
            state.selected_audio = state.audio_devices.first().map(|d| d.id.clone());
        }
        if state.selected_video.is_none() {
            state.selected_video = state.video_devices.first().map(|d| d.id.clone());
        }

        let state = &mut *state;
        for (kind, selected, present) in [
            (MediaKind::Audio, &mut state.selected_audio, &state.audio_devices),
            (MediaKind::Video, &mut state.selected_video, &state.video_devices),
        ] {
            let missing = selected
                .as_ref()
                .is_some_and(|id| !present.iter().any(|d| &d.id == id));
            if missing {
                let fallback = present.first().map(|d| d.id.clone());
                warn!(
                    "Selected {} device {} is no longer present, falling back to {}",
                    kind,
                    selected.as_deref().unwrap_or_default(),
                    fallback.as_deref().unwrap_or("none")
                );
                *selected = fallback;
            }
        }

        info!(
            "Devices refreshed: {} audio, {} video",
            state.audio_devices.len(),
            state.video_devices.len()
        );

        Ok(())
    }

    async fn check_permissions(&self) -> (bool, bool) {
        let (audio, video) = {
            let state = self.state.lock().await;
            match &state.stream {
                Some(stream) => (
                    has_matching_track(stream, MediaKind::Audio, state.selected_audio.as_deref()),
                    has_matching_track(stream, MediaKind::Video, state.selected_video.as_deref()),
                ),
                None => (false, false),
            }
        };

        self.set_allowed(audio, video);
        (audio, video)
    }

    fn set_allowed(&self, audio: bool, video: bool) {
        let was_audio = self.audio_allowed.swap(audio, Ordering::SeqCst);
        let was_video = self.video_allowed.swap(video, Ordering::SeqCst);

        if was_audio != audio {
            debug!("Audio allowed: {}", audio);
        }
        if was_video != video {
            debug!("Video allowed: {}", video);
        }
    }
}

/// A live track of `kind` from the selected device (any device if none selected)
fn has_matching_track(stream: &MediaStream, kind: MediaKind, selected: Option<&str>) -> bool {
    stream
        .tracks()
        .iter()
        .filter(|t| t.kind() == kind && t.is_live())
        .any(|t| selected.map_or(true, |id| t.device_id() == id))
}

/// Owns device enumeration, selection and the current capture stream
pub struct DeviceManager {
    shared: Arc<Shared>,
    permission_task: StdMutex<Option<JoinHandle<()>>>,
    device_watch_task: StdMutex<Option<JoinHandle<()>>>,
}

impl DeviceManager {
    pub fn new(platform: Arc<dyn MediaPlatform>, config: DeviceConfig) -> Self {
        info!(
            "Device manager initialized on {} platform (video: {})",
            platform.name(),
            config.video
        );

        Self {
            shared: Arc::new(Shared {
                platform,
                config,
                state: Mutex::new(ManagerState::default()),
                stream_tx: watch::channel(None).0,
                audio_allowed: AtomicBool::new(false),
                video_allowed: AtomicBool::new(false),
            }),
            permission_task: StdMutex::new(None),
            device_watch_task: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    /// Acquire a stream for the current device selection
    pub async fn enable(&self) -> Result<Arc<MediaStream>, MediaError> {
        let constraints = {
            let state = self.shared.state.lock().await;
            MediaConstraints {
                audio_device_id: state.selected_audio.clone(),
                video: self.shared.config.video,
                video_device_id: state.selected_video.clone(),
            }
        };
        self.enable_with(constraints).await
    }

    /// Acquire a stream for explicit constraints
    ///
    /// Any current stream is fully released before the request is made.
    pub async fn enable_with(&self, constraints: MediaConstraints) -> Result<Arc<MediaStream>, MediaError> {
        info!("Enabling streams...");

        self.stop_permission_watch();

        let mut state = self.shared.state.lock().await;
        if let Some(previous) = state.stream.take() {
            info!("Releasing previous stream {}", previous.id());
            previous.stop_all();
        }
        state.enabled = true;
        state.ready = false;

        match self.shared.platform.get_user_media(&constraints).await {
            Ok(stream) => {
                let stream = Arc::new(stream);
                state.stream = Some(Arc::clone(&stream));
                state.ready = true;
                self.shared.stream_tx.send_replace(Some(Arc::clone(&stream)));
                drop(state);

                self.shared.check_permissions().await;
                self.start_permission_watch();

                info!(
                    "Streams enabled: {} ({} tracks)",
                    stream.id(),
                    stream.tracks().len()
                );
                Ok(stream)
            }
            Err(e) => {
                warn!("Failed to enable media streams: {}", e);
                state.ready = false;
                state.enabled = false;
                self.shared.stream_tx.send_replace(None);
                drop(state);

                self.shared.set_allowed(false, false);
                Err(e)
            }
        }
    }

    /// Stop every track and forget the stream. No-op without a stream.
    pub async fn disable(&self) {
        self.stop_permission_watch();

        let mut state = self.shared.state.lock().await;
        match state.stream.take() {
            Some(stream) => {
                info!("Disabling media stream {}", stream.id());
                stream.stop_all();
            }
            None => debug!("No active media stream, nothing to release"),
        }
        state.ready = false;
        state.enabled = false;
        self.shared.stream_tx.send_replace(None);
        drop(state);

        self.shared.set_allowed(false, false);
    }

    pub async fn current_stream(&self) -> Option<Arc<MediaStream>> {
        self.shared.state.lock().await.stream.clone()
    }

    /// Follow stream replacement, e.g. a device switch mid-call
    ///
    /// Holders of the old stream must move to the new one; its tracks are
    /// already stopped by the time the change is published.
    pub fn subscribe_stream(&self) -> watch::Receiver<Option<Arc<MediaStream>>> {
        self.shared.stream_tx.subscribe()
    }

    pub async fn is_ready(&self) -> bool {
        self.shared.state.lock().await.ready
    }

    pub async fn is_enabled(&self) -> bool {
        self.shared.state.lock().await.enabled
    }

    /// Re-enumerate and return the devices of one kind
    pub async fn list_devices(&self, kind: MediaKind) -> Result<Vec<MediaDevice>, MediaError> {
        self.shared.refresh_devices().await?;
        Ok(self.devices(kind).await)
    }

    /// Re-enumerate both kinds and default unset selections to the first device
    pub async fn refresh_devices(&self) -> Result<(), MediaError> {
        self.shared.refresh_devices().await
    }

    /// Devices from the last enumeration
    pub async fn devices(&self, kind: MediaKind) -> Vec<MediaDevice> {
        let state = self.shared.state.lock().await;
        match kind {
            MediaKind::Audio => state.audio_devices.clone(),
            MediaKind::Video => state.video_devices.clone(),
        }
    }

    pub async fn selected_audio_device(&self) -> Option<String> {
        self.shared.state.lock().await.selected_audio.clone()
    }

    pub async fn selected_video_device(&self) -> Option<String> {
        self.shared.state.lock().await.selected_video.clone()
    }

    /// Change the microphone; re-acquires when a stream is live
    ///
    /// Returns whether the selection changed.
    pub async fn select_audio_device(&self, id: impl Into<String>) -> Result<bool, MediaError> {
        self.select(MediaKind::Audio, id.into()).await
    }

    /// Change the camera; re-acquires when a stream is live
    pub async fn select_video_device(&self, id: impl Into<String>) -> Result<bool, MediaError> {
        self.select(MediaKind::Video, id.into()).await
    }

    async fn select(&self, kind: MediaKind, id: String) -> Result<bool, MediaError> {
        let reacquire = {
            let mut state = self.shared.state.lock().await;
            let selected = match kind {
                MediaKind::Audio => &mut state.selected_audio,
                MediaKind::Video => &mut state.selected_video,
            };
            if selected.as_deref() == Some(id.as_str()) {
                return Ok(false);
            }
            info!("Selected {} device: {}", kind, id);
            *selected = Some(id);
            state.ready
        };

        if reacquire {
            info!("Device selection changed, re-enabling streams...");
            self.enable().await?;
        }
        Ok(true)
    }

    /// Recompute the allowed flags against the live stream
    pub async fn check_permissions(&self) -> (bool, bool) {
        self.shared.check_permissions().await
    }

    pub fn is_audio_allowed(&self) -> bool {
        self.shared.audio_allowed.load(Ordering::SeqCst)
    }

    pub fn is_video_allowed(&self) -> bool {
        self.shared.video_allowed.load(Ordering::SeqCst)
    }

    /// React to device hot-plugging by re-enumerating after a quiet period
    pub fn watch_device_changes(&self) {
        let Ok(mut slot) = self.device_watch_task.lock() else {
            return;
        };
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let mut changes = self.shared.platform.device_changes();
        let weak = Arc::downgrade(&self.shared);
        let debouncer = Debouncer::new(self.shared.config.device_change_debounce);

        *slot = Some(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        let weak = Weak::clone(&weak);
                        debouncer.schedule(async move {
                            let Some(shared) = weak.upgrade() else {
                                return;
                            };
                            info!("Device change detected, reinitializing devices...");
                            if let Err(e) = shared.refresh_devices().await {
                                warn!("Failed to refresh devices: {}", e);
                            }
                        });
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Device change watcher stopped");
        }));
    }

    /// Cancel background work and release the stream
    pub async fn shutdown(&self) {
        if let Ok(mut slot) = self.device_watch_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.disable().await;
    }

    fn start_permission_watch(&self) {
        let weak = Arc::downgrade(&self.shared);
        let period = self.shared.config.permission_check_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.check_permissions().await;
            }
        });

        if let Ok(mut slot) = self.permission_task.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    fn stop_permission_watch(&self) {
        if let Ok(mut slot) = self.permission_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        for slot in [&self.permission_task, &self.device_watch_task] {
            if let Ok(mut slot) = slot.lock() {
                if let Some(handle) = slot.take() {
                    handle.abort();
                }
            }
        }

        if let Ok(state) = self.shared.state.try_lock() {
            if let Some(stream) = &state.stream {
                stream.stop_all();
            }
        }
    }
}
