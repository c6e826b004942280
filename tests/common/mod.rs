// Shared test doubles for the platform, provider session and credential seams

#![allow(dead_code)]

use async_trait::async_trait;
use interview_call::call::{
    CallRecord, CreateCallResponse, CredentialSource, SessionCredential, SessionEvent,
    SignedUrlResponse, VoiceSession,
};
use interview_call::error::{CallError, MediaError};
use interview_call::media::{
    AudioFrame, MediaConstraints, MediaDevice, MediaKind, MediaPlatform, MediaStream, MediaTrack,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// Platform
// ============================================================================

/// Platform whose tracks only carry frames the test pushes
pub struct MockPlatform {
    devices: Mutex<Vec<MediaDevice>>,
    pub acquisitions: AtomicUsize,
    pub enumerations: AtomicUsize,
    pub streams: Mutex<Vec<Vec<Arc<MediaTrack>>>>,
    pub fail_with: Mutex<Option<MediaError>>,
    changes: broadcast::Sender<()>,
}

impl MockPlatform {
    pub fn new(devices: Vec<MediaDevice>) -> Arc<Self> {
        let (changes, _) = broadcast::channel(16);
        Arc::new(Self {
            devices: Mutex::new(devices),
            acquisitions: AtomicUsize::new(0),
            enumerations: AtomicUsize::new(0),
            streams: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
            changes,
        })
    }

    /// One microphone and one camera
    pub fn standard() -> Arc<Self> {
        Self::new(vec![
            MediaDevice::new("mic-1", MediaKind::Audio, "Built-in Microphone"),
            MediaDevice::new("mic-2", MediaKind::Audio, "USB Headset"),
            MediaDevice::new("cam-1", MediaKind::Video, "FaceTime Camera"),
        ])
    }

    /// Unplug a device; the next enumeration no longer lists it
    pub fn remove_device(&self, id: &str) {
        self.devices.lock().unwrap().retain(|d| d.id != id);
    }

    pub fn fire_change(&self) {
        let _ = self.changes.send(());
    }

    pub fn fail_next(&self, error: MediaError) {
        *self.fail_with.lock().unwrap() = Some(error);
    }

    pub fn acquired_tracks(&self, index: usize) -> Vec<Arc<MediaTrack>> {
        self.streams.lock().unwrap()[index].clone()
    }

    /// Audio track of the most recent acquisition
    pub fn latest_audio_track(&self) -> Arc<MediaTrack> {
        let streams = self.streams.lock().unwrap();
        streams
            .last()
            .and_then(|tracks| tracks.iter().find(|t| t.kind() == MediaKind::Audio).cloned())
            .expect("no stream acquired")
    }
}

#[async_trait]
impl MediaPlatform for MockPlatform {
    async fn enumerate_devices(&self) -> Result<Vec<MediaDevice>, MediaError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        if let Some(error) = self.fail_with.lock().unwrap().take() {
            return Err(error);
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let devices = self.devices.lock().unwrap().clone();
        let pick = |kind: MediaKind, id: Option<&str>| {
            devices
                .iter()
                .find(|d| d.kind == kind && id.map_or(true, |id| d.id == id))
                .cloned()
                .ok_or_else(|| MediaError::DeviceUnavailable(format!("no {} device", kind)))
        };

        let audio = pick(MediaKind::Audio, constraints.audio_device_id.as_deref())?;
        let mut tracks = vec![MediaTrack::new(MediaKind::Audio, &audio.id, &audio.label)];
        if constraints.video {
            let video = pick(MediaKind::Video, constraints.video_device_id.as_deref())?;
            tracks.push(MediaTrack::new(MediaKind::Video, &video.id, &video.label));
        }

        self.streams.lock().unwrap().push(tracks.clone());
        Ok(MediaStream::new(tracks))
    }

    fn device_changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Provider session
// ============================================================================

/// What the controller did to the session
#[derive(Default)]
pub struct SessionSpy {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub mute_calls: Mutex<Vec<bool>>,
    pub muted: AtomicBool,
    pub refuse_mute: AtomicBool,
    pub fail_start: Mutex<Option<String>>,
    /// `start` never resolves, like a provider that accepts the socket and goes quiet
    pub hang_start: AtomicBool,
    /// Ids of the streams the uplink was moved to
    pub switched_to: Mutex<Vec<String>>,
    pub credential: Mutex<Option<SessionCredential>>,
    pub events: Mutex<Option<mpsc::Sender<SessionEvent>>>,
}

impl SessionSpy {
    /// Push an event as if the provider sent it
    pub async fn emit(&self, event: SessionEvent) {
        let sender = self.events.lock().unwrap().clone().expect("session not started");
        sender.send(event).await.expect("event pump gone");
    }

    /// Drop the event sender without a terminal event, as a vanished connection would
    pub fn drop_events(&self) {
        self.events.lock().unwrap().take();
    }
}

pub struct MockSession {
    pub spy: Arc<SessionSpy>,
}

impl MockSession {
    pub fn new() -> (Self, Arc<SessionSpy>) {
        let spy = Arc::new(SessionSpy::default());
        (
            Self {
                spy: Arc::clone(&spy),
            },
            spy,
        )
    }
}

#[async_trait]
impl VoiceSession for MockSession {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn start(
        &mut self,
        credential: &SessionCredential,
        _stream: &MediaStream,
    ) -> Result<mpsc::Receiver<SessionEvent>, CallError> {
        self.spy.starts.fetch_add(1, Ordering::SeqCst);
        if self.spy.hang_start.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(message) = self.spy.fail_start.lock().unwrap().take() {
            return Err(CallError::RemoteSession(message));
        }

        *self.spy.credential.lock().unwrap() = Some(credential.clone());
        let (tx, rx) = mpsc::channel(16);
        *self.spy.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CallError> {
        self.spy.stops.fetch_add(1, Ordering::SeqCst);
        self.spy.events.lock().unwrap().take();
        Ok(())
    }

    async fn set_muted(&mut self, muted: bool) -> Result<(), CallError> {
        self.spy.mute_calls.lock().unwrap().push(muted);
        if self.spy.refuse_mute.load(Ordering::SeqCst) {
            return Err(CallError::RemoteSession("mute rejected".into()));
        }
        self.spy.muted.store(muted, Ordering::SeqCst);
        Ok(())
    }

    fn is_muted(&self) -> bool {
        self.spy.muted.load(Ordering::SeqCst)
    }

    async fn switch_stream(&mut self, stream: &MediaStream) -> Result<(), CallError> {
        self.spy.switched_to.lock().unwrap().push(stream.id().to_string());
        Ok(())
    }
}

// ============================================================================
// Credentials
// ============================================================================

pub struct MockCredentials {
    pub create: Mutex<CreateCallResponse>,
    pub signed: Mutex<SignedUrlResponse>,
    pub record: Mutex<Option<CallRecord>>,
    pub create_calls: AtomicUsize,
    pub record_calls: AtomicUsize,
}

impl MockCredentials {
    pub fn granting() -> Arc<Self> {
        Arc::new(Self {
            create: Mutex::new(CreateCallResponse {
                call_id: Some("call_123".into()),
                access_token: Some("token-abc".into()),
                error: None,
            }),
            signed: Mutex::new(SignedUrlResponse {
                signed_url: Some("wss://example.invalid/convai?token=x".into()),
                error: None,
            }),
            record: Mutex::new(None),
            create_calls: AtomicUsize::new(0),
            record_calls: AtomicUsize::new(0),
        })
    }

    /// 2xx answers without any credential
    pub fn empty() -> Arc<Self> {
        let credentials = Self::granting();
        *credentials.create.lock().unwrap() = CreateCallResponse {
            call_id: Some("call_123".into()),
            access_token: None,
            error: None,
        };
        *credentials.signed.lock().unwrap() = SignedUrlResponse::default();
        credentials
    }
}

#[async_trait]
impl CredentialSource for MockCredentials {
    async fn create_call(&self, _llm: &str) -> Result<CreateCallResponse, CallError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.create.lock().unwrap().clone())
    }

    async fn get_signed_voice_url(&self, _llm: &str) -> Result<SignedUrlResponse, CallError> {
        Ok(self.signed.lock().unwrap().clone())
    }

    async fn get_call_record(&self, call_id: &str) -> Result<CallRecord, CallError> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        self.record
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CallError::Transport(format!("no record for {}", call_id)))
    }
}

// ============================================================================
// Audio
// ============================================================================

/// Deterministic white noise, loud enough to read as speech
pub fn noise_frame(len: usize, sample_rate: u32, seed: &mut u32) -> AudioFrame {
    let samples = (0..len)
        .map(|_| {
            *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            ((*seed >> 16) as i16) / 2
        })
        .collect();

    AudioFrame {
        samples,
        sample_rate,
        channels: 1,
        timestamp_ms: 0,
    }
}

pub fn tone_frame(len: usize, sample_rate: u32, freq: f32, amplitude: i16) -> AudioFrame {
    let samples = (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * freq * t).sin() * amplitude as f32) as i16
        })
        .collect();

    AudioFrame {
        samples,
        sample_rate,
        channels: 1,
        timestamp_ms: 0,
    }
}
