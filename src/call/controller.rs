use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::VoiceSession;
use super::credentials::{CallRecord, CredentialSource};
use super::state::{CallSnapshot, CallStatus, CallSummary, SessionCredential, SessionEvent};
use super::timer::ElapsedTimer;
use crate::error::{CallError, RecorderFault};
use crate::media::{DeviceManager, MediaStream};
use crate::providers::Provider;
use crate::recording::LocalRecorder;
use crate::vad::{VadConfig, VoiceActivityDetector};

/// What to call and with which model
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub provider: Provider,
    /// LLM selection key, see `providers`
    pub llm: String,
    pub vad: VadConfig,
}

type EndCallback = Box<dyn FnOnce(CallSummary) + Send>;

#[derive(Debug)]
struct CallState {
    status: CallStatus,
    call_id: Option<String>,
    error: Option<String>,
    started_at: Option<chrono::DateTime<Utc>>,
}

struct ControllerInner {
    id: String,
    config: ControllerConfig,
    devices: Arc<DeviceManager>,
    credentials: Arc<dyn CredentialSource>,
    session: Mutex<Box<dyn VoiceSession>>,
    recorder: Mutex<LocalRecorder>,
    vad: StdMutex<VoiceActivityDetector>,
    state: StdMutex<CallState>,
    status_tx: watch::Sender<CallStatus>,
    stream: StdMutex<Option<Arc<MediaStream>>>,
    muted: Arc<AtomicBool>,
    video_paused: AtomicBool,
    agent_speaking: AtomicBool,
    /// Set once by the first `end()`; every later call returns immediately
    ending: AtomicBool,
    /// The stream was acquired for this call and is released with it
    owns_stream: AtomicBool,
    timer: ElapsedTimer,
    shutdown: watch::Sender<bool>,
    pump: StdMutex<Option<JoinHandle<()>>>,
    follower: StdMutex<Option<JoinHandle<()>>>,
    on_end: StdMutex<Option<EndCallback>>,
}

/// Drives one interview call from credential fetch to teardown
///
/// One controller is one call: once it reaches `Ended` or `Error` a fresh
/// controller is needed. Cloning shares the same call.
#[derive(Clone)]
pub struct CallController {
    inner: Arc<ControllerInner>,
}

impl CallController {
    pub fn new(
        config: ControllerConfig,
        devices: Arc<DeviceManager>,
        credentials: Arc<dyn CredentialSource>,
        session: Box<dyn VoiceSession>,
        recorder: LocalRecorder,
    ) -> Self {
        let muted = Arc::new(AtomicBool::new(false));
        let vad = VoiceActivityDetector::new(Arc::clone(&muted), config.vad.clone());
        let (status_tx, _) = watch::channel(CallStatus::Idle);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(ControllerInner {
                id: uuid::Uuid::new_v4().to_string(),
                config,
                devices,
                credentials,
                session: Mutex::new(session),
                recorder: Mutex::new(recorder),
                vad: StdMutex::new(vad),
                state: StdMutex::new(CallState {
                    status: CallStatus::Idle,
                    call_id: None,
                    error: None,
                    started_at: None,
                }),
                status_tx,
                stream: StdMutex::new(None),
                muted,
                video_paused: AtomicBool::new(false),
                agent_speaking: AtomicBool::new(false),
                ending: AtomicBool::new(false),
                owns_stream: AtomicBool::new(false),
                timer: ElapsedTimer::new(),
                shutdown,
                pump: StdMutex::new(None),
                follower: StdMutex::new(None),
                on_end: StdMutex::new(None),
            }),
        }
    }

    /// Register the callback run once when the call ends, whatever ended it
    pub fn on_end<F>(self, callback: F) -> Self
    where
        F: FnOnce(CallSummary) + Send + 'static,
    {
        if let Ok(mut on_end) = self.inner.on_end.lock() {
            *on_end = Some(Box::new(callback));
        }
        self
    }

    /// Command interface for whoever presents the call
    pub fn handle(&self) -> CallHandle {
        CallHandle {
            controller: self.clone(),
        }
    }

    /// Local session id; names the recording when no call id was assigned
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn provider(&self) -> Provider {
        self.inner.config.provider
    }

    /// Start the call
    ///
    /// Never fails: any setup failure lands in `Error` with a message and the
    /// partial setup is torn down. Returns the status reached.
    pub async fn start(&self) -> CallStatus {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return CallStatus::Error;
            };
            if state.status != CallStatus::Idle {
                warn!("Call {} already started ({})", self.inner.id, state.status);
                return state.status;
            }
            state.status = CallStatus::Connecting;
            state.started_at = Some(Utc::now());
        }
        self.inner.status_tx.send_replace(CallStatus::Connecting);
        self.inner.timer.start();

        info!(
            "Starting {} call {} with llm {}",
            self.inner.config.provider, self.inner.id, self.inner.config.llm
        );

        if let Err(e) = self.connect().await {
            warn!("Call setup failed: {}", e);
            self.fail(e.to_string());
            self.end().await;
        }

        self.status()
    }

    async fn connect(&self) -> Result<(), CallError> {
        let stream = self.acquire_stream().await?;
        let credential = self.fetch_credential().await?;

        if self.is_ending() {
            debug!("Call ended while fetching credentials");
            return Ok(());
        }

        let events = {
            let mut session = self.inner.session.lock().await;
            let mut shutdown = self.inner.shutdown.subscribe();

            // end() waits on the session lock, so a start that never resolves must not hold it
            let started = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown) => None,
                result = session.start(&credential, &stream) => Some(result),
            };
            let Some(started) = started else {
                debug!("Call ended while the session was connecting");
                return Ok(());
            };
            let events = started?;

            // end() may have run before the session existed; its stop was a no-op
            if self.is_ending() {
                let _ = session.stop().await;
                return Ok(());
            }

            let call_id = credential
                .call_id()
                .map(str::to_string)
                .or_else(|| session.call_id());
            info!(
                "{} session connected (call id {})",
                session.name(),
                call_id.as_deref().unwrap_or("unknown")
            );
            self.activate(call_id);
            events
        };

        {
            let mut recorder = self.inner.recorder.lock().await;
            if !self.is_ending() {
                if let Err(e) = recorder.start(&stream) {
                    warn!("Call continues without a recording: {}", e);
                }
            }
        }

        if let Ok(mut vad) = self.inner.vad.lock() {
            if !self.is_ending() {
                vad.attach(&stream);
            }
        }

        self.spawn_event_pump(events);
        self.spawn_stream_follower();
        Ok(())
    }

    /// Reuse the manager's live stream, or acquire one for this call
    async fn acquire_stream(&self) -> Result<Arc<MediaStream>, CallError> {
        let stream = match self.inner.devices.current_stream().await {
            Some(stream) if stream.is_active() => {
                debug!("Using existing stream {}", stream.id());
                stream
            }
            _ => {
                let stream = self.inner.devices.enable().await?;
                self.inner.owns_stream.store(true, Ordering::SeqCst);
                stream
            }
        };

        if let Ok(mut current) = self.inner.stream.lock() {
            *current = Some(Arc::clone(&stream));
        }
        Ok(stream)
    }

    async fn fetch_credential(&self) -> Result<SessionCredential, CallError> {
        let provider = self.inner.config.provider;
        let llm = self.inner.config.llm.as_str();

        match provider {
            Provider::Retell => {
                let response = self.inner.credentials.create_call(llm).await?;
                match (response.call_id, response.access_token) {
                    (Some(call_id), Some(access_token)) if !access_token.is_empty() => {
                        Ok(SessionCredential::Retell {
                            call_id,
                            access_token,
                        })
                    }
                    _ => Err(missing_credential(provider, llm, response.error)),
                }
            }
            Provider::Eleven => {
                let response = self.inner.credentials.get_signed_voice_url(llm).await?;
                match response.signed_url {
                    Some(signed_url) if !signed_url.is_empty() => {
                        Ok(SessionCredential::ElevenLabs { signed_url })
                    }
                    _ => Err(missing_credential(provider, llm, response.error)),
                }
            }
        }
    }

    fn activate(&self, call_id: Option<String>) {
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        if state.status != CallStatus::Connecting || self.is_ending() {
            return;
        }
        state.status = CallStatus::Active;
        state.call_id = call_id;
        drop(state);
        self.inner.status_tx.send_replace(CallStatus::Active);
    }

    fn spawn_event_pump(&self, mut events: mpsc::Receiver<SessionEvent>) {
        let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            if *shutdown.borrow() {
                return;
            }

            loop {
                let event = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    event = events.recv() => event,
                };

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let controller = CallController { inner };

                match event {
                    Some(SessionEvent::AgentStartTalking) => {
                        controller.inner.agent_speaking.store(true, Ordering::SeqCst);
                        debug!("Agent started talking");
                    }
                    Some(SessionEvent::AgentStopTalking) => {
                        controller.inner.agent_speaking.store(false, Ordering::SeqCst);
                        debug!("Agent stopped talking");
                    }
                    Some(SessionEvent::CallEnded) => {
                        info!("Remote side ended call {}", controller.id());
                        controller.end().await;
                        break;
                    }
                    Some(SessionEvent::Error(message)) => {
                        error!("Remote session failed: {}", message);
                        controller.fail(CallError::RemoteSession(message).to_string());
                        controller.end().await;
                        break;
                    }
                    None => {
                        info!("{} session went away, ending call {}", controller.provider(), controller.id());
                        controller.end().await;
                        break;
                    }
                }
            }
        });

        if let Ok(mut pump) = self.inner.pump.lock() {
            *pump = Some(handle);
        }
    }

    /// Follow the device manager's stream so a device switch mid-call
    /// carries the uplink, recording, mute state and VAD along with it
    fn spawn_stream_follower(&self) {
        let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut streams = self.inner.devices.subscribe_stream();

        let handle = tokio::spawn(async move {
            loop {
                let latest = streams.borrow_and_update().clone();
                if let Some(stream) = latest {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    CallController { inner }.rebind(stream).await;
                }

                tokio::select! {
                    biased;
                    _ = shutdown_signalled(&mut shutdown) => break,
                    changed = streams.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Stream follower stopped");
        });

        if let Ok(mut follower) = self.inner.follower.lock() {
            *follower = Some(handle);
        }
    }

    /// Move every consumer of the call's stream onto `stream`
    async fn rebind(&self, stream: Arc<MediaStream>) {
        if self.is_ending() || !stream.is_active() || self.stream_id().as_deref() == Some(stream.id()) {
            return;
        }

        // Serialises with toggle_mute so the new tracks see the settled mute state
        let mut session = self.inner.session.lock().await;
        if self.is_ending() {
            return;
        }
        info!("Call {} moving to stream {}", self.inner.id, stream.id());

        {
            let mut recorder = self.inner.recorder.lock().await;
            if let Err(e) = recorder.switch_stream(&stream) {
                warn!("Recording stays on the previous stream: {}", e);
            }
        }

        if let Ok(mut current) = self.inner.stream.lock() {
            *current = Some(Arc::clone(&stream));
        }

        self.apply_mute(Some(stream.as_ref()), self.inner.muted.load(Ordering::SeqCst));
        let paused = self.inner.video_paused.load(Ordering::SeqCst);
        for track in stream.video_tracks() {
            track.set_enabled(!paused);
        }

        if let Err(e) = session.switch_stream(&stream).await {
            warn!("{} uplink stays on the previous stream: {}", session.name(), e);
        }
        drop(session);

        if let Ok(mut vad) = self.inner.vad.lock() {
            vad.attach(&stream);
        }
    }

    /// Record a failure unless the call is already being torn down
    fn fail(&self, message: String) {
        if self.is_ending() {
            debug!("Ignoring failure during teardown: {}", message);
            return;
        }
        if let Ok(mut state) = self.inner.state.lock() {
            state.status = CallStatus::Error;
            state.error = Some(message);
        }
        self.inner.status_tx.send_replace(CallStatus::Error);
    }

    /// Tear the call down
    ///
    /// Safe to call any number of times from anywhere; only the first call
    /// runs the teardown. Order: remote session, recording, timer, stream,
    /// then the end callback.
    pub async fn end(&self) {
        let inner = &self.inner;
        if inner.ending.swap(true, Ordering::SeqCst) {
            debug!("Call {} already ending", inner.id);
            return;
        }

        info!("Ending call {}", inner.id);
        inner.shutdown.send_replace(true);
        if let Some(follower) = inner.follower.lock().ok().and_then(|mut f| f.take()) {
            follower.abort();
        }

        {
            let mut session = inner.session.lock().await;
            if let Err(e) = session.stop().await {
                warn!("Failed to stop {} session: {}", session.name(), e);
            }
        }

        {
            let mut recorder = inner.recorder.lock().await;
            if let Err(e) = recorder.stop().await {
                warn!("Recording fault: {}", e);
            }
        }

        if let Ok(mut vad) = inner.vad.lock() {
            vad.detach();
        }
        inner.agent_speaking.store(false, Ordering::SeqCst);

        inner.timer.stop();

        if inner.owns_stream.load(Ordering::SeqCst) {
            inner.devices.disable().await;
        }
        if let Ok(mut stream) = inner.stream.lock() {
            *stream = None;
        }

        let summary = {
            let Ok(mut state) = inner.state.lock() else {
                return;
            };
            if state.status != CallStatus::Error {
                state.status = CallStatus::Ended;
            }
            CallSummary {
                session_id: inner.id.clone(),
                call_id: state.call_id.clone(),
                status: state.status,
                elapsed_secs: inner.timer.elapsed_secs(),
                error: state.error.clone(),
                started_at: state.started_at,
                ended_at: Utc::now(),
            }
        };
        inner.status_tx.send_replace(summary.status);

        info!(
            "Call {} {} after {}s",
            inner.id, summary.status, summary.elapsed_secs
        );

        let callback = inner.on_end.lock().ok().and_then(|mut cb| cb.take());
        if let Some(callback) = callback {
            callback(summary);
        }
    }

    /// Flip mute on the local audio tracks and the remote session together
    ///
    /// If the remote side refuses, the local change is reverted. Returns the
    /// new mute state.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        let mut session = self.inner.session.lock().await;
        let muted = !self.inner.muted.load(Ordering::SeqCst);
        let stream = self.stream().await;

        self.apply_mute(stream.as_deref(), muted);
        if let Err(e) = session.set_muted(muted).await {
            warn!("{} refused mute change, reverting: {}", session.name(), e);
            self.apply_mute(stream.as_deref(), !muted);
            return Err(e);
        }

        info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        Ok(muted)
    }

    fn apply_mute(&self, stream: Option<&MediaStream>, muted: bool) {
        self.inner.muted.store(muted, Ordering::SeqCst);
        if let Some(stream) = stream {
            for track in stream.audio_tracks() {
                track.set_enabled(!muted);
            }
        }
    }

    /// Pause or resume the camera; `None` when the call has no video
    pub async fn toggle_video(&self) -> Option<bool> {
        let stream = self.stream().await?;
        if !stream.has_video() {
            debug!("No video track to toggle");
            return None;
        }

        let paused = !self.inner.video_paused.load(Ordering::SeqCst);
        for track in stream.video_tracks() {
            track.set_enabled(!paused);
        }
        self.inner.video_paused.store(paused, Ordering::SeqCst);

        info!("Camera {}", if paused { "paused" } else { "resumed" });
        Some(paused)
    }

    async fn stream(&self) -> Option<Arc<MediaStream>> {
        let attached = self.inner.stream.lock().ok().and_then(|s| s.clone());
        match attached {
            Some(stream) => Some(stream),
            None => self.inner.devices.current_stream().await,
        }
    }

    /// Id of the stream the call is currently bound to
    pub fn stream_id(&self) -> Option<String> {
        self.inner
            .stream
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.id().to_string()))
    }

    fn is_ending(&self) -> bool {
        self.inner.ending.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> CallStatus {
        self.inner
            .state
            .lock()
            .map(|s| s.status)
            .unwrap_or(CallStatus::Error)
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CallStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn call_id(&self) -> Option<String> {
        self.inner.state.lock().ok().and_then(|s| s.call_id.clone())
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().ok().and_then(|s| s.error.clone())
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.inner.timer.elapsed_secs()
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    pub fn is_user_speaking(&self) -> bool {
        self.inner
            .vad
            .lock()
            .map(|vad| vad.is_speaking())
            .unwrap_or(false)
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.inner.agent_speaking.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let (status, call_id, error) = self
            .inner
            .state
            .lock()
            .map(|s| (s.status, s.call_id.clone(), s.error.clone()))
            .unwrap_or((CallStatus::Error, None, None));

        CallSnapshot {
            session_id: self.inner.id.clone(),
            status,
            call_id,
            error,
            elapsed_secs: self.elapsed_secs(),
            is_muted: self.is_muted(),
            is_video_paused: self.inner.video_paused.load(Ordering::SeqCst),
            is_user_speaking: self.is_user_speaking(),
            is_agent_speaking: self.is_agent_speaking(),
        }
    }

    /// Save the recording as `interview-<call id>.<ext>`
    ///
    /// `Ok(None)` when nothing was recorded.
    pub async fn download_recording(&self) -> Result<Option<PathBuf>, RecorderFault> {
        let name = self.call_id().unwrap_or_else(|| self.inner.id.clone());
        let recorder = self.inner.recorder.lock().await;
        recorder.download(&format!("interview-{}", name))
    }

    /// Post-call transcript and recording metadata; Retell only, never fatal
    pub async fn fetch_call_record(&self) -> Option<CallRecord> {
        if self.inner.config.provider != Provider::Retell {
            debug!("Call records are only available for Retell calls");
            return None;
        }
        let call_id = self.call_id()?;

        match self.inner.credentials.get_call_record(&call_id).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Could not fetch call record for {}: {}", call_id, e);
                None
            }
        }
    }
}

/// Resolves once shutdown has been signalled, including before the call
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn missing_credential(provider: Provider, llm: &str, reason: Option<String>) -> CallError {
    let message = match reason {
        Some(reason) if !reason.is_empty() => format!("Missing {} credential: {}", provider, reason),
        _ => format!("Missing {} credential. {} agent id not set.", provider, llm),
    };
    CallError::CredentialMissing(message)
}

/// The two things a call's presenter may ask of it
#[derive(Clone)]
pub struct CallHandle {
    controller: CallController,
}

impl CallHandle {
    pub async fn end(&self) {
        self.controller.end().await;
    }

    pub async fn download_recording(&self) -> Result<Option<PathBuf>, RecorderFault> {
        self.controller.download_recording().await
    }
}
