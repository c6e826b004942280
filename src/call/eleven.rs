//! ElevenLabs conversational agent session
//!
//! Protocol:
//! 1. Connect to the signed url handed out by the credential route
//! 2. Send `conversation_initiation_client_data`, wait for
//!    `conversation_initiation_metadata` (carries the conversation id)
//! 3. Stream `{"user_audio_chunk": <base64 pcm16 16kHz>}` while unmuted
//! 4. Receive `audio` (agent speech), `interruption`, `ping` (answered with
//!    `pong`); the socket closing means the conversation is over

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::backend::VoiceSession;
use super::socket::{self, OutboundMessage, WsSource};
use super::state::{SessionCredential, SessionEvent};
use crate::error::CallError;
use crate::media::MediaStream;

const PROVIDER: &str = "ElevenLabs";

/// How long to wait for the conversation metadata after connecting
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the agent-talking window is checked for expiry
const TALK_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Messages from the conversation socket that matter to the call
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Metadata {
        conversation_id: String,
        output_format: AudioFormat,
    },
    /// A chunk of agent speech and how long it plays for
    Audio { bytes: usize, duration: Duration },
    Interruption,
    Ping { event_id: u64 },
    Other(String),
}

/// Agent output encoding announced in the metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bytes_per_sample: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            bytes_per_sample: 2,
        }
    }
}

impl AudioFormat {
    /// Parse `pcm_16000`, `ulaw_8000` and friends
    pub fn parse(format: &str) -> Self {
        let mut parts = format.splitn(2, '_');
        let codec = parts.next().unwrap_or("");
        let rate = parts.next().and_then(|r| r.parse::<u32>().ok());

        let bytes_per_sample = match codec {
            "ulaw" | "alaw" => 1,
            _ => 2,
        };

        Self {
            sample_rate: rate.filter(|r| *r > 0).unwrap_or(16000),
            bytes_per_sample,
        }
    }

    pub fn duration_of(&self, bytes: usize) -> Duration {
        let bytes_per_sec = self.sample_rate as u64 * self.bytes_per_sample as u64;
        Duration::from_micros(bytes as u64 * 1_000_000 / bytes_per_sec.max(1))
    }
}

pub fn parse_server_message(text: &str, format: AudioFormat) -> Result<ServerMessage, CallError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| CallError::RemoteSession(format!("Malformed ElevenLabs message: {}", e)))?;

    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");

    let message = match kind {
        "conversation_initiation_metadata" => {
            let event = &value["conversation_initiation_metadata_event"];
            let conversation_id = event
                .get("conversation_id")
                .and_then(Value::as_str)
                .ok_or_else(|| CallError::RemoteSession("Metadata without conversation_id".into()))?
                .to_string();
            let output_format = event
                .get("agent_output_audio_format")
                .and_then(Value::as_str)
                .map(AudioFormat::parse)
                .unwrap_or_default();
            ServerMessage::Metadata {
                conversation_id,
                output_format,
            }
        }
        "audio" => {
            let encoded = value["audio_event"]
                .get("audio_base_64")
                .and_then(Value::as_str)
                .unwrap_or("");
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| CallError::RemoteSession(format!("Bad agent audio: {}", e)))?
                .len();
            ServerMessage::Audio {
                bytes,
                duration: format.duration_of(bytes),
            }
        }
        "interruption" => ServerMessage::Interruption,
        "ping" => ServerMessage::Ping {
            event_id: value["ping_event"]
                .get("event_id")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        },
        other => ServerMessage::Other(other.to_string()),
    };

    Ok(message)
}

fn initiation_message() -> String {
    serde_json::json!({ "type": "conversation_initiation_client_data" }).to_string()
}

fn pong_message(event_id: u64) -> String {
    serde_json::json!({ "type": "pong", "event_id": event_id }).to_string()
}

fn audio_chunk_message(pcm: Vec<u8>) -> OutboundMessage {
    let encoded = base64::engine::general_purpose::STANDARD.encode(pcm);
    OutboundMessage::Text(serde_json::json!({ "user_audio_chunk": encoded }).to_string())
}

/// One conversation with an ElevenLabs agent
pub struct ElevenLabsSession {
    muted: Arc<AtomicBool>,
    conversation_id: Option<String>,
    outbound: Option<mpsc::Sender<OutboundMessage>>,
    writer: Option<JoinHandle<()>>,
    uplink: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ElevenLabsSession {
    pub fn new() -> Self {
        Self {
            muted: Arc::new(AtomicBool::new(false)),
            conversation_id: None,
            outbound: None,
            writer: None,
            uplink: None,
            tasks: Vec::new(),
        }
    }

    async fn await_metadata(source: &mut WsSource) -> Result<(String, AudioFormat), CallError> {
        let handshake = async {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        match parse_server_message(text.as_str(), AudioFormat::default())? {
                            ServerMessage::Metadata {
                                conversation_id,
                                output_format,
                            } => return Ok((conversation_id, output_format)),
                            other => debug!("Ignoring {:?} before conversation metadata", other),
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        return Err(CallError::RemoteSession(format!(
                            "ElevenLabs closed the conversation during setup: {:?}",
                            frame
                        )));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(CallError::RemoteSession(format!("ElevenLabs socket error: {}", e)))
                    }
                }
            }
            Err(CallError::RemoteSession(
                "ElevenLabs socket ended before conversation metadata".into(),
            ))
        };

        tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
            .await
            .map_err(|_| CallError::RemoteSession("Timed out waiting for ElevenLabs conversation".into()))?
    }
}

impl Default for ElevenLabsSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VoiceSession for ElevenLabsSession {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn start(
        &mut self,
        credential: &SessionCredential,
        stream: &MediaStream,
    ) -> Result<mpsc::Receiver<SessionEvent>, CallError> {
        let SessionCredential::ElevenLabs { signed_url } = credential else {
            return Err(CallError::RemoteSession(
                "ElevenLabs session needs a signed url".into(),
            ));
        };

        if self.outbound.is_some() {
            return Err(CallError::RemoteSession("ElevenLabs session already started".into()));
        }

        let track = stream
            .primary_audio_track()
            .ok_or_else(|| CallError::RemoteSession("No live microphone track".into()))?;

        let (mut sink, mut source) = socket::connect(signed_url.as_str(), PROVIDER).await?;
        socket::send_text(&mut sink, initiation_message()).await?;

        let (conversation_id, format) = Self::await_metadata(&mut source).await?;
        info!(
            "ElevenLabs conversation {} started ({} Hz agent audio)",
            conversation_id, format.sample_rate
        );

        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(64);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(64);

        self.writer = Some(socket::spawn_writer(sink, outbound_rx, PROVIDER));
        self.uplink = Some(socket::spawn_uplink(
            track,
            Arc::clone(&self.muted),
            outbound_tx.clone(),
            PROVIDER,
            audio_chunk_message,
        ));
        self.tasks.push(tokio::spawn(inbound_loop(
            source,
            format,
            outbound_tx.clone(),
            event_tx,
        )));

        self.outbound = Some(outbound_tx);
        self.conversation_id = Some(conversation_id);

        Ok(event_rx)
    }

    async fn stop(&mut self) -> Result<(), CallError> {
        let Some(outbound) = self.outbound.take() else {
            return Ok(());
        };

        if let Some(uplink) = self.uplink.take() {
            uplink.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }

        socket::close_writer(outbound, self.writer.take(), PROVIDER).await;

        info!("ElevenLabs session ended");
        Ok(())
    }

    async fn set_muted(&mut self, muted: bool) -> Result<(), CallError> {
        if self.outbound.is_none() {
            return Err(CallError::RemoteSession("ElevenLabs session not connected".into()));
        }
        self.muted.store(muted, Ordering::SeqCst);
        debug!("ElevenLabs microphone {}", if muted { "muted" } else { "unmuted" });
        Ok(())
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    async fn switch_stream(&mut self, stream: &MediaStream) -> Result<(), CallError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| CallError::RemoteSession("ElevenLabs session not connected".into()))?;
        let track = stream
            .primary_audio_track()
            .ok_or_else(|| CallError::RemoteSession("No live microphone track".into()))?;

        if let Some(old) = self.uplink.take() {
            old.abort();
        }
        self.uplink = Some(socket::spawn_uplink(
            track,
            Arc::clone(&self.muted),
            outbound.clone(),
            PROVIDER,
            audio_chunk_message,
        ));

        info!("ElevenLabs uplink moved to {}", track.label());
        Ok(())
    }

    fn call_id(&self) -> Option<String> {
        self.conversation_id.clone()
    }
}

impl Drop for ElevenLabsSession {
    fn drop(&mut self) {
        if let Some(uplink) = self.uplink.take() {
            uplink.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Turn socket traffic into session events
///
/// Agent speech has no explicit end marker, so the agent counts as talking
/// until the queued audio would have finished playing.
async fn inbound_loop(
    mut source: WsSource,
    format: AudioFormat,
    outbound: mpsc::Sender<OutboundMessage>,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut talking_until: Option<Instant> = None;
    let mut ticker = tokio::time::interval(TALK_CHECK_INTERVAL);

    loop {
        let event = tokio::select! {
            msg = source.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => match parse_server_message(text.as_str(), format) {
                    Ok(ServerMessage::Audio { duration, .. }) => {
                        let now = Instant::now();
                        let base = talking_until.filter(|t| *t > now).unwrap_or(now);
                        let started = talking_until.is_none();
                        talking_until = Some(base + duration);
                        started.then_some(SessionEvent::AgentStartTalking)
                    }
                    Ok(ServerMessage::Interruption) => talking_until
                        .take()
                        .map(|_| SessionEvent::AgentStopTalking),
                    Ok(ServerMessage::Ping { event_id }) => {
                        let _ = outbound.try_send(OutboundMessage::Text(pong_message(event_id)));
                        None
                    }
                    Ok(ServerMessage::Metadata { .. }) | Ok(ServerMessage::Other(_)) => None,
                    Err(e) => {
                        warn!("{}", e);
                        None
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    info!("ElevenLabs conversation closed: {:?}", frame);
                    let _ = events.send(SessionEvent::CallEnded).await;
                    break;
                }
                Some(Ok(_)) => None,
                Some(Err(e)) => {
                    let _ = events
                        .send(SessionEvent::Error(format!("ElevenLabs socket error: {}", e)))
                        .await;
                    break;
                }
                None => {
                    let _ = events.send(SessionEvent::CallEnded).await;
                    break;
                }
            },
            _ = ticker.tick() => match talking_until {
                Some(until) if Instant::now() >= until => {
                    talking_until = None;
                    Some(SessionEvent::AgentStopTalking)
                }
                _ => None,
            },
        };

        if let Some(event) = event {
            if events.send(event).await.is_err() {
                break;
            }
        }
    }

    debug!("ElevenLabs inbound loop terminated");
}
