//! Retell web call session over the relay socket
//!
//! The relay joins the provider's call room on our behalf. It authenticates
//! with the call's access token, forwards the web client events as JSON text
//! frames (`{"event": "agent_start_talking"}` and so on) and accepts binary
//! pcm16 microphone frames plus `{"event": "mute", "muted": bool}`.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, warn};

use super::backend::VoiceSession;
use super::socket::{self, OutboundMessage, WsSource};
use super::state::{SessionCredential, SessionEvent};
use crate::error::CallError;
use crate::media::MediaStream;

const PROVIDER: &str = "Retell";

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
struct RelayEvent {
    event: String,
    #[serde(default)]
    message: Option<String>,
}

/// Map a relay text frame to a session event; `None` for frames with no call effect
pub fn parse_relay_event(text: &str) -> Result<Option<SessionEvent>, CallError> {
    let relay: RelayEvent = serde_json::from_str(text)
        .map_err(|e| CallError::RemoteSession(format!("Malformed relay event: {}", e)))?;

    let event = match relay.event.as_str() {
        "agent_start_talking" => Some(SessionEvent::AgentStartTalking),
        "agent_stop_talking" => Some(SessionEvent::AgentStopTalking),
        "call_ended" => Some(SessionEvent::CallEnded),
        "error" => Some(SessionEvent::Error(
            relay
                .message
                .unwrap_or_else(|| "Retell reported an error".to_string()),
        )),
        _ => None,
    };

    Ok(event)
}

fn mute_message(muted: bool) -> String {
    serde_json::json!({ "event": "mute", "muted": muted }).to_string()
}

pub struct RetellSession {
    relay_url: String,
    muted: Arc<AtomicBool>,
    call_id: Option<String>,
    outbound: Option<mpsc::Sender<OutboundMessage>>,
    writer: Option<JoinHandle<()>>,
    uplink: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RetellSession {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            muted: Arc::new(AtomicBool::new(false)),
            call_id: None,
            outbound: None,
            writer: None,
            uplink: None,
            tasks: Vec::new(),
        }
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Wait for `call_started`; anything else before it is logged and skipped
    async fn await_started(source: &mut WsSource) -> Result<(), CallError> {
        let join = async {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        let relay: RelayEvent = serde_json::from_str(text.as_str()).map_err(|e| {
                            CallError::RemoteSession(format!("Malformed relay event: {}", e))
                        })?;
                        match relay.event.as_str() {
                            "call_started" => return Ok(()),
                            "error" | "call_ended" => {
                                return Err(CallError::RemoteSession(
                                    relay
                                        .message
                                        .unwrap_or_else(|| format!("Retell {} before start", relay.event)),
                                ));
                            }
                            other => debug!("Ignoring relay event {} before call start", other),
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        return Err(CallError::RemoteSession(format!(
                            "Retell relay closed during setup: {:?}",
                            frame
                        )));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(CallError::RemoteSession(format!("Retell relay error: {}", e)))
                    }
                }
            }
            Err(CallError::RemoteSession("Retell relay ended before call start".into()))
        };

        tokio::time::timeout(JOIN_TIMEOUT, join)
            .await
            .map_err(|_| CallError::RemoteSession("Timed out joining Retell call".into()))?
    }
}

#[async_trait]
impl VoiceSession for RetellSession {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn start(
        &mut self,
        credential: &SessionCredential,
        stream: &MediaStream,
    ) -> Result<mpsc::Receiver<SessionEvent>, CallError> {
        let SessionCredential::Retell {
            call_id,
            access_token,
        } = credential
        else {
            return Err(CallError::RemoteSession("Retell session needs an access token".into()));
        };

        if self.outbound.is_some() {
            return Err(CallError::RemoteSession("Retell session already started".into()));
        }

        let track = stream
            .primary_audio_track()
            .ok_or_else(|| CallError::RemoteSession("No live microphone track".into()))?;

        let url = format!(
            "{}?call_id={}&sample_rate={}",
            self.relay_url.trim_end_matches('/'),
            call_id,
            socket::UPLINK_SAMPLE_RATE
        );
        let mut request = url
            .into_client_request()
            .map_err(|e| CallError::RemoteSession(format!("Bad relay url: {}", e)))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", access_token)
                .parse()
                .map_err(|e| CallError::RemoteSession(format!("Invalid access token header: {}", e)))?,
        );

        let (sink, mut source) = socket::connect(request, PROVIDER).await?;
        Self::await_started(&mut source).await?;
        info!("Retell call {} started", call_id);

        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(64);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(64);

        self.writer = Some(socket::spawn_writer(sink, outbound_rx, PROVIDER));
        self.uplink = Some(socket::spawn_uplink(
            track,
            Arc::clone(&self.muted),
            outbound_tx.clone(),
            PROVIDER,
            OutboundMessage::Binary,
        ));
        self.tasks.push(tokio::spawn(inbound_loop(source, event_tx)));

        self.outbound = Some(outbound_tx);
        self.call_id = Some(call_id.clone());

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

        info!("Retell call stopped");
        Ok(())
    }

    async fn set_muted(&mut self, muted: bool) -> Result<(), CallError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| CallError::RemoteSession("Retell session not connected".into()))?;

        outbound
            .send(OutboundMessage::Text(mute_message(muted)))
            .await
            .map_err(|_| CallError::RemoteSession("Retell relay closed".into()))?;

        self.muted.store(muted, Ordering::SeqCst);
        Ok(())
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    async fn switch_stream(&mut self, stream: &MediaStream) -> Result<(), CallError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| CallError::RemoteSession("Retell session not connected".into()))?;
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
            OutboundMessage::Binary,
        ));

        info!("Retell uplink moved to {}", track.label());
        Ok(())
    }

    fn call_id(&self) -> Option<String> {
        self.call_id.clone()
    }
}

impl Drop for RetellSession {
    fn drop(&mut self) {
        if let Some(uplink) = self.uplink.take() {
            uplink.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Forward relay events until a terminal one; a dropped relay counts as the call ending
async fn inbound_loop<S>(mut source: S, events: mpsc::Sender<SessionEvent>)
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(msg) = source.next().await {
        let event = match msg {
            Ok(WsMessage::Text(text)) => match parse_relay_event(text.as_str()) {
                Ok(event) => event,
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            },
            Ok(WsMessage::Close(frame)) => {
                info!("Retell relay closed: {:?}", frame);
                Some(SessionEvent::CallEnded)
            }
            Ok(_) => None,
            Err(e) => Some(SessionEvent::Error(format!("Retell relay error: {}", e))),
        };

        if let Some(event) = event {
            let terminal = matches!(event, SessionEvent::CallEnded | SessionEvent::Error(_));
            if events.send(event).await.is_err() {
                return;
            }
            if terminal {
                debug!("Retell inbound loop terminated");
                return;
            }
        }
    }

    info!("Retell relay connection dropped");
    let _ = events.send(SessionEvent::CallEnded).await;
    debug!("Retell inbound loop terminated");
}
