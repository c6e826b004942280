//! Websocket plumbing shared by the provider sessions

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::CallError;
use crate::media::{convert, MediaTrack};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, WsMessage>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// Sample rate both providers expect for microphone audio
pub const UPLINK_SAMPLE_RATE: u32 = 16000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a closing writer gets to flush the close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub(crate) enum OutboundMessage {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

pub(crate) async fn connect<R>(request: R, provider: &str) -> Result<(WsSink, WsSource), CallError>
where
    R: IntoClientRequest + Unpin,
{
    let (ws_stream, _response) =
        tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| CallError::RemoteSession(format!("Timed out connecting to {}", provider)))?
            .map_err(|e| {
                CallError::RemoteSession(format!("Failed to connect to {}: {}", provider, e))
            })?;

    info!("Connected to {} voice socket", provider);
    Ok(ws_stream.split())
}

pub(crate) async fn send_text(sink: &mut WsSink, text: String) -> Result<(), CallError> {
    sink.send(WsMessage::text(text))
        .await
        .map_err(|e| CallError::RemoteSession(format!("Socket send failed: {}", e)))
}

/// Drain outbound messages into the socket until closed
pub(crate) fn spawn_writer(
    mut sink: WsSink,
    mut rx: mpsc::Receiver<OutboundMessage>,
    provider: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let result = match msg {
                OutboundMessage::Text(text) => sink.send(WsMessage::text(text)).await,
                OutboundMessage::Binary(bytes) => sink.send(WsMessage::binary(bytes)).await,
                OutboundMessage::Close => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                warn!("{} socket send failed, closing writer: {}", provider, e);
                break;
            }
        }

        debug!("{} socket writer terminated", provider);
    })
}

/// Ask the writer to send a close frame and wait briefly for it to finish
///
/// Never blocks on a backed-up writer: the close frame is dropped if the
/// queue is full and the writer is aborted once the timeout passes.
pub(crate) async fn close_writer(
    outbound: mpsc::Sender<OutboundMessage>,
    writer: Option<JoinHandle<()>>,
    provider: &str,
) {
    if outbound.try_send(OutboundMessage::Close).is_err() {
        warn!("{} writer backed up, closing without a close frame", provider);
    }
    drop(outbound);

    let Some(writer) = writer else {
        return;
    };
    let abort = writer.abort_handle();
    if tokio::time::timeout(CLOSE_TIMEOUT, writer).await.is_err() {
        warn!("{} socket did not close in time", provider);
        abort.abort();
    }
}

/// Forward microphone frames as 16 kHz mono PCM while unmuted
///
/// `encode` wraps the PCM bytes in whatever message the provider expects.
/// Frames are dropped rather than queued when the writer falls behind.
pub(crate) fn spawn_uplink<F>(
    track: &Arc<MediaTrack>,
    muted: Arc<AtomicBool>,
    outbound: mpsc::Sender<OutboundMessage>,
    provider: &'static str,
    encode: F,
) -> JoinHandle<()>
where
    F: Fn(Vec<u8>) -> OutboundMessage + Send + 'static,
{
    let mut frames = track.subscribe();

    tokio::spawn(async move {
        let mut sent: u64 = 0;

        loop {
            let frame = match frames.recv().await {
                Ok(frame) => frame,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("{} uplink skipped {} frames", provider, skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if muted.load(Ordering::SeqCst) {
                continue;
            }

            let frame = convert::process_frame(frame, UPLINK_SAMPLE_RATE, 1);
            let pcm = convert::to_pcm_bytes(&frame.samples);
            if pcm.is_empty() {
                continue;
            }

            match outbound.try_send(encode(pcm)) {
                Ok(()) => {
                    sent += 1;
                    if sent == 1 {
                        info!("Streaming microphone audio to {}", provider);
                    }
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("{} writer busy, dropping audio frame", provider);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }

        debug!("{} uplink stopped after {} frames", provider, sent);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_close_writer_gives_up_on_stalled_writer() {
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(OutboundMessage::Text("queued".into())).unwrap();
        let writer = tokio::spawn(std::future::pending::<()>());
        let abort = writer.abort_handle();

        tokio::time::timeout(Duration::from_secs(5), close_writer(tx, Some(writer), "Test"))
            .await
            .expect("close must not wait on a full queue");

        for _ in 0..10 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished(), "stalled writer should be aborted");
    }

    #[tokio::test]
    async fn test_close_writer_delivers_close_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let writer = tokio::spawn(async move {
            let _ = seen_tx.send(rx.recv().await);
        });

        close_writer(tx, Some(writer), "Test").await;
        assert!(matches!(seen_rx.await.unwrap(), Some(OutboundMessage::Close)));
    }
}
