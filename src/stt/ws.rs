//! Shared WebSocket scaffolding for streaming transcription adapters.
//!
//! Every streaming variant dials with auth headers, runs a background reader,
//! serializes writes behind a short-held mutex, reconnects with exponential
//! backoff on connection loss, and signals finalization through a single-slot
//! commit channel. The per-provider differences (URL, framing, finalize
//! message, result parsing) live behind [`StreamingProtocol`].

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::adapters::{StreamResult, StreamingAdapter};
use super::SttError;

pub type WsRequest = tokio_tungstenite::tungstenite::handshake::client::Request;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Reconnection backoff schedule; three attempts, then the session is fatal.
const RECONNECT_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// One event decoded from a provider text frame.
#[derive(Debug)]
pub enum WireEvent {
    Transcript { text: String, is_final: bool },
    Error { message: String, fatal: bool },
    Ignore,
}

/// Provider-specific half of a streaming session.
pub trait StreamingProtocol: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Handshake request: URL with query parameters plus auth headers.
    fn request(&self) -> Result<WsRequest, SttError>;

    /// Wrap a PCM chunk in the provider's audio framing.
    fn audio_message(&self, pcm: &[u8]) -> Message;

    /// Message flushing the remote's buffer, or `None` when server-side VAD
    /// commits on its own.
    fn finalize_message(&self) -> Option<Message>;

    /// Decode one incoming text frame.
    fn parse(&self, raw: &str) -> WireEvent;
}

/// Generic streaming adapter over a [`StreamingProtocol`].
pub struct WsAdapter {
    protocol: Arc<dyn StreamingProtocol>,
    writer: Arc<Mutex<Option<WsSink>>>,
    token: StdMutex<Option<CancellationToken>>,
    commit_rx: Mutex<Option<mpsc::Receiver<()>>>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WsAdapter {
    pub fn new(protocol: Arc<dyn StreamingProtocol>) -> Self {
        Self {
            protocol,
            writer: Arc::new(Mutex::new(None)),
            token: StdMutex::new(None),
            commit_rx: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl StreamingAdapter for WsAdapter {
    async fn start(
        &self,
        ctx: &CancellationToken,
    ) -> Result<mpsc::Receiver<StreamResult>, SttError> {
        let request = self.protocol.request()?;
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| SttError::Socket(format!("connect failed: {}", e)))?;
        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);

        let token = ctx.child_token();
        if let Ok(mut slot) = self.token.lock() {
            *slot = Some(token.clone());
        }

        let (result_tx, result_rx) = mpsc::channel::<StreamResult>(64);
        let (commit_tx, commit_rx) = mpsc::channel::<()>(1);
        *self.commit_rx.lock().await = Some(commit_rx);

        let protocol = self.protocol.clone();
        let writer = self.writer.clone();
        let handle = tokio::spawn(async move {
            reader_loop(protocol, writer, source, result_tx, commit_tx, token).await;
        });
        *self.reader.lock().await = Some(handle);

        log::info!("{}: streaming session started", self.protocol.name());
        Ok(result_rx)
    }

    async fn send_chunk(&self, pcm: &[u8]) -> Result<(), SttError> {
        // The write lock is held only for the single send call.
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(sink) => sink
                .send(self.protocol.audio_message(pcm))
                .await
                .map_err(|e| SttError::Socket(format!("send failed: {}", e))),
            None => Err(SttError::Socket("not connected".to_string())),
        }
    }

    async fn finalize(&self, ctx: &CancellationToken) -> Result<(), SttError> {
        let Some(message) = self.protocol.finalize_message() else {
            // Server-side VAD commits on its own; nothing to flush.
            return Ok(());
        };

        let mut guard = self.commit_rx.lock().await;
        let Some(commit_rx) = guard.as_mut() else {
            return Err(SttError::Socket("finalize before start".to_string()));
        };
        // Discard commit signals from mid-session finals so we wait for the
        // one triggered by this flush.
        while commit_rx.try_recv().is_ok() {}

        {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(sink) => sink
                    .send(message)
                    .await
                    .map_err(|e| SttError::Socket(format!("finalize send failed: {}", e)))?,
                None => return Err(SttError::Socket("not connected".to_string())),
            }
        }

        tokio::select! {
            _ = ctx.cancelled() => Err(SttError::Timeout),
            signal = commit_rx.recv() => {
                if signal.is_none() {
                    log::debug!("{}: reader ended before commit signal", self.protocol.name());
                }
                Ok(())
            }
        }
    }

    async fn close(&self) {
        if let Ok(mut slot) = self.token.lock() {
            if let Some(token) = slot.take() {
                token.cancel();
            }
        }
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = sink.send(Message::Close(None)).await;
        }
        let reader = self.reader.lock().await.take();
        if let Some(handle) = reader {
            if let Err(e) = handle.await {
                log::warn!("{}: reader task join failed: {}", self.protocol.name(), e);
            }
        }
    }

    fn name(&self) -> &'static str {
        self.protocol.name()
    }
}

async fn reader_loop(
    protocol: Arc<dyn StreamingProtocol>,
    writer: Arc<Mutex<Option<WsSink>>>,
    mut source: WsSource,
    results: mpsc::Sender<StreamResult>,
    commits: mpsc::Sender<()>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            message = source.next() => match message {
                Some(Ok(Message::Text(raw))) => {
                    match protocol.parse(raw.as_str()) {
                        WireEvent::Transcript { text, is_final } => {
                            if is_final {
                                let _ = commits.try_send(());
                            }
                            if results
                                .send(StreamResult::transcript(text, is_final))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        WireEvent::Error { message, fatal } => {
                            let error = if fatal {
                                SttError::Provider(message)
                            } else {
                                SttError::Socket(message)
                            };
                            let ended = fatal;
                            let _ = results.send(StreamResult::error(error)).await;
                            if ended {
                                break;
                            }
                        }
                        WireEvent::Ignore => {}
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    log::warn!("{}: server closed the connection ({:?})", protocol.name(), frame);
                    if !reconnect(&protocol, &writer, &mut source, &results, &token).await {
                        break;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("{}: read error: {}", protocol.name(), e);
                    if !reconnect(&protocol, &writer, &mut source, &results, &token).await {
                        break;
                    }
                }
                None => {
                    if !reconnect(&protocol, &writer, &mut source, &results, &token).await {
                        break;
                    }
                }
            },
        }
    }
}

/// Re-dial with backoff. Returns true when the session resumed on a fresh
/// connection; pushes the terminal error and returns false when retries are
/// exhausted or the session was cancelled.
async fn reconnect(
    protocol: &Arc<dyn StreamingProtocol>,
    writer: &Arc<Mutex<Option<WsSink>>>,
    source: &mut WsSource,
    results: &mpsc::Sender<StreamResult>,
    token: &CancellationToken,
) -> bool {
    for (attempt, delay) in RECONNECT_DELAYS.iter().enumerate() {
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(*delay) => {}
        }

        let request = match protocol.request() {
            Ok(request) => request,
            Err(e) => {
                let _ = results
                    .send(StreamResult::error(SttError::Fatal(Box::new(e))))
                    .await;
                return false;
            }
        };

        match connect_async(request).await {
            Ok((stream, _response)) => {
                let (sink, new_source) = stream.split();
                *writer.lock().await = Some(sink);
                *source = new_source;
                log::info!(
                    "{}: reconnected on attempt {}",
                    protocol.name(),
                    attempt + 1
                );
                let _ = results
                    .send(StreamResult::error(SttError::Socket(
                        "connection interrupted, reconnected".to_string(),
                    )))
                    .await;
                return true;
            }
            Err(e) => {
                log::warn!(
                    "{}: reconnect attempt {} failed: {}",
                    protocol.name(),
                    attempt + 1,
                    e
                );
            }
        }
    }

    let _ = results
        .send(StreamResult::error(SttError::Fatal(Box::new(
            SttError::Socket(format!(
                "connection lost after {} reconnect attempts",
                RECONNECT_DELAYS.len()
            )),
        ))))
        .await;
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(RECONNECT_DELAYS.len(), 3);
        assert_eq!(RECONNECT_DELAYS[0], Duration::from_secs(1));
        assert_eq!(RECONNECT_DELAYS[1], Duration::from_secs(2));
        assert_eq!(RECONNECT_DELAYS[2], Duration::from_secs(4));
    }
}
