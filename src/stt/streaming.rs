//! Streaming transcriber: feeds a live adapter and accumulates final results.
//!
//! Two cooperating tasks: the send task pulls frames and pushes chunks to the
//! adapter, the receive task pulls results and appends finals to the
//! accumulator. `stop` finalizes the adapter *before* cancelling the tasks so
//! the remote's last final result is still collected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::recorder::AudioFrame;

use super::adapters::{StreamResult, StreamingAdapter};
use super::{is_fatal, SttError, Transcriber, TranscriberKind};

/// How long the receive task keeps draining in-flight results after
/// cancellation.
const DRAIN_WINDOW: Duration = Duration::from_millis(100);

struct SessionTasks {
    token: CancellationToken,
    send: tokio::task::JoinHandle<()>,
    recv: tokio::task::JoinHandle<()>,
}

pub struct StreamingTranscriber {
    adapter: Arc<dyn StreamingAdapter>,
    text: Arc<StdMutex<String>>,
    fatal: Arc<StdMutex<Option<String>>>,
    tasks: Mutex<Option<SessionTasks>>,
    stopped: AtomicBool,
}

impl StreamingTranscriber {
    pub fn new(adapter: Arc<dyn StreamingAdapter>) -> Self {
        Self {
            adapter,
            text: Arc::new(StdMutex::new(String::new())),
            fatal: Arc::new(StdMutex::new(None)),
            tasks: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    fn latched_result(&self) -> Result<(), SttError> {
        match self.fatal.lock().ok().and_then(|g| g.clone()) {
            Some(message) => Err(SttError::Fatal(Box::new(SttError::Provider(message)))),
            None => Ok(()),
        }
    }
}

/// First write wins; later fatals are logged, not latched.
fn latch_fatal(slot: &StdMutex<Option<String>>, error: &SttError) {
    if let Ok(mut guard) = slot.lock() {
        if guard.is_none() {
            *guard = Some(error.to_string());
        } else {
            log::debug!("StreamingTranscriber: additional fatal error: {}", error);
        }
    }
}

/// Append a final result with a single space between non-empty additions.
fn append_final(accumulator: &StdMutex<String>, addition: &str) {
    let addition = addition.trim();
    if addition.is_empty() {
        return;
    }
    if let Ok(mut text) = accumulator.lock() {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(addition);
    }
}

async fn drain_finals(results: &mut mpsc::Receiver<StreamResult>, text: &StdMutex<String>) {
    let deadline = tokio::time::Instant::now() + DRAIN_WINDOW;
    while let Ok(Some(result)) = tokio::time::timeout_at(deadline, results.recv()).await {
        if result.error.is_none() && result.is_final {
            append_final(text, &result.text);
        }
    }
}

#[async_trait::async_trait]
impl Transcriber for StreamingTranscriber {
    async fn start(
        &self,
        ctx: &CancellationToken,
        mut frames: mpsc::Receiver<AudioFrame>,
    ) -> Result<mpsc::Receiver<SttError>, SttError> {
        let mut results = self.adapter.start(ctx).await?;

        let token = ctx.child_token();
        let (err_tx, err_rx) = mpsc::channel::<SttError>(10);

        // Send task: every frame is offered to the adapter at least once;
        // non-fatal send errors are reported and the loop continues (the
        // adapter reconnects underneath us).
        let send_task = {
            let adapter = self.adapter.clone();
            let token = token.clone();
            let err_tx = err_tx.clone();
            let fatal = self.fatal.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        frame = frames.recv() => match frame {
                            Some(frame) => {
                                if let Err(e) = adapter.send_chunk(&frame.data).await {
                                    if is_fatal(&e) {
                                        latch_fatal(&fatal, &e);
                                        let _ = err_tx.try_send(e);
                                        token.cancel();
                                        break;
                                    }
                                    log::warn!("StreamingTranscriber: chunk send failed: {}", e);
                                    let _ = err_tx.try_send(e);
                                }
                            }
                            None => break,
                        },
                    }
                }
            })
        };

        // Receive task: accumulate finals, classify errors, and drain briefly
        // after cancellation to catch in-flight finals.
        let recv_task = {
            let token = token.clone();
            let text = self.text.clone();
            let fatal = self.fatal.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => {
                            drain_finals(&mut results, &text).await;
                            break;
                        }
                        result = results.recv() => match result {
                            Some(result) => {
                                if let Some(e) = result.error {
                                    if is_fatal(&e) {
                                        latch_fatal(&fatal, &e);
                                        let _ = err_tx.try_send(e);
                                        token.cancel();
                                    } else {
                                        log::info!("StreamingTranscriber: {}", e);
                                        let _ = err_tx.try_send(e);
                                    }
                                } else if result.is_final {
                                    append_final(&text, &result.text);
                                }
                            }
                            None => break,
                        },
                    }
                }
            })
        };

        *self.tasks.lock().await = Some(SessionTasks {
            token,
            send: send_task,
            recv: recv_task,
        });
        Ok(err_rx)
    }

    async fn stop(&self, ctx: &CancellationToken) -> Result<(), SttError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return self.latched_result();
        }

        // Finalize before cancelling: cancelling first would abort the
        // receive task before the remote's last final result arrives.
        if let Err(e) = self.adapter.finalize(ctx).await {
            log::warn!(
                "StreamingTranscriber: finalize did not complete ({}); keeping partial transcript",
                e
            );
        }

        let tasks = self.tasks.lock().await.take();
        if let Some(tasks) = tasks {
            tasks.token.cancel();
            if let Err(e) = tasks.send.await {
                log::warn!("StreamingTranscriber: send task join failed: {}", e);
            }
            if let Err(e) = tasks.recv.await {
                log::warn!("StreamingTranscriber: receive task join failed: {}", e);
            }
        }

        self.adapter.close().await;
        self.latched_result()
    }

    fn final_transcription(&self) -> String {
        self.text.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn kind(&self) -> TranscriberKind {
        TranscriberKind::Streaming
    }
}
