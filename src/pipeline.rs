//! Session pipeline: Idle → Recording → Transcribing → Injecting → Idle.
//!
//! One pipeline drives one session. The daemon creates a pipeline on toggle,
//! runs it to completion, and reads its status for the control socket.
//! Commands arrive through a single-slot action mailbox; errors leave through
//! a bounded notification channel.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::inject::{Injector, InjectorChain};
use crate::llm::{LlmConfig, LlmProcessor, TextRewriter};
use crate::recorder::{FrameSource, Recorder};
use crate::stt::{
    build_transcriber, is_fatal, SttError, Transcriber, TranscriberConfig, TranscriberKind,
};

/// Single source of truth for what the pipeline is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Recording,
    Transcribing,
    Injecting,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Recording => "recording",
            SessionStatus::Transcribing => "transcribing",
            SessionStatus::Injecting => "injecting",
        }
    }
}

/// Commands the pipeline accepts from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Commit the session: stop recording, finalize, rewrite, inject.
    Inject,
    /// Abort the session and return to idle.
    Cancel,
}

/// One entry on the pipeline's error notification channel.
#[derive(Debug, Clone)]
pub struct PipelineError {
    pub title: String,
    pub message: String,
    pub cause: Option<String>,
}

impl PipelineError {
    fn new(title: &str, message: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn recording_start(error: &crate::recorder::RecorderError) -> Self {
        Self::new("Recording failed to start", error.to_string())
    }

    pub fn recording_stream(error: &crate::recorder::RecorderError) -> Self {
        Self::new("Recording interrupted", error.to_string())
    }

    pub fn transcriber_construction(error: &SttError) -> Self {
        Self::new("Transcriber setup failed", error.to_string())
    }

    pub fn transcriber_stream(error: &SttError) -> Self {
        let mut this = Self::new("Transcription error", error.to_string());
        if let SttError::Fatal(inner) = error {
            this.cause = Some(inner.to_string());
        }
        this
    }

    pub fn finalize(error: &SttError) -> Self {
        let mut this = Self::new("Transcription finalize failed", error.to_string());
        if let SttError::Fatal(inner) = error {
            this.cause = Some(inner.to_string());
        }
        this
    }

    pub fn rewrite(error: &crate::llm::LlmError) -> Self {
        Self::new("Text rewrite failed", error.to_string())
    }

    pub fn injection(error: &crate::inject::InjectError) -> Self {
        Self::new("Text injection failed", error.to_string())
    }
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Hard cap on the whole session.
    pub max_session: Duration,
    /// Window granted to the finalize handshake during stop.
    pub finalize_timeout: Duration,
    /// Capacity of the pipeline → transcriber frame queue.
    pub frame_queue: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_session: Duration::from_secs(300),
            finalize_timeout: Duration::from_secs(5),
            frame_queue: 32,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_session: config.daemon.max_session(),
            finalize_timeout: Duration::from_secs(5),
            frame_queue: config.recording.queue_capacity,
        }
    }
}

/// Collaborators a pipeline composes. Production wiring comes from
/// [`Factories::production`]; tests substitute mocks.
pub struct Factories {
    pub recorder: Arc<dyn FrameSource>,
    pub transcriber: Box<dyn Fn() -> Result<Box<dyn Transcriber>, SttError> + Send + Sync>,
    pub rewriter: Option<Arc<dyn TextRewriter>>,
    pub injector: Arc<dyn Injector>,
}

impl Factories {
    pub fn production(config: &Config) -> Result<Self, crate::llm::LlmError> {
        let rewriter: Option<Arc<dyn TextRewriter>> = if config.llm.enabled {
            let llm_config = LlmConfig::from_section(&config.llm);
            Some(Arc::new(LlmProcessor::new(&llm_config)?))
        } else {
            None
        };

        let transcriber_config = TranscriberConfig::from_config(config);
        Ok(Self {
            recorder: Arc::new(Recorder::new(config.recording.clone())),
            transcriber: Box::new(move || build_transcriber(&transcriber_config)),
            rewriter,
            injector: Arc::new(InjectorChain::new(&config.injection)),
        })
    }
}

enum Outcome {
    Inject,
    Cancelled,
}

/// One-session-at-a-time state machine composing recorder, transcriber,
/// rewriter and injector.
pub struct Pipeline {
    factories: Factories,
    options: PipelineOptions,
    status: Arc<StdMutex<SessionStatus>>,
    actions_tx: mpsc::Sender<Action>,
    actions_rx: StdMutex<Option<mpsc::Receiver<Action>>>,
    errors_tx: broadcast::Sender<PipelineError>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(factories: Factories, options: PipelineOptions) -> Self {
        // Capacity 1 gives coalescing semantics: "an Inject is pending" is
        // the only fact that matters, not how many were sent.
        let (actions_tx, actions_rx) = mpsc::channel(1);
        let (errors_tx, _) = broadcast::channel(10);
        Self {
            factories,
            options,
            status: Arc::new(StdMutex::new(SessionStatus::Idle)),
            actions_tx,
            actions_rx: StdMutex::new(Some(actions_rx)),
            errors_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Sender side of the action mailbox. A send while the slot is occupied
    /// is silently coalesced.
    pub fn actions(&self) -> mpsc::Sender<Action> {
        self.actions_tx.clone()
    }

    /// Deliver an action, coalescing when the mailbox is full.
    pub fn post_action(&self, action: Action) {
        if self.actions_tx.try_send(action).is_err() {
            log::debug!("Pipeline: action mailbox full, {:?} coalesced", action);
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.lock().map(|s| *s).unwrap_or(SessionStatus::Idle)
    }

    /// Subscribe to the error notification stream.
    pub fn errors(&self) -> broadcast::Receiver<PipelineError> {
        self.errors_tx.subscribe()
    }

    /// Cancel the session. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn set_status(&self, status: SessionStatus) {
        if let Ok(mut guard) = self.status.lock() {
            log::debug!("Pipeline: {} -> {}", guard.as_str(), status.as_str());
            *guard = status;
        }
    }

    fn post_error(&self, error: PipelineError) {
        log::error!("Pipeline: {}: {}", error.title, error.message);
        // Notification-only semantics; nobody listening is fine.
        let _ = self.errors_tx.send(error);
    }

    /// Drive one session to completion.
    pub async fn run(&self, ctx: &CancellationToken) {
        let session = ctx.child_token();
        let stop_guard = self.cancel.clone();
        let session_for_stop = session.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop_guard.cancelled() => session_for_stop.cancel(),
                // Session ended on its own; the watcher exits with it.
                _ = session_for_stop.cancelled() => {}
            }
        });

        self.set_status(SessionStatus::Recording);

        let recorder = self.factories.recorder.clone();
        let (mut frames_rx, mut rec_errs) = match recorder.start(&session).await {
            Ok(pair) => pair,
            Err(e) => {
                self.post_error(PipelineError::recording_start(&e));
                self.finish(&session);
                return;
            }
        };

        let transcriber = match (self.factories.transcriber)() {
            Ok(t) => t,
            Err(e) => {
                self.post_error(PipelineError::transcriber_construction(&e));
                recorder.stop().await;
                self.finish(&session);
                return;
            }
        };

        let (fwd_tx, fwd_rx) = mpsc::channel(self.options.frame_queue);
        let mut fwd_tx = Some(fwd_tx);
        let mut fwd_rx = Some(fwd_rx);
        let mut stt_errs: Option<mpsc::Receiver<SttError>> = None;

        // The batch transcriber starts at recording entry; the streaming one
        // holds off until the first frame so the socket is not opened for a
        // session that never produces audio.
        if transcriber.kind() == TranscriberKind::Batch {
            match transcriber
                .start(&session, fwd_rx.take().expect("frame receiver"))
                .await
            {
                Ok(errs) => stt_errs = Some(errs),
                Err(e) => {
                    self.post_error(PipelineError::transcriber_construction(&e));
                    recorder.stop().await;
                    self.finish(&session);
                    return;
                }
            }
        }

        let mut actions = match self.actions_rx.lock().ok().and_then(|mut g| g.take()) {
            Some(rx) => rx,
            None => {
                log::error!("Pipeline: run called twice");
                self.finish(&session);
                return;
            }
        };

        let max_session = tokio::time::sleep(self.options.max_session);
        tokio::pin!(max_session);
        let mut frames_open = true;
        let mut rec_errs_open = true;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = session.cancelled() => break Outcome::Cancelled,

                _ = &mut max_session => {
                    log::warn!(
                        "Pipeline: session exceeded {:?}, returning to idle",
                        self.options.max_session
                    );
                    break Outcome::Cancelled;
                }

                action = actions.recv() => match action {
                    Some(Action::Cancel) => break Outcome::Cancelled,
                    Some(Action::Inject) => {
                        if self.status() == SessionStatus::Transcribing {
                            break Outcome::Inject;
                        }
                        // Not buffered: the user must re-issue once audio flows.
                        log::debug!("Pipeline: Inject before transcription started, ignored");
                    }
                    None => break Outcome::Cancelled,
                },

                frame = frames_rx.recv(), if frames_open => match frame {
                    Some(frame) => {
                        if self.status() == SessionStatus::Recording {
                            self.set_status(SessionStatus::Transcribing);
                            if transcriber.kind() == TranscriberKind::Streaming {
                                match transcriber
                                    .start(&session, fwd_rx.take().expect("frame receiver"))
                                    .await
                                {
                                    Ok(errs) => stt_errs = Some(errs),
                                    Err(e) => {
                                        self.post_error(PipelineError::transcriber_stream(&e));
                                        break Outcome::Cancelled;
                                    }
                                }
                            }
                        }
                        let mut stream_gone = false;
                        if let Some(tx) = &fwd_tx {
                            // Awaited send: no drops between pipeline and
                            // transcriber, backpressure lands on the recorder
                            // queue instead.
                            if tx.send(frame).await.is_err() {
                                log::warn!("Pipeline: transcriber dropped its frame stream");
                                stream_gone = true;
                            }
                        }
                        if stream_gone {
                            fwd_tx = None;
                        }
                    }
                    None => frames_open = false,
                },

                err = rec_errs.recv(), if rec_errs_open => match err {
                    Some(e) => self.post_error(PipelineError::recording_stream(&e)),
                    None => rec_errs_open = false,
                },

                err = async { stt_errs.as_mut().expect("guarded").recv().await },
                    if stt_errs.is_some() =>
                {
                    match err {
                        Some(e) if is_fatal(&e) => {
                            self.post_error(PipelineError::transcriber_stream(&e));
                            break Outcome::Cancelled;
                        }
                        Some(e) => {
                            log::info!("Pipeline: transient transcription error: {}", e);
                            self.post_error(PipelineError::transcriber_stream(&e));
                        }
                        None => stt_errs = None,
                    }
                }
            }
        };

        match outcome {
            Outcome::Inject => {
                recorder.stop().await;
                // Frames buffered before stop are still offered to the
                // transcriber.
                while let Ok(frame) = frames_rx.try_recv() {
                    if let Some(tx) = &fwd_tx {
                        let _ = tx.send(frame).await;
                    }
                }
                drop(fwd_tx.take());

                let finalize_ctx = deadline_token(&session, self.options.finalize_timeout);
                let stop_result = transcriber.stop(&finalize_ctx).await;
                let text = transcriber.final_transcription();

                match stop_result {
                    Ok(()) => {
                        self.set_status(SessionStatus::Injecting);
                        // Cancel is honored mid-injection: the rewrite and
                        // injection stages race the action mailbox and the
                        // session token, and dropping the in-flight future
                        // aborts them.
                        let commit = async {
                            let final_text = self.rewrite_stage(&text).await;
                            if final_text.is_empty() {
                                log::info!("Pipeline: empty transcript, nothing to inject");
                            } else {
                                match self.factories.injector.inject(&final_text).await {
                                    Ok(backend) => {
                                        log::info!("Pipeline: injected via {}", backend)
                                    }
                                    Err(e) => self.post_error(PipelineError::injection(&e)),
                                }
                            }
                        };
                        tokio::pin!(commit);
                        loop {
                            tokio::select! {
                                biased;

                                _ = session.cancelled() => {
                                    log::info!("Pipeline: injection aborted");
                                    break;
                                }

                                action = actions.recv() => match action {
                                    Some(Action::Cancel) | None => {
                                        log::info!("Pipeline: injection aborted by cancel");
                                        break;
                                    }
                                    // A second Inject during commit is redundant.
                                    Some(Action::Inject) => {}
                                },

                                _ = &mut commit => break,
                            }
                        }
                    }
                    Err(e) => {
                        // Fatal transcription outcome: surface it and return
                        // to idle without injecting.
                        self.post_error(PipelineError::finalize(&e));
                    }
                }
            }
            Outcome::Cancelled => {
                recorder.stop().await;
                drop(fwd_tx.take());
                // Bounded-latency cancellation: an already-expired finalize
                // window makes stop tear down without waiting on the remote.
                let finalize_ctx = CancellationToken::new();
                finalize_ctx.cancel();
                if let Err(e) = transcriber.stop(&finalize_ctx).await {
                    log::debug!("Pipeline: transcriber stop during cancel: {}", e);
                }
            }
        }

        self.finish(&session);
    }

    async fn rewrite_stage(&self, text: &str) -> String {
        let Some(rewriter) = &self.factories.rewriter else {
            return text.to_string();
        };
        if text.trim().is_empty() {
            return text.to_string();
        }
        match rewriter.rewrite(text).await {
            Ok(rewritten) => {
                log::info!(
                    "Pipeline: rewrite {} -> {} chars via {}",
                    text.len(),
                    rewritten.len(),
                    rewriter.model()
                );
                rewritten
            }
            Err(e) => {
                // Keep the raw transcript rather than losing the dictation.
                self.post_error(PipelineError::rewrite(&e));
                text.to_string()
            }
        }
    }

    fn finish(&self, session: &CancellationToken) {
        session.cancel();
        self.set_status(SessionStatus::Idle);
    }
}

/// Child token that cancels itself after `window`.
fn deadline_token(parent: &CancellationToken, window: Duration) -> CancellationToken {
    let token = parent.child_token();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(window) => timer.cancel(),
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_strings() {
        assert_eq!(SessionStatus::Idle.as_str(), "idle");
        assert_eq!(SessionStatus::Recording.as_str(), "recording");
        assert_eq!(SessionStatus::Transcribing.as_str(), "transcribing");
        assert_eq!(SessionStatus::Injecting.as_str(), "injecting");
    }

    #[tokio::test]
    async fn test_action_mailbox_coalesces() {
        let (tx, mut rx) = mpsc::channel::<Action>(1);
        tx.try_send(Action::Inject).unwrap();
        // Slot occupied: further sends are dropped, not queued.
        assert!(tx.try_send(Action::Inject).is_err());
        assert!(tx.try_send(Action::Cancel).is_err());
        assert_eq!(rx.recv().await, Some(Action::Inject));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deadline_token_expires() {
        let parent = CancellationToken::new();
        let token = deadline_token(&parent, Duration::from_millis(20));
        assert!(!token.is_cancelled());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(token.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_token_follows_parent() {
        let parent = CancellationToken::new();
        let token = deadline_token(&parent, Duration::from_secs(60));
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(token.is_cancelled());
    }
}
