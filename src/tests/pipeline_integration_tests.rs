//! End-to-end pipeline tests with mock collaborators.
//!
//! These drive whole sessions: recorder frames in, transcript out, through
//! the optional rewrite stage to the injector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::inject::{InjectError, Injector};
use crate::llm::{LlmError, TextRewriter};
use crate::pipeline::{Action, Factories, Pipeline, PipelineOptions, SessionStatus};
use crate::recorder::{AudioFrame, FrameSource, RecorderError};
use crate::stt::batch::BatchTranscriber;
use crate::stt::{BatchAdapter, SttError, Transcriber, TranscriberKind};

/// Emits a scripted list of frames, then keeps the stream open until stopped.
struct MockRecorder {
    frames: StdMutex<Vec<Vec<u8>>>,
    recording: Arc<AtomicBool>,
    token: StdMutex<Option<CancellationToken>>,
    fail_start: bool,
}

impl MockRecorder {
    fn with_frames(frames: Vec<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            frames: StdMutex::new(frames),
            recording: Arc::new(AtomicBool::new(false)),
            token: StdMutex::new(None),
            fail_start: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            frames: StdMutex::new(Vec::new()),
            recording: Arc::new(AtomicBool::new(false)),
            token: StdMutex::new(None),
            fail_start: true,
        })
    }
}

#[async_trait::async_trait]
impl FrameSource for MockRecorder {
    async fn start(
        &self,
        ctx: &CancellationToken,
    ) -> Result<(mpsc::Receiver<AudioFrame>, mpsc::Receiver<RecorderError>), RecorderError> {
        if self.fail_start {
            return Err(RecorderError::ToolMissing("mock".to_string()));
        }
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (_err_tx, err_rx) = mpsc::channel(4);
        let token = ctx.child_token();
        *self.token.lock().unwrap() = Some(token.clone());
        self.recording.store(true, Ordering::SeqCst);

        let frames: Vec<Vec<u8>> = self.frames.lock().unwrap().clone();
        let recording = self.recording.clone();
        tokio::spawn(async move {
            for data in frames {
                if frame_tx.send(AudioFrame::new(data)).await.is_err() {
                    break;
                }
            }
            // Keep the stream open until the session ends, as a live capture
            // subprocess would.
            token.cancelled().await;
            recording.store(false, Ordering::SeqCst);
        });
        Ok((frame_rx, err_rx))
    }

    async fn stop(&self) {
        if let Some(token) = self.token.lock().unwrap().take() {
            token.cancel();
        }
        self.recording.store(false, Ordering::SeqCst);
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}

struct MockBatchAdapter {
    reply: String,
}

#[async_trait::async_trait]
impl BatchAdapter for MockBatchAdapter {
    async fn transcribe(&self, _wav: &[u8]) -> Result<String, SttError> {
        Ok(self.reply.clone())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockInjector {
    injected: StdMutex<Vec<String>>,
    delay: Duration,
}

impl MockInjector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            injected: StdMutex::new(Vec::new()),
            delay: Duration::ZERO,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            injected: StdMutex::new(Vec::new()),
            delay,
        })
    }

    fn texts(&self) -> Vec<String> {
        self.injected.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Injector for MockInjector {
    async fn inject(&self, text: &str) -> Result<String, InjectError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.injected.lock().unwrap().push(text.to_string());
        Ok("mock".to_string())
    }
}

struct MockRewriter {
    reply: String,
}

#[async_trait::async_trait]
impl TextRewriter for MockRewriter {
    async fn rewrite(&self, _transcript: &str) -> Result<String, LlmError> {
        Ok(self.reply.clone())
    }

    fn name(&self) -> &'static str {
        "mock-llm"
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}

/// Transcriber stub whose error stream the test scripts directly.
struct ScriptedTranscriber {
    err_injector: Arc<StdMutex<Option<mpsc::Sender<SttError>>>>,
    text: String,
}

impl ScriptedTranscriber {
    fn new(text: &str, err_injector: Arc<StdMutex<Option<mpsc::Sender<SttError>>>>) -> Self {
        Self {
            err_injector,
            text: text.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn start(
        &self,
        _ctx: &CancellationToken,
        mut frames: mpsc::Receiver<AudioFrame>,
    ) -> Result<mpsc::Receiver<SttError>, SttError> {
        let (err_tx, err_rx) = mpsc::channel(10);
        *self.err_injector.lock().unwrap() = Some(err_tx);
        tokio::spawn(async move { while frames.recv().await.is_some() {} });
        Ok(err_rx)
    }

    async fn stop(&self, _ctx: &CancellationToken) -> Result<(), SttError> {
        Ok(())
    }

    fn final_transcription(&self) -> String {
        self.text.clone()
    }

    fn kind(&self) -> TranscriberKind {
        TranscriberKind::Batch
    }
}

fn options() -> PipelineOptions {
    PipelineOptions {
        max_session: Duration::from_secs(30),
        finalize_timeout: Duration::from_millis(500),
        frame_queue: 8,
    }
}

async fn wait_for_status(pipeline: &Pipeline, status: SessionStatus) {
    for _ in 0..200 {
        if pipeline.status() == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "pipeline never reached {:?} (stuck at {:?})",
        status,
        pipeline.status()
    );
}

fn batch_factories(
    recorder: Arc<MockRecorder>,
    reply: &str,
    injector: Arc<MockInjector>,
    rewriter: Option<Arc<dyn TextRewriter>>,
) -> Factories {
    let reply = reply.to_string();
    Factories {
        recorder,
        transcriber: Box::new(move || {
            Ok(Box::new(BatchTranscriber::new(
                Arc::new(MockBatchAdapter {
                    reply: reply.clone(),
                }),
                1,
                16_000,
            )) as Box<dyn Transcriber>)
        }),
        rewriter,
        injector,
    }
}

#[tokio::test]
async fn test_batch_happy_path_injects_transcript() {
    let recorder = MockRecorder::with_frames(vec![vec![0u8; 3200]; 3]);
    let injector = MockInjector::new();
    let pipeline = Arc::new(Pipeline::new(
        batch_factories(recorder.clone(), "hello world", injector.clone(), None),
        options(),
    ));

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    let join = tokio::spawn(async move { runner.run(&root_run).await });

    wait_for_status(&pipeline, SessionStatus::Transcribing).await;
    pipeline.post_action(Action::Inject);
    join.await.unwrap();

    assert_eq!(pipeline.status(), SessionStatus::Idle);
    assert_eq!(injector.texts(), vec!["hello world".to_string()]);
    assert!(!recorder.is_recording());
}

#[tokio::test]
async fn test_cancel_returns_to_idle_without_injection() {
    let recorder = MockRecorder::with_frames(vec![vec![0u8; 3200]]);
    let injector = MockInjector::new();
    let pipeline = Arc::new(Pipeline::new(
        batch_factories(recorder.clone(), "discarded", injector.clone(), None),
        options(),
    ));

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    let join = tokio::spawn(async move { runner.run(&root_run).await });

    wait_for_status(&pipeline, SessionStatus::Transcribing).await;
    pipeline.post_action(Action::Cancel);
    join.await.unwrap();

    assert_eq!(pipeline.status(), SessionStatus::Idle);
    assert!(injector.texts().is_empty());
    assert!(!recorder.is_recording());
}

#[tokio::test]
async fn test_cancel_during_injection_aborts_it() {
    let recorder = MockRecorder::with_frames(vec![vec![0u8; 3200]]);
    // Slow enough that the cancel lands while the injector is mid-flight.
    let injector = MockInjector::slow(Duration::from_millis(300));
    let pipeline = Arc::new(Pipeline::new(
        batch_factories(recorder.clone(), "never typed", injector.clone(), None),
        options(),
    ));

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    let join = tokio::spawn(async move { runner.run(&root_run).await });

    wait_for_status(&pipeline, SessionStatus::Transcribing).await;
    pipeline.post_action(Action::Inject);
    wait_for_status(&pipeline, SessionStatus::Injecting).await;
    pipeline.post_action(Action::Cancel);
    join.await.unwrap();

    // The in-flight injection was dropped before it could deliver.
    assert_eq!(pipeline.status(), SessionStatus::Idle);
    assert!(injector.texts().is_empty());
    assert!(!recorder.is_recording());
}

#[tokio::test]
async fn test_stop_during_injection_aborts_it() {
    let recorder = MockRecorder::with_frames(vec![vec![0u8; 3200]]);
    let injector = MockInjector::slow(Duration::from_millis(300));
    let pipeline = Arc::new(Pipeline::new(
        batch_factories(recorder, "never typed", injector.clone(), None),
        options(),
    ));

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    let join = tokio::spawn(async move { runner.run(&root_run).await });

    wait_for_status(&pipeline, SessionStatus::Transcribing).await;
    pipeline.post_action(Action::Inject);
    wait_for_status(&pipeline, SessionStatus::Injecting).await;
    pipeline.stop();
    join.await.unwrap();

    assert_eq!(pipeline.status(), SessionStatus::Idle);
    assert!(injector.texts().is_empty());
}

#[tokio::test]
async fn test_llm_rewrite_replaces_raw_transcript() {
    let recorder = MockRecorder::with_frames(vec![vec![0u8; 3200]]);
    let injector = MockInjector::new();
    let rewriter: Arc<dyn TextRewriter> = Arc::new(MockRewriter {
        reply: "Hello, World!".to_string(),
    });
    let pipeline = Arc::new(Pipeline::new(
        batch_factories(
            recorder,
            "um hello um world",
            injector.clone(),
            Some(rewriter),
        ),
        options(),
    ));

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    let join = tokio::spawn(async move { runner.run(&root_run).await });

    wait_for_status(&pipeline, SessionStatus::Transcribing).await;
    pipeline.post_action(Action::Inject);
    join.await.unwrap();

    // Only the rewritten text reaches the injector.
    assert_eq!(injector.texts(), vec!["Hello, World!".to_string()]);
}

#[tokio::test]
async fn test_inject_before_transcribing_is_ignored() {
    // No frames: the pipeline stays in Recording, where Inject is a no-op.
    let recorder = MockRecorder::with_frames(Vec::new());
    let injector = MockInjector::new();
    let pipeline = Arc::new(Pipeline::new(
        batch_factories(recorder, "never", injector.clone(), None),
        options(),
    ));

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    let join = tokio::spawn(async move { runner.run(&root_run).await });

    wait_for_status(&pipeline, SessionStatus::Recording).await;
    pipeline.post_action(Action::Inject);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pipeline.status(), SessionStatus::Recording);
    assert!(injector.texts().is_empty());

    pipeline.post_action(Action::Cancel);
    join.await.unwrap();
    assert_eq!(pipeline.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn test_status_sequence_is_monotonic() {
    let recorder = MockRecorder::with_frames(vec![vec![0u8; 3200]]);
    let injector = MockInjector::slow(Duration::from_millis(100));
    let pipeline = Arc::new(Pipeline::new(
        batch_factories(recorder, "ordered", injector, None),
        options(),
    ));

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    let join = tokio::spawn(async move { runner.run(&root_run).await });

    wait_for_status(&pipeline, SessionStatus::Recording).await;
    wait_for_status(&pipeline, SessionStatus::Transcribing).await;
    pipeline.post_action(Action::Inject);
    wait_for_status(&pipeline, SessionStatus::Injecting).await;
    wait_for_status(&pipeline, SessionStatus::Idle).await;
    join.await.unwrap();
}

#[tokio::test]
async fn test_recorder_start_failure_is_fatal() {
    let injector = MockInjector::new();
    let pipeline = Arc::new(Pipeline::new(
        batch_factories(MockRecorder::failing(), "never", injector.clone(), None),
        options(),
    ));
    let mut errors = pipeline.errors();

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    runner.run(&root_run).await;

    assert_eq!(pipeline.status(), SessionStatus::Idle);
    let error = errors.try_recv().unwrap();
    assert_eq!(error.title, "Recording failed to start");
    assert!(injector.texts().is_empty());
}

#[tokio::test]
async fn test_transcriber_construction_failure_is_fatal() {
    let recorder = MockRecorder::with_frames(vec![vec![0u8; 3200]]);
    let injector = MockInjector::new();
    let factories = Factories {
        recorder: recorder.clone(),
        transcriber: Box::new(|| Err(SttError::Config("no API key".to_string()))),
        rewriter: None,
        injector: injector.clone(),
    };
    let pipeline = Arc::new(Pipeline::new(factories, options()));
    let mut errors = pipeline.errors();

    let root = CancellationToken::new();
    pipeline.run(&root).await;

    assert_eq!(pipeline.status(), SessionStatus::Idle);
    let error = errors.try_recv().unwrap();
    assert_eq!(error.title, "Transcriber setup failed");
    assert!(!recorder.is_recording());
}

#[tokio::test]
async fn test_fatal_stream_error_ends_session() {
    let recorder = MockRecorder::with_frames(vec![vec![0u8; 3200]]);
    let injector = MockInjector::new();
    let err_injector: Arc<StdMutex<Option<mpsc::Sender<SttError>>>> =
        Arc::new(StdMutex::new(None));
    let err_injector_for_factory = err_injector.clone();
    let factories = Factories {
        recorder: recorder.clone(),
        transcriber: Box::new(move || {
            Ok(Box::new(ScriptedTranscriber::new(
                "partial",
                err_injector_for_factory.clone(),
            )) as Box<dyn Transcriber>)
        }),
        rewriter: None,
        injector: injector.clone(),
    };
    let pipeline = Arc::new(Pipeline::new(factories, options()));

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    let join = tokio::spawn(async move { runner.run(&root_run).await });

    wait_for_status(&pipeline, SessionStatus::Transcribing).await;
    let err_tx = err_injector.lock().unwrap().clone().unwrap();
    err_tx
        .send(SttError::Auth("key revoked".to_string()))
        .await
        .unwrap();

    join.await.unwrap();
    assert_eq!(pipeline.status(), SessionStatus::Idle);
    assert!(injector.texts().is_empty());
}

#[tokio::test]
async fn test_max_session_duration_returns_to_idle() {
    let recorder = MockRecorder::with_frames(vec![vec![0u8; 3200]]);
    let injector = MockInjector::new();
    let mut opts = options();
    opts.max_session = Duration::from_millis(100);
    let pipeline = Arc::new(Pipeline::new(
        batch_factories(recorder.clone(), "late", injector.clone(), None),
        opts,
    ));

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    let join = tokio::spawn(async move { runner.run(&root_run).await });

    join.await.unwrap();
    assert_eq!(pipeline.status(), SessionStatus::Idle);
    assert!(injector.texts().is_empty());
    assert!(!recorder.is_recording());
}

#[tokio::test]
async fn test_stop_cancels_running_session() {
    let recorder = MockRecorder::with_frames(vec![vec![0u8; 3200]]);
    let pipeline = Arc::new(Pipeline::new(
        batch_factories(recorder, "stopped", MockInjector::new(), None),
        options(),
    ));

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    let join = tokio::spawn(async move { runner.run(&root_run).await });

    wait_for_status(&pipeline, SessionStatus::Transcribing).await;
    pipeline.stop();
    join.await.unwrap();
    assert_eq!(pipeline.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn test_empty_transcript_skips_injection() {
    let recorder = MockRecorder::with_frames(vec![vec![0u8; 3200]]);
    let injector = MockInjector::new();
    let pipeline = Arc::new(Pipeline::new(
        batch_factories(recorder, "", injector.clone(), None),
        options(),
    ));

    let root = CancellationToken::new();
    let runner = pipeline.clone();
    let root_run = root.clone();
    let join = tokio::spawn(async move { runner.run(&root_run).await });

    wait_for_status(&pipeline, SessionStatus::Transcribing).await;
    pipeline.post_action(Action::Inject);
    join.await.unwrap();
    assert!(injector.texts().is_empty());
}
