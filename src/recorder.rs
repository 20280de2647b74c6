//! Audio capture via an external PipeWire capture subprocess.
//!
//! The recorder owns a `pw-record` child process writing raw PCM to stdout.
//! A capture task slices stdout into fixed-size frames and offers them to a
//! bounded queue with a non-blocking send: when the consumer is slow the new
//! frame is dropped and counted, never blocking the capture loop.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::RecordingConfig;

/// One fixed-size chunk of captured PCM with its capture timestamp.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

impl AudioFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            captured_at: Instant::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Recorder configuration error: {0}")]
    Config(String),

    #[error("Capture tool '{0}' not found on PATH")]
    ToolMissing(String),

    #[error("Failed to spawn capture process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Capture stream error: {0}")]
    Stream(String),

    #[error("Recorder is already running")]
    AlreadyRecording,
}

/// Source of audio frames consumed by the pipeline.
///
/// The production implementation is [`Recorder`]; tests substitute mocks.
#[async_trait::async_trait]
pub trait FrameSource: Send + Sync {
    /// Start capturing. Returns the frame stream and an error stream for
    /// capture failures after startup.
    async fn start(
        &self,
        ctx: &CancellationToken,
    ) -> Result<(mpsc::Receiver<AudioFrame>, mpsc::Receiver<RecorderError>), RecorderError>;

    /// Stop capturing. Idempotent; waits for the capture task to exit and
    /// the subprocess to be reaped before returning.
    async fn stop(&self);

    fn is_recording(&self) -> bool;
}

struct CaptureTask {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Owns the capture subprocess and the task slicing its stdout into frames.
pub struct Recorder {
    config: RecordingConfig,
    recording: Arc<AtomicBool>,
    task: Mutex<Option<CaptureTask>>,
}

impl Recorder {
    pub fn new(config: RecordingConfig) -> Self {
        Self {
            config,
            recording: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    fn validate(&self) -> Result<(), RecorderError> {
        if self.config.sample_rate == 0 {
            return Err(RecorderError::Config("sample rate must be positive".into()));
        }
        if self.config.channels == 0 {
            return Err(RecorderError::Config("channel count must be positive".into()));
        }
        if self.config.buffer_size == 0 {
            return Err(RecorderError::Config("buffer size must be positive".into()));
        }
        if self.config.format.is_empty() {
            return Err(RecorderError::Config("sample format must not be empty".into()));
        }

        // 16-bit frames should hold whole samples across all channels.
        let sample_stride = 2 * self.config.channels as usize;
        if self.config.format == "s16" && self.config.buffer_size % sample_stride != 0 {
            log::warn!(
                "Recorder: buffer size {} is not a multiple of {} bytes; frames will split samples",
                self.config.buffer_size,
                sample_stride
            );
        }
        Ok(())
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.tool);
        cmd.arg("--format")
            .arg(&self.config.format)
            .arg("--rate")
            .arg(self.config.sample_rate.to_string())
            .arg("--channels")
            .arg(self.config.channels.to_string());
        if let Some(device) = &self.config.device {
            cmd.arg("--target").arg(device);
        }
        cmd.arg("-")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Scan PATH for an executable, the same check a shell would do.
pub(crate) fn tool_on_path(tool: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(tool);
        candidate.is_file()
    })
}

#[async_trait::async_trait]
impl FrameSource for Recorder {
    async fn start(
        &self,
        ctx: &CancellationToken,
    ) -> Result<(mpsc::Receiver<AudioFrame>, mpsc::Receiver<RecorderError>), RecorderError> {
        self.validate()?;

        let mut slot = self.task.lock().await;
        if slot.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        if !tool_on_path(&self.config.tool) {
            return Err(RecorderError::ToolMissing(self.config.tool.clone()));
        }

        let mut child = self.build_command().spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecorderError::Config("capture process has no stdout".into()))?;
        let stderr = child.stderr.take();

        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(self.config.queue_capacity);
        let (err_tx, err_rx) = mpsc::channel::<RecorderError>(4);

        // Diagnostics from the capture tool, line by line.
        if let Some(stderr) = stderr {
            let tool = self.config.tool.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("{}: {}", tool, line);
                }
            });
        }

        let token = ctx.child_token();
        let capture_token = token.clone();
        let recording = self.recording.clone();
        let buffer_size = self.config.buffer_size;
        recording.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buf = vec![0u8; buffer_size];
            let mut dropped: u64 = 0;
            let mut last_drop_report = Instant::now();

            loop {
                tokio::select! {
                    _ = capture_token.cancelled() => break,
                    read = stdout.read(&mut buf) => match read {
                        // Clean EOF is normal shutdown.
                        Ok(0) => break,
                        Ok(n) => {
                            let frame = AudioFrame::new(buf[..n].to_vec());
                            match frame_tx.try_send(frame) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    dropped += 1;
                                    if last_drop_report.elapsed().as_secs() >= 1 {
                                        log::warn!(
                                            "Recorder: dropped {} frame(s) in the last second (consumer too slow)",
                                            dropped
                                        );
                                        dropped = 0;
                                        last_drop_report = Instant::now();
                                    }
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => break,
                            }
                        }
                        Err(e) => {
                            let _ = err_tx
                                .try_send(RecorderError::Stream(format!("read failed: {}", e)));
                            break;
                        }
                    },
                }
            }

            if dropped > 0 {
                log::warn!("Recorder: dropped {} frame(s) before shutdown", dropped);
            }

            // Reap the subprocess; pw-record exits promptly once killed.
            if let Err(e) = child.kill().await {
                log::debug!("Recorder: kill after capture loop: {}", e);
            }
            match child.wait().await {
                Ok(status) => log::debug!("Recorder: capture process exited: {}", status),
                Err(e) => log::warn!("Recorder: failed to reap capture process: {}", e),
            }
            recording.store(false, Ordering::SeqCst);
        });

        *slot = Some(CaptureTask { token, handle });
        log::info!(
            "Recorder: started '{}' ({} Hz, {} ch, {} byte frames)",
            self.config.tool,
            self.config.sample_rate,
            self.config.channels,
            self.config.buffer_size
        );
        Ok((frame_rx, err_rx))
    }

    async fn stop(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                log::warn!("Recorder: capture task join failed: {}", e);
            }
        }
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;

    fn config() -> RecordingConfig {
        RecordingConfig::default()
    }

    #[test]
    fn test_validate_rejects_zero_fields() {
        let mut cfg = config();
        cfg.sample_rate = 0;
        assert!(matches!(
            Recorder::new(cfg).validate(),
            Err(RecorderError::Config(_))
        ));

        let mut cfg = config();
        cfg.buffer_size = 0;
        assert!(Recorder::new(cfg).validate().is_err());

        let mut cfg = config();
        cfg.format = String::new();
        assert!(Recorder::new(cfg).validate().is_err());
    }

    #[test]
    fn test_validate_accepts_misaligned_buffer() {
        // Misalignment only warns; it is not rejected.
        let mut cfg = config();
        cfg.buffer_size = 3201;
        assert!(Recorder::new(cfg).validate().is_ok());
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_tool() {
        let mut cfg = config();
        cfg.tool = "definitely-not-a-real-capture-tool".to_string();
        let recorder = Recorder::new(cfg);
        let ctx = CancellationToken::new();
        match recorder.start(&ctx).await {
            Err(RecorderError::ToolMissing(tool)) => {
                assert_eq!(tool, "definitely-not-a-real-capture-tool")
            }
            other => panic!("expected ToolMissing, got {:?}", other.map(|_| ())),
        }
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_without_start() {
        let recorder = Recorder::new(config());
        recorder.stop().await;
        recorder.stop().await;
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_capture_from_stub_tool() {
        // Use `cat` as the capture tool: it copies stdin to stdout, and with a
        // null stdin it emits EOF immediately, exercising the clean-shutdown
        // path end to end.
        let mut cfg = config();
        cfg.tool = "cat".to_string();
        let recorder = Recorder::new(cfg);
        let ctx = CancellationToken::new();

        // `cat` rejects the pw-record style flags, so this spawn either fails
        // fast or the capture loop sees EOF/stderr. Either way stop() must
        // leave the recorder reaped and idle.
        if let Ok((_frames, _errs)) = recorder.start(&ctx).await {
            recorder.stop().await;
        }
        assert!(!recorder.is_recording());
    }
}
