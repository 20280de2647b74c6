//! Batch transcriber: accumulate PCM, wrap as WAV, one upload on stop.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::recorder::AudioFrame;

use super::adapters::BatchAdapter;
use super::{SttError, Transcriber, TranscriberKind};

/// Wrap raw PCM 16-bit LE samples in a canonical RIFF/WAVE container.
///
/// The header is the fixed 44-byte PCM layout: RIFF/WAVE magics, fmt chunk
/// with format tag 1, the given channel count and sample rate, 16-bit
/// samples, and a data chunk holding the samples verbatim.
pub fn wrap_wav(pcm: &[u8], channels: u16, sample_rate: u32) -> Result<Vec<u8>, SttError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len()));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| SttError::Audio(format!("Failed to create WAV writer: {}", e)))?;
        for sample in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .map_err(|e| SttError::Audio(format!("Failed to write WAV sample: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| SttError::Audio(format!("Failed to finalize WAV: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

/// Accumulates every frame's bytes; on `stop`, wraps them as WAV and makes a
/// single adapter call. Empty audio short-circuits with an empty transcript
/// and no backend call.
pub struct BatchTranscriber {
    adapter: Arc<dyn BatchAdapter>,
    channels: u16,
    sample_rate: u32,
    pcm: Arc<StdMutex<Vec<u8>>>,
    text: StdMutex<String>,
    fatal: StdMutex<Option<String>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl BatchTranscriber {
    pub fn new(adapter: Arc<dyn BatchAdapter>, channels: u16, sample_rate: u32) -> Self {
        Self {
            adapter,
            channels,
            sample_rate,
            pcm: Arc::new(StdMutex::new(Vec::new())),
            text: StdMutex::new(String::new()),
            fatal: StdMutex::new(None),
            task: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Bytes accumulated so far.
    pub fn buffered_bytes(&self) -> usize {
        self.pcm.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn latched_result(&self) -> Result<(), SttError> {
        match self.fatal.lock().ok().and_then(|g| g.clone()) {
            Some(message) => Err(SttError::Fatal(Box::new(SttError::Api(message)))),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Transcriber for BatchTranscriber {
    async fn start(
        &self,
        ctx: &CancellationToken,
        mut frames: mpsc::Receiver<AudioFrame>,
    ) -> Result<mpsc::Receiver<SttError>, SttError> {
        let (err_tx, err_rx) = mpsc::channel(10);

        let pcm = self.pcm.clone();
        let token = ctx.child_token();
        let handle = tokio::spawn(async move {
            // Accumulation produces no asynchronous errors; the sender is
            // held so the stream stays open while audio is flowing.
            let _err_tx = err_tx;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(frame) => {
                            if let Ok(mut buf) = pcm.lock() {
                                buf.extend_from_slice(&frame.data);
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        *self.task.lock().await = Some(handle);
        Ok(err_rx)
    }

    async fn stop(&self, ctx: &CancellationToken) -> Result<(), SttError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return self.latched_result();
        }

        // The frame sender is closed by the caller before stop, so the
        // accumulation task ends on its own.
        let task = self.task.lock().await.take();
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                log::warn!("BatchTranscriber: accumulation task join failed: {}", e);
            }
        }

        let pcm = self
            .pcm
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default();

        if pcm.is_empty() {
            log::info!("BatchTranscriber: no audio captured, skipping backend call");
            return Ok(());
        }

        let wav = wrap_wav(&pcm, self.channels, self.sample_rate)?;
        log::info!(
            "BatchTranscriber: transcribing {} bytes of audio via {}",
            pcm.len(),
            self.adapter.name()
        );

        let result = tokio::select! {
            _ = ctx.cancelled() => Err(SttError::Timeout),
            result = self.adapter.transcribe(&wav) => result,
        };

        match result {
            Ok(transcript) => {
                if let Ok(mut text) = self.text.lock() {
                    *text = transcript.trim().to_string();
                }
                Ok(())
            }
            Err(e) => {
                if let Ok(mut fatal) = self.fatal.lock() {
                    if fatal.is_none() {
                        *fatal = Some(e.to_string());
                    }
                }
                Err(e)
            }
        }
    }

    fn final_transcription(&self) -> String {
        self.text.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn kind(&self) -> TranscriberKind {
        TranscriberKind::Batch
    }
}
