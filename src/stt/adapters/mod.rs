//! Concrete transcription backends.
//!
//! Two capability interfaces replace an inheritance tree: [`BatchAdapter`]
//! for one-shot uploads and [`StreamingAdapter`] for live WebSocket sessions.
//! The factory in `stt` selects the implementation from the model's adapter
//! tag.

pub mod deepgram;
pub mod elevenlabs;
pub mod openai;
pub mod openai_realtime;
pub mod whisper_local;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::SttError;

/// One-shot transcription of a complete WAV recording.
#[async_trait::async_trait]
pub trait BatchAdapter: Send + Sync {
    async fn transcribe(&self, wav: &[u8]) -> Result<String, SttError>;

    fn name(&self) -> &'static str;
}

/// One item on a streaming adapter's result stream: either transcript text
/// with a finality flag, or an error the caller classifies.
#[derive(Debug)]
pub struct StreamResult {
    pub text: String,
    pub is_final: bool,
    pub error: Option<SttError>,
}

impl StreamResult {
    pub fn transcript(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
            error: None,
        }
    }

    pub fn error(error: SttError) -> Self {
        Self {
            text: String::new(),
            is_final: false,
            error: Some(error),
        }
    }
}

/// A live bidirectional transcription session.
///
/// `start` performs the handshake and returns the result stream; audio is
/// pushed with `send_chunk`. `finalize` signals end-of-audio and blocks until
/// the remote has emitted its last final result or the supplied context
/// expires; only then may the caller cancel and `close`.
#[async_trait::async_trait]
pub trait StreamingAdapter: Send + Sync {
    async fn start(
        &self,
        ctx: &CancellationToken,
    ) -> Result<mpsc::Receiver<StreamResult>, SttError>;

    async fn send_chunk(&self, pcm: &[u8]) -> Result<(), SttError>;

    async fn finalize(&self, ctx: &CancellationToken) -> Result<(), SttError>;

    async fn close(&self);

    fn name(&self) -> &'static str;
}
