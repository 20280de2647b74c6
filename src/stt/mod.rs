//! Speech-to-text transcription.
//!
//! Two transcriber shapes share one contract: the batch transcriber
//! accumulates PCM and makes a single upload when the session stops, the
//! streaming transcriber feeds a live WebSocket and accumulates final results
//! as they arrive. The factory maps a `(provider, model, streaming)` selection
//! onto a concrete adapter; it is the only place that switches on the adapter
//! tag.

pub mod adapters;
pub mod batch;
pub mod streaming;
pub mod ws;

pub use self::adapters::{BatchAdapter, StreamResult, StreamingAdapter};
pub use self::batch::BatchTranscriber;
pub use self::streaming::StreamingTranscriber;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::providers::{self, AdapterKind, ModelKind};
use crate::recorder::AudioFrame;

use self::adapters::deepgram::{DeepgramAdapter, DeepgramStream};
use self::adapters::elevenlabs::{ElevenLabsAdapter, ElevenLabsStream};
use self::adapters::openai::OpenAiCompatibleAdapter;
use self::adapters::openai_realtime::OpenAiRealtimeStream;
use self::adapters::whisper_local::WhisperLocalAdapter;
use self::ws::WsAdapter;

/// Errors that can occur during transcription.
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("WebSocket error: {0}")]
    Socket(String),

    #[error("Audio processing error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout: transcription took too long")]
    Timeout,

    #[error("Fatal transcription error: {0}")]
    Fatal(#[source] Box<SttError>),
}

/// Whether an error must end the session.
///
/// Authentication failures, explicit provider error frames and configuration
/// errors end the session; network and socket errors are transient and the
/// adapters recover from them via reconnection.
pub fn is_fatal(error: &SttError) -> bool {
    matches!(
        error,
        SttError::Fatal(_) | SttError::Auth(_) | SttError::Provider(_) | SttError::Config(_)
    )
}

/// Which shape a transcriber has; drives when the pipeline starts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriberKind {
    Batch,
    Streaming,
}

/// Common contract for batch and streaming transcribers.
///
/// `start` returns promptly after any handshake; transcription proceeds
/// concurrently until `stop`, at which point the transcriber finalizes and
/// `final_transcription` returns the accumulated text. The caller owns the
/// closure of the frame stream.
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn start(
        &self,
        ctx: &CancellationToken,
        frames: mpsc::Receiver<AudioFrame>,
    ) -> Result<mpsc::Receiver<SttError>, SttError>;

    /// Finalize and stop. Idempotent: a second call returns the same outcome
    /// without contacting the backend again. The supplied context bounds the
    /// finalize handshake so a stuck remote cannot block shutdown.
    async fn stop(&self, ctx: &CancellationToken) -> Result<(), SttError>;

    /// Accumulated transcript so far; complete after `stop` returns.
    fn final_transcription(&self) -> String;

    fn kind(&self) -> TranscriberKind;
}

impl std::fmt::Debug for dyn Transcriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transcriber({:?})", self.kind())
    }
}

/// Selection handed to the factory.
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    pub provider_name: String,
    pub api_key: String,
    /// Empty means auto-detect.
    pub language: String,
    pub model_id: String,
    pub keywords: Vec<String>,
    /// Thread count for local whisper inference.
    pub cpu_threads: Option<u16>,
    pub streaming: bool,
    pub channels: u16,
    pub sample_rate: u32,
}

impl TranscriberConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            provider_name: config.transcription.provider.clone(),
            api_key: config.transcription.resolve_api_key(),
            language: config.transcription.language.clone(),
            model_id: config.transcription.model.clone(),
            keywords: config.transcription.keywords.clone(),
            cpu_threads: config.transcription.cpu_threads,
            streaming: config.transcription.streaming,
            channels: config.recording.channels,
            sample_rate: config.recording.sample_rate,
        }
    }
}

/// Construct the transcriber for a selection.
///
/// Resolves the provider and model, enforces API-key presence, downgrades an
/// unsupported language to auto with a warning, decides streaming-vs-batch,
/// and wraps the concrete adapter in the matching transcriber. Errors here
/// are construction-time failures and never reach the pipeline error channel.
pub fn build_transcriber(config: &TranscriberConfig) -> Result<Box<dyn Transcriber>, SttError> {
    let base = providers::base_provider_name(&config.provider_name);
    let provider = providers::provider(base)
        .ok_or_else(|| SttError::Config(format!("Unknown provider: {}", base)))?;

    if provider.requires_api_key {
        if config.api_key.is_empty() {
            let hint = providers::env_var_for_provider(base).unwrap_or("the environment");
            return Err(SttError::Config(format!(
                "Provider '{}' requires an API key (set transcription.api_key or {})",
                provider.name, hint
            )));
        }
        if !(provider.validate_key)(&config.api_key) {
            log::warn!(
                "API key for '{}' does not match the provider's usual format",
                provider.name
            );
        }
    }

    let model = match provider.model(&config.model_id) {
        Some(m) => m,
        None => {
            let fallback = provider.default_model(ModelKind::Transcription).ok_or_else(|| {
                SttError::Config(format!(
                    "Provider '{}' has no transcription models",
                    provider.name
                ))
            })?;
            log::warn!(
                "Model '{}' not found for provider '{}', using default '{}'",
                config.model_id,
                provider.name,
                fallback.id
            );
            fallback
        }
    };

    if model.kind != ModelKind::Transcription {
        return Err(SttError::Config(format!(
            "Model '{}' is not a transcription model",
            model.id
        )));
    }

    let mut language = config.language.clone();
    if !model.supports_language(&language) {
        if let Err(msg) = providers::validate_model_language(provider, model, &language) {
            log::warn!("{}; falling back to automatic language detection", msg);
        }
        language.clear();
    }

    let streaming = config.streaming && model.supports_streaming;
    if !streaming && !model.supports_batch {
        return Err(SttError::Config(format!(
            "Model '{}' only supports streaming; enable streaming in the config",
            model.display_name
        )));
    }

    if streaming {
        let adapter_kind = model.streaming_adapter.unwrap_or(model.adapter);
        let endpoint = model.streaming_endpoint.unwrap_or(model.endpoint);
        let protocol: Arc<dyn ws::StreamingProtocol> = match adapter_kind {
            AdapterKind::ElevenLabsRealtime => Arc::new(ElevenLabsStream::new(
                endpoint,
                config.api_key.clone(),
                model.id,
                language,
            )),
            AdapterKind::DeepgramRealtime => Arc::new(DeepgramStream::new(
                endpoint,
                config.api_key.clone(),
                model.id,
                language,
                config.keywords.clone(),
            )),
            AdapterKind::OpenAiRealtime => Arc::new(OpenAiRealtimeStream::new(
                endpoint,
                config.api_key.clone(),
                model.id,
            )),
            other => {
                return Err(SttError::Config(format!(
                    "Adapter {:?} does not support streaming",
                    other
                )))
            }
        };
        let adapter = Arc::new(WsAdapter::new(protocol));
        Ok(Box::new(StreamingTranscriber::new(adapter)))
    } else {
        let adapter: Arc<dyn BatchAdapter> = match model.adapter {
            AdapterKind::OpenAiCompatible => Arc::new(OpenAiCompatibleAdapter::new(
                model.endpoint,
                config.api_key.clone(),
                model.id,
                language,
                config.keywords.clone(),
            )),
            AdapterKind::ElevenLabs => Arc::new(ElevenLabsAdapter::new(
                model.endpoint,
                config.api_key.clone(),
                model.id,
                language,
                config.keywords.clone(),
            )),
            AdapterKind::Deepgram => Arc::new(DeepgramAdapter::new(
                model.endpoint,
                config.api_key.clone(),
                model.id,
                language,
                config.keywords.clone(),
            )),
            AdapterKind::WhisperLocal => Arc::new(WhisperLocalAdapter::new(
                model,
                language,
                config.cpu_threads,
            )?),
            other => {
                return Err(SttError::Config(format!(
                    "Adapter {:?} does not support batch transcription",
                    other
                )))
            }
        };
        Ok(Box::new(BatchTranscriber::new(
            adapter,
            config.channels,
            config.sample_rate,
        )))
    }
}
