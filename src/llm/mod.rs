//! Optional LLM rewrite of the raw transcript.
//!
//! Dictated text is cleaned up (stutters, fillers, punctuation, grammar)
//! through an OpenAI-compatible Chat Completions call. The system prompt is
//! assembled from the enabled cleanup flags in `prompts`.

mod prompts;

pub use self::prompts::{build_system_prompt, build_user_message, CleanupFlags};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::providers::{self, ModelKind};

/// Default timeout for LLM API requests.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(30);

const CHAT_TEMPERATURE: f32 = 0.3;
const CHAT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("No API key configured for provider: {0}")]
    NoApiKey(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Rewrites transcripts. The production implementation is
/// [`LlmProcessor`]; tests substitute mocks.
#[async_trait::async_trait]
pub trait TextRewriter: Send + Sync {
    async fn rewrite(&self, transcript: &str) -> Result<String, LlmError>;

    fn name(&self) -> &'static str;

    fn model(&self) -> &str;
}

/// Configuration for the rewrite stage.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: String,
    /// Empty selects the provider's default LLM model.
    pub model: String,
    pub flags: CleanupFlags,
    pub custom_prompt: Option<String>,
    pub keywords: Vec<String>,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_section(section: &crate::config::LlmSection) -> Self {
        Self {
            provider: section.provider.clone(),
            api_key: section.resolve_api_key(),
            model: section.model.clone(),
            flags: CleanupFlags {
                remove_stutters: section.remove_stutters,
                add_punctuation: section.add_punctuation,
                fix_grammar: section.fix_grammar,
                remove_filler_words: section.remove_filler_words,
            },
            custom_prompt: section.custom_prompt.clone(),
            keywords: section.keywords.clone(),
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Rewrite stage backed by an OpenAI-compatible Chat Completions endpoint.
pub struct LlmProcessor {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    custom_prompt: Option<String>,
    timeout: Duration,
}

impl LlmProcessor {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let base = providers::base_provider_name(&config.provider);
        let provider = providers::provider(base)
            .ok_or_else(|| LlmError::Config(format!("Unknown LLM provider: {}", base)))?;

        let model = if config.model.is_empty() {
            provider
                .default_model(ModelKind::Llm)
                .ok_or_else(|| {
                    LlmError::Config(format!("Provider '{}' has no LLM models", provider.name))
                })?
        } else {
            provider.model(&config.model).ok_or_else(|| {
                LlmError::Config(format!(
                    "Unknown LLM model '{}' for provider '{}'",
                    config.model, provider.name
                ))
            })?
        };
        if model.kind != ModelKind::Llm {
            return Err(LlmError::Config(format!(
                "Model '{}' is not an LLM model",
                model.id
            )));
        }

        if provider.requires_api_key && config.api_key.is_empty() {
            return Err(LlmError::NoApiKey(provider.name.to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url: model.endpoint.url(),
            api_key: config.api_key.clone(),
            model: model.id.to_string(),
            system_prompt: build_system_prompt(&config.flags, &config.keywords),
            custom_prompt: config.custom_prompt.clone(),
            timeout: config.timeout,
        })
    }
}

#[async_trait::async_trait]
impl TextRewriter for LlmProcessor {
    async fn rewrite(&self, transcript: &str) -> Result<String, LlmError> {
        // Empty input passes through unchanged, no API call.
        if transcript.trim().is_empty() {
            return Ok(transcript.to_string());
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: self.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_user_message(self.custom_prompt.as_deref(), transcript),
                },
            ],
            max_tokens: CHAT_MAX_TOKENS,
            temperature: CHAT_TEMPERATURE,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout)
                } else {
                    LlmError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(LlmError::Api(format!(
                    "LLM API error ({}): {}",
                    status, parsed.error.message
                )));
            }
            return Err(LlmError::Api(format!(
                "LLM API error ({}): {}",
                status, body
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        response_json
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| LlmError::InvalidResponse("No response choices returned".to_string()))
    }

    fn name(&self) -> &'static str {
        "llm"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlmConfig {
        LlmConfig {
            provider: "openai".to_string(),
            api_key: "sk-test".to_string(),
            model: String::new(),
            flags: CleanupFlags::default(),
            custom_prompt: None,
            keywords: Vec::new(),
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    #[test]
    fn test_default_model_resolution() {
        let processor = LlmProcessor::new(&config()).unwrap();
        assert_eq!(processor.model(), "gpt-4o-mini");
        assert_eq!(processor.url, "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_groq_endpoint_resolution() {
        let mut cfg = config();
        cfg.provider = "groq".to_string();
        cfg.api_key = "gsk_test".to_string();
        cfg.model = "llama-3.3-70b-versatile".to_string();
        let processor = LlmProcessor::new(&cfg).unwrap();
        assert_eq!(
            processor.url,
            "https://api.groq.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let mut cfg = config();
        cfg.api_key = String::new();
        assert!(matches!(
            LlmProcessor::new(&cfg),
            Err(LlmError::NoApiKey(_))
        ));
    }

    #[test]
    fn test_transcription_model_is_rejected() {
        let mut cfg = config();
        cfg.model = "whisper-1".to_string();
        assert!(matches!(LlmProcessor::new(&cfg), Err(LlmError::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_input_passes_through_without_call() {
        // The URL is unreachable, so any API call would fail: empty input
        // must short-circuit before that.
        let processor = LlmProcessor::new(&config()).unwrap();
        assert_eq!(processor.rewrite("").await.unwrap(), "");
        assert_eq!(processor.rewrite("   ").await.unwrap(), "   ");
    }
}
