//! OpenAI-compatible batch transcription adapter.
//!
//! Covers OpenAI, Groq and Mistral: all expose the same multipart
//! `/audio/transcriptions` shape and differ only in base URL and model IDs.

use std::time::Duration;

use reqwest::multipart;

use crate::providers::Endpoint;
use crate::stt::SttError;

use super::BatchAdapter;

pub struct OpenAiCompatibleAdapter {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    language: String,
    keywords: Vec<String>,
}

impl OpenAiCompatibleAdapter {
    pub fn new(
        endpoint: Endpoint,
        api_key: String,
        model: &str,
        language: String,
        keywords: Vec<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            url: endpoint.url(),
            api_key,
            model: model.to_string(),
            language,
            keywords,
        }
    }

    /// Constructor with a caller-supplied client, for tests.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn with_client(
        client: reqwest::Client,
        endpoint: Endpoint,
        api_key: String,
        model: &str,
        language: String,
        keywords: Vec<String>,
    ) -> Self {
        Self {
            client,
            url: endpoint.url(),
            api_key,
            model: model.to_string(),
            language,
            keywords,
        }
    }

    fn prompt(&self) -> Option<String> {
        if self.keywords.is_empty() {
            None
        } else {
            Some(self.keywords.join(", "))
        }
    }
}

#[async_trait::async_trait]
impl BatchAdapter for OpenAiCompatibleAdapter {
    async fn transcribe(&self, wav: &[u8]) -> Result<String, SttError> {
        let part = multipart::Part::bytes(wav.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| SttError::Audio(format!("Failed to create multipart: {}", e)))?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if !self.language.is_empty() {
            form = form.text("language", self.language.clone());
        }
        if let Some(prompt) = self.prompt() {
            form = form.text("prompt", prompt);
        }

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SttError::Timeout
                } else {
                    SttError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(SttError::Auth(format!(
                    "transcription endpoint rejected the API key ({}): {}",
                    status, body
                )));
            }
            return Err(SttError::Api(format!(
                "transcription API error ({}): {}",
                status, body
            )));
        }

        let result: serde_json::Value = response.json().await?;
        Ok(result["text"].as_str().unwrap_or("").to_string())
    }

    fn name(&self) -> &'static str {
        "openai-compatible"
    }
}
