//! ElevenLabs speech-to-text adapters (batch upload and realtime WebSocket).

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::multipart;
use serde_json::json;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::providers::Endpoint;
use crate::stt::ws::{StreamingProtocol, WireEvent, WsRequest};
use crate::stt::SttError;

use super::BatchAdapter;

/// Batch upload to the ElevenLabs speech-to-text endpoint.
pub struct ElevenLabsAdapter {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    language: String,
    keywords: Vec<String>,
}

impl ElevenLabsAdapter {
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
}

#[async_trait::async_trait]
impl BatchAdapter for ElevenLabsAdapter {
    async fn transcribe(&self, wav: &[u8]) -> Result<String, SttError> {
        let part = multipart::Part::bytes(wav.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| SttError::Audio(format!("Failed to create multipart: {}", e)))?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model_id", self.model.clone());
        if !self.language.is_empty() {
            form = form.text("language_code", self.language.clone());
        }
        if !self.keywords.is_empty() {
            let keyterms = serde_json::to_string(&self.keywords)
                .map_err(|e| SttError::Audio(format!("Failed to encode keyterms: {}", e)))?;
            form = form.text("keyterms", keyterms);
        }

        let response = self
            .client
            .post(&self.url)
            .header("xi-api-key", &self.api_key)
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
                    "ElevenLabs rejected the API key ({}): {}",
                    status, body
                )));
            }
            return Err(SttError::Api(format!(
                "ElevenLabs API error ({}): {}",
                status, body
            )));
        }

        let result: serde_json::Value = response.json().await?;
        Ok(result["text"].as_str().unwrap_or("").to_string())
    }

    fn name(&self) -> &'static str {
        "elevenlabs"
    }
}

/// ElevenLabs realtime protocol.
///
/// Audio goes out as JSON chunks with base64 PCM; the commit flag on an empty
/// chunk flushes the recognizer, which answers with a `committed_transcript`
/// message.
pub struct ElevenLabsStream {
    endpoint: Endpoint,
    api_key: String,
    model: String,
    language: String,
}

impl ElevenLabsStream {
    pub fn new(endpoint: Endpoint, api_key: String, model: &str, language: String) -> Self {
        Self {
            endpoint,
            api_key,
            model: model.to_string(),
            language,
        }
    }

    fn url(&self) -> String {
        let mut url = format!(
            "{}?model_id={}&audio_format=pcm_16000&commit_strategy=vad",
            self.endpoint.url(),
            self.model
        );
        if !self.language.is_empty() {
            url.push_str("&language_code=");
            url.push_str(&self.language);
        }
        url
    }
}

impl StreamingProtocol for ElevenLabsStream {
    fn name(&self) -> &'static str {
        "elevenlabs-realtime"
    }

    fn request(&self) -> Result<WsRequest, SttError> {
        let mut request = self
            .url()
            .into_client_request()
            .map_err(|e| SttError::Config(format!("Invalid ElevenLabs URL: {}", e)))?;
        request.headers_mut().insert(
            "xi-api-key",
            self.api_key
                .parse()
                .map_err(|_| SttError::Config("Invalid ElevenLabs API key format".into()))?,
        );
        Ok(request)
    }

    fn audio_message(&self, pcm: &[u8]) -> Message {
        Message::text(
            json!({
                "message_type": "input_audio_chunk",
                "audio_base_64": BASE64.encode(pcm),
                "commit": false,
                "sample_rate": 16_000,
            })
            .to_string(),
        )
    }

    fn finalize_message(&self) -> Option<Message> {
        Some(Message::text(
            json!({
                "message_type": "input_audio_chunk",
                "audio_base_64": "",
                "commit": true,
                "sample_rate": 16_000,
            })
            .to_string(),
        ))
    }

    fn parse(&self, raw: &str) -> WireEvent {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
            return WireEvent::Ignore;
        };
        match value["message_type"].as_str() {
            Some("committed_transcript") => WireEvent::Transcript {
                text: value["text"].as_str().unwrap_or("").to_string(),
                is_final: true,
            },
            Some("interim_transcript") | Some("partial_transcript") => WireEvent::Transcript {
                text: value["text"].as_str().unwrap_or("").to_string(),
                is_final: false,
            },
            Some("error") => WireEvent::Error {
                message: value["error"]
                    .as_str()
                    .or_else(|| value["message"].as_str())
                    .unwrap_or("ElevenLabs error")
                    .to_string(),
                fatal: true,
            },
            _ => WireEvent::Ignore,
        }
    }
}
