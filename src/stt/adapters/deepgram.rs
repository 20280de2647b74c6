//! Deepgram adapters (pre-recorded batch and live WebSocket).

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::providers::Endpoint;
use crate::stt::ws::{StreamingProtocol, WireEvent, WsRequest};
use crate::stt::SttError;

use super::BatchAdapter;

/// Deepgram rejects bare `en`; the regional variant is what it documents.
pub(crate) fn normalize_language(language: &str) -> &str {
    if language == "en" {
        "en-US"
    } else {
        language
    }
}

/// Keyword boosting is not available on the nova-3 and flux families.
pub(crate) fn keywords_allowed(model: &str) -> bool {
    !(model.starts_with("nova-3") || model.starts_with("flux"))
}

/// Batch transcription against the pre-recorded endpoint: raw WAV body with
/// query-string options.
pub struct DeepgramAdapter {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    language: String,
    keywords: Vec<String>,
}

impl DeepgramAdapter {
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

    fn listen_url(&self) -> Result<Url, SttError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| SttError::Config(format!("Invalid Deepgram base URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("smart_format", "true")
            .append_pair("punctuate", "true");
        if !self.language.is_empty() {
            url.query_pairs_mut()
                .append_pair("language", normalize_language(&self.language));
        }
        if !self.keywords.is_empty() && keywords_allowed(&self.model) {
            url.query_pairs_mut()
                .append_pair("keywords", &self.keywords.join(","));
        }
        Ok(url)
    }
}

#[async_trait::async_trait]
impl BatchAdapter for DeepgramAdapter {
    async fn transcribe(&self, wav: &[u8]) -> Result<String, SttError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Token {}", self.api_key))
                .map_err(|e| SttError::Config(format!("Invalid API key format: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("audio/wav"));

        let url = self.listen_url()?;
        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(wav.to_vec())
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
                    "Deepgram rejected the API key ({}): {}",
                    status, body
                )));
            }
            return Err(SttError::Api(format!(
                "Deepgram API error ({}): {}",
                status, body
            )));
        }

        let result: serde_json::Value = response.json().await?;

        // { "results": { "channels": [{ "alternatives": [{ "transcript": "..." }] }] } }
        let text = result["results"]["channels"]
            .get(0)
            .and_then(|ch| ch["alternatives"].get(0))
            .and_then(|alt| alt["transcript"].as_str())
            .unwrap_or("")
            .to_string();
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "deepgram"
    }
}

/// Deepgram live protocol: binary PCM frames out, JSON `Results` frames in,
/// `CloseStream` to flush.
pub struct DeepgramStream {
    endpoint: Endpoint,
    api_key: String,
    model: String,
    language: String,
    keywords: Vec<String>,
}

impl DeepgramStream {
    pub fn new(
        endpoint: Endpoint,
        api_key: String,
        model: &str,
        language: String,
        keywords: Vec<String>,
    ) -> Self {
        Self {
            endpoint,
            api_key,
            model: model.to_string(),
            language,
            keywords,
        }
    }

    fn url(&self) -> String {
        let mut url = format!(
            "{}?model={}&encoding=linear16&sample_rate=16000&channels=1&interim_results=true&smart_format=true&punctuate=true",
            self.endpoint.url(),
            self.model
        );
        if !self.language.is_empty() {
            url.push_str("&language=");
            url.push_str(normalize_language(&self.language));
        }
        if !self.keywords.is_empty() && keywords_allowed(&self.model) {
            url.push_str("&keywords=");
            url.push_str(&self.keywords.join(","));
        }
        url
    }
}

impl StreamingProtocol for DeepgramStream {
    fn name(&self) -> &'static str {
        "deepgram-live"
    }

    fn request(&self) -> Result<WsRequest, SttError> {
        let mut request = self
            .url()
            .into_client_request()
            .map_err(|e| SttError::Config(format!("Invalid Deepgram URL: {}", e)))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Token {}", self.api_key)
                .parse()
                .map_err(|_| SttError::Config("Invalid Deepgram API key format".into()))?,
        );
        Ok(request)
    }

    fn audio_message(&self, pcm: &[u8]) -> Message {
        Message::binary(pcm.to_vec())
    }

    fn finalize_message(&self) -> Option<Message> {
        Some(Message::text(r#"{"type":"CloseStream"}"#.to_string()))
    }

    fn parse(&self, raw: &str) -> WireEvent {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
            return WireEvent::Ignore;
        };
        match value["type"].as_str() {
            Some("Results") => {
                let transcript = value["channel"]["alternatives"]
                    .get(0)
                    .and_then(|alt| alt["transcript"].as_str())
                    .unwrap_or("")
                    .to_string();
                let is_final = value["is_final"].as_bool().unwrap_or(false)
                    || value["speech_final"].as_bool().unwrap_or(false);
                WireEvent::Transcript {
                    text: transcript,
                    is_final,
                }
            }
            Some("Error") => WireEvent::Error {
                message: value["description"]
                    .as_str()
                    .or_else(|| value["message"].as_str())
                    .unwrap_or("Deepgram error")
                    .to_string(),
                fatal: true,
            },
            // Metadata, UtteranceEnd, SpeechStarted.
            _ => WireEvent::Ignore,
        }
    }
}
