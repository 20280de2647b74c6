//! OpenAI Realtime streaming adapter.
//!
//! The realtime API expects 24 kHz PCM, so chunks are upsampled from the
//! capture rate by linear interpolation before being base64-encoded into
//! `input_audio_buffer.append` events. Server-side VAD commits the buffer,
//! so finalize has nothing to flush.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::providers::Endpoint;
use crate::stt::ws::{StreamingProtocol, WireEvent, WsRequest};
use crate::stt::SttError;

/// Upsample 16 kHz PCM s16le to 24 kHz by linear interpolation (2:3 ratio).
pub fn resample_16k_to_24k(pcm: &[u8]) -> Vec<u8> {
    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if samples.is_empty() {
        return Vec::new();
    }

    let out_len = samples.len() * 3 / 2;
    let mut out = Vec::with_capacity(out_len * 2);
    for i in 0..out_len {
        let pos = i as f64 * 2.0 / 3.0;
        let idx = pos as usize;
        let frac = pos - idx as f64;
        let s0 = samples[idx.min(samples.len() - 1)] as f64;
        let s1 = samples[(idx + 1).min(samples.len() - 1)] as f64;
        let value = (s0 + (s1 - s0) * frac).round() as i32;
        out.extend_from_slice(&(value.clamp(i16::MIN as i32, i16::MAX as i32) as i16).to_le_bytes());
    }
    out
}

pub struct OpenAiRealtimeStream {
    endpoint: Endpoint,
    api_key: String,
    model: String,
}

impl OpenAiRealtimeStream {
    pub fn new(endpoint: Endpoint, api_key: String, model: &str) -> Self {
        Self {
            endpoint,
            api_key,
            model: model.to_string(),
        }
    }

    fn url(&self) -> String {
        format!("{}?model={}", self.endpoint.url(), self.model)
    }
}

impl StreamingProtocol for OpenAiRealtimeStream {
    fn name(&self) -> &'static str {
        "openai-realtime"
    }

    fn request(&self) -> Result<WsRequest, SttError> {
        let mut request = self
            .url()
            .into_client_request()
            .map_err(|e| SttError::Config(format!("Invalid OpenAI realtime URL: {}", e)))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|_| SttError::Config("Invalid OpenAI API key format".into()))?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse().expect("static header"));
        Ok(request)
    }

    fn audio_message(&self, pcm: &[u8]) -> Message {
        let resampled = resample_16k_to_24k(pcm);
        Message::text(
            json!({
                "type": "input_audio_buffer.append",
                "audio": BASE64.encode(&resampled),
            })
            .to_string(),
        )
    }

    fn finalize_message(&self) -> Option<Message> {
        // Server VAD commits the buffer on its own.
        None
    }

    fn parse(&self, raw: &str) -> WireEvent {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
            return WireEvent::Ignore;
        };
        match value["type"].as_str() {
            Some("conversation.item.input_audio_transcription.completed") => {
                WireEvent::Transcript {
                    text: value["transcript"].as_str().unwrap_or("").to_string(),
                    is_final: true,
                }
            }
            Some("conversation.item.input_audio_transcription.delta") => WireEvent::Transcript {
                text: value["delta"].as_str().unwrap_or("").to_string(),
                is_final: false,
            },
            Some("error") => WireEvent::Error {
                message: value["error"]["message"]
                    .as_str()
                    .unwrap_or("OpenAI realtime error")
                    .to_string(),
                fatal: true,
            },
            _ => WireEvent::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> OpenAiRealtimeStream {
        OpenAiRealtimeStream::new(
            Endpoint {
                base_url: "wss://api.openai.com",
                path: "/v1/realtime",
            },
            "sk-test".to_string(),
            "gpt-4o-transcribe",
        )
    }

    #[test]
    fn test_resample_preserves_duration_ratio() {
        // 16k → 24k is a 2:3 ratio: output bytes ≈ input bytes × 1.5.
        for samples in [160usize, 1600, 3200] {
            let pcm: Vec<u8> = (0..samples * 2).map(|i| (i % 251) as u8).collect();
            let out = resample_16k_to_24k(&pcm);
            let expected = pcm.len() * 3 / 2;
            let delta = out.len().abs_diff(expected);
            assert!(delta <= 4, "len {} vs expected {}", out.len(), expected);
        }
    }

    #[test]
    fn test_resample_empty_input() {
        assert!(resample_16k_to_24k(&[]).is_empty());
    }

    #[test]
    fn test_resample_interpolates_between_samples() {
        // Samples [0, 600]: position 2/3 of the way lands at 400.
        let pcm = [
            0i16.to_le_bytes(),
            600i16.to_le_bytes(),
        ]
        .concat();
        let out = resample_16k_to_24k(&pcm);
        let out_samples: Vec<i16> = out
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(out_samples.len(), 3);
        assert_eq!(out_samples[0], 0);
        assert_eq!(out_samples[1], 400);
    }

    #[test]
    fn test_request_headers() {
        let request = stream().request().unwrap();
        assert_eq!(request.headers()["Authorization"], "Bearer sk-test");
        assert_eq!(request.headers()["OpenAI-Beta"], "realtime=v1");
        assert!(request.uri().to_string().contains("model=gpt-4o-transcribe"));
    }

    #[test]
    fn test_audio_message_is_resampled_base64() {
        let pcm: Vec<u8> = vec![0u8; 320];
        let Message::Text(raw) = stream().audio_message(&pcm) else {
            panic!("expected text frame");
        };
        let value: serde_json::Value = serde_json::from_str(raw.as_str()).unwrap();
        assert_eq!(value["type"], "input_audio_buffer.append");
        let audio = BASE64.decode(value["audio"].as_str().unwrap()).unwrap();
        assert_eq!(audio.len(), 480);
    }

    #[test]
    fn test_finalize_is_noop() {
        assert!(stream().finalize_message().is_none());
    }

    #[test]
    fn test_parse_completed_event() {
        let raw = r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hi there"}"#;
        match stream().parse(raw) {
            WireEvent::Transcript { text, is_final } => {
                assert_eq!(text, "hi there");
                assert!(is_final);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_event_is_fatal() {
        let raw = r#"{"type":"error","error":{"message":"invalid_api_key"}}"#;
        assert!(matches!(
            stream().parse(raw),
            WireEvent::Error { fatal: true, .. }
        ));
    }

    #[test]
    fn test_parse_ignores_session_events() {
        assert!(matches!(
            stream().parse(r#"{"type":"session.created"}"#),
            WireEvent::Ignore
        ));
    }
}
