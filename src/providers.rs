//! Static catalog of transcription and LLM providers.
//!
//! The catalog is a process-wide constant: lookups are pure functions over
//! `const` tables, so no synchronization is needed after process start. The
//! factory in `stt` is the only place that switches on an adapter tag.

use std::path::PathBuf;

use crate::config::APP_NAME;

/// What a model is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Transcription,
    Llm,
}

/// Discriminator selecting the concrete backend implementation for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// Multipart upload to an OpenAI-compatible `/audio/transcriptions` endpoint.
    OpenAiCompatible,
    /// ElevenLabs speech-to-text multipart upload.
    ElevenLabs,
    /// Deepgram pre-recorded audio endpoint (raw WAV body).
    Deepgram,
    /// Local whisper.cpp CLI invocation.
    WhisperLocal,
    /// ElevenLabs realtime WebSocket.
    ElevenLabsRealtime,
    /// Deepgram live WebSocket.
    DeepgramRealtime,
    /// OpenAI Realtime WebSocket (24 kHz input).
    OpenAiRealtime,
}

/// HTTP or WebSocket endpoint split into base URL and path so tests and
/// self-hosted deployments can swap the base.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub base_url: &'static str,
    pub path: &'static str,
}

impl Endpoint {
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, self.path)
    }
}

/// Downloadable file backing a local model.
#[derive(Debug, Clone, Copy)]
pub struct LocalFile {
    pub filename: &'static str,
    pub human_size: &'static str,
    pub download_url: &'static str,
}

/// A single model a provider exposes.
#[derive(Debug, Clone, Copy)]
pub struct ModelDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub kind: ModelKind,
    pub supports_batch: bool,
    pub supports_streaming: bool,
    pub is_local: bool,
    pub adapter: AdapterKind,
    /// Adapter used for the streaming path when it differs from `adapter`.
    pub streaming_adapter: Option<AdapterKind>,
    pub endpoint: Endpoint,
    pub streaming_endpoint: Option<Endpoint>,
    /// Supported language codes; empty means auto-detect only.
    pub languages: &'static [&'static str],
    pub local_file: Option<LocalFile>,
}

impl ModelDescriptor {
    /// Empty string (auto) is always accepted.
    pub fn supports_language(&self, language: &str) -> bool {
        language.is_empty() || self.languages.contains(&language)
    }

    /// Path of the downloaded model file under the XDG data directory.
    pub fn local_path(&self) -> Option<PathBuf> {
        let file = self.local_file?;
        let dir = dirs::data_dir()?;
        Some(dir.join(APP_NAME).join("models/whisper").join(file.filename))
    }

    /// Whether the local model file is present on disk.
    pub fn is_downloaded(&self) -> bool {
        self.local_path().map(|p| p.exists()).unwrap_or(false)
    }
}

/// A provider and its model list.
#[derive(Debug, Clone, Copy)]
pub struct ProviderDescriptor {
    pub name: &'static str,
    pub requires_api_key: bool,
    /// Cheap shape check for a configured key; catches pasted-wrong keys early.
    pub validate_key: fn(&str) -> bool,
    pub docs_url: &'static str,
    pub models: &'static [ModelDescriptor],
}

impl ProviderDescriptor {
    pub fn model(&self, id: &str) -> Option<&'static ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    /// First model of the given kind; used as the fallback default.
    pub fn default_model(&self, kind: ModelKind) -> Option<&'static ModelDescriptor> {
        self.models.iter().find(|m| m.kind == kind)
    }
}

fn key_starts_sk(key: &str) -> bool {
    key.starts_with("sk-") && key.len() > 8
}

fn key_starts_gsk(key: &str) -> bool {
    key.starts_with("gsk_") && key.len() > 8
}

fn key_nonempty(key: &str) -> bool {
    key.len() >= 8
}

fn key_none(_key: &str) -> bool {
    true
}

const OPENAI_LANGS: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "nl", "pl", "ru", "ja", "ko", "zh", "ar", "hi", "tr", "sv",
];

const ELEVENLABS_LANGS: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "nl", "pl", "ru", "ja", "ko", "zh", "hi", "uk", "cs",
];

const DEEPGRAM_LANGS: &[&str] = &[
    "en", "en-US", "en-GB", "es", "fr", "de", "it", "pt", "nl", "ja", "ko", "zh", "ru", "hi",
];

static PROVIDERS: &[ProviderDescriptor] = &[
    ProviderDescriptor {
        name: "openai",
        requires_api_key: true,
        validate_key: key_starts_sk,
        docs_url: "https://platform.openai.com/docs/guides/speech-to-text",
        models: &[
            ModelDescriptor {
                id: "whisper-1",
                display_name: "OpenAI Whisper",
                kind: ModelKind::Transcription,
                supports_batch: true,
                supports_streaming: false,
                is_local: false,
                adapter: AdapterKind::OpenAiCompatible,
                streaming_adapter: None,
                endpoint: Endpoint {
                    base_url: "https://api.openai.com",
                    path: "/v1/audio/transcriptions",
                },
                streaming_endpoint: None,
                languages: OPENAI_LANGS,
                local_file: None,
            },
            ModelDescriptor {
                id: "gpt-4o-transcribe",
                display_name: "GPT-4o Transcribe",
                kind: ModelKind::Transcription,
                supports_batch: true,
                supports_streaming: true,
                is_local: false,
                adapter: AdapterKind::OpenAiCompatible,
                streaming_adapter: Some(AdapterKind::OpenAiRealtime),
                endpoint: Endpoint {
                    base_url: "https://api.openai.com",
                    path: "/v1/audio/transcriptions",
                },
                streaming_endpoint: Some(Endpoint {
                    base_url: "wss://api.openai.com",
                    path: "/v1/realtime",
                }),
                languages: OPENAI_LANGS,
                local_file: None,
            },
            ModelDescriptor {
                id: "gpt-4o-mini",
                display_name: "GPT-4o mini",
                kind: ModelKind::Llm,
                supports_batch: true,
                supports_streaming: false,
                is_local: false,
                adapter: AdapterKind::OpenAiCompatible,
                streaming_adapter: None,
                endpoint: Endpoint {
                    base_url: "https://api.openai.com",
                    path: "/v1/chat/completions",
                },
                streaming_endpoint: None,
                languages: &[],
                local_file: None,
            },
        ],
    },
    ProviderDescriptor {
        name: "groq",
        requires_api_key: true,
        validate_key: key_starts_gsk,
        docs_url: "https://console.groq.com/docs/speech-to-text",
        models: &[
            ModelDescriptor {
                id: "whisper-large-v3-turbo",
                display_name: "Whisper Large v3 Turbo (Groq)",
                kind: ModelKind::Transcription,
                supports_batch: true,
                supports_streaming: false,
                is_local: false,
                adapter: AdapterKind::OpenAiCompatible,
                streaming_adapter: None,
                endpoint: Endpoint {
                    base_url: "https://api.groq.com",
                    path: "/openai/v1/audio/transcriptions",
                },
                streaming_endpoint: None,
                languages: OPENAI_LANGS,
                local_file: None,
            },
            ModelDescriptor {
                id: "whisper-large-v3",
                display_name: "Whisper Large v3 (Groq)",
                kind: ModelKind::Transcription,
                supports_batch: true,
                supports_streaming: false,
                is_local: false,
                adapter: AdapterKind::OpenAiCompatible,
                streaming_adapter: None,
                endpoint: Endpoint {
                    base_url: "https://api.groq.com",
                    path: "/openai/v1/audio/transcriptions",
                },
                streaming_endpoint: None,
                languages: OPENAI_LANGS,
                local_file: None,
            },
            ModelDescriptor {
                id: "llama-3.3-70b-versatile",
                display_name: "Llama 3.3 70B (Groq)",
                kind: ModelKind::Llm,
                supports_batch: true,
                supports_streaming: false,
                is_local: false,
                adapter: AdapterKind::OpenAiCompatible,
                streaming_adapter: None,
                endpoint: Endpoint {
                    base_url: "https://api.groq.com",
                    path: "/openai/v1/chat/completions",
                },
                streaming_endpoint: None,
                languages: &[],
                local_file: None,
            },
        ],
    },
    ProviderDescriptor {
        name: "mistral",
        requires_api_key: true,
        validate_key: key_nonempty,
        docs_url: "https://docs.mistral.ai/capabilities/audio/",
        models: &[
            ModelDescriptor {
                id: "voxtral-mini-latest",
                display_name: "Voxtral Mini",
                kind: ModelKind::Transcription,
                supports_batch: true,
                supports_streaming: false,
                is_local: false,
                adapter: AdapterKind::OpenAiCompatible,
                streaming_adapter: None,
                endpoint: Endpoint {
                    base_url: "https://api.mistral.ai",
                    path: "/v1/audio/transcriptions",
                },
                streaming_endpoint: None,
                languages: OPENAI_LANGS,
                local_file: None,
            },
            ModelDescriptor {
                id: "mistral-small-latest",
                display_name: "Mistral Small",
                kind: ModelKind::Llm,
                supports_batch: true,
                supports_streaming: false,
                is_local: false,
                adapter: AdapterKind::OpenAiCompatible,
                streaming_adapter: None,
                endpoint: Endpoint {
                    base_url: "https://api.mistral.ai",
                    path: "/v1/chat/completions",
                },
                streaming_endpoint: None,
                languages: &[],
                local_file: None,
            },
        ],
    },
    ProviderDescriptor {
        name: "elevenlabs",
        requires_api_key: true,
        validate_key: key_nonempty,
        docs_url: "https://elevenlabs.io/docs/capabilities/speech-to-text",
        models: &[ModelDescriptor {
            id: "scribe_v1",
            display_name: "ElevenLabs Scribe",
            kind: ModelKind::Transcription,
            supports_batch: true,
            supports_streaming: true,
            is_local: false,
            adapter: AdapterKind::ElevenLabs,
            streaming_adapter: Some(AdapterKind::ElevenLabsRealtime),
            endpoint: Endpoint {
                base_url: "https://api.elevenlabs.io",
                path: "/v1/speech-to-text",
            },
            streaming_endpoint: Some(Endpoint {
                base_url: "wss://api.elevenlabs.io",
                path: "/v1/speech-to-text/realtime",
            }),
            languages: ELEVENLABS_LANGS,
            local_file: None,
        }],
    },
    ProviderDescriptor {
        name: "deepgram",
        requires_api_key: true,
        validate_key: key_nonempty,
        docs_url: "https://developers.deepgram.com/docs/models-languages-overview",
        models: &[
            ModelDescriptor {
                id: "nova-2",
                display_name: "Deepgram Nova-2",
                kind: ModelKind::Transcription,
                supports_batch: true,
                supports_streaming: true,
                is_local: false,
                adapter: AdapterKind::Deepgram,
                streaming_adapter: Some(AdapterKind::DeepgramRealtime),
                endpoint: Endpoint {
                    base_url: "https://api.deepgram.com",
                    path: "/v1/listen",
                },
                streaming_endpoint: Some(Endpoint {
                    base_url: "wss://api.deepgram.com",
                    path: "/v1/listen",
                }),
                languages: DEEPGRAM_LANGS,
                local_file: None,
            },
            ModelDescriptor {
                id: "nova-3",
                display_name: "Deepgram Nova-3",
                kind: ModelKind::Transcription,
                supports_batch: true,
                supports_streaming: true,
                is_local: false,
                adapter: AdapterKind::Deepgram,
                streaming_adapter: Some(AdapterKind::DeepgramRealtime),
                endpoint: Endpoint {
                    base_url: "https://api.deepgram.com",
                    path: "/v1/listen",
                },
                streaming_endpoint: Some(Endpoint {
                    base_url: "wss://api.deepgram.com",
                    path: "/v1/listen",
                }),
                languages: DEEPGRAM_LANGS,
                local_file: None,
            },
            ModelDescriptor {
                id: "flux-general-en",
                display_name: "Deepgram Flux",
                kind: ModelKind::Transcription,
                supports_batch: false,
                supports_streaming: true,
                is_local: false,
                adapter: AdapterKind::DeepgramRealtime,
                streaming_adapter: None,
                endpoint: Endpoint {
                    base_url: "wss://api.deepgram.com",
                    path: "/v2/listen",
                },
                streaming_endpoint: Some(Endpoint {
                    base_url: "wss://api.deepgram.com",
                    path: "/v2/listen",
                }),
                languages: &["en"],
                local_file: None,
            },
        ],
    },
    ProviderDescriptor {
        name: "whisper-local",
        requires_api_key: false,
        validate_key: key_none,
        docs_url: "https://github.com/ggerganov/whisper.cpp",
        models: &[
            ModelDescriptor {
                id: "whisper-base-en",
                display_name: "Whisper Base (English, local)",
                kind: ModelKind::Transcription,
                supports_batch: true,
                supports_streaming: false,
                is_local: true,
                adapter: AdapterKind::WhisperLocal,
                streaming_adapter: None,
                endpoint: Endpoint {
                    base_url: "",
                    path: "",
                },
                streaming_endpoint: None,
                languages: &["en"],
                local_file: Some(LocalFile {
                    filename: "ggml-base.en.bin",
                    human_size: "142 MB",
                    download_url:
                        "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.en.bin",
                }),
            },
            ModelDescriptor {
                id: "whisper-small",
                display_name: "Whisper Small (local)",
                kind: ModelKind::Transcription,
                supports_batch: true,
                supports_streaming: false,
                is_local: true,
                adapter: AdapterKind::WhisperLocal,
                streaming_adapter: None,
                endpoint: Endpoint {
                    base_url: "",
                    path: "",
                },
                streaming_endpoint: None,
                languages: OPENAI_LANGS,
                local_file: Some(LocalFile {
                    filename: "ggml-small.bin",
                    human_size: "466 MB",
                    download_url:
                        "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-small.bin",
                }),
            },
        ],
    },
];

/// All registered providers.
pub fn all() -> &'static [ProviderDescriptor] {
    PROVIDERS
}

/// Look up a provider by name.
pub fn provider(name: &str) -> Option<&'static ProviderDescriptor> {
    PROVIDERS.iter().find(|p| p.name == name)
}

/// Look up a model within a provider.
pub fn model(provider_name: &str, model_id: &str) -> Option<&'static ModelDescriptor> {
    provider(provider_name)?.model(model_id)
}

/// Search every provider for a model ID; first hit wins.
pub fn find_model(model_id: &str) -> Option<(&'static ProviderDescriptor, &'static ModelDescriptor)> {
    for p in PROVIDERS {
        if let Some(m) = p.model(model_id) {
            return Some((p, m));
        }
    }
    None
}

/// Models of the given kind a provider exposes.
pub fn models_of_kind(
    provider_name: &str,
    kind: ModelKind,
) -> Vec<&'static ModelDescriptor> {
    provider(provider_name)
        .map(|p| p.models.iter().filter(|m| m.kind == kind).collect())
        .unwrap_or_default()
}

/// Models of the given kind that support a language (empty = auto, always
/// accepted).
pub fn models_for_language(
    provider_name: &str,
    kind: ModelKind,
    language: &str,
) -> Vec<&'static ModelDescriptor> {
    models_of_kind(provider_name, kind)
        .into_iter()
        .filter(|m| m.supports_language(language))
        .collect()
}

/// Validate that a model supports the requested language.
///
/// The returned message is shown to the user verbatim, so its shape is part
/// of the contract: display name, docs URL, and the first five supported
/// codes.
pub fn validate_model_language(
    provider: &ProviderDescriptor,
    model: &ModelDescriptor,
    language: &str,
) -> Result<(), String> {
    if model.supports_language(language) {
        return Ok(());
    }
    let examples: Vec<&str> = model.languages.iter().take(5).copied().collect();
    Err(format!(
        "Language '{}' is not supported by {}. See {} for the full list (supported: {})",
        language,
        model.display_name,
        provider.docs_url,
        examples.join(", ")
    ))
}

/// Strip a compound suffix like `-transcription` or `-llm` from a configured
/// provider name to recover the registry key.
pub fn base_provider_name(name: &str) -> &str {
    name.strip_suffix("-transcription")
        .or_else(|| name.strip_suffix("-llm"))
        .unwrap_or(name)
}

/// Conventional environment variable holding a provider's API key.
pub fn env_var_for_provider(name: &str) -> Option<&'static str> {
    match name {
        "openai" => Some("OPENAI_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "elevenlabs" => Some("ELEVENLABS_API_KEY"),
        "deepgram" => Some("DEEPGRAM_API_KEY"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_provider_and_model() {
        let p = provider("openai").unwrap();
        assert!(p.requires_api_key);
        assert!(p.model("whisper-1").is_some());
        assert!(model("openai", "whisper-1").is_some());
        assert!(model("openai", "no-such-model").is_none());
    }

    #[test]
    fn test_find_model_searches_all_providers() {
        let (p, m) = find_model("nova-2").unwrap();
        assert_eq!(p.name, "deepgram");
        assert_eq!(m.adapter, AdapterKind::Deepgram);
    }

    #[test]
    fn test_models_of_kind_filters() {
        let transcription = models_of_kind("openai", ModelKind::Transcription);
        assert!(transcription.iter().all(|m| m.kind == ModelKind::Transcription));
        assert!(transcription.iter().any(|m| m.id == "whisper-1"));

        let llm = models_of_kind("openai", ModelKind::Llm);
        assert!(llm.iter().any(|m| m.id == "gpt-4o-mini"));
    }

    #[test]
    fn test_models_for_language_accepts_auto() {
        let auto = models_for_language("deepgram", ModelKind::Transcription, "");
        assert_eq!(auto.len(), models_of_kind("deepgram", ModelKind::Transcription).len());

        let german = models_for_language("deepgram", ModelKind::Transcription, "de");
        assert!(german.iter().all(|m| m.languages.contains(&"de")));
        assert!(!german.iter().any(|m| m.id == "flux-general-en"));
    }

    #[test]
    fn test_validate_model_language_message_format() {
        let p = provider("deepgram").unwrap();
        let m = p.model("flux-general-en").unwrap();
        let err = validate_model_language(p, m, "de").unwrap_err();
        assert!(err.contains("Deepgram Flux"));
        assert!(err.contains(p.docs_url));
        assert!(err.contains("supported: en"));
    }

    #[test]
    fn test_base_provider_name_strips_suffix() {
        assert_eq!(base_provider_name("openai-transcription"), "openai");
        assert_eq!(base_provider_name("groq-llm"), "groq");
        assert_eq!(base_provider_name("deepgram"), "deepgram");
    }

    #[test]
    fn test_env_var_for_provider() {
        assert_eq!(env_var_for_provider("groq"), Some("GROQ_API_KEY"));
        assert_eq!(env_var_for_provider("whisper-local"), None);
    }

    #[test]
    fn test_key_validators() {
        let openai = provider("openai").unwrap();
        assert!((openai.validate_key)("sk-abcdefgh123"));
        assert!(!(openai.validate_key)("gsk_abcdefgh123"));

        let local = provider("whisper-local").unwrap();
        assert!(!local.requires_api_key);
        assert!((local.validate_key)(""));
    }

    #[test]
    fn test_streaming_only_model_has_no_batch() {
        let (_, flux) = find_model("flux-general-en").unwrap();
        assert!(!flux.supports_batch);
        assert!(flux.supports_streaming);
    }

    #[test]
    fn test_local_model_paths() {
        let (_, base_en) = find_model("whisper-base-en").unwrap();
        let file = base_en.local_file.unwrap();
        assert_eq!(file.filename, "ggml-base.en.bin");
        if let Some(path) = base_en.local_path() {
            assert!(path.ends_with("models/whisper/ggml-base.en.bin"));
        }
    }
}
