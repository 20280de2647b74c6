//! Local whisper.cpp batch adapter.
//!
//! Writes the WAV to a unique temp file and shells out to the whisper CLI.
//! The temp file is removed on every exit path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::process::Command;

use crate::providers::ModelDescriptor;
use crate::recorder::tool_on_path;
use crate::stt::SttError;

use super::BatchAdapter;

const WHISPER_BINARY: &str = "whisper-cli";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Removes the temp file when dropped, covering early returns.
struct TempWav(PathBuf);

impl Drop for TempWav {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("whisper-local: failed to remove {}: {}", self.0.display(), e);
            }
        }
    }
}

fn temp_wav_path() -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("hyprvoice-{}-{}.wav", std::process::id(), n))
}

pub struct WhisperLocalAdapter {
    binary: String,
    model_path: PathBuf,
    language: String,
    threads: Option<u16>,
}

impl WhisperLocalAdapter {
    pub fn new(
        model: &ModelDescriptor,
        language: String,
        threads: Option<u16>,
    ) -> Result<Self, SttError> {
        let model_path = model.local_path().ok_or_else(|| {
            SttError::Config(format!("Model '{}' has no local file descriptor", model.id))
        })?;
        Ok(Self {
            binary: WHISPER_BINARY.to_string(),
            model_path,
            language,
            threads,
        })
    }

    #[cfg(test)]
    fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }
}

#[async_trait::async_trait]
impl BatchAdapter for WhisperLocalAdapter {
    async fn transcribe(&self, wav: &[u8]) -> Result<String, SttError> {
        if !tool_on_path(&self.binary) {
            return Err(SttError::Config(format!(
                "'{}' not found on PATH; install whisper.cpp to use local models",
                self.binary
            )));
        }
        if !self.model_path.exists() {
            return Err(SttError::Config(format!(
                "Model file {} is missing; download it first",
                self.model_path.display()
            )));
        }

        let path = temp_wav_path();
        tokio::fs::write(&path, wav)
            .await
            .map_err(|e| SttError::Audio(format!("Failed to write temp WAV: {}", e)))?;
        let _guard = TempWav(path.clone());

        let language = if self.language.is_empty() {
            "auto"
        } else {
            &self.language
        };

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-m")
            .arg(&self.model_path)
            .arg("-l")
            .arg(language)
            .arg("-nt")
            .arg("-np");
        if let Some(threads) = self.threads {
            cmd.arg("-t").arg(threads.to_string());
        }
        cmd.arg("-f").arg(&path);

        let output = cmd
            .output()
            .await
            .map_err(|e| SttError::Audio(format!("Failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SttError::Api(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn name(&self) -> &'static str {
        "whisper-local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers;

    fn model() -> &'static ModelDescriptor {
        providers::model("whisper-local", "whisper-base-en").unwrap()
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let a = temp_wav_path();
        let b = temp_wav_path();
        assert_ne!(a, b);
    }

    #[test]
    fn test_temp_guard_removes_file() {
        let path = temp_wav_path();
        std::fs::write(&path, b"x").unwrap();
        assert!(path.exists());
        drop(TempWav(path.clone()));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_binary_is_config_error() {
        let adapter = WhisperLocalAdapter::new(model(), String::new(), None)
            .unwrap()
            .with_binary("no-such-whisper-binary");
        let err = adapter.transcribe(&[0u8; 64]).await.unwrap_err();
        assert!(matches!(err, SttError::Config(_)));
        assert!(err.to_string().contains("not found on PATH"));
    }

    #[tokio::test]
    async fn test_missing_model_file_is_config_error() {
        // `sh` exists everywhere, so the PATH check passes and the model-file
        // check is exercised.
        let mut adapter = WhisperLocalAdapter::new(model(), String::new(), None).unwrap();
        adapter.binary = "sh".to_string();
        adapter.model_path = PathBuf::from("/nonexistent/ggml-base.en.bin");
        let err = adapter.transcribe(&[0u8; 64]).await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
