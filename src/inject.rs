//! Text injection into the focused window.
//!
//! Each backend is a thin shell-out with a bounded timeout; the chain tries
//! them in priority order and the first success wins. A stuck tool cannot
//! hang the pipeline.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::InjectionConfig;

#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("Unknown injection backend: {0}")]
    UnknownBackend(String),

    #[error("Backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    #[error("All injection backends failed: {0}")]
    AllFailed(String),
}

/// Delivers final text to the desktop. The production implementation is
/// [`InjectorChain`]; tests substitute mocks.
#[async_trait::async_trait]
pub trait Injector: Send + Sync {
    /// Inject text; returns the name of the backend that succeeded.
    async fn inject(&self, text: &str) -> Result<String, InjectError>;
}

pub struct InjectorChain {
    backends: Vec<String>,
    timeout: Duration,
}

impl InjectorChain {
    pub fn new(config: &InjectionConfig) -> Self {
        Self {
            backends: config.backends.clone(),
            timeout: config.timeout(),
        }
    }

    fn command_for(backend: &str, text: &str) -> Result<(Command, Option<String>), InjectError> {
        // Returns the command plus optional stdin payload.
        match backend {
            "ydotool" => {
                let mut cmd = Command::new("ydotool");
                cmd.arg("type").arg("--").arg(text);
                Ok((cmd, None))
            }
            "wtype" => {
                let mut cmd = Command::new("wtype");
                cmd.arg("--").arg(text);
                Ok((cmd, None))
            }
            "clipboard" => {
                let cmd = Command::new("wl-copy");
                Ok((cmd, Some(text.to_string())))
            }
            other => Err(InjectError::UnknownBackend(other.to_string())),
        }
    }

    async fn try_backend(&self, backend: &str, text: &str) -> Result<(), InjectError> {
        let (mut cmd, stdin_payload) = Self::command_for(backend, text)?;
        cmd.stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let run = async {
            let mut child = cmd.spawn().map_err(|e| InjectError::Backend {
                backend: backend.to_string(),
                message: format!("spawn failed: {}", e),
            })?;

            if let Some(payload) = stdin_payload {
                if let Some(mut stdin) = child.stdin.take() {
                    stdin
                        .write_all(payload.as_bytes())
                        .await
                        .map_err(|e| InjectError::Backend {
                            backend: backend.to_string(),
                            message: format!("stdin write failed: {}", e),
                        })?;
                    drop(stdin);
                }
            }

            let output = child.wait_with_output().await.map_err(|e| InjectError::Backend {
                backend: backend.to_string(),
                message: format!("wait failed: {}", e),
            })?;

            if output.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(InjectError::Backend {
                    backend: backend.to_string(),
                    message: format!("exited with {}: {}", output.status, stderr.trim()),
                })
            }
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(InjectError::Backend {
                backend: backend.to_string(),
                message: format!("timed out after {:?}", self.timeout),
            }),
        }
    }
}

#[async_trait::async_trait]
impl Injector for InjectorChain {
    async fn inject(&self, text: &str) -> Result<String, InjectError> {
        let mut failures = Vec::new();
        for backend in &self.backends {
            match self.try_backend(backend, text).await {
                Ok(()) => {
                    log::info!("Injector: delivered {} chars via {}", text.len(), backend);
                    return Ok(backend.clone());
                }
                Err(e) => {
                    log::warn!("Injector: {}", e);
                    failures.push(format!("{}: {}", backend, e));
                }
            }
        }
        Err(InjectError::AllFailed(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(backends: &[&str]) -> InjectorChain {
        InjectorChain {
            backends: backends.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_known_backend_commands() {
        assert!(InjectorChain::command_for("ydotool", "hi").is_ok());
        assert!(InjectorChain::command_for("wtype", "hi").is_ok());
        let (_, stdin) = InjectorChain::command_for("clipboard", "hi").unwrap();
        assert_eq!(stdin.as_deref(), Some("hi"));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(matches!(
            InjectorChain::command_for("xdotool", "hi"),
            Err(InjectError::UnknownBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_all_failed_names_every_backend() {
        if crate::recorder::tool_on_path("ydotool") || crate::recorder::tool_on_path("wtype") {
            // Only meaningful where the tools are absent.
            return;
        }
        let chain = chain(&["ydotool", "wtype"]);
        let err = chain.inject("hello").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ydotool"));
        assert!(message.contains("wtype"));
    }
}
