//! Daemon runtime: wires the control socket to the pipeline.
//!
//! Startup is check_existing → listen → create_pid; teardown removes the PID
//! file, closes the listener and unlinks the socket. Each accepted connection
//! is handled in its own task, and acknowledgments are written before any
//! long-running pipeline work begins.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::control::{self, ControlError, PROTOCOL_VERSION};
use crate::notify;
use crate::pipeline::{Action, Factories, Pipeline, PipelineOptions, SessionStatus};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("LLM configuration error: {0}")]
    Llm(#[from] crate::llm::LlmError),
}

struct PipelineHandle {
    pipeline: Arc<Pipeline>,
    join: tokio::task::JoinHandle<()>,
}

/// Shared state for connection handlers.
pub struct DaemonState {
    config: Config,
    root: CancellationToken,
    pipeline: Mutex<Option<PipelineHandle>>,
}

impl DaemonState {
    pub fn new(config: Config, root: CancellationToken) -> Self {
        Self {
            config,
            root,
            pipeline: Mutex::new(None),
        }
    }

    /// Current session status; Idle when no pipeline is running.
    pub async fn status(&self) -> SessionStatus {
        match self.pipeline.lock().await.as_ref() {
            Some(handle) => handle.pipeline.status(),
            None => SessionStatus::Idle,
        }
    }

    /// State-dependent toggle: Idle starts a session, Recording aborts it,
    /// Transcribing commits it, Injecting aborts mid-injection.
    pub async fn toggle(&self) {
        let mut slot = self.pipeline.lock().await;

        if let Some(handle) = slot.as_ref() {
            if handle.join.is_finished() {
                *slot = None;
            }
        }

        match slot.as_ref() {
            None => {
                if let Err(e) = self.start_session(&mut slot) {
                    log::error!("Daemon: failed to start session: {}", e);
                    if self.config.daemon.notifications {
                        notify::send("hyprvoice", &format!("Failed to start session: {}", e))
                            .await;
                    }
                }
            }
            Some(handle) => match handle.pipeline.status() {
                SessionStatus::Idle => {
                    // Session finished but its task is still winding down.
                    *slot = None;
                    if let Err(e) = self.start_session(&mut slot) {
                        log::error!("Daemon: failed to start session: {}", e);
                    }
                }
                SessionStatus::Recording | SessionStatus::Injecting => {
                    handle.pipeline.post_action(Action::Cancel);
                }
                SessionStatus::Transcribing => {
                    handle.pipeline.post_action(Action::Inject);
                }
            },
        }
    }

    pub async fn cancel(&self) {
        if let Some(handle) = self.pipeline.lock().await.as_ref() {
            handle.pipeline.post_action(Action::Cancel);
        }
    }

    fn start_session(
        &self,
        slot: &mut Option<PipelineHandle>,
    ) -> Result<(), DaemonError> {
        let factories = Factories::production(&self.config)?;
        let options = PipelineOptions::from_config(&self.config);
        let pipeline = Arc::new(Pipeline::new(factories, options));

        // Forward pipeline errors to the notification collaborator.
        let mut errors = pipeline.errors();
        let notifications = self.config.daemon.notifications;
        tokio::spawn(async move {
            loop {
                match errors.recv().await {
                    Ok(error) => {
                        if notifications {
                            notify::send(&error.title, &error.message).await;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("Daemon: missed {} pipeline error(s)", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let root = self.root.clone();
        let runner = pipeline.clone();
        let join = tokio::spawn(async move {
            runner.run(&root).await;
            log::info!("Daemon: session finished");
        });

        log::info!("Daemon: session started");
        *slot = Some(PipelineHandle { pipeline, join });
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.pipeline.lock().await.take() {
            handle.pipeline.stop();
            if let Err(e) = handle.join.await {
                log::warn!("Daemon: session task join failed: {}", e);
            }
        }
    }
}

/// Handle one control connection: one command byte, one response line.
pub async fn handle_connection(mut stream: UnixStream, state: Arc<DaemonState>) {
    let mut reader = BufReader::new(&mut stream);
    let mut line = String::new();

    let response = match reader.read_line(&mut line).await {
        Err(e) => format!("ERR read_error: {}\n", e),
        Ok(_) => {
            let trimmed = line.trim_end_matches('\n');
            match trimmed.bytes().next() {
                None => "ERR empty\n".to_string(),
                Some(b't') => "OK toggled\n".to_string(),
                Some(b's') => {
                    format!("STATUS status={}\n", state.status().await.as_str())
                }
                Some(b'v') => format!("STATUS proto={}\n", PROTOCOL_VERSION),
                Some(b'c') => "OK cancelled\n".to_string(),
                Some(b'q') => "OK quitting\n".to_string(),
                Some(byte) => format!("ERR unknown='{}'\n", byte as char),
            }
        }
    };

    // The acknowledgment goes out before any pipeline work so the client
    // never blocks on a session.
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        log::warn!("Daemon: failed to write response: {}", e);
        return;
    }
    if let Err(e) = stream.flush().await {
        log::warn!("Daemon: failed to flush response: {}", e);
    }

    match line.trim_end_matches('\n').bytes().next() {
        Some(b't') => state.toggle().await,
        Some(b'c') => state.cancel().await,
        Some(b'q') => {
            log::info!("Daemon: quit requested");
            state.root.cancel();
        }
        _ => {}
    }
}

/// Run the daemon until a termination signal or a `q` command.
pub async fn run(config: Config) -> Result<(), DaemonError> {
    control::check_existing()?;
    let listener = control::listen()?;
    control::create_pid()?;

    let root = CancellationToken::new();
    let state = Arc::new(DaemonState::new(config, root.clone()));

    // Termination signals cancel the root context for a graceful unwind.
    {
        let root = root.clone();
        tokio::spawn(async move {
            let sigterm = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut signal) => {
                        signal.recv().await;
                    }
                    Err(e) => {
                        log::error!("Daemon: failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => log::info!("Daemon: received SIGINT"),
                _ = sigterm => log::info!("Daemon: received SIGTERM"),
            }
            root.cancel();
        });
    }

    log::info!(
        "Daemon: listening on {}",
        control::socket_path()?.display()
    );

    loop {
        tokio::select! {
            _ = root.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let state = state.clone();
                    tokio::spawn(handle_connection(stream, state));
                }
                Err(e) => log::error!("Daemon: accept failed: {}", e),
            },
        }
    }

    state.shutdown().await;
    control::remove_pid()?;
    drop(listener);
    if let Ok(path) = control::socket_path() {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Daemon: failed to unlink socket: {}", e);
            }
        }
    }

    log::info!("Daemon: stopped");
    Ok(())
}
