//! Control bus: single-instance lock and line-oriented command socket.
//!
//! The rendezvous lives in `$XDG_CACHE_HOME/hyprvoice`: a Unix socket
//! (`control.sock`) and a PID file (`hyprvoice.pid`) created and removed as a
//! matched pair. An abnormal exit leaves at most stale artifacts that the
//! next startup detects and cleans.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::config::APP_NAME;

/// Version string reported by the `v` command.
pub const PROTOCOL_VERSION: &str = "1";

pub const SOCKET_NAME: &str = "control.sock";
pub const PID_FILE_NAME: &str = "hyprvoice.pid";

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Cannot determine cache directory")]
    NoCacheDir,

    #[error("hyprvoice is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("Daemon is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime directory holding the socket and PID file, created with
/// owner-only permissions.
pub fn runtime_dir() -> Result<PathBuf, ControlError> {
    let dir = dirs::cache_dir().ok_or(ControlError::NoCacheDir)?;
    Ok(dir.join(APP_NAME))
}

pub fn socket_path() -> Result<PathBuf, ControlError> {
    Ok(runtime_dir()?.join(SOCKET_NAME))
}

pub fn pid_path() -> Result<PathBuf, ControlError> {
    Ok(runtime_dir()?.join(PID_FILE_NAME))
}

fn ensure_runtime_dir(dir: &Path) -> Result<(), ControlError> {
    match fs::DirBuilder::new().recursive(true).mode(0o700).create(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Whether a process with this PID is alive.
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Enforce the single-instance guarantee.
///
/// A live PID in the PID file fails with "already running"; a dead or
/// malformed PID file is removed and startup continues.
pub fn check_existing() -> Result<(), ControlError> {
    check_existing_in(&runtime_dir()?)
}

pub fn check_existing_in(dir: &Path) -> Result<(), ControlError> {
    let pid_file = dir.join(PID_FILE_NAME);
    let raw = match fs::read_to_string(&pid_file) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    match raw.trim().parse::<u32>() {
        Ok(pid) if pid_alive(pid) => Err(ControlError::AlreadyRunning(pid)),
        Ok(pid) => {
            log::info!("Removing stale PID file (pid {} is dead)", pid);
            fs::remove_file(&pid_file)?;
            Ok(())
        }
        Err(_) => {
            log::warn!("Removing malformed PID file {}", pid_file.display());
            fs::remove_file(&pid_file)?;
            Ok(())
        }
    }
}

/// Bind the control socket, unlinking a stale one first.
pub fn listen() -> Result<UnixListener, ControlError> {
    listen_in(&runtime_dir()?)
}

pub fn listen_in(dir: &Path) -> Result<UnixListener, ControlError> {
    ensure_runtime_dir(dir)?;
    let path = dir.join(SOCKET_NAME);
    match fs::remove_file(&path) {
        Ok(()) => log::info!("Removed stale control socket"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(UnixListener::bind(&path)?)
}

/// Client-side connect.
pub async fn dial() -> Result<UnixStream, ControlError> {
    dial_in(&runtime_dir()?).await
}

pub async fn dial_in(dir: &Path) -> Result<UnixStream, ControlError> {
    let path = dir.join(SOCKET_NAME);
    UnixStream::connect(&path).await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::ConnectionRefused {
            ControlError::NotRunning
        } else {
            ControlError::Io(e)
        }
    })
}

/// Write this process's PID, owner-readable only.
pub fn create_pid() -> Result<(), ControlError> {
    create_pid_in(&runtime_dir()?)
}

pub fn create_pid_in(dir: &Path) -> Result<(), ControlError> {
    ensure_runtime_dir(dir)?;
    let path = dir.join(PID_FILE_NAME);
    fs::write(&path, format!("{}\n", std::process::id()))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

pub fn remove_pid() -> Result<(), ControlError> {
    remove_pid_in(&runtime_dir()?)
}

pub fn remove_pid_in(dir: &Path) -> Result<(), ControlError> {
    let path = dir.join(PID_FILE_NAME);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// One-shot request/response: write a command byte plus newline, read one
/// newline-terminated response line.
pub async fn send_command(command: u8) -> Result<String, ControlError> {
    let stream = dial().await?;
    send_command_on(stream, command).await
}

pub async fn send_command_on(
    mut stream: UnixStream,
    command: u8,
) -> Result<String, ControlError> {
    stream.write_all(&[command, b'\n']).await?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(line.trim_end_matches('\n').to_string())
}
