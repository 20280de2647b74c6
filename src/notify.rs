//! Desktop notification collaborator, a thin `notify-send` shell-out.
//!
//! Failures are logged and swallowed: a broken notification daemon must
//! never affect the pipeline.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn send(title: &str, body: &str) {
    let mut cmd = Command::new("notify-send");
    cmd.arg("--app-name=hyprvoice")
        .arg(title)
        .arg(body)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let run = async {
        match cmd.spawn() {
            Ok(mut child) => {
                if let Err(e) = child.wait().await {
                    log::debug!("notify-send wait failed: {}", e);
                }
            }
            Err(e) => log::debug!("notify-send unavailable: {}", e),
        }
    };

    if tokio::time::timeout(NOTIFY_TIMEOUT, run).await.is_err() {
        log::debug!("notify-send timed out");
    }
}
