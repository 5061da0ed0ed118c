//! Hands the HLS URL to an external player process (mpv, ffplay, vlc, ...).

use std::process::Stdio;

use reqwest::Url;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{PlayerEvent, SessionEvents};

pub struct ExternalPlayer {
    kill_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ExternalPlayer {
    /// Spawn `program <url>`. Exit with failure status is reported as fatal,
    /// a clean exit as the end of playback.
    pub fn spawn(
        program: &str,
        url: &Url,
        events: SessionEvents<PlayerEvent>,
    ) -> Result<Self, String> {
        let mut child = Command::new(program)
            .arg(url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to start {}: {}", program, e))?;

        info!("Started {} (pid {:?}) for {}", program, child.id(), url);
        events.emit(PlayerEvent::MediaStarted);

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let program = program.to_string();
        let task = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => {
                        debug!("{} exited", program);
                        events.emit(PlayerEvent::Ended);
                    }
                    Ok(status) => {
                        events.emit(PlayerEvent::Fatal(format!("{} exited with {}", program, status)));
                    }
                    Err(e) => {
                        events.emit(PlayerEvent::Fatal(format!("{} wait failed: {}", program, e)));
                    }
                },
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to stop {}: {}", program, e);
                    }
                }
            }
        });

        Ok(Self {
            kill_tx: Some(kill_tx),
            task: Some(task),
        })
    }

    /// Kill the child and wait until it is reaped. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}
