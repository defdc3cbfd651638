// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Owns one external transcoder subprocess: spawn, stderr draining, and
//! asynchronous exit detection. Rust has no ambient callback-registration
//! mechanism, so "register an exit callback" (spec §4.3) becomes a
//! dedicated task that polls `Child::try_wait()` and posts a
//! [`SupervisorEvent`] onto an `mpsc` channel the owning channel consumes.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::error::{BrokerError, Result};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Exited {
        exit_code: Option<i32>,
        exit_time: DateTime<Utc>,
    },
}

/// Handle to a running (or just-exited) transcoder subprocess.
pub struct Supervisor {
    child: Arc<AsyncMutex<Option<Child>>>,
    last_error: Arc<SyncMutex<Option<String>>>,
    progress_token: String,
}

impl Supervisor {
    /// Spawn the transcoder pointed at `source_url`, writing MPEG-TS to
    /// `tcp://127.0.0.1:{local_port}` per the argv template in spec §6.
    /// Returns the handle and a receiver of lifecycle events.
    pub fn spawn(
        binary_path: &Path,
        source_url: &str,
        width: u32,
        height: u32,
        local_port: u16,
        progress_token: &str,
    ) -> Result<(Self, mpsc::Receiver<SupervisorEvent>)> {
        let args = [
            "-rtsp_transport".to_string(),
            "tcp".to_string(),
            "-i".to_string(),
            source_url.to_string(),
            "-buffer_size".to_string(),
            "1024000".to_string(),
            "-max_delay".to_string(),
            "500000".to_string(),
            "-timeout".to_string(),
            "20000000".to_string(),
            "-an".to_string(),
            "-f".to_string(),
            "mpegts".to_string(),
            "-codec:v".to_string(),
            "mpeg1video".to_string(),
            "-vf".to_string(),
            format!("scale={width}:{height}"),
            "-s".to_string(),
            format!("{width}x{height}"),
            format!("tcp://127.0.0.1:{local_port}"),
        ];

        let mut child = Command::new(binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrokerError::SpawnFailed(e.to_string()))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BrokerError::SpawnFailed("no stderr pipe".into()))?;

        let last_error = Arc::new(SyncMutex::new(None));
        let child = Arc::new(AsyncMutex::new(Some(child)));
        let (event_tx, event_rx) = mpsc::channel(4);

        spawn_stderr_drain(stderr, progress_token.to_string(), last_error.clone());
        spawn_exit_watcher(child.clone(), event_tx);

        Ok((
            Self {
                child,
                last_error,
                progress_token: progress_token.to_string(),
            },
            event_rx,
        ))
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Kill the subprocess. Idempotent if it has already exited or been
    /// reaped by the exit watcher. Returns `true` if a still-running
    /// process was actually signalled, `false` if there was nothing left
    /// to kill — callers use this to tell a broker-forced kill apart from
    /// tearing down an already-dead channel.
    pub async fn terminate(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => {
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "Failed to send kill to transcoder process");
                }
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn progress_token(&self) -> &str {
        &self.progress_token
    }
}

fn spawn_stderr_drain(
    stderr: tokio::process::ChildStderr,
    progress_token: String,
    last_error: Arc<SyncMutex<Option<String>>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.starts_with(&progress_token) {
                        continue;
                    }
                    let lowered = line.to_lowercase();
                    if lowered.contains("error") || lowered.contains("failed") {
                        debug!(line = %line, "Transcoder stderr error line");
                        *last_error.lock() = Some(line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Error reading transcoder stderr");
                    break;
                }
            }
        }
    });
}

/// Polls the child for exit with `try_wait`, re-acquiring the lock only for
/// the duration of each poll, never across an `.await`. Holding the guard
/// across `Child::wait().await` would starve `Supervisor::terminate` for the
/// process's entire lifetime, since both share the same mutex.
fn spawn_exit_watcher(child: Arc<AsyncMutex<Option<Child>>>, event_tx: mpsc::Sender<SupervisorEvent>) {
    tokio::spawn(async move {
        let status = loop {
            let polled = {
                let mut guard = child.lock().await;
                match guard.as_mut() {
                    Some(c) => c.try_wait(),
                    None => return,
                }
            };
            match polled {
                Ok(Some(status)) => break Ok(status),
                Ok(None) => tokio::time::sleep(EXIT_POLL_INTERVAL).await,
                Err(e) => break Err(e),
            }
        };

        let exit_code = match &status {
            Ok(s) => s.code(),
            Err(e) => {
                warn!(error = %e, "Error waiting on transcoder process");
                None
            }
        };

        *child.lock().await = None;

        info!(exit_code, "Transcoder process exited");
        let _ = event_tx
            .send(SupervisorEvent::Exited {
                exit_code,
                exit_time: Utc::now(),
            })
            .await;
    });
}
