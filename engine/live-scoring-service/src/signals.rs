//! Shutdown signal plumbing

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SIGTERM_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn request_shutdown(tx: &watch::Sender<bool>, source: &str) {
    info!(source, "Shutdown requested");
    // Receivers may already be gone during teardown
    let _ = tx.send(true);
}

/// Watch channel that flips to `true` on Ctrl+C or SIGTERM.
/// Every scheduler loop holds a clone of the receiver.
pub fn setup_signal_handlers() -> Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);

    let ctrl_c_tx = Arc::clone(&tx);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => request_shutdown(&ctrl_c_tx, "ctrl_c"),
            Err(e) => error!("Cannot listen for Ctrl+C: {}", e),
        }
    });

    #[cfg(unix)]
    {
        let sigterm = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&sigterm))
            .context("Failed to register SIGTERM handler")?;

        let sigterm_tx = Arc::clone(&tx);
        tokio::spawn(async move {
            while !sigterm.load(Ordering::Relaxed) {
                if sigterm_tx.is_closed() {
                    return;
                }
                tokio::time::sleep(SIGTERM_POLL_INTERVAL).await;
            }
            request_shutdown(&sigterm_tx, "sigterm");
        });
    }

    Ok(rx)
}

/// Join the scheduler loops, abandoning any that outlive `per_task_timeout`
pub async fn graceful_shutdown(handles: Vec<JoinHandle<()>>, per_task_timeout: Duration) {
    info!(tasks = handles.len(), "Waiting for scheduler loops to stop");

    let mut abandoned = 0;
    for (task, handle) in handles.into_iter().enumerate() {
        match tokio::time::timeout(per_task_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task, "Scheduler loop ended abnormally: {}", e),
            Err(_) => {
                warn!(task, timeout_secs = per_task_timeout.as_secs(), "Scheduler loop did not stop in time");
                abandoned += 1;
            }
        }
    }

    info!(abandoned, "Scheduler loops stopped");
}
