/// Debounced auto-save timer
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Emitted once the debounce window elapses with no further edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSaveDue;

/// Every `reset` cancels the pending tick and schedules a new one
/// `window` later; the owner performs the snapshot when `AutoSaveDue`
/// arrives.
pub struct AutoSaveScheduler {
    reset_tx: mpsc::UnboundedSender<Reset>,
    task: JoinHandle<()>,
}

enum Reset {
    Schedule,
    Cancel,
}

impl AutoSaveScheduler {
    pub fn spawn(window: Duration, due_tx: mpsc::UnboundedSender<AutoSaveDue>) -> Self {
        let (reset_tx, mut reset_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut deadline: Option<Instant> = None;
            loop {
                tokio::select! {
                    msg = reset_rx.recv() => match msg {
                        Some(Reset::Schedule) => deadline = Some(Instant::now() + window),
                        Some(Reset::Cancel) => deadline = None,
                        None => break,
                    },
                    _ = wait_for(deadline) => {
                        deadline = None;
                        debug!("Auto-save window elapsed");
                        if due_tx.send(AutoSaveDue).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { reset_tx, task }
    }

    /// Restart the debounce window
    pub fn reset(&self) {
        let _ = self.reset_tx.send(Reset::Schedule);
    }

    /// Drop any pending tick
    pub fn cancel(&self) {
        let _ = self.reset_tx.send(Reset::Cancel);
    }
}

impl Drop for AutoSaveScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
