//! Single-slot recurring backup timer.
//!
//! At most one timer is pending. When it fires, the slot is emptied and a
//! tick is sent over the channel returned by [`BackupScheduler::new`]; the
//! receiving worker runs the backup and re-arms the timer. Cancelling only
//! affects a pending timer, never a backup that is already running.

use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct PendingRun {
    id: u64,
    token: CancellationToken,
    due: DateTime<Local>,
}

pub struct BackupScheduler {
    frequency: Duration,
    ticks: mpsc::Sender<()>,
    slot: Arc<Mutex<Option<PendingRun>>>,
    next_id: AtomicU64,
}

impl BackupScheduler {
    /// Create a scheduler firing every `frequency`, plus the tick receiver.
    pub fn new(frequency: Duration) -> (Self, mpsc::Receiver<()>) {
        let (ticks, rx) = mpsc::channel(1);
        let scheduler = Self {
            frequency,
            ticks,
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        };
        (scheduler, rx)
    }

    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    /// Arm the timer.
    ///
    /// If a timer is already pending it is kept unless `force` is set, in
    /// which case it is replaced. Returns whether a new timer was armed.
    pub async fn arm(&self, force: bool) -> bool {
        let mut slot = self.slot.lock().await;

        if let Some(pending) = slot.as_ref() {
            if !force {
                info!("Backup timer already in progress. Not creating a new one...");
                return false;
            }
            info!("Backup timer already in progress. Canceling it...");
            pending.token.cancel();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let now = Local::now();
        let due = chrono::Duration::from_std(self.frequency)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(now);

        let frequency = self.frequency;
        let timer_token = token.clone();
        let timer_slot = Arc::clone(&self.slot);
        let ticks = self.ticks.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(frequency) => {}
                _ = timer_token.cancelled() => return,
            }

            {
                let mut slot = timer_slot.lock().await;
                match slot.as_ref() {
                    Some(pending) if pending.id == id => *slot = None,
                    // Cancelled or replaced while we were waking up.
                    _ => return,
                }
            }

            debug!("Backup timer fired");
            if ticks.send(()).await.is_err() {
                warn!("Backup timer fired but no backup worker is listening");
            }
        });

        *slot = Some(PendingRun { id, token, due });
        info!(
            "Backup timer started. Next backup at: {}",
            due.format("%Y-%m-%d %H:%M:%S")
        );
        true
    }

    /// Disarm the pending timer, if any. Returns whether one was pending.
    pub async fn cancel(&self) -> bool {
        debug!("Cancelling backup timer...");
        match self.slot.lock().await.take() {
            Some(pending) => {
                pending.token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_armed(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// When the pending timer fires, if one is armed.
    pub async fn next_run(&self) -> Option<DateTime<Local>> {
        self.slot.lock().await.as_ref().map(|pending| pending.due)
    }
}
