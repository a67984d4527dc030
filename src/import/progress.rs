use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub current_table: String,
    /// 0 when a table starts, 100 when it finishes.
    pub current_table_progress: u8,
    pub total_tables: usize,
    pub overall_progress: u8,
    pub records_processed: usize,
    pub records_imported: usize,
    pub is_complete: bool,
}

/// Pushes progress into a watch channel. `None` means no session is running.
///
/// Sending never fails for lack of subscribers.
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    tx: watch::Sender<Option<ImportProgress>>,
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ImportProgress>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<ImportProgress> {
        self.tx.borrow().clone()
    }

    /// Publish a snapshot. `overall_progress` never moves backwards within
    /// a session.
    pub fn publish(&self, mut progress: ImportProgress) {
        self.tx.send_modify(|slot| {
            if let Some(previous) = slot.as_ref() {
                if !previous.is_complete {
                    progress.overall_progress =
                        progress.overall_progress.max(previous.overall_progress);
                }
            }
            *slot = Some(progress);
        });
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

/// Overall percent after `finished` of `total` tables.
pub fn overall_percent(finished: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((finished.min(total) * 100) / total) as u8
}
