use serde::Serialize;

use crate::task::SettleKind;

/// Point-in-time counters for a [`TaskQueue`](crate::TaskQueue).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Tasks ever submitted.
    pub submitted: u64,
    /// Tasks promoted to running.
    pub started: u64,
    /// Tasks that finished with a value.
    pub completed: u64,
    /// Tasks whose work returned an error.
    pub failed: u64,
    /// Tasks whose work panicked.
    pub panicked: u64,
    /// Tasks cancelled before they started.
    pub cancelled: u64,
    /// Currently running.
    pub running: usize,
    /// Currently waiting for a slot.
    pub pending: usize,
    /// Highest `running` ever observed.
    pub peak_running: usize,
}

impl QueueStats {
    /// Tasks that reached a terminal state, including cancellations.
    pub fn settled(&self) -> u64 {
        self.completed + self.failed + self.panicked + self.cancelled
    }

    pub(crate) fn record_start(&mut self, running: usize) {
        self.started += 1;
        self.peak_running = self.peak_running.max(running);
    }

    pub(crate) fn record_settle(&mut self, kind: SettleKind) {
        match kind {
            SettleKind::Completed => self.completed += 1,
            SettleKind::Failed => self.failed += 1,
            SettleKind::Panicked => self.panicked += 1,
        }
    }

    pub(crate) fn record_cancelled(&mut self, count: usize) {
        self.cancelled += count as u64;
    }
}
