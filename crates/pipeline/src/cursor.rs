use std::collections::BTreeMap;

use conflux_queue::{CancelHandle, Outcome};

use crate::buffer::ResultBuffer;

/// Bookkeeping for one pipeline run.
///
/// Every index handed out by [`Cursor::claim_index`] ends up in exactly one
/// place: `scheduled` while its task is outstanding, the buffer once it has
/// settled, or nowhere once it was abandoned by a short-circuit.
pub(crate) struct Cursor<U, E> {
    ordered: bool,
    next_fetch: usize,
    delivered: usize,
    scheduled: BTreeMap<usize, CancelHandle>,
    buffer: ResultBuffer<U, E>,
    exhausted: bool,
    should_stop: bool,
    finished: bool,
}

impl<U, E> Cursor<U, E> {
    pub(crate) fn new(ordered: bool) -> Self {
        Self {
            ordered,
            next_fetch: 0,
            delivered: 0,
            scheduled: BTreeMap::new(),
            buffer: ResultBuffer::new(ordered),
            exhausted: false,
            should_stop: false,
            finished: false,
        }
    }

    pub(crate) fn claim_index(&mut self) -> usize {
        let index = self.next_fetch;
        self.next_fetch += 1;
        index
    }

    pub(crate) fn track(&mut self, index: usize, cancel: CancelHandle) {
        self.scheduled.insert(index, cancel);
    }

    /// Stop tracking a settled task. `false` means it was abandoned and its
    /// outcome must be thrown away.
    pub(crate) fn untrack(&mut self, index: usize) -> bool {
        self.scheduled.remove(&index).is_some()
    }

    pub(crate) fn store(&mut self, index: usize, outcome: Outcome<U, E>) {
        self.buffer.insert(index, outcome);
    }

    pub(crate) fn pop_ready(&mut self) -> Option<Outcome<U, E>> {
        let outcome = self.buffer.pop_ready()?;
        self.delivered += 1;
        Some(outcome)
    }

    /// Stop fetching and abandon work that can no longer be delivered.
    ///
    /// Ordered runs keep everything up to `index` so earlier results still
    /// come out first. Unordered runs abandon every outstanding task.
    /// Returns how many tasks were abandoned.
    pub(crate) fn short_circuit(&mut self, index: usize) -> usize {
        self.should_stop = true;
        let cutoff = if self.ordered { index + 1 } else { 0 };
        let abandoned = self.scheduled.split_off(&cutoff);
        for cancel in abandoned.values() {
            cancel.cancel();
        }
        if self.ordered {
            self.buffer.truncate_after(index);
        }
        abandoned.len()
    }

    /// Cancel everything outstanding and finish. Returns how many tasks
    /// were abandoned.
    pub(crate) fn halt(&mut self) -> usize {
        let abandoned = self.cancel_scheduled();
        self.buffer.clear();
        self.should_stop = true;
        self.finished = true;
        abandoned
    }

    pub(crate) fn cancel_scheduled(&mut self) -> usize {
        let abandoned = std::mem::take(&mut self.scheduled);
        for cancel in abandoned.values() {
            cancel.cancel();
        }
        abandoned.len()
    }

    pub(crate) fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub(crate) fn finish(&mut self) {
        self.finished = true;
    }

    /// Scheduled plus buffered.
    pub(crate) fn outstanding(&self) -> usize {
        self.scheduled.len() + self.buffer.len()
    }

    /// Nothing more will ever be delivered.
    pub(crate) fn is_drained(&self) -> bool {
        (self.exhausted || self.should_stop) && self.scheduled.is_empty() && self.buffer.is_empty()
    }

    pub(crate) fn may_fetch(&self) -> bool {
        !self.exhausted && !self.should_stop
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.should_stop
    }

    pub(crate) fn fetched(&self) -> usize {
        self.next_fetch
    }

    pub(crate) fn delivered(&self) -> usize {
        self.delivered
    }

    pub(crate) fn scheduled(&self) -> usize {
        self.scheduled.len()
    }
}
