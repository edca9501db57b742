use std::collections::VecDeque;

use conflux_queue::Outcome;

/// Settled outcomes waiting to be handed to the consumer.
pub(crate) enum ResultBuffer<U, E> {
    /// Sparse window starting at `base`, the next index to deliver.
    Ordered {
        base: usize,
        slots: VecDeque<Option<Outcome<U, E>>>,
    },
    /// Completion order.
    Unordered { items: VecDeque<Outcome<U, E>> },
}

impl<U, E> ResultBuffer<U, E> {
    pub(crate) fn new(ordered: bool) -> Self {
        if ordered {
            ResultBuffer::Ordered {
                base: 0,
                slots: VecDeque::new(),
            }
        } else {
            ResultBuffer::Unordered {
                items: VecDeque::new(),
            }
        }
    }

    pub(crate) fn insert(&mut self, index: usize, outcome: Outcome<U, E>) {
        match self {
            ResultBuffer::Ordered { base, slots } => {
                debug_assert!(index >= *base, "index {index} already delivered");
                let offset = index - *base;
                if slots.len() <= offset {
                    slots.resize_with(offset + 1, || None);
                }
                debug_assert!(slots[offset].is_none(), "index {index} written twice");
                slots[offset] = Some(outcome);
            }
            ResultBuffer::Unordered { items } => items.push_back(outcome),
        }
    }

    /// Next deliverable outcome, if the head is populated.
    pub(crate) fn pop_ready(&mut self) -> Option<Outcome<U, E>> {
        match self {
            ResultBuffer::Ordered { base, slots } => {
                slots.front()?.as_ref()?;
                let outcome = slots.pop_front().flatten();
                *base += 1;
                outcome
            }
            ResultBuffer::Unordered { items } => items.pop_front(),
        }
    }

    /// Drop everything buffered for indices after `index` (ordered only).
    pub(crate) fn truncate_after(&mut self, index: usize) {
        if let ResultBuffer::Ordered { base, slots } = self {
            if index >= *base {
                slots.truncate(index - *base + 1);
            } else {
                slots.clear();
            }
        }
    }

    /// Number of populated entries.
    pub(crate) fn len(&self) -> usize {
        match self {
            ResultBuffer::Ordered { slots, .. } => slots.iter().filter(|s| s.is_some()).count(),
            ResultBuffer::Unordered { items } => items.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&mut self) {
        match self {
            ResultBuffer::Ordered { slots, .. } => slots.clear(),
            ResultBuffer::Unordered { items } => items.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use conflux_queue::TaskError;

    use super::*;

    #[test]
    fn ordered_waits_for_head() {
        let mut buf: ResultBuffer<u32, ()> = ResultBuffer::new(true);
        buf.insert(2, Ok(20));
        buf.insert(1, Ok(10));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.pop_ready(), None);

        buf.insert(0, Ok(0));
        assert_eq!(buf.pop_ready(), Some(Ok(0)));
        assert_eq!(buf.pop_ready(), Some(Ok(10)));
        assert_eq!(buf.pop_ready(), Some(Ok(20)));
        assert_eq!(buf.pop_ready(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn ordered_keeps_sparse_holes() {
        let mut buf: ResultBuffer<u32, ()> = ResultBuffer::new(true);
        buf.insert(0, Ok(0));
        buf.insert(3, Ok(30));
        assert_eq!(buf.pop_ready(), Some(Ok(0)));
        assert_eq!(buf.pop_ready(), None);

        buf.insert(1, Ok(10));
        buf.insert(2, Err(TaskError::Failed(())));
        assert_eq!(buf.pop_ready(), Some(Ok(10)));
        assert_eq!(buf.pop_ready(), Some(Err(TaskError::Failed(()))));
        assert_eq!(buf.pop_ready(), Some(Ok(30)));
    }

    #[test]
    fn ordered_truncate_drops_later_indices() {
        let mut buf: ResultBuffer<u32, ()> = ResultBuffer::new(true);
        buf.insert(1, Ok(10));
        buf.insert(2, Ok(20));
        buf.insert(4, Ok(40));
        buf.truncate_after(2);
        assert_eq!(buf.len(), 2);

        buf.insert(0, Ok(0));
        assert_eq!(buf.pop_ready(), Some(Ok(0)));
        assert_eq!(buf.pop_ready(), Some(Ok(10)));
        assert_eq!(buf.pop_ready(), Some(Ok(20)));
        assert_eq!(buf.pop_ready(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn unordered_is_fifo_and_ignores_truncate() {
        let mut buf: ResultBuffer<u32, ()> = ResultBuffer::new(false);
        buf.insert(5, Ok(50));
        buf.insert(1, Ok(10));
        buf.truncate_after(0);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.pop_ready(), Some(Ok(50)));
        assert_eq!(buf.pop_ready(), Some(Ok(10)));
        assert_eq!(buf.pop_ready(), None);
    }

    #[test]
    fn clear_empties_both_modes() {
        for ordered in [true, false] {
            let mut buf: ResultBuffer<u32, ()> = ResultBuffer::new(ordered);
            buf.insert(0, Ok(1));
            buf.clear();
            assert!(buf.is_empty());
            assert_eq!(buf.pop_ready(), None);
        }
    }
}
