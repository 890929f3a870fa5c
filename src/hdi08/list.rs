//! Fan-out over the queues of all chips of a device

use super::{Hdi08Queue, HostFlags};
use crate::ChipWord;
use std::sync::Arc;

/// Broadcasts host interface writes to every registered chip
///
/// Each queue receives the same operations in the same order, so shared
/// commands stay ordered identically on all chips.
#[derive(Debug, Default)]
pub struct Hdi08List {
    queues: Vec<Arc<Hdi08Queue>>,
}

impl Hdi08List {
    /// List without queues
    pub fn new() -> Self {
        Self::default()
    }

    /// List over `queues`
    pub fn from_queues(queues: Vec<Arc<Hdi08Queue>>) -> Self {
        Self { queues }
    }

    /// Register another chip
    pub fn add(&mut self, queue: Arc<Hdi08Queue>) {
        self.queues.push(queue);
    }

    /// Number of registered chips
    pub fn count(&self) -> usize {
        self.queues.len()
    }

    /// Queue of chip `index`
    pub fn queue(&self, index: usize) -> Option<&Arc<Hdi08Queue>> {
        self.queues.get(index)
    }

    /// All queues in registration order
    pub fn queues(&self) -> &[Arc<Hdi08Queue>] {
        &self.queues
    }

    /// Enqueue `words` on every chip
    pub fn enqueue(&self, words: &[ChipWord]) {
        for queue in &self.queues {
            queue.enqueue(words);
        }
    }

    /// Request a host flag change on every chip
    pub fn write_host_flags(&self, flags: HostFlags) {
        for queue in &self.queues {
            queue.write_host_flags(flags);
        }
    }

    /// Drain every chip's queue
    pub fn drain(&self) {
        for queue in &self.queues {
            queue.drain();
        }
    }

    /// True when every chip has consumed everything
    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    /// True when any chip's hardware FIFO is full
    pub fn rx_full(&self) -> bool {
        self.queues.iter().any(|q| q.rx_full())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::FakeHostInterface;
    use super::*;

    #[test]
    fn test_broadcast_keeps_order_per_chip() {
        let a = Arc::new(FakeHostInterface::with_capacity(2));
        let b = Arc::new(FakeHostInterface::with_capacity(8));
        let mut list = Hdi08List::new();
        list.add(Arc::new(Hdi08Queue::new(a.clone())));
        list.add(Arc::new(Hdi08Queue::new(b.clone())));
        assert_eq!(list.count(), 2);

        list.enqueue(&[1, 2, 3]);
        list.enqueue(&[4]);
        assert!(list.rx_full());
        assert_eq!(b.delivered(), vec![1, 2, 3, 4]);
        assert_eq!(a.delivered(), vec![1, 2]);

        a.consume(2);
        list.drain();
        assert_eq!(a.delivered(), b.delivered());
        assert!(!list.is_empty());

        a.consume(2);
        b.consume(4);
        assert!(list.is_empty());
    }
}
