//! Per-chip host interface queue

use super::{HostFlags, HostInterface, HostWord};
use crate::{ChipWord, WORD_MASK};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Where a queue stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Software and hardware FIFO are empty
    Idle,
    /// Words wait in the software FIFO
    HasPendingWords,
    /// Software FIFO is empty, the chip has not read everything yet
    Draining,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<HostWord>,
    next_flags: Option<HostFlags>,
    last_flags: Option<HostFlags>,
}

/// Software FIFO in front of one chip's host interface
///
/// Callable from any thread. [`drain`](Self::drain) never blocks on the
/// hardware; whatever does not fit stays queued for the next call.
pub struct Hdi08Queue {
    hdi: Arc<dyn HostInterface>,
    state: Mutex<QueueState>,
}

impl Hdi08Queue {
    /// Queue feeding `hdi`
    pub fn new(hdi: Arc<dyn HostInterface>) -> Self {
        Self {
            hdi,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Append `words` and push as many as possible
    ///
    /// A pending host flag change rides on the first word of the batch.
    pub fn enqueue(&self, words: &[ChipWord]) {
        let Some((&first, rest)) = words.split_first() else {
            return;
        };

        let mut state = self.state.lock();

        let flags = state.next_flags.take();
        state.pending.push_back(HostWord {
            value: first & WORD_MASK,
            flags,
        });
        state.pending.extend(rest.iter().map(|&w| HostWord {
            value: w & WORD_MASK,
            flags: None,
        }));

        self.send_pending(&mut state);
    }

    /// Request a host flag change with the next enqueued batch
    ///
    /// Requests matching the last requested state are ignored. Requests made
    /// before the next batch accumulate: their set flags are merged.
    pub fn write_host_flags(&self, flags: HostFlags) {
        let mut state = self.state.lock();

        if state.last_flags == Some(flags) {
            return;
        }

        state.last_flags = Some(flags);
        let pending = state.next_flags.unwrap_or(HostFlags::empty());
        state.next_flags = Some(pending | flags);
    }

    /// Push pending words into the hardware FIFO
    pub fn drain(&self) {
        let mut state = self.state.lock();
        self.send_pending(&mut state);
    }

    fn send_pending(&self, state: &mut QueueState) {
        while let Some(&word) = state.pending.front() {
            if self.hdi.rx_full() {
                break;
            }

            if let Some(flags) = word.flags {
                if self.hdi.needs_to_wait_for_host_flags(flags) {
                    break;
                }
                self.hdi.set_host_flags(flags);
            }

            self.hdi.write_rx(word.value);
            state.pending.pop_front();
        }
    }

    /// True when neither the software nor the hardware FIFO holds data
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.pending.is_empty() && !self.hdi.has_rx_data()
    }

    /// Hardware FIFO is full
    pub fn rx_full(&self) -> bool {
        self.hdi.rx_full()
    }

    /// Words waiting in the software FIFO
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Current state
    pub fn status(&self) -> QueueStatus {
        let state = self.state.lock();
        if !state.pending.is_empty() {
            QueueStatus::HasPendingWords
        } else if self.hdi.has_rx_data() {
            QueueStatus::Draining
        } else {
            QueueStatus::Idle
        }
    }

    /// The hardware side
    pub fn host_interface(&self) -> &Arc<dyn HostInterface> {
        &self.hdi
    }
}

impl std::fmt::Debug for Hdi08Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hdi08Queue")
            .field("pending", &self.pending_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::FakeHostInterface;
    use super::*;

    fn queue(capacity: usize) -> (Arc<FakeHostInterface>, Hdi08Queue) {
        let hdi = Arc::new(FakeHostInterface::with_capacity(capacity));
        let queue = Hdi08Queue::new(hdi.clone());
        (hdi, queue)
    }

    #[test]
    fn test_backpressure() {
        let (hdi, queue) = queue(2);
        queue.enqueue(&[1, 2, 3, 4, 5]);
        assert_eq!(hdi.delivered(), vec![1, 2]);
        assert_eq!(queue.status(), QueueStatus::HasPendingWords);

        queue.drain();
        assert_eq!(hdi.delivered(), vec![1, 2]);

        hdi.consume(1);
        queue.drain();
        assert_eq!(hdi.delivered(), vec![1, 2, 3]);

        hdi.consume(8);
        queue.drain();
        hdi.consume(8);
        queue.drain();
        assert_eq!(hdi.delivered(), vec![1, 2, 3, 4, 5]);
        assert!(queue.is_empty());
        assert_eq!(queue.status(), QueueStatus::Idle);
    }

    #[test]
    fn test_draining_until_chip_reads() {
        let (hdi, queue) = queue(4);
        queue.enqueue(&[7]);
        assert!(!queue.is_empty());
        assert_eq!(queue.status(), QueueStatus::Draining);
        hdi.consume(1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_words_are_masked() {
        let (hdi, queue) = queue(4);
        queue.enqueue(&[0xff12_3456]);
        assert_eq!(hdi.delivered(), vec![0x12_3456]);
    }

    #[test]
    fn test_flags_attach_to_first_word_of_next_batch() {
        let (hdi, queue) = queue(16);
        queue.write_host_flags(HostFlags::FLAG1);
        queue.enqueue(&[10, 11]);
        queue.enqueue(&[12]);
        let log = hdi.state.lock().flag_log.clone();
        assert_eq!(log, vec![(0, HostFlags::FLAG1)]);
    }

    #[test]
    fn test_unchanged_flags_are_ignored() {
        let (hdi, queue) = queue(16);
        queue.write_host_flags(HostFlags::FLAG1);
        queue.enqueue(&[1]);
        queue.write_host_flags(HostFlags::FLAG1);
        queue.enqueue(&[2]);
        queue.write_host_flags(HostFlags::empty());
        queue.enqueue(&[3]);
        let log = hdi.state.lock().flag_log.clone();
        assert_eq!(log, vec![(0, HostFlags::FLAG1), (2, HostFlags::empty())]);
    }

    #[test]
    fn test_flag_wait_blocks_in_order() {
        let (hdi, queue) = queue(16);
        queue.enqueue(&[1]);
        hdi.state.lock().flags_busy = true;
        queue.write_host_flags(HostFlags::FLAG0);
        queue.enqueue(&[2, 3]);
        queue.enqueue(&[4]);
        assert_eq!(hdi.delivered(), vec![1]);

        hdi.state.lock().flags_busy = false;
        queue.drain();
        assert_eq!(hdi.delivered(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_pending_flag_requests_accumulate() {
        let (hdi, queue) = queue(16);
        queue.write_host_flags(HostFlags::FLAG0);
        queue.write_host_flags(HostFlags::FLAG1);
        queue.enqueue(&[1]);
        queue.write_host_flags(HostFlags::empty());
        queue.enqueue(&[2]);
        let log = hdi.state.lock().flag_log.clone();
        assert_eq!(
            log,
            vec![(0, HostFlags::FLAG0 | HostFlags::FLAG1), (1, HostFlags::empty())]
        );
    }

    #[test]
    fn test_empty_batch_keeps_flag_change() {
        let (hdi, queue) = queue(16);
        queue.write_host_flags(HostFlags::FLAG0);
        queue.enqueue(&[]);
        queue.enqueue(&[5]);
        assert_eq!(hdi.state.lock().flag_log.clone(), vec![(0, HostFlags::FLAG0)]);
    }
}
