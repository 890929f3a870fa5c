//! Sample-accurate MIDI delivery through the host interface
//!
//! Events are stamped with an absolute sample position when added and held
//! back until the running sample counter reaches it. The device advances the
//! counter as audio is produced, so each event reaches the chip at the
//! sample it was scheduled for.
//!
//! Every MIDI byte becomes one queue word, `byte << 16`. Realtime messages
//! are a single byte; channel aftertouch sends two words, every other short
//! message three.

use super::{Hdi08List, HostFlags};
use crate::midi::{MidiEvent, AFTERTOUCH, START_OF_SYSEX, TIMING_CLOCK};
use crate::ChipWord;
use log::trace;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug)]
struct ScheduledEvent {
    at: u64,
    event: MidiEvent,
}

/// MIDI scheduler in front of an [`Hdi08List`]
#[derive(Debug)]
pub struct Hdi08MidiQueue {
    output: Arc<Hdi08List>,
    pending: VecDeque<ScheduledEvent>,
    sample_counter: u64,
    host_flags: Option<HostFlags>,
    words: Vec<ChipWord>,
}

impl Hdi08MidiQueue {
    /// Scheduler writing to `output`
    ///
    /// When `host_flags` is set, that flag state is requested before every
    /// event.
    pub fn new(output: Arc<Hdi08List>, host_flags: Option<HostFlags>) -> Self {
        Self {
            output,
            pending: VecDeque::new(),
            sample_counter: 0,
            host_flags,
            words: Vec::with_capacity(16),
        }
    }

    /// Schedule `event` at `event.offset` samples from now
    pub fn add(&mut self, event: MidiEvent) {
        let at = self.sample_counter + event.offset as u64;
        self.add_at(event, at);
    }

    /// Schedule `event` at absolute sample `at`
    ///
    /// Events for the same sample keep their insertion order.
    pub fn add_at(&mut self, event: MidiEvent, at: u64) {
        let index = self.pending.partition_point(|e| e.at <= at);
        self.pending.insert(index, ScheduledEvent { at, event });
    }

    /// Send every event due at the current sample
    ///
    /// Returns the number of events released.
    pub fn release_due(&mut self) -> usize {
        let mut released = 0;
        while self
            .pending
            .front()
            .is_some_and(|e| e.at <= self.sample_counter)
        {
            if let Some(scheduled) = self.pending.pop_front() {
                self.send(&scheduled.event);
                released += 1;
            }
        }
        released
    }

    /// Move the counter forward by `samples`, releasing events sample by sample
    pub fn advance(&mut self, samples: u32) {
        for _ in 0..samples {
            self.release_due();
            self.sample_counter += 1;
        }
    }

    /// One sample of audio has been written
    pub fn on_audio_written(&mut self) {
        self.advance(1);
    }

    /// Running sample counter
    pub fn sample_counter(&self) -> u64 {
        self.sample_counter
    }

    /// Events not yet released
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop all pending events
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn send(&mut self, event: &MidiEvent) {
        self.words.clear();

        if event.is_sysex() {
            self.words
                .extend(event.sysex.iter().map(|&b| (b as ChipWord) << 16));
        } else {
            let byte_count = if event.a >= TIMING_CLOCK {
                1
            } else if event.a & 0xf0 == AFTERTOUCH && event.a < START_OF_SYSEX {
                2
            } else {
                3
            };
            self.words.extend(
                [event.a, event.b, event.c][..byte_count]
                    .iter()
                    .map(|&b| (b as ChipWord) << 16),
            );
        }

        trace!(
            "MIDI {:02x} at sample {}, {} word(s)",
            event.a,
            self.sample_counter,
            self.words.len()
        );

        if let Some(flags) = self.host_flags {
            self.output.write_host_flags(flags);
        }
        self.output.enqueue(&self.words);
    }
}
