//! MIDI Clock Synthesis
//!
//! Derives Start/Continue/Stop and 24-per-quarter-note timing clock events
//! from the host transport. Clock phase is tracked internally in clock ticks
//! and only re-synchronized to the host position when the host sits on a
//! tick boundary, or after a relocation, so small transport jitter does not
//! move the clock. The next tick to send is counted separately: a resync
//! moves where it lands but never sends a tick twice or skips one.

use super::{insert_sorted, MidiEvent, MidiEventSource, CONTINUE, START, STOP, TIMING_CLOCK};
use log::debug;

/// Timing clocks per quarter note
pub const CLOCKS_PER_QUARTER: f64 = 24.0;

/// Host phase distance from a tick boundary, in ticks, that allows a resync
const RESYNC_EPSILON: f64 = 0.01;

/// Tolerance in samples when placing ticks, absorbs accumulated rounding
const OFFSET_EPSILON: f64 = 1e-6;

/// Distance in ticks between tracked and host position treated as a relocation
const RELOCATE_THRESHOLD: f64 = CLOCKS_PER_QUARTER;

/// Host transport at the start of a block
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transport {
    /// Tempo in quarter notes per minute
    pub bpm: f64,
    /// Position in quarter notes
    pub ppq_position: f64,
    /// Play state
    pub is_playing: bool,
}

/// Transport-to-clock synthesizer
#[derive(Debug, Clone, Default)]
pub struct MidiClock {
    playing: bool,
    /// Position in clock ticks
    clock_pos: f64,
    /// Next tick to send, derived from the position after start or relocation
    next_tick: Option<f64>,
}

impl MidiClock {
    /// Stopped clock at position zero
    pub fn new() -> Self {
        Self::default()
    }

    /// True between a Start/Continue and the next Stop
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Tracked position in clock ticks
    pub fn position(&self) -> f64 {
        self.clock_pos
    }

    /// Insert the clock events for one block into `events`
    ///
    /// `events` must be sorted by offset and stays sorted.
    pub fn process(
        &mut self,
        transport: &Transport,
        samplerate: f32,
        frames: u32,
        events: &mut Vec<MidiEvent>,
    ) {
        let host_pos = transport.ppq_position * CLOCKS_PER_QUARTER;

        if transport.is_playing && !self.playing {
            self.playing = true;
            self.clock_pos = host_pos;
            self.next_tick = None;
            let status = if transport.ppq_position.abs() < 1e-9 {
                START
            } else {
                CONTINUE
            };
            debug!("Transport started at {:.3} ppq", transport.ppq_position);
            insert_sorted(events, Self::event(status, 0));
        } else if !transport.is_playing && self.playing {
            self.playing = false;
            self.clock_pos = 0.0;
            self.next_tick = None;
            debug!("Transport stopped");
            insert_sorted(events, Self::event(STOP, 0));
            return;
        } else if self.playing {
            let phase = host_pos - host_pos.round();
            if (host_pos - self.clock_pos).abs() > RELOCATE_THRESHOLD {
                debug!("Transport relocated to {:.3} ppq", transport.ppq_position);
                self.clock_pos = host_pos;
                self.next_tick = None;
            } else if phase.abs() < RESYNC_EPSILON {
                self.clock_pos = host_pos;
            }
        }

        if !self.playing || frames == 0 || transport.bpm <= 0.0 || samplerate <= 0.0 {
            return;
        }

        let samples_per_clock = samplerate as f64 * 60.0 / (transport.bpm * CLOCKS_PER_QUARTER);
        let block_end = self.clock_pos + frames as f64 / samples_per_clock;
        let eps = OFFSET_EPSILON / samples_per_clock;

        let mut tick = self
            .next_tick
            .unwrap_or_else(|| (self.clock_pos - eps).ceil());
        // a tick the host position already passed goes out at offset 0
        while tick < block_end - eps {
            let offset = ((tick - self.clock_pos) * samples_per_clock + OFFSET_EPSILON)
                .floor()
                .max(0.0) as u32;
            insert_sorted(events, Self::event(TIMING_CLOCK, offset.min(frames - 1)));
            tick += 1.0;
        }

        self.next_tick = Some(tick);
        self.clock_pos = block_end;
    }

    fn event(status: u8, offset: u32) -> MidiEvent {
        MidiEvent::new(status, 0, 0, offset).with_source(MidiEventSource::Internal)
    }
}
