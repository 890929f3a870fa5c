//! MIDI Types, Translation and Clock
//!
//! - [`MidiEvent`]: one channel message or complete sysex, tagged with a
//!   sample offset inside the current block
//! - [`MidiTranslator`]: channel fan-out driven by an embedded sysex protocol
//! - [`SysexAssembler`]: reassembly of sysex split over several packets
//! - [`MidiClock`]: transport-to-clock synthesis

pub mod clock;
pub mod sysex;
pub mod translator;

pub use clock::{MidiClock, Transport};
pub use sysex::SysexAssembler;
pub use translator::MidiTranslator;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

/// Note off
pub const NOTE_OFF: u8 = 0x80;
/// Note on
pub const NOTE_ON: u8 = 0x90;
/// Polyphonic key pressure
pub const POLY_PRESSURE: u8 = 0xa0;
/// Control change
pub const CONTROL_CHANGE: u8 = 0xb0;
/// Program change
pub const PROGRAM_CHANGE: u8 = 0xc0;
/// Channel pressure
pub const AFTERTOUCH: u8 = 0xd0;
/// Pitch bend
pub const PITCH_BEND: u8 = 0xe0;
/// Start of system exclusive
pub const START_OF_SYSEX: u8 = 0xf0;
/// Song position pointer
pub const SONG_POSITION: u8 = 0xf2;
/// Song select
pub const SONG_SELECT: u8 = 0xf3;
/// Tune request
pub const TUNE_REQUEST: u8 = 0xf5;
/// End of system exclusive
pub const END_OF_SYSEX: u8 = 0xf7;
/// Timing clock, 24 per quarter note
pub const TIMING_CLOCK: u8 = 0xf8;
/// Transport start
pub const START: u8 = 0xfa;
/// Transport continue
pub const CONTINUE: u8 = 0xfb;
/// Transport stop
pub const STOP: u8 = 0xfc;
/// Active sensing
pub const ACTIVE_SENSING: u8 = 0xfe;
/// System reset
pub const SYSTEM_RESET: u8 = 0xff;

/// Message kind of a status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MidiStatus {
    /// Note off
    NoteOff = 0x80,
    /// Note on
    NoteOn = 0x90,
    /// Polyphonic key pressure
    PolyPressure = 0xa0,
    /// Control change
    ControlChange = 0xb0,
    /// Program change
    ProgramChange = 0xc0,
    /// Channel pressure
    Aftertouch = 0xd0,
    /// Pitch bend
    PitchBend = 0xe0,
    /// Start of sysex
    StartOfSysex = 0xf0,
    /// Song position pointer
    SongPosition = 0xf2,
    /// Song select
    SongSelect = 0xf3,
    /// Tune request
    TuneRequest = 0xf5,
    /// End of sysex
    EndOfSysex = 0xf7,
    /// Timing clock
    TimingClock = 0xf8,
    /// Start
    Start = 0xfa,
    /// Continue
    Continue = 0xfb,
    /// Stop
    Stop = 0xfc,
    /// Active sensing
    ActiveSensing = 0xfe,
    /// System reset
    SystemReset = 0xff,
}

impl MidiStatus {
    /// Classify a status byte, ignoring the channel nibble of channel messages
    pub fn from_status_byte(status: u8) -> Option<Self> {
        let kind = if status < START_OF_SYSEX {
            status & 0xf0
        } else {
            status
        };
        Self::from_u8(kind)
    }

    /// True for single-byte realtime messages
    pub fn is_realtime(self) -> bool {
        self as u8 >= TIMING_CLOCK
    }

    /// Data bytes following the status byte
    pub fn data_len(self) -> usize {
        match self {
            MidiStatus::ProgramChange | MidiStatus::Aftertouch | MidiStatus::SongSelect => 1,
            MidiStatus::NoteOff
            | MidiStatus::NoteOn
            | MidiStatus::PolyPressure
            | MidiStatus::ControlChange
            | MidiStatus::PitchBend
            | MidiStatus::SongPosition => 2,
            _ => 0,
        }
    }
}

/// Who produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MidiEventSource {
    /// The plugin host
    #[default]
    Host,
    /// Synthesized inside the shell, e.g. clock
    Internal,
    /// Emitted by the emulated device
    Device,
}

/// One MIDI message at a sample offset
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MidiEvent {
    /// Status byte
    pub a: u8,
    /// First data byte
    pub b: u8,
    /// Second data byte
    pub c: u8,
    /// Complete sysex including `F0`/`F7`; empty for channel messages
    pub sysex: Vec<u8>,
    /// Sample offset relative to the start of the current block
    pub offset: u32,
    /// Producer of the event
    pub source: MidiEventSource,
}

impl MidiEvent {
    /// Short message
    pub fn new(a: u8, b: u8, c: u8, offset: u32) -> Self {
        Self {
            a,
            b,
            c,
            offset,
            ..Default::default()
        }
    }

    /// Sysex message
    pub fn sysex(data: Vec<u8>, offset: u32) -> Self {
        Self {
            a: data.first().copied().unwrap_or(START_OF_SYSEX),
            sysex: data,
            offset,
            ..Default::default()
        }
    }

    /// Set the producer
    pub fn with_source(mut self, source: MidiEventSource) -> Self {
        self.source = source;
        self
    }

    /// True when carrying sysex bytes
    pub fn is_sysex(&self) -> bool {
        !self.sysex.is_empty()
    }

    /// Message kind
    pub fn status(&self) -> Option<MidiStatus> {
        if self.is_sysex() {
            Some(MidiStatus::StartOfSysex)
        } else {
            MidiStatus::from_status_byte(self.a)
        }
    }

    /// Channel of a channel message
    pub fn channel(&self) -> Option<u8> {
        (!self.is_sysex() && self.a >= NOTE_OFF && self.a < START_OF_SYSEX).then_some(self.a & 0x0f)
    }

    /// Bytes as they go over the wire
    pub fn bytes(&self) -> Vec<u8> {
        if self.is_sysex() {
            return self.sysex.clone();
        }
        match self.status() {
            Some(status) => [self.a, self.b, self.c][..1 + status.data_len()].to_vec(),
            None => vec![self.a, self.b, self.c],
        }
    }
}

/// Insert `event` after all events with an offset not greater than its own
///
/// Keeps `events` sorted by offset and stable for equal offsets.
pub fn insert_sorted(events: &mut Vec<MidiEvent>, event: MidiEvent) {
    let index = events.partition_point(|e| e.offset <= event.offset);
    events.insert(index, event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(MidiStatus::from_status_byte(0x93), Some(MidiStatus::NoteOn));
        assert_eq!(MidiStatus::from_status_byte(0xdf), Some(MidiStatus::Aftertouch));
        assert_eq!(MidiStatus::from_status_byte(0xf8), Some(MidiStatus::TimingClock));
        assert_eq!(MidiStatus::from_status_byte(0xf4), None);
        assert!(MidiStatus::Stop.is_realtime());
        assert!(!MidiStatus::SongSelect.is_realtime());
    }

    #[test]
    fn test_event_bytes() {
        assert_eq!(MidiEvent::new(0x91, 60, 100, 0).bytes(), vec![0x91, 60, 100]);
        assert_eq!(MidiEvent::new(0xc2, 5, 0, 0).bytes(), vec![0xc2, 5]);
        assert_eq!(MidiEvent::new(TIMING_CLOCK, 0, 0, 0).bytes(), vec![TIMING_CLOCK]);
        let sysex = MidiEvent::sysex(vec![0xf0, 0x01, 0xf7], 4);
        assert_eq!(sysex.bytes(), vec![0xf0, 0x01, 0xf7]);
        assert_eq!(sysex.channel(), None);
        assert_eq!(MidiEvent::new(0xb7, 1, 2, 0).channel(), Some(7));
    }

    #[test]
    fn test_insert_sorted_is_stable() {
        let mut events = vec![
            MidiEvent::new(0x90, 1, 1, 0),
            MidiEvent::new(0x90, 2, 1, 10),
            MidiEvent::new(0x90, 3, 1, 20),
        ];
        insert_sorted(&mut events, MidiEvent::new(TIMING_CLOCK, 0, 0, 10));
        insert_sorted(&mut events, MidiEvent::new(START, 0, 0, 0));
        let order: Vec<(u32, u8)> = events.iter().map(|e| (e.offset, e.a)).collect();
        assert_eq!(
            order,
            vec![(0, 0x90), (0, START), (10, 0x90), (10, TIMING_CLOCK), (20, 0x90)]
        );
    }
}
