//! Sysex Reassembly
//!
//! Hardware MIDI inputs deliver long sysex messages in several packets: the
//! first starts with `F0` but lacks the closing `F7`, continuation packets
//! follow until one ends with `F7`.

use super::{MidiEvent, END_OF_SYSEX, START_OF_SYSEX};
use log::debug;

/// Collects sysex packets into complete messages
#[derive(Debug, Default)]
pub struct SysexAssembler {
    pending: Option<MidiEvent>,
}

impl SysexAssembler {
    /// Empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event
    ///
    /// Returns the event to forward, if any. Channel messages and complete
    /// sysex pass straight through; a start packet replaces any unfinished
    /// message; a continuation without a start is dropped.
    pub fn push(&mut self, event: MidiEvent) -> Option<MidiEvent> {
        let (Some(&first), Some(&last)) = (event.sysex.first(), event.sysex.last()) else {
            return Some(event);
        };

        let starts = first == START_OF_SYSEX;
        let ends = last == END_OF_SYSEX;

        if starts && ends {
            return Some(event);
        }

        if starts {
            if self.pending.is_some() {
                debug!("Discarding unfinished sysex");
            }
            self.pending = Some(event);
            return None;
        }

        let Some(pending) = self.pending.as_mut() else {
            debug!("Dropping sysex continuation without start ({} bytes)", event.sysex.len());
            return None;
        };

        pending.sysex.extend_from_slice(&event.sysex);

        if ends {
            self.pending.take()
        } else {
            None
        }
    }

    /// True while a message is incomplete
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any unfinished message
    pub fn reset(&mut self) {
        self.pending = None;
    }
}
