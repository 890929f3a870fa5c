//! MIDI Channel Translator
//!
//! Maps each source channel to a set of target channels and duplicates
//! channel messages once per target. The mapping is controlled in-band with
//! sysex `F0 60 <cmd> ... F7`:
//!
//! | cmd | payload            | effect                                   |
//! |-----|--------------------|------------------------------------------|
//! | 1   | status, data, data | emit the raw message, untranslated       |
//! | 2   | source, target     | add `target` to the set of `source`      |
//! | 3   |                    | reset every channel to itself            |
//! | 4   |                    | clear every mapping                      |
//!
//! Control sysex with an unknown command or wrong length is dropped.

use super::{MidiEvent, END_OF_SYSEX, START_OF_SYSEX};
use log::debug;

/// Vendor id of the control protocol
pub const MANUFACTURER_ID: u8 = 0x60;

/// Emit the carried message without translation
pub const CMD_SKIP_TRANSLATION: u8 = 1;
/// Add a target channel to a source channel
pub const CMD_ADD_TARGET_CHANNEL: u8 = 2;
/// Reset all channels to identity
pub const CMD_RESET_TARGET_CHANNELS: u8 = 3;
/// Remove all mappings
pub const CMD_CLEAR_TARGET_CHANNELS: u8 = 4;

const CHANNELS: usize = 16;

/// Channel fan-out state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiTranslator {
    /// Bit `t` of entry `s` set when source `s` maps to target `t`
    targets: [u16; CHANNELS],
}

impl MidiTranslator {
    /// Identity mapping
    pub fn new() -> Self {
        let mut translator = Self {
            targets: [0; CHANNELS],
        };
        translator.reset();
        translator
    }

    /// Translate `source` and append the results to `results`
    pub fn process(&mut self, results: &mut Vec<MidiEvent>, source: &MidiEvent) {
        if !source.is_sysex() {
            if source.a < START_OF_SYSEX {
                let mask = self.targets[(source.a & 0x0f) as usize];
                for target in (0..CHANNELS as u8).filter(|t| mask & (1 << t) != 0) {
                    let mut result = source.clone();
                    result.a = (source.a & 0xf0) | target;
                    results.push(result);
                }
            } else {
                results.push(source.clone());
            }
            return;
        }

        let sysex = &source.sysex;
        let size = sysex.len();

        if size < 4
            || sysex[0] != START_OF_SYSEX
            || sysex[size - 1] != END_OF_SYSEX
            || sysex[1] != MANUFACTURER_ID
        {
            results.push(source.clone());
            return;
        }

        match sysex[2] {
            CMD_SKIP_TRANSLATION if size == 7 => {
                let mut result = source.clone();
                result.a = sysex[3];
                result.b = sysex[4];
                result.c = sysex[5];
                result.sysex.clear();
                results.push(result);
            }
            CMD_ADD_TARGET_CHANNEL if size == 6 => {
                if !self.add_target_channel(sysex[3], sysex[4]) {
                    debug!("Ignoring channel mapping {} -> {}", sysex[3], sysex[4]);
                }
            }
            CMD_RESET_TARGET_CHANNELS => self.reset(),
            CMD_CLEAR_TARGET_CHANNELS => self.clear(),
            cmd => debug!("Dropping control sysex, command {cmd}, {size} bytes"),
        }
    }

    /// Route `source_channel` to `target_channel` as well
    ///
    /// Returns false when either channel is out of range.
    pub fn add_target_channel(&mut self, source_channel: u8, target_channel: u8) -> bool {
        if source_channel as usize >= CHANNELS || target_channel as usize >= CHANNELS {
            return false;
        }
        self.targets[source_channel as usize] |= 1 << target_channel;
        true
    }

    /// Map every channel to exactly itself
    pub fn reset(&mut self) {
        for (channel, mask) in self.targets.iter_mut().enumerate() {
            *mask = 1 << channel;
        }
    }

    /// Remove every mapping, channel messages are dropped until remapped
    pub fn clear(&mut self) {
        self.targets = [0; CHANNELS];
    }

    /// Target channels of `source_channel` in ascending order
    pub fn targets(&self, source_channel: u8) -> Vec<u8> {
        let mask = self
            .targets
            .get(source_channel as usize)
            .copied()
            .unwrap_or(0);
        (0..CHANNELS as u8).filter(|t| mask & (1 << t) != 0).collect()
    }

    /// Wrap a channel message so it passes the translator unchanged
    ///
    /// Events that already carry sysex are returned as-is.
    pub fn skip_translation_packet(mut event: MidiEvent) -> MidiEvent {
        if !event.is_sysex() {
            event.sysex = vec![
                START_OF_SYSEX,
                MANUFACTURER_ID,
                CMD_SKIP_TRANSLATION,
                event.a,
                event.b,
                event.c,
                END_OF_SYSEX,
            ];
        }
        event
    }

    /// Control message adding a channel mapping
    pub fn set_target_channel_packet(source_channel: u8, target_channel: u8) -> MidiEvent {
        MidiEvent::sysex(
            vec![
                START_OF_SYSEX,
                MANUFACTURER_ID,
                CMD_ADD_TARGET_CHANNEL,
                source_channel,
                target_channel,
                END_OF_SYSEX,
            ],
            0,
        )
    }

    /// Control message resetting to identity
    pub fn reset_packet() -> MidiEvent {
        Self::command_packet(CMD_RESET_TARGET_CHANNELS)
    }

    /// Control message clearing all mappings
    pub fn clear_packet() -> MidiEvent {
        Self::command_packet(CMD_CLEAR_TARGET_CHANNELS)
    }

    fn command_packet(cmd: u8) -> MidiEvent {
        MidiEvent::sysex(vec![START_OF_SYSEX, MANUFACTURER_ID, cmd, END_OF_SYSEX], 0)
    }
}

impl Default for MidiTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(translator: &mut MidiTranslator, event: &MidiEvent) -> Vec<MidiEvent> {
        let mut results = Vec::new();
        translator.process(&mut results, event);
        results
    }

    #[test]
    fn test_identity() {
        let mut translator = MidiTranslator::new();
        for channel in 0..16u8 {
            assert_eq!(translator.targets(channel), vec![channel]);
        }
        let out = run(&mut translator, &MidiEvent::new(0x93, 60, 100, 7));
        assert_eq!(out, vec![MidiEvent::new(0x93, 60, 100, 7)]);
    }

    #[test]
    fn test_add_target_fans_out() {
        let mut translator = MidiTranslator::new();
        run(&mut translator, &MidiTranslator::set_target_channel_packet(2, 9));
        run(&mut translator, &MidiTranslator::set_target_channel_packet(2, 5));

        let out = run(&mut translator, &MidiEvent::new(0xb2, 7, 99, 3));
        let status: Vec<u8> = out.iter().map(|e| e.a).collect();
        assert_eq!(status, vec![0xb2, 0xb5, 0xb9]);
        assert!(out.iter().all(|e| e.b == 7 && e.c == 99 && e.offset == 3));
    }

    #[test]
    fn test_reset_after_changes() {
        let mut translator = MidiTranslator::new();
        translator.add_target_channel(0, 1);
        run(&mut translator, &MidiTranslator::clear_packet());
        assert!(run(&mut translator, &MidiEvent::new(0x90, 1, 1, 0)).is_empty());

        translator.add_target_channel(4, 8);
        run(&mut translator, &MidiTranslator::reset_packet());
        for channel in 0..16u8 {
            assert_eq!(translator.targets(channel), vec![channel]);
        }
    }

    #[test]
    fn test_skip_translation() {
        let mut translator = MidiTranslator::new();
        translator.clear();
        let packet = MidiTranslator::skip_translation_packet(MidiEvent::new(0x95, 64, 1, 12));
        let out = run(&mut translator, &packet);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].a, out[0].b, out[0].c), (0x95, 64, 1));
        assert!(out[0].sysex.is_empty());
        assert_eq!(out[0].offset, 12);
    }

    #[test]
    fn test_system_messages_pass() {
        let mut translator = MidiTranslator::new();
        translator.clear();
        let clock = MidiEvent::new(0xf8, 0, 0, 0);
        assert_eq!(run(&mut translator, &clock), vec![clock]);

        let foreign = MidiEvent::sysex(vec![0xf0, 0x00, 0x20, 0x33, 0x01, 0xf7], 0);
        assert_eq!(run(&mut translator, &foreign), vec![foreign]);
    }

    #[test]
    fn test_malformed_control_dropped() {
        let mut translator = MidiTranslator::new();
        let bad_len = MidiEvent::sysex(vec![0xf0, MANUFACTURER_ID, CMD_ADD_TARGET_CHANNEL, 1, 0xf7], 0);
        let unknown = MidiEvent::sysex(vec![0xf0, MANUFACTURER_ID, 0x42, 0xf7], 0);
        let out_of_range = MidiTranslator::set_target_channel_packet(3, 16);
        for event in [bad_len, unknown, out_of_range] {
            assert!(run(&mut translator, &event).is_empty());
        }
        assert_eq!(translator, MidiTranslator::new());
    }
}
