//! Dual-chip bus synchronization
//!
//! Chip A drives outputs 0..6 through its main port, chip B drives 6..12.
//! In addition each chip sends the other half's extra signals over its link
//! port, three link frames per device sample, and those are mixed on top:
//! chip B's link stream into 0..6, chip A's into 6..12.
//!
//! Each output sample is built around an anchor frame of the link stream;
//! the six slots of a chip sit at fixed link channels and signed frame
//! offsets from that anchor (see [`LINK_A_SLOTS`], [`LINK_B_SLOTS`]).
//! Negative offsets reach back into the [`PADDING`] frames kept from the
//! previous block.
//!
//! Where the anchors fall inside the link stream depends on the chip's
//! internal ring buffer position, which is not observable. The firmware
//! writes a sentinel word on [`SENTINEL_CHANNEL`] of its first anchor frame,
//! a slot neither chip uses for audio; the bus scans for it and caches the
//! frame phase once found. Until then the linked outputs stay silent.
//!
//! Stereo input goes to chip B's main port unchanged. Chip A receives it over
//! its link port: right on link channel 0 of each anchor frame, left on link
//! channel 1 two frames before the anchor. Right lands one anchor late, so the
//! previous block's last right sample is carried across the block boundary.

use super::{
    ChipAudio, Sample, LINK_CHANNELS, LINK_RATE, MAIN_IN_CHANNELS, MAIN_OUT_CHANNELS, PADDING,
};
use crate::ChipWord;
use log::{info, warn};

/// Marker the firmware writes into the first anchor frame
pub const SENTINEL: ChipWord = 0x7a_5e17;
/// Link channel carrying the sentinel
pub const SENTINEL_CHANNEL: usize = 3;

/// (link channel, frame offset from the anchor) feeding outputs 6..12
pub const LINK_A_SLOTS: [(usize, isize); 6] = [(3, -2), (2, 0), (0, 1), (1, -1), (2, 1), (3, -1)];
/// (link channel, frame offset from the anchor) feeding outputs 0..6
pub const LINK_B_SLOTS: [(usize, isize); 6] = [(1, -2), (0, 0), (3, -2), (2, 0), (0, 1), (1, -1)];

/// Most negative slot offset
const MIN_SLOT_OFFSET: usize = 2;

/// Link channels of chip A's input carrying right and left
const LINK_IN_RIGHT: usize = 0;
const LINK_IN_LEFT: usize = 1;

/// Outputs of the whole device
pub const DEVICE_OUT_CHANNELS: usize = 2 * MAIN_OUT_CHANNELS;

/// Blocks after which a missing sentinel is reported
const SCAN_WARN_BLOCKS: u32 = 64;

/// Link ports, indexed into the lock table
const LINK_A: usize = 0;
const LINK_B: usize = 1;

/// Scratch space owned by the audio thread, grown on demand
#[derive(Debug, Default)]
struct AudioBusScratchBuffer<T> {
    main_in: Vec<T>,
    link_in: Vec<T>,
    main_out: Vec<T>,
    /// Link output streams with [`PADDING`] frames of history in front
    link_out: [Vec<T>; 2],
}

impl<T: Sample> AudioBusScratchBuffer<T> {
    fn ensure_size(&mut self, frames: usize) {
        let link_frames = frames * LINK_RATE;
        grow(&mut self.main_in, frames * MAIN_IN_CHANNELS);
        grow(&mut self.link_in, link_frames * LINK_CHANNELS);
        grow(&mut self.main_out, frames * MAIN_OUT_CHANNELS);
        for stream in &mut self.link_out {
            grow(stream, (link_frames + PADDING) * LINK_CHANNELS);
        }
    }

    /// Move the tail of the used region in front of the next block
    fn wrap_padding(&mut self, frames: usize) {
        let used = frames * LINK_RATE * LINK_CHANNELS;
        for stream in &mut self.link_out {
            stream.copy_within(used..used + PADDING * LINK_CHANNELS, 0);
        }
    }
}

fn grow<T: Sample>(buffer: &mut Vec<T>, len: usize) {
    if buffer.len() < len {
        buffer.resize(len, T::SILENCE);
    }
}

/// Combines two chips into one 12-output device
#[derive(Debug)]
pub struct DualChipBus<T: Sample> {
    scratch: AudioBusScratchBuffer<T>,
    last_r: T,
    /// Padded index of the first anchor per link port, once locked
    locks: [Option<usize>; 2],
    blocks_scanned: u32,
    warned: bool,
}

impl<T: Sample> Default for DualChipBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Sample> DualChipBus<T> {
    /// Unlocked bus with empty scratch space
    pub fn new() -> Self {
        Self {
            scratch: AudioBusScratchBuffer {
                main_in: Vec::new(),
                link_in: Vec::new(),
                main_out: Vec::new(),
                link_out: [Vec::new(), Vec::new()],
            },
            last_r: T::SILENCE,
            locks: [None, None],
            blocks_scanned: 0,
            warned: false,
        }
    }

    /// Both link streams are locked
    pub fn is_locked(&self) -> bool {
        self.locks.iter().all(Option::is_some)
    }

    /// Cached frame phase of chip A's and chip B's link stream
    ///
    /// The phase is the index of the block's first anchor frame within the
    /// link stream, counting the [`PADDING`] frames in front; always 2..=4.
    pub fn frame_phases(&self) -> [Option<usize>; 2] {
        self.locks
    }

    /// Forget the lock, e.g. after the chips were rebooted
    pub fn reset(&mut self) {
        self.locks = [None, None];
        self.blocks_scanned = 0;
        self.warned = false;
        self.last_r = T::SILENCE;
        for stream in &mut self.scratch.link_out {
            stream.fill(T::SILENCE);
        }
    }

    /// Run one block through both chips
    ///
    /// `inputs` holds left and right, `outputs` up to 12 channels; missing
    /// inputs read as silence and missing outputs are skipped. Every slice
    /// must hold at least `frames` samples.
    pub fn process(
        &mut self,
        chip_a: &mut dyn ChipAudio<T>,
        chip_b: &mut dyn ChipAudio<T>,
        inputs: &[&[T]],
        outputs: &mut [&mut [T]],
        frames: usize,
    ) {
        if frames == 0 {
            return;
        }

        self.scratch.ensure_size(frames);
        self.write_inputs(chip_a, chip_b, inputs, frames);

        self.read_main(chip_a, outputs, 0, frames);
        self.read_main(chip_b, outputs, MAIN_OUT_CHANNELS, frames);

        self.read_link(chip_a, LINK_A, frames);
        self.read_link(chip_b, LINK_B, frames);

        if !self.is_locked() {
            self.blocks_scanned += 1;
            if self.blocks_scanned == SCAN_WARN_BLOCKS && !self.warned {
                warn!(
                    "No link sentinel after {} blocks, linked outputs stay silent",
                    SCAN_WARN_BLOCKS
                );
                self.warned = true;
            }
        }

        self.unpack_link(LINK_B, &LINK_B_SLOTS, outputs, 0, frames);
        self.unpack_link(LINK_A, &LINK_A_SLOTS, outputs, MAIN_OUT_CHANNELS, frames);

        self.scratch.wrap_padding(frames);
    }

    /// Run one block through a single chip's main port
    ///
    /// Outputs past the chip's six are filled with silence.
    pub fn process_single(
        &mut self,
        chip: &mut dyn ChipAudio<T>,
        inputs: &[&[T]],
        outputs: &mut [&mut [T]],
        frames: usize,
    ) {
        if frames == 0 {
            return;
        }

        self.scratch.ensure_size(frames);

        let main_in = &mut self.scratch.main_in[..frames * MAIN_IN_CHANNELS];
        for (i, frame) in main_in.chunks_exact_mut(MAIN_IN_CHANNELS).enumerate() {
            frame[0] = input_sample(inputs, 0, i);
            frame[1] = input_sample(inputs, 1, i);
        }
        chip.main_port().write_input(main_in, MAIN_IN_CHANNELS);

        self.read_main(chip, outputs, 0, frames);

        for out in outputs.iter_mut().skip(MAIN_OUT_CHANNELS) {
            out[..frames].fill(T::SILENCE);
        }
    }

    fn write_inputs(
        &mut self,
        chip_a: &mut dyn ChipAudio<T>,
        chip_b: &mut dyn ChipAudio<T>,
        inputs: &[&[T]],
        frames: usize,
    ) {
        let main_in = &mut self.scratch.main_in[..frames * MAIN_IN_CHANNELS];
        let link_in = &mut self.scratch.link_in[..frames * LINK_RATE * LINK_CHANNELS];

        // chip A takes no ADC input on its main port
        main_in.fill(T::SILENCE);
        chip_a.main_port().write_input(main_in, MAIN_IN_CHANNELS);

        link_in.fill(T::SILENCE);
        let mut lagged_r = self.last_r;
        for i in 0..frames {
            let anchor = i * LINK_RATE;
            link_in[anchor * LINK_CHANNELS + LINK_IN_RIGHT] = lagged_r;
            link_in[(anchor + 1) * LINK_CHANNELS + LINK_IN_LEFT] = input_sample(inputs, 0, i);
            lagged_r = input_sample(inputs, 1, i);
        }
        chip_a.link_port().write_input(link_in, LINK_CHANNELS);

        for (i, frame) in main_in.chunks_exact_mut(MAIN_IN_CHANNELS).enumerate() {
            frame[0] = input_sample(inputs, 0, i);
            frame[1] = input_sample(inputs, 1, i);
        }
        chip_b.main_port().write_input(main_in, MAIN_IN_CHANNELS);

        // chip B's link input only carries data from chip A's firmware
        link_in.fill(T::SILENCE);
        chip_b.link_port().write_input(link_in, LINK_CHANNELS);

        self.last_r = lagged_r;
    }

    fn read_main(
        &mut self,
        chip: &mut dyn ChipAudio<T>,
        outputs: &mut [&mut [T]],
        first_channel: usize,
        frames: usize,
    ) {
        let main_out = &mut self.scratch.main_out[..frames * MAIN_OUT_CHANNELS];
        chip.main_port().read_output(main_out, MAIN_OUT_CHANNELS);

        for (c, out) in outputs
            .iter_mut()
            .skip(first_channel)
            .take(MAIN_OUT_CHANNELS)
            .enumerate()
        {
            for (i, sample) in out[..frames].iter_mut().enumerate() {
                *sample = main_out[i * MAIN_OUT_CHANNELS + c];
            }
        }
    }

    fn read_link(&mut self, chip: &mut dyn ChipAudio<T>, link: usize, frames: usize) {
        let stream = &mut self.scratch.link_out[link];
        let start = PADDING * LINK_CHANNELS;
        let end = start + frames * LINK_RATE * LINK_CHANNELS;
        chip.link_port().read_output(&mut stream[start..end], LINK_CHANNELS);

        if self.locks[link].is_some() {
            return;
        }

        let sentinel = T::from_word(SENTINEL);
        let found = (PADDING..PADDING + frames * LINK_RATE)
            .find(|&p| stream[p * LINK_CHANNELS + SENTINEL_CHANNEL] == sentinel);

        if let Some(p) = found {
            // anchors in 2..=4 keep every slot of the block inside the buffer
            let phase = (p - MIN_SLOT_OFFSET) % LINK_RATE + MIN_SLOT_OFFSET;
            info!(
                "Link stream {} locked, frame phase {}",
                if link == LINK_A { 'A' } else { 'B' },
                phase
            );
            self.locks[link] = Some(phase);
        }
    }

    fn unpack_link(
        &self,
        link: usize,
        slots: &[(usize, isize); MAIN_OUT_CHANNELS],
        outputs: &mut [&mut [T]],
        first_channel: usize,
        frames: usize,
    ) {
        let Some(phase) = self.locks[link] else {
            return;
        };
        let stream = &self.scratch.link_out[link];

        for (&(channel, offset), out) in slots
            .iter()
            .zip(outputs.iter_mut().skip(first_channel))
        {
            let first = phase.saturating_add_signed(offset);
            for (i, sample) in out[..frames].iter_mut().enumerate() {
                let frame = first + i * LINK_RATE;
                *sample = sample.mix(stream[frame * LINK_CHANNELS + channel]);
            }
        }
    }
}

#[inline]
fn input_sample<T: Sample>(inputs: &[&[T]], channel: usize, i: usize) -> T {
    inputs
        .get(channel)
        .and_then(|c| c.get(i))
        .copied()
        .unwrap_or(T::SILENCE)
}

#[cfg(test)]
mod tests {
    use super::super::SerialAudio;
    use super::*;

    /// Port that records its input and plays back a fixed pattern
    #[derive(Default)]
    struct RecordingPort {
        input: Vec<ChipWord>,
        fill: ChipWord,
    }

    impl SerialAudio<ChipWord> for RecordingPort {
        fn write_input(&mut self, interleaved: &[ChipWord], _channels: usize) {
            self.input = interleaved.to_vec();
        }

        fn read_output(&mut self, interleaved: &mut [ChipWord], _channels: usize) {
            interleaved.fill(self.fill);
        }
    }

    #[derive(Default)]
    struct FakeChip {
        main: RecordingPort,
        link: RecordingPort,
    }

    impl ChipAudio<ChipWord> for FakeChip {
        fn main_port(&mut self) -> &mut dyn SerialAudio<ChipWord> {
            &mut self.main
        }

        fn link_port(&mut self) -> &mut dyn SerialAudio<ChipWord> {
            &mut self.link
        }
    }

    fn run(bus: &mut DualChipBus<ChipWord>, a: &mut FakeChip, b: &mut FakeChip, l: &[u32], r: &[u32]) -> Vec<Vec<u32>> {
        let frames = l.len();
        let mut outs = vec![vec![0u32; frames]; DEVICE_OUT_CHANNELS];
        let mut refs: Vec<&mut [u32]> = outs.iter_mut().map(|v| v.as_mut_slice()).collect();
        bus.process(a, b, &[l, r], &mut refs, frames);
        outs
    }

    #[test]
    fn test_input_split_with_lag() {
        let mut bus = DualChipBus::new();
        let (mut a, mut b) = (FakeChip::default(), FakeChip::default());

        run(&mut bus, &mut a, &mut b, &[1, 2, 3], &[11, 12, 13]);
        assert_eq!(b.main.input, vec![1, 11, 2, 12, 3, 13]);
        let link = vec![
            0, 0, 0, 0,
            0, 1, 0, 0,
            0, 0, 0, 0,
            11, 0, 0, 0,
            0, 2, 0, 0,
            0, 0, 0, 0,
            12, 0, 0, 0,
            0, 3, 0, 0,
            0, 0, 0, 0,
        ];
        assert_eq!(a.link.input, link);
        assert!(a.main.input.iter().all(|&s| s == 0));
        assert!(b.link.input.iter().all(|&s| s == 0));

        // previous block's last right sample carries over
        run(&mut bus, &mut a, &mut b, &[4], &[14]);
        assert_eq!(b.main.input, vec![4, 14]);
        assert_eq!(a.link.input, vec![13, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_main_outputs_and_silence_before_lock() {
        let mut bus = DualChipBus::new();
        let mut a = FakeChip::default();
        let mut b = FakeChip::default();
        a.main.fill = 5;
        b.main.fill = 7;
        a.link.fill = 100;
        b.link.fill = 200;

        let outs = run(&mut bus, &mut a, &mut b, &[0; 8], &[0; 8]);
        assert!(outs[..6].iter().all(|c| c.iter().all(|&s| s == 5)));
        assert!(outs[6..].iter().all(|c| c.iter().all(|&s| s == 7)));
        assert!(!bus.is_locked());
    }

    #[test]
    fn test_lock_mixes_link_streams() {
        let mut bus = DualChipBus::new();
        let mut a = FakeChip::default();
        let mut b = FakeChip::default();
        a.main.fill = 1;
        b.main.fill = 2;
        a.link.fill = SENTINEL;
        b.link.fill = SENTINEL;

        run(&mut bus, &mut a, &mut b, &[0; 4], &[0; 4]);
        assert!(bus.is_locked());

        a.link.fill = 10;
        b.link.fill = 20;
        // the first frames still come from the padding of the previous block
        run(&mut bus, &mut a, &mut b, &[0; 4], &[0; 4]);
        let outs = run(&mut bus, &mut a, &mut b, &[0; 4], &[0; 4]);
        assert!(outs[..6].iter().all(|c| c.iter().all(|&s| s == 21)));
        assert!(outs[6..].iter().all(|c| c.iter().all(|&s| s == 12)));

        bus.reset();
        assert!(!bus.is_locked());
    }

    #[test]
    fn test_sentinel_slot_carries_no_audio() {
        for &(channel, offset) in LINK_A_SLOTS.iter().chain(&LINK_B_SLOTS) {
            assert!(channel != SENTINEL_CHANNEL || offset.rem_euclid(LINK_RATE as isize) != 0);
        }
    }

    #[test]
    fn test_single_chip() {
        let mut bus = DualChipBus::new();
        let mut chip = FakeChip::default();
        chip.main.fill = 9;
        let mut outs = vec![vec![3u32; 4]; DEVICE_OUT_CHANNELS];
        let mut refs: Vec<&mut [u32]> = outs.iter_mut().map(|v| v.as_mut_slice()).collect();
        bus.process_single(&mut chip, &[&[1, 2, 3, 4], &[5, 6, 7, 8]], &mut refs, 4);
        assert_eq!(chip.main.input, vec![1, 5, 2, 6, 3, 7, 4, 8]);
        assert!(outs[..6].iter().all(|c| c == &vec![9; 4]));
        assert!(outs[6..].iter().all(|c| c == &vec![0; 4]));
    }
}
