//! Composed Device
//!
//! [`DualChipDevice`] wires firmware, boot, host interface queues, MIDI
//! translation, the dual-chip audio bus and the output converters into one
//! [`Device`]. The chips themselves are external collaborators, handed in as
//! [`ChipHandle`]s.
//!
//! # Block processing
//! Incoming MIDI is translated and scheduled on the MIDI queue. The block is
//! then cut at every event offset and at the configured maximum block size;
//! each piece first releases the events due at its start, then runs through
//! the chips. Chip words are converted to float by one DAC per output.

use crate::audio_bus::sync::DEVICE_OUT_CHANNELS;
use crate::audio_bus::{float_to_word, ChipAudio, DualChipBus, MAIN_IN_CHANNELS};
use crate::boot::{BootSequencer, ChipEmulator};
use crate::config::DeviceConfig;
use crate::dac::Dac;
use crate::firmware::FirmwareImage;
use crate::hdi08::{Hdi08List, Hdi08MidiQueue, Hdi08Queue, HostInterface};
use crate::midi::{MidiEvent, MidiEventSource, MidiTranslator};
use crate::model::DeviceModel;
use crate::{ChipWord, Result, SynthError};
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Audio/MIDI entry point driven by the plugin shell
pub trait Device: Send {
    /// Render `frames` samples
    ///
    /// `midi_in` offsets are relative to the start of the block and sorted.
    /// Device-originated MIDI is appended to `midi_out`.
    fn process(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
        midi_in: &[MidiEvent],
        midi_out: &mut Vec<MidiEvent>,
    );

    /// Booted and able to produce audio
    fn is_valid(&self) -> bool;

    /// Native sample rate in Hz
    fn samplerate(&self) -> f32;

    /// Expected host block size
    fn set_block_size(&mut self, block_size: usize);

    /// Latency added on top of the internal latency
    fn extra_latency_samples(&self) -> u32;

    /// Set the extra latency
    fn set_extra_latency_samples(&mut self, samples: u32);

    /// Audio inputs
    fn channel_count_in(&self) -> usize;

    /// Audio outputs
    fn channel_count_out(&self) -> usize;

    /// Delay between a MIDI event and its audible result
    fn internal_latency_midi_to_output(&self) -> u32 {
        0
    }

    /// Delay between audio input and output
    fn internal_latency_input_to_output(&self) -> u32 {
        0
    }
}

/// One chip as provided by the instruction emulator
pub struct ChipHandle {
    /// Memory and register access for booting
    pub emulator: Box<dyn ChipEmulator>,
    /// Serial audio ports
    pub audio: Box<dyn ChipAudio<ChipWord> + Send>,
    /// Host interface receive side
    pub host: Arc<dyn HostInterface>,
}

/// Two-chip (or single-chip) device
pub struct DualChipDevice {
    config: DeviceConfig,
    image: Arc<FirmwareImage>,
    chips: Vec<ChipHandle>,
    hdi: Arc<Hdi08List>,
    midi_queue: Hdi08MidiQueue,
    translator: MidiTranslator,
    bus: DualChipBus<ChipWord>,
    dacs: Vec<Dac>,
    valid: bool,
    samples_processed: u64,
    device_midi: Arc<Mutex<Vec<MidiEvent>>>,
    translated: Vec<MidiEvent>,
    in_words: [Vec<ChipWord>; MAIN_IN_CHANNELS],
    out_words: [Vec<ChipWord>; DEVICE_OUT_CHANNELS],
}

impl DualChipDevice {
    /// Build the device and boot its chips
    ///
    /// Configuration errors and a wrong chip count are returned. A firmware
    /// image that fails to boot yields a device that reports invalid and
    /// renders silence.
    pub fn new(config: DeviceConfig, image: FirmwareImage, chips: Vec<ChipHandle>) -> Result<Self> {
        config.validate()?;

        let expected = if config.model.is_dual_chip() { 2 } else { 1 };
        if chips.len() != expected {
            return Err(SynthError::Config(format!(
                "Model {} needs {} chip(s), got {}",
                config.model,
                expected,
                chips.len()
            )));
        }

        let queues: Vec<Arc<Hdi08Queue>> = chips
            .iter()
            .map(|chip| Arc::new(Hdi08Queue::new(chip.host.clone())))
            .collect();
        let hdi = Arc::new(Hdi08List::from_queues(queues));
        let midi_queue = Hdi08MidiQueue::new(hdi.clone(), config.midi_flags());

        let dacs = (0..DEVICE_OUT_CHANNELS)
            .map(|_| Dac::with_config(config.dac_output_bits, config.dac_noise_bits))
            .collect::<Result<Vec<_>>>()?;

        let mut device = Self {
            config,
            image: Arc::new(image),
            chips,
            hdi,
            midi_queue,
            translator: MidiTranslator::new(),
            bus: DualChipBus::new(),
            dacs,
            valid: false,
            samples_processed: 0,
            device_midi: Arc::new(Mutex::new(Vec::new())),
            translated: Vec::new(),
            in_words: Default::default(),
            out_words: Default::default(),
        };

        device.valid = match device.boot() {
            Ok(()) => {
                info!("{} booted", device.config.model);
                true
            }
            Err(e) => {
                warn!("Device invalid: {e}");
                false
            }
        };

        device.set_block_size(device.config.max_block_size);
        Ok(device)
    }

    fn boot(&mut self) -> Result<()> {
        if !self.image.is_valid() {
            return Err(SynthError::DeviceInvalid("no firmware loaded".into()));
        }
        if self.image.model().is_abc_family() != self.config.model.is_abc_family() {
            return Err(SynthError::DeviceInvalid(format!(
                "firmware for {} cannot boot a {}",
                self.image.model(),
                self.config.model
            )));
        }

        let targets = self
            .chips
            .iter_mut()
            .zip(self.hdi.queues())
            .map(|(chip, queue)| (chip.emulator.as_mut() as &mut dyn ChipEmulator, queue.clone()))
            .collect();
        BootSequencer::boot_all(&self.image, targets)
    }

    /// Device configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Hardware variant
    pub fn model(&self) -> DeviceModel {
        self.config.model
    }

    /// Loaded firmware
    pub fn image(&self) -> &FirmwareImage {
        &self.image
    }

    /// Host interface queues of all chips
    pub fn hdi(&self) -> &Arc<Hdi08List> {
        &self.hdi
    }

    /// Samples rendered since construction
    pub fn samples_processed(&self) -> u64 {
        self.samples_processed
    }

    /// Sink for MIDI produced by the chips, drained on every block
    pub fn device_midi_sink(&self) -> Arc<Mutex<Vec<MidiEvent>>> {
        self.device_midi.clone()
    }

    /// Reconfigure every output converter
    pub fn set_dac(&mut self, output_bits: u32, noise_bits: u32) -> Result<()> {
        Dac::validate(output_bits, noise_bits)?;
        for dac in &mut self.dacs {
            dac.configure(output_bits, noise_bits)?;
        }
        self.config.dac_output_bits = output_bits;
        self.config.dac_noise_bits = noise_bits;
        Ok(())
    }

    fn render_segment(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], start: usize, len: usize) {
        for (c, words) in self.in_words.iter_mut().enumerate() {
            let input = inputs.get(c).and_then(|i| i.get(start..start + len));
            for (i, word) in words[..len].iter_mut().enumerate() {
                *word = input.map_or(0, |s| float_to_word(s[i]));
            }
        }

        self.midi_queue.release_due();

        {
            let ins: [&[ChipWord]; MAIN_IN_CHANNELS] = [&self.in_words[0][..len], &self.in_words[1][..len]];
            let mut outs = self.out_words.each_mut().map(|w| &mut w[..len]);

            if let [first, second] = self.chips.as_mut_slice() {
                self.bus
                    .process(first.audio.as_mut(), second.audio.as_mut(), &ins, &mut outs, len);
            } else if let Some(first) = self.chips.first_mut() {
                self.bus.process_single(first.audio.as_mut(), &ins, &mut outs, len);
            }
        }

        self.midi_queue.advance(len as u32);
        self.hdi.drain();

        for ((dac, words), out) in self.dacs.iter_mut().zip(&self.out_words).zip(outputs.iter_mut()) {
            if let Some(out) = out.get_mut(start..start + len) {
                dac.process_block(&words[..len], out);
            }
        }
    }
}

impl Device for DualChipDevice {
    fn process(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
        midi_in: &[MidiEvent],
        midi_out: &mut Vec<MidiEvent>,
    ) {
        if !self.valid {
            for out in outputs.iter_mut() {
                let n = frames.min(out.len());
                out[..n].fill(0.0);
            }
            return;
        }

        self.translated.clear();
        for event in midi_in {
            self.translator.process(&mut self.translated, event);
        }
        for event in self.translated.drain(..) {
            self.midi_queue.add(event);
        }

        let max_block = self.config.max_block_size.max(1);

        let mut offsets = midi_in
            .iter()
            .map(|e| e.offset as usize)
            .filter(|&o| o < frames)
            .peekable();

        let mut pos = 0;
        while pos < frames {
            let mut cut = frames;
            while let Some(&offset) = offsets.peek() {
                if offset > pos {
                    cut = offset;
                    break;
                }
                offsets.next();
            }
            let len = (cut - pos).min(max_block);
            self.render_segment(inputs, outputs, pos, len);
            pos += len;
        }

        self.samples_processed += frames as u64;

        let mut produced = self.device_midi.lock();
        midi_out.extend(produced.drain(..).map(|mut e| {
            e.source = MidiEventSource::Device;
            e
        }));
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn samplerate(&self) -> f32 {
        self.config.samplerate
    }

    fn set_block_size(&mut self, block_size: usize) {
        let len = block_size.min(self.config.max_block_size).max(1);
        for words in self.in_words.iter_mut().chain(self.out_words.iter_mut()) {
            if words.len() < len {
                words.resize(len, 0);
            }
        }
    }

    fn extra_latency_samples(&self) -> u32 {
        self.config.extra_latency_samples
    }

    fn set_extra_latency_samples(&mut self, samples: u32) {
        self.config.extra_latency_samples = samples;
    }

    fn channel_count_in(&self) -> usize {
        self.config.model.input_channel_count()
    }

    fn channel_count_out(&self) -> usize {
        self.config.model.output_channel_count()
    }

    fn internal_latency_midi_to_output(&self) -> u32 {
        self.config.model.latency_midi_to_output()
    }

    fn internal_latency_input_to_output(&self) -> u32 {
        self.config.model.latency_input_to_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_bus::SerialAudio;
    use crate::boot::test_support::FakeChip;
    use crate::firmware::rom_dump::DspProgram;
    use crate::hdi08::test_support::FakeHostInterface;
    use approx::assert_abs_diff_eq;

    /// Main port that echoes the left input on every output
    #[derive(Default)]
    struct EchoPort {
        last: Vec<ChipWord>,
    }

    impl SerialAudio<ChipWord> for EchoPort {
        fn write_input(&mut self, interleaved: &[ChipWord], channels: usize) {
            self.last = interleaved.iter().step_by(channels).copied().collect();
        }

        fn read_output(&mut self, interleaved: &mut [ChipWord], channels: usize) {
            for (frame, &word) in interleaved.chunks_exact_mut(channels).zip(&self.last) {
                frame.fill(word);
            }
        }
    }

    #[derive(Default)]
    struct EchoChip {
        main: EchoPort,
        link: EchoPort,
    }

    impl ChipAudio<ChipWord> for EchoChip {
        fn main_port(&mut self) -> &mut dyn SerialAudio<ChipWord> {
            &mut self.main
        }

        fn link_port(&mut self) -> &mut dyn SerialAudio<ChipWord> {
            &mut self.link
        }
    }

    fn chip(host: Arc<FakeHostInterface>) -> ChipHandle {
        ChipHandle {
            emulator: Box::new(FakeChip::default()),
            audio: Box::new(EchoChip::default()),
            host,
        }
    }

    fn image(model: DeviceModel) -> FirmwareImage {
        FirmwareImage::from_parts(
            model,
            DspProgram {
                boot_code: vec![1, 2, 3],
                boot_offset: 0,
                command_stream: vec![4, 5, 6],
            },
            Vec::new(),
        )
    }

    fn config(model: DeviceModel) -> DeviceConfig {
        DeviceConfig {
            dac_noise_bits: 0,
            max_block_size: 16,
            midi_host_flags: None,
            ..DeviceConfig::for_model(model)
        }
    }

    #[test]
    fn test_chip_count_checked() {
        let host = Arc::new(FakeHostInterface::with_capacity(64));
        let result = DualChipDevice::new(config(DeviceModel::Ti), image(DeviceModel::Ti), vec![chip(host)]);
        assert!(matches!(result, Err(SynthError::Config(_))));
    }

    #[test]
    fn test_invalid_firmware_renders_silence() {
        let host = Arc::new(FakeHostInterface::with_capacity(64));
        let mut device = DualChipDevice::new(
            config(DeviceModel::Snow),
            FirmwareImage::empty(DeviceModel::Snow),
            vec![chip(host)],
        )
        .unwrap();
        assert!(!device.is_valid());

        let input = [0.5f32; 8];
        let mut out = vec![0.7f32; 8];
        let mut outs = [out.as_mut_slice()];
        device.process(&[&input[..]], &mut outs, 8, &[], &mut Vec::new());
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_single_chip_audio_and_midi() {
        let host = Arc::new(FakeHostInterface::with_capacity(1024));
        let mut device =
            DualChipDevice::new(config(DeviceModel::Snow), image(DeviceModel::Snow), vec![chip(host.clone())])
                .unwrap();
        assert!(device.is_valid());
        assert_eq!(device.channel_count_out(), 12);
        // boot command stream went through the host interface
        assert_eq!(host.delivered(), vec![4, 5, 6]);

        let input: Vec<f32> = (0..40).map(|i| i as f32 / 64.0).collect();
        let mut left = vec![0.0f32; 40];
        let mut right = vec![0.0f32; 40];
        let mut outs = [left.as_mut_slice(), right.as_mut_slice()];
        let midi = [MidiEvent::new(0x90, 60, 100, 20)];
        device.process(&[input.as_slice(), input.as_slice()], &mut outs, 40, &midi, &mut Vec::new());

        for (i, &s) in left.iter().enumerate() {
            assert_abs_diff_eq!(s, input[i], epsilon = 1e-6);
        }
        assert_eq!(device.samples_processed(), 40);
        assert_eq!(&host.delivered()[3..], &[0x900000, 0x3c0000, 0x640000]);
    }

    #[test]
    fn test_device_midi_forwarded() {
        let host = Arc::new(FakeHostInterface::with_capacity(1024));
        let mut device =
            DualChipDevice::new(config(DeviceModel::Snow), image(DeviceModel::Snow), vec![chip(host)]).unwrap();
        device.device_midi_sink().lock().push(MidiEvent::new(0xb0, 1, 2, 0));

        let mut midi_out = Vec::new();
        let mut out = vec![0.0f32; 4];
        device.process(&[], &mut [out.as_mut_slice()], 4, &[], &mut midi_out);
        assert_eq!(midi_out.len(), 1);
        assert_eq!(midi_out[0].source, MidiEventSource::Device);
        assert!(device.device_midi_sink().lock().is_empty());
    }

    #[test]
    fn test_mismatched_family_is_invalid() {
        let host = Arc::new(FakeHostInterface::with_capacity(64));
        let device =
            DualChipDevice::new(config(DeviceModel::Snow), image(DeviceModel::C), vec![chip(host)]).unwrap();
        assert!(!device.is_valid());
    }
}
