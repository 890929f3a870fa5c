//! Real-time Plugin Shell
//!
//! [`Plugin`] is the only component the host calls per audio block. Each
//! block goes through the same steps:
//!
//! 1. MIDI collected from the host since the last block is taken over,
//!    with multi-packet sysex already reassembled
//! 2. MIDI clock events are derived from the host transport and merged in
//!    offset order
//! 3. Audio is resampled to the device rate, rendered, and resampled back
//! 4. MIDI produced by the device is handed to the host
//!
//! A device that reports invalid renders silence and drops MIDI; nothing on
//! this path returns an error.

pub mod resampler;

pub use resampler::{ResamplerInOut, StreamResampler};

use crate::device::Device;
use crate::midi::{insert_sorted, MidiClock, MidiEvent, SysexAssembler, Transport};
use log::{debug, info};
use parking_lot::Mutex;

/// Counters for monitoring the shell
#[derive(Debug, Clone, Default)]
pub struct PluginStats {
    /// Blocks rendered
    pub blocks_processed: u64,
    /// Host samples rendered
    pub samples_processed: u64,
    /// Host MIDI events dropped because the device was invalid
    pub midi_events_dropped: u64,
}

/// MIDI arriving from the host between two blocks
#[derive(Debug, Default)]
struct MidiInput {
    assembler: SysexAssembler,
    events: Vec<MidiEvent>,
}

/// State owned by the audio callback
struct PluginCore<D> {
    device: D,
    resampler: ResamplerInOut,
    clock: MidiClock,
    midi_block: Vec<MidiEvent>,
    stats: PluginStats,
    warned_invalid: bool,
}

/// Host-facing wrapper around a [`Device`]
pub struct Plugin<D: Device> {
    core: Mutex<PluginCore<D>>,
    midi_in: Mutex<MidiInput>,
}

impl<D: Device> Plugin<D> {
    /// Shell with the host running at the device's own rate
    pub fn new(device: D) -> Self {
        let samplerate = device.samplerate();
        let resampler = ResamplerInOut::new(samplerate, samplerate, device.channel_count_out());
        Self {
            core: Mutex::new(PluginCore {
                device,
                resampler,
                clock: MidiClock::new(),
                midi_block: Vec::new(),
                stats: PluginStats::default(),
                warned_invalid: false,
            }),
            midi_in: Mutex::new(MidiInput::default()),
        }
    }

    /// Queue one MIDI event for the next block
    ///
    /// Callable from any thread. Sysex split across packets is held back
    /// until its last packet arrives.
    pub fn add_midi_event(&self, event: MidiEvent) {
        let mut input = self.midi_in.lock();
        if let Some(event) = input.assembler.push(event) {
            insert_sorted(&mut input.events, event);
        }
    }

    /// Host sample rate changed
    pub fn set_host_samplerate(&self, samplerate: f32) {
        let mut core = self.core.lock();
        if (core.resampler.host_samplerate() - samplerate).abs() >= f32::EPSILON {
            info!(
                "Host rate {} Hz, device rate {} Hz",
                samplerate,
                core.device.samplerate()
            );
        }
        core.resampler.set_host_samplerate(samplerate);
    }

    /// Host sample rate
    pub fn host_samplerate(&self) -> f32 {
        self.core.lock().resampler.host_samplerate()
    }

    /// Host announced its block size
    pub fn set_block_size(&self, block_size: usize) {
        let mut core = self.core.lock();
        let PluginCore { device, resampler, .. } = &mut *core;
        let ratio = resampler.device_samplerate() as f64 / resampler.host_samplerate() as f64;
        device.set_block_size((block_size as f64 * ratio).ceil() as usize + 2);
    }

    /// Render one block
    ///
    /// `transport` is `None` for hosts without tempo information; no clock
    /// is generated then. Device MIDI output is appended to `midi_out`.
    pub fn process(
        &self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
        transport: Option<&Transport>,
        midi_out: &mut Vec<MidiEvent>,
    ) {
        let mut core = self.core.lock();
        let core = &mut *core;

        core.midi_block.clear();
        std::mem::swap(&mut core.midi_block, &mut self.midi_in.lock().events);

        if !core.device.is_valid() {
            if !core.warned_invalid {
                info!("Device invalid, rendering silence");
                core.warned_invalid = true;
            }
            for out in outputs.iter_mut() {
                let n = frames.min(out.len());
                out[..n].fill(0.0);
            }
            core.stats.midi_events_dropped += core.midi_block.len() as u64;
            core.midi_block.clear();
            return;
        }

        if frames == 0 {
            // keep the events for the next real block
            let mut input = self.midi_in.lock();
            for event in core.midi_block.drain(..) {
                insert_sorted(&mut input.events, event);
            }
            return;
        }

        let last = frames as u32 - 1;
        for event in &mut core.midi_block {
            if event.offset > last {
                debug!("MIDI offset {} past block end, clamped", event.offset);
                event.offset = last;
            }
        }

        if let Some(transport) = transport {
            let samplerate = core.resampler.host_samplerate();
            core.clock
                .process(transport, samplerate, frames as u32, &mut core.midi_block);
        }

        let PluginCore {
            device,
            resampler,
            midi_block,
            stats,
            ..
        } = core;

        let latency = resampler.latency_samples();
        resampler.process(
            inputs,
            outputs,
            frames,
            midi_block,
            midi_out,
            |ins, outs, n, midi_in, midi_out| device.process(ins, outs, n, midi_in, midi_out),
        );
        if resampler.latency_samples() != latency {
            debug!("Resampler latency {} samples", resampler.latency_samples());
        }

        midi_block.clear();
        stats.blocks_processed += 1;
        stats.samples_processed += frames as u64;
    }

    /// Device booted and able to produce audio
    pub fn is_valid(&self) -> bool {
        self.core.lock().device.is_valid()
    }

    /// Extra latency reported to the host
    pub fn extra_latency_samples(&self) -> u32 {
        self.core.lock().device.extra_latency_samples()
    }

    /// Set the extra latency reported to the host
    pub fn set_extra_latency_samples(&self, samples: u32) {
        self.core.lock().device.set_extra_latency_samples(samples);
    }

    /// MIDI-to-output latency in host samples
    pub fn latency_midi_to_output(&self) -> u32 {
        let core = self.core.lock();
        let internal = Self::to_host(&core, core.device.internal_latency_midi_to_output());
        internal + core.device.extra_latency_samples() + core.resampler.latency_samples()
    }

    /// Input-to-output latency in host samples
    pub fn latency_input_to_output(&self) -> u32 {
        let core = self.core.lock();
        let internal = Self::to_host(&core, core.device.internal_latency_input_to_output());
        internal + core.device.extra_latency_samples() + core.resampler.latency_samples()
    }

    fn to_host(core: &PluginCore<D>, device_samples: u32) -> u32 {
        let ratio = core.resampler.host_samplerate() as f64 / core.resampler.device_samplerate() as f64;
        (device_samples as f64 * ratio).round() as u32
    }

    /// Shell counters
    pub fn stats(&self) -> PluginStats {
        self.core.lock().stats.clone()
    }

    /// Run `f` with the device locked against the audio callback
    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.core.lock().device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{MidiEventSource, START, TIMING_CLOCK};
    use approx::assert_abs_diff_eq;

    /// Passes input 0 to every output and records MIDI
    struct RecordingDevice {
        valid: bool,
        samplerate: f32,
        received: Vec<MidiEvent>,
        extra_latency: u32,
        block_size: usize,
    }

    impl RecordingDevice {
        fn new(valid: bool) -> Self {
            Self {
                valid,
                samplerate: 48000.0,
                received: Vec::new(),
                extra_latency: 0,
                block_size: 0,
            }
        }
    }

    impl Device for RecordingDevice {
        fn process(
            &mut self,
            inputs: &[&[f32]],
            outputs: &mut [&mut [f32]],
            frames: usize,
            midi_in: &[MidiEvent],
            midi_out: &mut Vec<MidiEvent>,
        ) {
            for out in outputs.iter_mut() {
                out[..frames].copy_from_slice(&inputs[0][..frames]);
            }
            self.received.extend_from_slice(midi_in);
            if !midi_in.is_empty() {
                midi_out.push(MidiEvent::new(0xb0, 7, 1, 0).with_source(MidiEventSource::Device));
            }
        }

        fn is_valid(&self) -> bool {
            self.valid
        }

        fn samplerate(&self) -> f32 {
            self.samplerate
        }

        fn set_block_size(&mut self, block_size: usize) {
            self.block_size = block_size;
        }

        fn extra_latency_samples(&self) -> u32 {
            self.extra_latency
        }

        fn set_extra_latency_samples(&mut self, samples: u32) {
            self.extra_latency = samples;
        }

        fn channel_count_in(&self) -> usize {
            2
        }

        fn channel_count_out(&self) -> usize {
            2
        }

        fn internal_latency_midi_to_output(&self) -> u32 {
            100
        }
    }

    fn run_block(plugin: &Plugin<RecordingDevice>, frames: usize, transport: Option<&Transport>) -> (Vec<f32>, Vec<MidiEvent>) {
        let input = vec![0.5f32; frames];
        let mut left = vec![1.0f32; frames];
        let mut right = vec![1.0f32; frames];
        let mut midi_out = Vec::new();
        plugin.process(
            &[input.as_slice(), input.as_slice()],
            &mut [left.as_mut_slice(), right.as_mut_slice()],
            frames,
            transport,
            &mut midi_out,
        );
        (left, midi_out)
    }

    #[test]
    fn test_sysex_packets_reassembled() {
        let plugin = Plugin::new(RecordingDevice::new(true));
        plugin.add_midi_event(MidiEvent::sysex(vec![0xf0, 0x00, 0x20], 0));
        plugin.add_midi_event(MidiEvent::sysex(vec![0x33, 0x01], 0));
        plugin.add_midi_event(MidiEvent::sysex(vec![0x10, 0xf7], 0));
        // continuation without start
        plugin.add_midi_event(MidiEvent::sysex(vec![0x44, 0xf7], 0));

        let (_, midi_out) = run_block(&plugin, 64, None);
        let received = plugin.with_device(|d| d.received.clone());
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].sysex, vec![0xf0, 0x00, 0x20, 0x33, 0x01, 0x10, 0xf7]);
        assert_eq!(midi_out.len(), 1);
        assert_eq!(midi_out[0].source, MidiEventSource::Device);
    }

    #[test]
    fn test_events_delivered_in_offset_order() {
        let plugin = Plugin::new(RecordingDevice::new(true));
        plugin.add_midi_event(MidiEvent::new(0x90, 62, 100, 40));
        plugin.add_midi_event(MidiEvent::new(0x90, 60, 100, 10));
        plugin.add_midi_event(MidiEvent::new(0x80, 60, 0, 10));

        run_block(&plugin, 64, None);
        let received = plugin.with_device(|d| d.received.clone());
        let order: Vec<(u8, u8)> = received.iter().map(|e| (e.a, e.b)).collect();
        assert_eq!(order, vec![(0x90, 60), (0x80, 60), (0x90, 62)]);
        assert!(received.windows(2).all(|w| w[0].offset <= w[1].offset));
    }

    #[test]
    fn test_invalid_device_is_silent() {
        let plugin = Plugin::new(RecordingDevice::new(false));
        plugin.add_midi_event(MidiEvent::new(0x90, 60, 100, 0));

        let (left, midi_out) = run_block(&plugin, 32, None);
        assert!(left.iter().all(|&s| s == 0.0));
        assert!(midi_out.is_empty());
        assert!(plugin.with_device(|d| d.received.is_empty()));
        assert_eq!(plugin.stats().midi_events_dropped, 1);
    }

    #[test]
    fn test_transport_start_generates_clock() {
        let plugin = Plugin::new(RecordingDevice::new(true));
        let transport = Transport {
            bpm: 120.0,
            ppq_position: 0.0,
            is_playing: true,
        };

        // 120 bpm at 48 kHz: one clock every 1000 samples
        run_block(&plugin, 2048, Some(&transport));
        let received = plugin.with_device(|d| d.received.clone());
        assert_eq!(received[0].a, START);
        let clocks = received.iter().filter(|e| e.a == TIMING_CLOCK).count();
        assert_eq!(clocks, 3);
        assert!(received.iter().all(|e| e.source == MidiEventSource::Internal));
    }

    #[test]
    fn test_audio_passes_through_after_warmup() {
        let plugin = Plugin::new(RecordingDevice::new(true));
        plugin.set_host_samplerate(44100.0);
        plugin.set_block_size(256);
        assert_eq!(plugin.with_device(|d| d.block_size), 281);

        let mut left = Vec::new();
        for _ in 0..8 {
            left = run_block(&plugin, 256, None).0;
        }
        for &s in &left {
            assert_abs_diff_eq!(s, 0.5, epsilon = 1e-6);
        }
        assert_eq!(plugin.stats().blocks_processed, 8);
    }

    #[test]
    fn test_latency_includes_extra() {
        let plugin = Plugin::new(RecordingDevice::new(true));
        let base = plugin.latency_midi_to_output();
        plugin.set_extra_latency_samples(64);
        assert_eq!(plugin.extra_latency_samples(), 64);
        assert_eq!(plugin.latency_midi_to_output(), base + 64);
        assert!(base >= 100);
    }
}
