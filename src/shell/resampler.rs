//! Host/device sample rate conversion
//!
//! [`StreamResampler`] is a streaming linear interpolator: input is pushed
//! in arbitrary amounts and output pulled in arbitrary amounts, the
//! fractional read position carries over between calls.
//!
//! [`ResamplerInOut`] wraps a device callback with one resampler on each
//! side. Per host block it works out how many device frames the output side
//! still needs, resamples that many frames of host input, runs the device
//! on them and pulls exactly one host block back out. MIDI offsets are
//! scaled into device time on the way in and back into host time on the way
//! out. When the input side runs dry it is padded with silence, which shows
//! up as added latency.

use crate::audio_bus::sync::DEVICE_OUT_CHANNELS;
use crate::audio_bus::MAIN_IN_CHANNELS;
use crate::midi::MidiEvent;
use log::debug;

/// Rates closer than this are treated as equal
const RATE_EPSILON: f32 = 0.01;

/// Silence queued on the input side before the first block, in host samples
const PREWARM_SAMPLES: usize = 4;

/// Linear interpolation resampler over a fixed channel count
#[derive(Debug, Clone)]
pub struct StreamResampler {
    /// Input samples advanced per output sample
    step: f64,
    /// Read position inside `buffer`
    pos: f64,
    buffer: Vec<Vec<f32>>,
}

impl StreamResampler {
    /// Resampler from `rate_in` to `rate_out`
    pub fn new(channels: usize, rate_in: f32, rate_out: f32) -> Self {
        let step = if rate_in > 0.0 && rate_out > 0.0 {
            rate_in as f64 / rate_out as f64
        } else {
            1.0
        };
        Self {
            step,
            pos: 0.0,
            buffer: vec![Vec::new(); channels],
        }
    }

    /// Input samples per output sample
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Channel count
    pub fn channels(&self) -> usize {
        self.buffer.len()
    }

    /// Input samples waiting to be interpolated
    pub fn buffered(&self) -> usize {
        self.buffer.first().map_or(0, Vec::len)
    }

    /// Append `frames` input samples; missing channels read as silence
    pub fn push(&mut self, input: &[&[f32]], frames: usize) {
        for (c, buffer) in self.buffer.iter_mut().enumerate() {
            match input.get(c) {
                Some(samples) if samples.len() >= frames => buffer.extend_from_slice(&samples[..frames]),
                _ => buffer.resize(buffer.len() + frames, 0.0),
            }
        }
    }

    /// Insert silence in front of the buffered input
    pub fn pad_front(&mut self, frames: usize) {
        for buffer in &mut self.buffer {
            buffer.splice(0..0, std::iter::repeat(0.0).take(frames));
        }
    }

    /// Input samples needed in the buffer to pull `frames` output samples
    pub fn required_input(&self, frames: usize) -> usize {
        if frames == 0 {
            return 0;
        }
        (self.pos + (frames - 1) as f64 * self.step).floor() as usize + 2
    }

    /// Output samples that can be pulled right now
    pub fn available(&self) -> usize {
        let len = self.buffered();
        if len < 2 || self.pos > (len - 2) as f64 {
            return 0;
        }
        ((len - 2) as f64 - self.pos).div_euclid(self.step) as usize + 1
    }

    /// Interpolate `frames` output samples
    ///
    /// Pads the input with leading silence if it is short; returns the
    /// number of samples padded.
    pub fn pull(&mut self, output: &mut [&mut [f32]], frames: usize) -> usize {
        if frames == 0 {
            return 0;
        }

        let required = self.required_input(frames);
        let padded = required.saturating_sub(self.buffered());
        if padded > 0 {
            self.pad_front(padded);
        }

        for (c, buffer) in self.buffer.iter().enumerate() {
            let Some(out) = output.get_mut(c) else {
                continue;
            };
            for (i, sample) in out.iter_mut().take(frames).enumerate() {
                let pos = self.pos + i as f64 * self.step;
                let index = pos.floor() as usize;
                let frac = (pos - index as f64) as f32;
                let a = buffer[index];
                let b = buffer[index + 1];
                *sample = a + (b - a) * frac;
            }
        }

        let end = self.pos + frames as f64 * self.step;
        let consumed = (end.floor() as usize).min(self.buffered());
        for buffer in &mut self.buffer {
            buffer.drain(..consumed);
        }
        self.pos = end - consumed as f64;
        padded
    }

    /// Drop all buffered input and the fractional position
    pub fn reset(&mut self) {
        self.pos = 0.0;
        for buffer in &mut self.buffer {
            buffer.clear();
        }
    }
}

/// Scale MIDI offsets by `scale`, clamped to `0..frames`
fn scale_midi(dst: &mut Vec<MidiEvent>, src: impl IntoIterator<Item = MidiEvent>, scale: f64, frames: usize) {
    let last = frames.saturating_sub(1) as u32;
    dst.extend(src.into_iter().map(|mut e| {
        e.offset = ((e.offset as f64 * scale).floor() as u32).min(last);
        e
    }));
}

/// Resampling wrapper around a device process callback
#[derive(Debug, Clone)]
pub struct ResamplerInOut {
    host_rate: f32,
    device_rate: f32,
    output_channels: usize,
    input: StreamResampler,
    output: StreamResampler,
    device_in: [Vec<f32>; MAIN_IN_CHANNELS],
    device_out: [Vec<f32>; DEVICE_OUT_CHANNELS],
    midi_in: Vec<MidiEvent>,
    midi_out: Vec<MidiEvent>,
    /// Events that arrived while the device had nothing to render
    deferred: Vec<MidiEvent>,
    input_latency: usize,
}

impl ResamplerInOut {
    /// Resampler pair for a device at `device_rate` with `output_channels` outputs
    pub fn new(host_rate: f32, device_rate: f32, output_channels: usize) -> Self {
        let output_channels = output_channels.min(DEVICE_OUT_CHANNELS);
        let mut input = StreamResampler::new(MAIN_IN_CHANNELS, host_rate, device_rate);
        input.pad_front(PREWARM_SAMPLES);
        Self {
            host_rate,
            device_rate,
            output_channels,
            input,
            output: StreamResampler::new(output_channels, device_rate, host_rate),
            device_in: Default::default(),
            device_out: Default::default(),
            midi_in: Vec::new(),
            midi_out: Vec::new(),
            deferred: Vec::new(),
            input_latency: PREWARM_SAMPLES,
        }
    }

    /// Host sample rate
    pub fn host_samplerate(&self) -> f32 {
        self.host_rate
    }

    /// Device sample rate
    pub fn device_samplerate(&self) -> f32 {
        self.device_rate
    }

    /// Change the host rate; restarts both resamplers
    pub fn set_host_samplerate(&mut self, samplerate: f32) {
        if (samplerate - self.host_rate).abs() < RATE_EPSILON {
            return;
        }
        *self = Self::new(samplerate, self.device_rate, self.output_channels);
    }

    /// Change the device rate; restarts both resamplers
    pub fn set_device_samplerate(&mut self, samplerate: f32) {
        if (samplerate - self.device_rate).abs() < RATE_EPSILON {
            return;
        }
        *self = Self::new(self.host_rate, samplerate, self.output_channels);
    }

    /// Silence inserted so far to keep the device fed, in host samples
    pub fn latency_samples(&self) -> u32 {
        self.input_latency as u32
    }

    /// Device frames needed to render `frames` host frames
    pub fn device_frames_for(&self, frames: usize) -> usize {
        self.output.required_input(frames).saturating_sub(self.output.buffered())
    }

    /// Render one host block through `process`
    ///
    /// `process` receives device-rate buffers and MIDI with device-rate
    /// offsets. Missing host inputs read as silence, missing host outputs
    /// are skipped.
    pub fn process<F>(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: usize,
        midi_in: &[MidiEvent],
        midi_out: &mut Vec<MidiEvent>,
        mut process: F,
    ) where
        F: FnMut(&[&[f32]], &mut [&mut [f32]], usize, &[MidiEvent], &mut Vec<MidiEvent>),
    {
        if frames == 0 {
            self.deferred.extend(midi_in.iter().cloned());
            return;
        }

        self.input.push(inputs, frames);

        let device_frames = self.device_frames_for(frames);
        let to_device = self.device_rate as f64 / self.host_rate as f64;

        if device_frames == 0 {
            self.deferred.extend(midi_in.iter().cloned());
        } else {
            for buffer in self.device_in.iter_mut().chain(self.device_out.iter_mut()) {
                if buffer.len() < device_frames {
                    buffer.resize(device_frames, 0.0);
                }
            }

            {
                let mut ins = self.device_in.each_mut().map(|b| &mut b[..device_frames]);
                let padded = self.input.pull(&mut ins, device_frames);
                if padded > 0 {
                    self.input_latency += padded;
                    debug!("Resampler input latency now {} samples", self.input_latency);
                }
            }

            self.midi_in.clear();
            scale_midi(&mut self.midi_in, self.deferred.drain(..).map(|mut e| {
                e.offset = 0;
                e
            }), 1.0, device_frames);
            scale_midi(&mut self.midi_in, midi_in.iter().cloned(), to_device, device_frames);

            self.midi_out.clear();
            let ins: [&[f32]; MAIN_IN_CHANNELS] = [&self.device_in[0][..device_frames], &self.device_in[1][..device_frames]];
            let mut outs = self.device_out.each_mut().map(|b| &mut b[..device_frames]);
            process(
                &ins,
                &mut outs[..self.output_channels],
                device_frames,
                &self.midi_in,
                &mut self.midi_out,
            );

            let produced: [&[f32]; DEVICE_OUT_CHANNELS] = self.device_out.each_ref().map(|b| &b[..device_frames]);
            self.output.push(&produced[..self.output_channels], device_frames);
        }

        self.output.pull(outputs, frames);

        scale_midi(midi_out, self.midi_out.drain(..), 1.0 / to_device, frames);
    }
}
