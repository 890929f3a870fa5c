//! Output Converter Emulation
//!
//! Reduces a 24-bit chip word to the bit depth of the emulated DAC and adds
//! the converter's dither noise, reproduced bit-exactly from a linear
//! congruential generator.
//!
//! # Conversion
//! 1. sign-extend the 24-bit input
//! 2. shift to the effective depth (one bit wider when dithering, the first
//!    noise bit is half an LSB), rounding when shifting down
//! 3. when dithering, add the top `noise_bits` bits of the next LCG value,
//!    recentered, then drop the extra half bit
//! 4. scale by `1 / 2^(output_bits - 1)`
//!
//! The (depth, dither) pair is resolved to one of a few conversion kernels
//! when the DAC is configured, so nothing branches on configuration per
//! sample.

use crate::{sign_extend_24, ChipWord, Result, SynthError};

/// Bit depth of the chip words fed into the converter
pub const INPUT_BITS: u32 = 24;

/// Output bit depths the converter can be configured for
pub const SUPPORTED_OUTPUT_BITS: [u32; 5] = [8, 12, 16, 18, 24];

/// Largest supported dither bit count
pub const MAX_NOISE_BITS: u32 = 7;

/// Power-on seed of the dither generator
pub const DEFAULT_SEED: u32 = 56362;

const LCG_A: u32 = 1_664_525;
const LCG_C: u32 = 1_013_904_223;

/// Dither generator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DacState {
    /// Last generated value
    pub random_value: u32,
}

impl Default for DacState {
    fn default() -> Self {
        Self {
            random_value: DEFAULT_SEED,
        }
    }
}

impl DacState {
    /// Advance the generator and return the new value
    #[inline]
    pub fn next_random(&mut self) -> u32 {
        self.random_value = self.random_value.wrapping_mul(LCG_A).wrapping_add(LCG_C);
        self.random_value
    }
}

/// Constants of one validated configuration
#[derive(Debug, Clone, Copy, PartialEq)]
struct DacParams {
    shift: u32,
    rounder: i32,
    noise_shift: u32,
    noise_rounder: i32,
    scale: f32,
}

type Kernel = fn(&DacParams, &mut DacState, ChipWord) -> f32;

#[inline]
fn dither(p: &DacParams, state: &mut DacState, v: i32) -> i32 {
    let noise = (state.next_random() >> p.noise_shift) as i32;
    (v + noise - p.noise_rounder) >> 1
}

fn kernel_same(p: &DacParams, _: &mut DacState, word: ChipWord) -> f32 {
    sign_extend_24(word) as f32 * p.scale
}

fn kernel_down(p: &DacParams, _: &mut DacState, word: ChipWord) -> f32 {
    let v = (sign_extend_24(word) + p.rounder) >> p.shift;
    v as f32 * p.scale
}

fn kernel_up(p: &DacParams, _: &mut DacState, word: ChipWord) -> f32 {
    let v = sign_extend_24(word) << p.shift;
    v as f32 * p.scale
}

fn kernel_same_dither(p: &DacParams, s: &mut DacState, word: ChipWord) -> f32 {
    dither(p, s, sign_extend_24(word)) as f32 * p.scale
}

fn kernel_down_dither(p: &DacParams, s: &mut DacState, word: ChipWord) -> f32 {
    let v = (sign_extend_24(word) + p.rounder) >> p.shift;
    dither(p, s, v) as f32 * p.scale
}

fn kernel_up_dither(p: &DacParams, s: &mut DacState, word: ChipWord) -> f32 {
    let v = sign_extend_24(word) << p.shift;
    dither(p, s, v) as f32 * p.scale
}

/// Resolve a (depth, dither) pair to its kernel and constants
fn resolve(output_bits: u32, noise_bits: u32) -> Result<(Kernel, DacParams)> {
    let unsupported = SynthError::UnsupportedDac {
        output_bits,
        noise_bits,
    };

    if !SUPPORTED_OUTPUT_BITS.contains(&output_bits) || noise_bits > MAX_NOISE_BITS {
        return Err(unsupported);
    }

    let out_bits = if noise_bits > 0 {
        output_bits + 1
    } else {
        output_bits
    };

    if noise_bits >= out_bits {
        return Err(unsupported);
    }

    let (shift, rounder) = if out_bits < INPUT_BITS {
        let shift = INPUT_BITS - out_bits;
        (shift, (1i32 << (shift - 1)) - 1)
    } else {
        (out_bits - INPUT_BITS, 0)
    };

    let (noise_shift, noise_rounder) = if noise_bits > 0 {
        (32 - noise_bits, (1i32 << (noise_bits - 1)) - 1)
    } else {
        (0, 0)
    };

    let params = DacParams {
        shift,
        rounder,
        noise_shift,
        noise_rounder,
        scale: 1.0 / (1u32 << (output_bits - 1)) as f32,
    };

    let kernel: Kernel = match (out_bits.cmp(&INPUT_BITS), noise_bits > 0) {
        (std::cmp::Ordering::Less, false) => kernel_down,
        (std::cmp::Ordering::Less, true) => kernel_down_dither,
        (std::cmp::Ordering::Equal, false) => kernel_same,
        (std::cmp::Ordering::Equal, true) => kernel_same_dither,
        (std::cmp::Ordering::Greater, false) => kernel_up,
        (std::cmp::Ordering::Greater, true) => kernel_up_dither,
    };

    Ok((kernel, params))
}

/// DAC emulator
#[derive(Clone)]
pub struct Dac {
    kernel: Kernel,
    params: DacParams,
    state: DacState,
    output_bits: u32,
    noise_bits: u32,
}

impl Dac {
    /// 24-bit converter with one dither bit, the hardware default
    pub fn new() -> Self {
        // 24 bits plus half a noise bit: shift up by one, keep the LCG top bit
        Self {
            kernel: kernel_up_dither,
            params: DacParams {
                shift: 1,
                rounder: 0,
                noise_shift: 31,
                noise_rounder: 0,
                scale: 1.0 / (1u32 << 23) as f32,
            },
            state: DacState::default(),
            output_bits: 24,
            noise_bits: 1,
        }
    }

    /// Converter with the given depth and dither
    pub fn with_config(output_bits: u32, noise_bits: u32) -> Result<Self> {
        let mut dac = Self::new();
        dac.configure(output_bits, noise_bits)?;
        Ok(dac)
    }

    /// Check a (depth, dither) pair without building a converter
    pub fn validate(output_bits: u32, noise_bits: u32) -> Result<()> {
        resolve(output_bits, noise_bits).map(|_| ())
    }

    /// Switch depth and dither
    ///
    /// An unsupported pair leaves the current configuration untouched.
    pub fn configure(&mut self, output_bits: u32, noise_bits: u32) -> Result<()> {
        let (kernel, params) = resolve(output_bits, noise_bits)?;
        self.kernel = kernel;
        self.params = params;
        self.output_bits = output_bits;
        self.noise_bits = noise_bits;
        Ok(())
    }

    /// Convert one chip word
    #[inline]
    pub fn process_sample(&mut self, word: ChipWord) -> f32 {
        (self.kernel)(&self.params, &mut self.state, word)
    }

    /// Convert `input` into `output`, up to the shorter length
    pub fn process_block(&mut self, input: &[ChipWord], output: &mut [f32]) {
        let kernel = self.kernel;
        for (out, &word) in output.iter_mut().zip(input) {
            *out = kernel(&self.params, &mut self.state, word);
        }
    }

    /// Configured output bit depth
    pub fn output_bits(&self) -> u32 {
        self.output_bits
    }

    /// Configured dither bit count
    pub fn noise_bits(&self) -> u32 {
        self.noise_bits
    }

    /// Dither generator state
    pub fn state(&self) -> DacState {
        self.state
    }

    /// Restore the power-on seed
    pub fn reset_state(&mut self) {
        self.state = DacState::default();
    }
}

impl std::fmt::Debug for Dac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dac")
            .field("output_bits", &self.output_bits)
            .field("noise_bits", &self.noise_bits)
            .field("state", &self.state)
            .finish()
    }
}

impl Default for Dac {
    fn default() -> Self {
        Self::new()
    }
}
