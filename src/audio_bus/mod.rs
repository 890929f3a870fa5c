//! Dual-Chip Serial Audio
//!
//! Each chip has two serial audio ports: the main port at the device sample
//! rate and a link port running at three times that rate, which the two
//! chips use to pass audio to each other. [`DualChipBus`] turns the four
//! ports into one device with stereo input and 12 outputs.
//!
//! Audio flows either as host floats or as native 24-bit chip words; both
//! implement [`Sample`] and share the same bus code.

pub mod sync;

pub use sync::DualChipBus;

use crate::{sign_extend_24, ChipWord, WORD_MASK};

/// Channels of a main port input frame
pub const MAIN_IN_CHANNELS: usize = 2;
/// Channels of a main port output frame
pub const MAIN_OUT_CHANNELS: usize = 6;
/// Channels of a link port frame, input and output
pub const LINK_CHANNELS: usize = 4;
/// Link port frames per device sample
pub const LINK_RATE: usize = 3;
/// Link frames kept from the previous block in front of the current one
pub const PADDING: usize = 3;

const WORD_SCALE: f32 = 8_388_608.0;

/// Sample representation flowing over the bus
pub trait Sample: Copy + Default + PartialEq + Send + 'static {
    /// Digital silence
    const SILENCE: Self;

    /// Sum of two samples
    fn mix(self, other: Self) -> Self;

    /// Convert from a float in [-1, 1)
    fn from_float(value: f32) -> Self;

    /// Convert to a float in [-1, 1)
    fn to_float(self) -> f32;

    /// Convert from a 24-bit chip word
    fn from_word(word: ChipWord) -> Self;

    /// Convert to a 24-bit chip word
    fn to_word(self) -> ChipWord;
}

impl Sample for f32 {
    const SILENCE: Self = 0.0;

    #[inline]
    fn mix(self, other: Self) -> Self {
        self + other
    }

    #[inline]
    fn from_float(value: f32) -> Self {
        value
    }

    #[inline]
    fn to_float(self) -> f32 {
        self
    }

    #[inline]
    fn from_word(word: ChipWord) -> Self {
        word_to_float(word)
    }

    #[inline]
    fn to_word(self) -> ChipWord {
        float_to_word(self)
    }
}

impl Sample for ChipWord {
    const SILENCE: Self = 0;

    /// 24-bit two's complement addition, wrapping like the chip
    #[inline]
    fn mix(self, other: Self) -> Self {
        (sign_extend_24(self).wrapping_add(sign_extend_24(other)) as ChipWord) & WORD_MASK
    }

    #[inline]
    fn from_float(value: f32) -> Self {
        float_to_word(value)
    }

    #[inline]
    fn to_float(self) -> f32 {
        word_to_float(self)
    }

    #[inline]
    fn from_word(word: ChipWord) -> Self {
        word & WORD_MASK
    }

    #[inline]
    fn to_word(self) -> ChipWord {
        self & WORD_MASK
    }
}

/// Float in [-1, 1) to a saturated 24-bit word
#[inline]
pub fn float_to_word(value: f32) -> ChipWord {
    let scaled = (value * WORD_SCALE) as i32;
    (scaled.clamp(-0x80_0000, 0x7f_ffff) as ChipWord) & WORD_MASK
}

/// 24-bit word to a float in [-1, 1)
#[inline]
pub fn word_to_float(word: ChipWord) -> f32 {
    sign_extend_24(word) as f32 / WORD_SCALE
}

/// One serial audio port of a chip
///
/// Frames are interleaved, `channels` samples per frame.
pub trait SerialAudio<T: Sample> {
    /// Deliver input frames to the chip
    fn write_input(&mut self, interleaved: &[T], channels: usize);

    /// Collect the frames the chip produced
    fn read_output(&mut self, interleaved: &mut [T], channels: usize);
}

/// The two serial ports of a chip
pub trait ChipAudio<T: Sample> {
    /// Port at the device sample rate
    fn main_port(&mut self) -> &mut dyn SerialAudio<T>;

    /// Chip-to-chip port at [`LINK_RATE`] times the device sample rate
    fn link_port(&mut self) -> &mut dyn SerialAudio<T>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_word_mix_wraps_in_24_bits() {
        assert_eq!(0x7f_ffffu32.mix(1), 0x80_0000);
        assert_eq!(0xff_ffffu32.mix(0xff_ffff), 0xff_fffe);
        assert_eq!(0x10u32.mix(0xff_fff0), 0);
    }

    #[test]
    fn test_float_word_conversion() {
        assert_eq!(float_to_word(0.5), 0x40_0000);
        assert_eq!(float_to_word(-1.0), 0x80_0000);
        assert_eq!(float_to_word(2.0), 0x7f_ffff);
        assert_relative_eq!(word_to_float(0xc0_0000), -0.5);
        assert_eq!(<f32 as Sample>::from_word(0x12_3456).to_word(), 0x12_3456);
    }
}
