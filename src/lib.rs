//! Two-chip DSP synthesizer hardware core
//!
//! Models the hardware surrounding the signal processors of a dual-DSP
//! digital synthesizer: everything between a vendor firmware file and the
//! audio/MIDI callbacks of a plugin host. The instruction emulator that
//! actually executes chip code is an external collaborator, reached through
//! the traits in [`boot`], [`hdi08`] and [`audio_bus`].
//!
//! # Components
//! - [`firmware`]: installer container and bare ROM dump unpacking
//! - [`boot`]: program memory load and command stream replay
//! - [`hdi08`]: host-interface queues with host flag handshake, sample
//!   accurate MIDI release
//! - [`audio_bus`]: reconstruction of one 12-channel device from two chips'
//!   serial audio interfaces
//! - [`midi`]: channel translation, sysex reassembly, MIDI clock synthesis
//! - [`dac`]: bit depth reduction and LCG dither of the output converter
//! - [`device`]: the composed device
//! - [`shell`]: real-time plugin entry point with resampling
//!
//! # Quick start
//! ```no_run
//! use dualdsp_synth::{DeviceModel, FirmwareImage};
//! let data = std::fs::read("firmware.bin").unwrap();
//! let image = FirmwareImage::load(&data, DeviceModel::Ti).unwrap();
//! println!("boot code: {} words at {:#x}", image.boot_code().len(), image.boot_offset());
//! ```

#![warn(missing_docs)]

pub mod audio_bus; // Dual-chip serial audio synchronization
pub mod boot; // Chip boot sequencing
pub mod config; // Device configuration
pub mod dac; // Output converter emulation
pub mod device; // Composed device
pub mod firmware; // Firmware image loading
pub mod hdi08; // Host interface queues
pub mod midi; // MIDI types, translation, clock
pub mod model; // Device model table
pub mod shell; // Real-time plugin shell

/// Native word of the emulated signal processors (24 significant bits)
pub type ChipWord = u32;

/// Mask selecting the 24 significant bits of a [`ChipWord`]
pub const WORD_MASK: ChipWord = 0x00ff_ffff;

/// Sign-extend a 24-bit chip word to `i32`
#[inline]
pub fn sign_extend_24(word: ChipWord) -> i32 {
    ((word << 8) as i32) >> 8
}

/// Error types for device emulation operations
#[derive(thiserror::Error, Debug)]
pub enum SynthError {
    /// Unknown file size, chunk-ID or counter mismatch, missing container part
    #[error("Format error: {0}")]
    Format(String),

    /// DAC bit depth / dither combination that has no conversion routine
    #[error("Unsupported DAC configuration: {output_bits} output bits, {noise_bits} noise bits")]
    UnsupportedDac {
        /// Requested output bit depth
        output_bits: u32,
        /// Requested dither bit count
        noise_bits: u32,
    },

    /// Malformed MIDI data surfaced outside the audio thread
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Device failed to boot or was never booted
    #[error("Device invalid: {0}")]
    DeviceInvalid(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for SynthError {
    /// Converts a String into `SynthError::Other`.
    ///
    /// Prefer the explicit variants (`Format`, `Config`, ...) where the error
    /// kind is known, callers match on them.
    fn from(msg: String) -> Self {
        SynthError::Other(msg)
    }
}

impl From<&str> for SynthError {
    /// Converts a string slice into `SynthError::Other`.
    fn from(msg: &str) -> Self {
        SynthError::Other(msg.to_string())
    }
}

/// Result type for device emulation operations
pub type Result<T> = std::result::Result<T, SynthError>;

// Public API exports
pub use audio_bus::{ChipAudio, DualChipBus, Sample, SerialAudio};
pub use boot::{BootHandle, BootLoader, BootSequencer, ChipEmulator};
pub use config::DeviceConfig;
pub use dac::Dac;
pub use device::{ChipHandle, Device, DualChipDevice};
pub use firmware::{FirmwareImage, PresetBank, PresetRecord};
pub use hdi08::{Hdi08List, Hdi08MidiQueue, Hdi08Queue, HostFlags, HostInterface};
pub use midi::{MidiClock, MidiEvent, MidiTranslator, SysexAssembler, Transport};
pub use model::DeviceModel;
pub use shell::{Plugin, ResamplerInOut};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_extend_24() {
        assert_eq!(sign_extend_24(0x000001), 1);
        assert_eq!(sign_extend_24(0x7fffff), 0x7fffff);
        assert_eq!(sign_extend_24(0x800000), -0x800000);
        assert_eq!(sign_extend_24(0xffffff), -1);
        // upper byte is ignored
        assert_eq!(sign_extend_24(0x80ffffff), -1);
    }

    #[test]
    fn test_string_conversion() {
        let err: SynthError = "boom".into();
        assert!(matches!(err, SynthError::Other(ref m) if m == "boom"));
    }
}
