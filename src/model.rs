//! Device Model Table
//!
//! The emulated hardware ships in two families: the older "ABC" units boot
//! from a bare ROM dump with one DSP, the "TI" units boot from a vendor
//! installer image and, except for the Snow, carry two DSPs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hardware variant being emulated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceModel {
    /// First generation, bare ROM dump
    A,
    /// Second generation, bare ROM dump
    B,
    /// Third generation, bare ROM dump
    C,
    /// Desktop TI variant, single DSP
    Snow,
    /// TI, two DSPs
    Ti,
    /// TI2, two DSPs
    Ti2,
}

/// ABC units run at the crystal rate divided by 256
const ABC_SAMPLERATE: f32 = 12_000_000.0 / 256.0;

const ABC_SAMPLERATES: [f32; 1] = [ABC_SAMPLERATE];
const TI_SAMPLERATES: [f32; 6] = [32000.0, 44100.0, 48000.0, 64000.0, 88200.0, 96000.0];
const TI_PREFERRED_SAMPLERATES: [f32; 2] = [44100.0, 48000.0];

/// Average MIDI-to-output latency; jitters by roughly +/- 61 samples
const LATENCY_MIDI_TO_OUTPUT: u32 = 324;
/// Measured with a click on the input of an init patch
const LATENCY_INPUT_TO_OUTPUT: u32 = 384;

impl DeviceModel {
    /// Models that boot from a bare ROM dump
    pub fn is_abc_family(self) -> bool {
        matches!(self, DeviceModel::A | DeviceModel::B | DeviceModel::C)
    }

    /// Models that boot from an installer image
    pub fn is_ti_family(self) -> bool {
        !self.is_abc_family()
    }

    /// Models whose audio is split across two DSPs
    pub fn is_dual_chip(self) -> bool {
        matches!(self, DeviceModel::Ti | DeviceModel::Ti2)
    }

    /// Name of the firmware sub-image inside the installer's file table
    pub fn installer_filename(self) -> Option<&'static str> {
        match self {
            DeviceModel::Ti => Some("vti.bin"),
            DeviceModel::Ti2 => Some("vti_2.bin"),
            DeviceModel::Snow => Some("vti_snow.bin"),
            _ => None,
        }
    }

    /// Number of audio inputs
    pub fn input_channel_count(self) -> usize {
        2
    }

    /// Number of audio outputs exposed to the host
    pub fn output_channel_count(self) -> usize {
        if self.is_ti_family() {
            12
        } else {
            6
        }
    }

    /// Sample rates the device can be clocked at
    pub fn supported_samplerates(self) -> &'static [f32] {
        if self.is_abc_family() {
            &ABC_SAMPLERATES
        } else {
            &TI_SAMPLERATES
        }
    }

    /// Sample rates the device runs best at
    pub fn preferred_samplerates(self) -> &'static [f32] {
        if self.is_abc_family() {
            &ABC_SAMPLERATES
        } else {
            &TI_PREFERRED_SAMPLERATES
        }
    }

    /// Check whether `samplerate` is one of the supported rates
    pub fn supports_samplerate(self, samplerate: f32) -> bool {
        self.supported_samplerates()
            .iter()
            .any(|&sr| (sr - samplerate).abs() < 0.5)
    }

    /// Average delay between a MIDI event and its audible result, in samples
    pub fn latency_midi_to_output(self) -> u32 {
        if self.is_ti_family() {
            LATENCY_MIDI_TO_OUTPUT - 108
        } else {
            LATENCY_MIDI_TO_OUTPUT
        }
    }

    /// Delay between audio input and output, in samples
    pub fn latency_input_to_output(self) -> u32 {
        LATENCY_INPUT_TO_OUTPUT
    }

    /// Short lowercase name as used in configuration files and the CLI
    pub fn name(self) -> &'static str {
        match self {
            DeviceModel::A => "a",
            DeviceModel::B => "b",
            DeviceModel::C => "c",
            DeviceModel::Snow => "snow",
            DeviceModel::Ti => "ti",
            DeviceModel::Ti2 => "ti2",
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceModel {
    type Err = crate::SynthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" => Ok(DeviceModel::A),
            "b" => Ok(DeviceModel::B),
            // ABC dumps share one layout, C is the most complete
            "c" | "abc" => Ok(DeviceModel::C),
            "snow" => Ok(DeviceModel::Snow),
            "ti" => Ok(DeviceModel::Ti),
            "ti2" => Ok(DeviceModel::Ti2),
            other => Err(crate::SynthError::Config(format!(
                "Unknown device model '{other}'"
            ))),
        }
    }
}
