//! Device Configuration
//!
//! Construction-time settings of a [`DualChipDevice`](crate::DualChipDevice),
//! loadable from JSON. Missing fields take the hardware defaults.

use crate::dac::Dac;
use crate::hdi08::HostFlags;
use crate::model::DeviceModel;
use crate::{Result, SynthError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default device write block, in samples
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 256;

/// Host flag lines raised before each MIDI event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiHostFlags {
    /// Flag 0 line
    pub flag0: bool,
    /// Flag 1 line
    pub flag1: bool,
}

impl MidiHostFlags {
    /// As [`HostFlags`]
    pub fn to_host_flags(self) -> HostFlags {
        HostFlags::from_lines(self.flag0, self.flag1)
    }
}

/// Settings of one emulated device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hardware variant
    pub model: DeviceModel,
    /// Device sample rate in Hz
    pub samplerate: f32,
    /// Output converter bit depth
    pub dac_output_bits: u32,
    /// Output converter dither bits
    pub dac_noise_bits: u32,
    /// Longest run of samples handed to the chips at once
    pub max_block_size: usize,
    /// Latency added on top of the device's own, reported to the host
    pub extra_latency_samples: u32,
    /// Flag state requested before every MIDI event, `None` to leave the lines alone
    pub midi_host_flags: Option<MidiHostFlags>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model: DeviceModel::Ti,
            samplerate: 44100.0,
            dac_output_bits: 24,
            dac_noise_bits: 1,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            extra_latency_samples: 0,
            midi_host_flags: Some(MidiHostFlags {
                flag0: false,
                flag1: true,
            }),
        }
    }
}

impl DeviceConfig {
    /// Defaults for `model`, at its first preferred sample rate
    pub fn for_model(model: DeviceModel) -> Self {
        Self {
            model,
            samplerate: model
                .preferred_samplerates()
                .first()
                .copied()
                .unwrap_or(44100.0),
            ..Default::default()
        }
    }

    /// Parse and validate JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DeviceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        Dac::validate(self.dac_output_bits, self.dac_noise_bits)?;

        if self.max_block_size == 0 {
            return Err(SynthError::Config("max_block_size must be non-zero".into()));
        }

        if !self.model.supports_samplerate(self.samplerate) {
            return Err(SynthError::Config(format!(
                "Model {} does not run at {} Hz",
                self.model, self.samplerate
            )));
        }

        Ok(())
    }

    /// MIDI host flags as [`HostFlags`]
    pub fn midi_flags(&self) -> Option<HostFlags> {
        self.midi_host_flags.map(MidiHostFlags::to_host_flags)
    }
}
