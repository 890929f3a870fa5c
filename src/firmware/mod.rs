//! Firmware Image Loading
//!
//! Turns a vendor distribution file into a [`FirmwareImage`]: boot code, its
//! load address, the command stream replayed after boot, and preset banks.
//!
//! Two inputs are accepted:
//! - installer containers (`FORM` magic), whose file table names one
//!   firmware sub-image per device model
//! - bare ROM dumps of a known size
//!
//! Loading is all-or-nothing. A format error never yields a partially filled
//! image; [`FirmwareImage::load_or_empty`] maps it to an empty image instead.

pub mod container;
pub mod presets;
pub mod rom_dump;

pub use container::{is_installer, pack_variant_a, pack_variant_b, ContainerChunk};
pub use presets::{BankLayout, PresetBank, PresetRecord};
pub use rom_dump::{DspChunk, DspProgram, RomLayout};

use crate::model::DeviceModel;
use crate::{ChipWord, Result, SynthError};
use log::{info, warn};
use std::path::Path;

/// Part id of the DSP firmware inside an installer sub-image
pub const PART_FIRMWARE: u8 = b'F';
/// Part id of the first preset bank
pub const PART_PRESETS: u8 = b'P';
/// Part id of the second preset bank
pub const PART_SECONDARY_PRESETS: u8 = b'S';

/// Start of the multi bank inside a bare ROM dump
pub const ROM_MULTI_OFFSET: usize = 0x48000;
/// Start of the single banks inside a bare ROM dump
pub const ROM_SINGLE_OFFSET: usize = 0x50000;
/// Size of one single bank inside a bare ROM dump
pub const ROM_SINGLE_BANK_SIZE: usize = 0x8000;
/// Programs per ROM bank
pub const PROGRAMS_PER_BANK: usize = 128;

/// Where an image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Nothing loaded
    Empty,
    /// Bare ROM dump
    RomDump,
    /// Installer container
    Installer,
}

/// Decoded firmware, immutable once loaded
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    model: DeviceModel,
    source: ImageSource,
    boot_code: Vec<ChipWord>,
    boot_offset: ChipWord,
    command_stream: Vec<ChipWord>,
    preset_banks: Vec<PresetBank>,
}

impl FirmwareImage {
    /// Image with no content; [`is_valid`](Self::is_valid) is false
    pub fn empty(model: DeviceModel) -> Self {
        Self {
            model,
            source: ImageSource::Empty,
            boot_code: Vec::new(),
            boot_offset: 0,
            command_stream: Vec::new(),
            preset_banks: Vec::new(),
        }
    }

    /// Build an image from already decoded parts
    pub fn from_parts(model: DeviceModel, program: DspProgram, preset_banks: Vec<PresetBank>) -> Self {
        Self {
            model,
            source: ImageSource::Installer,
            boot_code: program.boot_code,
            boot_offset: program.boot_offset,
            command_stream: program.command_stream,
            preset_banks,
        }
    }

    /// Detect the file kind and decode it
    pub fn load(data: &[u8], model: DeviceModel) -> Result<Self> {
        if is_installer(data) {
            Self::from_installer(data, model)
        } else {
            Self::from_rom_dump(data, model)
        }
    }

    /// Like [`load`](Self::load), logging the error and returning an empty image
    pub fn load_or_empty(data: &[u8], model: DeviceModel) -> Self {
        Self::load(data, model).unwrap_or_else(|e| {
            warn!("Failed to load firmware: {e}");
            Self::empty(model)
        })
    }

    /// Read and decode a file
    pub fn load_file<P: AsRef<Path>>(path: P, model: DeviceModel) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading firmware from {}", path.display());
        let data = std::fs::read(path)?;
        Self::load(&data, model)
    }

    /// Decode a bare ROM dump
    pub fn from_rom_dump(data: &[u8], model: DeviceModel) -> Result<Self> {
        let chunks = rom_dump::parse_rom_chunks(data)?;
        let program = rom_dump::assemble(&chunks)?;

        let multis = PresetBank::with_record_size(
            data[ROM_MULTI_OFFSET..ROM_SINGLE_OFFSET].to_vec(),
            presets::ROM_RECORD_SIZE,
        )?;
        let singles = PresetBank::with_record_size(
            data[ROM_SINGLE_OFFSET..].to_vec(),
            presets::ROM_RECORD_SIZE,
        )?;

        Ok(Self {
            model,
            source: ImageSource::RomDump,
            boot_code: program.boot_code,
            boot_offset: program.boot_offset,
            command_stream: program.command_stream,
            preset_banks: vec![multis, singles],
        })
    }

    /// Decode an installer container for `model`
    pub fn from_installer(data: &[u8], model: DeviceModel) -> Result<Self> {
        let filename = model.installer_filename().ok_or_else(|| {
            SynthError::Format(format!("Model {model} has no installer firmware"))
        })?;

        let chunks = container::parse_chunks(data)?;
        let sub_image = container::find_sub_image(&chunks, filename)?;
        let parts = container::parse_chunks(sub_image)?;

        let firmware = container::unpack_part(&parts, PART_FIRMWARE)?;
        if firmware.is_empty() {
            return Err(SynthError::Format(format!(
                "'{filename}' contains no firmware part"
            )));
        }
        let program = rom_dump::assemble(&rom_dump::parse_contiguous_chunks(&firmware)?)?;

        let mut preset_banks = Vec::new();
        for part in [PART_PRESETS, PART_SECONDARY_PRESETS] {
            let bank = container::unpack_part(&parts, part)?;
            if !bank.is_empty() {
                preset_banks.push(PresetBank::parse(bank)?);
            }
        }

        info!(
            "Installer '{}': {} preset bank(s)",
            filename,
            preset_banks.len()
        );

        Ok(Self {
            model,
            source: ImageSource::Installer,
            boot_code: program.boot_code,
            boot_offset: program.boot_offset,
            command_stream: program.command_stream,
            preset_banks,
        })
    }

    /// Model this image was loaded for
    pub fn model(&self) -> DeviceModel {
        self.model
    }

    /// File kind
    pub fn source(&self) -> ImageSource {
        self.source
    }

    /// Program words written before execution starts
    pub fn boot_code(&self) -> &[ChipWord] {
        &self.boot_code
    }

    /// Program memory address of the boot code
    pub fn boot_offset(&self) -> ChipWord {
        self.boot_offset
    }

    /// Words replayed through the host port after boot
    pub fn command_stream(&self) -> &[ChipWord] {
        &self.command_stream
    }

    /// Preset banks in file order
    pub fn preset_banks(&self) -> &[PresetBank] {
        &self.preset_banks
    }

    /// True when boot code was recovered
    pub fn is_valid(&self) -> bool {
        !self.boot_code.is_empty()
    }

    /// Total number of program and command words, 0 for an empty image
    pub fn size(&self) -> usize {
        self.boot_code.len() + self.command_stream.len()
    }

    /// Single preset `program` of ROM bank `bank`
    pub fn single(&self, bank: usize, program: usize) -> Option<PresetRecord> {
        if self.source != ImageSource::RomDump || program >= PROGRAMS_PER_BANK {
            return None;
        }
        self.preset_banks
            .get(1)?
            .record(bank * PROGRAMS_PER_BANK + program)
    }

    /// Multi preset `program` of a ROM dump
    pub fn multi(&self, program: usize) -> Option<PresetRecord> {
        if self.source != ImageSource::RomDump {
            return None;
        }
        self.preset_banks.first()?.record(program)
    }

    /// Boot code framed for the host-port bootstrap: length, address, code
    pub fn boot_stream(&self) -> Vec<ChipWord> {
        let mut words = Vec::with_capacity(self.boot_code.len() + 2);
        words.push(self.boot_code.len() as ChipWord);
        words.push(self.boot_offset);
        words.extend_from_slice(&self.boot_code);
        words
    }
}
