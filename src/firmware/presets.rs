//! Preset Banks
//!
//! A preset bank is a flat blob of fixed-size parameter dumps. The record size
//! and count are derived from the blob size alone; some layouts carry an
//! auxiliary bank behind the records.

use crate::{Result, SynthError};

/// First byte of a single preset's name field
pub const SINGLE_NAME_FIRST: usize = 240;
/// Last byte of a single preset's name field
pub const SINGLE_NAME_LAST: usize = 249;
/// First byte of a multi preset's name field
pub const MULTI_NAME_FIRST: usize = 4;
/// Last byte of a multi preset's name field
pub const MULTI_NAME_LAST: usize = 13;

/// Size of one record in a bare ROM dump
pub const ROM_RECORD_SIZE: usize = 256;

/// One preset parameter dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetRecord {
    data: Vec<u8>,
}

impl PresetRecord {
    /// Wrap raw record bytes
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Raw bytes
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Record size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-length record
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Name of a single preset
    pub fn single_name(&self) -> String {
        self.name_field(SINGLE_NAME_FIRST, SINGLE_NAME_LAST)
    }

    /// Name of a multi preset
    pub fn multi_name(&self) -> String {
        self.name_field(MULTI_NAME_FIRST, MULTI_NAME_LAST)
    }

    /// Printable ASCII from `first..=last`, stopping at the first other byte
    fn name_field(&self, first: usize, last: usize) -> String {
        self.data
            .iter()
            .skip(first)
            .take(last + 1 - first)
            .take_while(|&&c| (32..=127).contains(&c))
            .map(|&c| c as char)
            .collect()
    }
}

/// Record geometry for one known bank size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankLayout {
    /// Total blob size
    pub file_size: usize,
    /// Bytes per record
    pub record_size: usize,
    /// Records in the main bank
    pub record_count: usize,
    /// Offset and size of the trailing auxiliary bank
    pub aux: Option<(usize, usize)>,
}

const BANK_LAYOUTS: [BankLayout; 5] = [
    // raw 512-byte dumps
    BankLayout {
        file_size: 0x10000,
        record_size: 512,
        record_count: 128,
        aux: None,
    },
    BankLayout {
        file_size: 0x40000,
        record_size: 512,
        record_count: 512,
        aux: None,
    },
    BankLayout {
        file_size: 0x24000,
        record_size: 1024,
        record_count: 128,
        aux: Some((0x20000, 0x4000)),
    },
    BankLayout {
        file_size: 0x8000,
        record_size: ROM_RECORD_SIZE,
        record_count: 128,
        aux: None,
    },
    BankLayout {
        file_size: 0x30000,
        record_size: ROM_RECORD_SIZE,
        record_count: 768,
        aux: None,
    },
];

impl BankLayout {
    /// Look up the layout for a bank of `size` bytes
    pub fn for_size(size: usize) -> Option<BankLayout> {
        BANK_LAYOUTS.iter().copied().find(|l| l.file_size == size)
    }
}

/// Preset bank blob with its decoded layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetBank {
    data: Vec<u8>,
    layout: BankLayout,
}

impl PresetBank {
    /// Parse a bank blob; unknown sizes are rejected
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let layout = BankLayout::for_size(data.len()).ok_or_else(|| {
            SynthError::Format(format!("Unknown preset bank size 0x{:x}", data.len()))
        })?;
        Ok(Self { data, layout })
    }

    /// Wrap a blob of uniform records, e.g. a ROM bank region
    pub fn with_record_size(data: Vec<u8>, record_size: usize) -> Result<Self> {
        if record_size == 0 || data.len() % record_size != 0 {
            return Err(SynthError::Format(format!(
                "Bank of 0x{:x} bytes is not a multiple of {} byte records",
                data.len(),
                record_size
            )));
        }
        let layout = BankLayout {
            file_size: data.len(),
            record_size,
            record_count: data.len() / record_size,
            aux: None,
        };
        Ok(Self { data, layout })
    }

    /// Geometry of this bank
    pub fn layout(&self) -> BankLayout {
        self.layout
    }

    /// Number of records in the main bank
    pub fn record_count(&self) -> usize {
        self.layout.record_count
    }

    /// Record `index` of the main bank
    pub fn record(&self, index: usize) -> Option<PresetRecord> {
        if index >= self.layout.record_count {
            return None;
        }
        let start = index * self.layout.record_size;
        self.data
            .get(start..start + self.layout.record_size)
            .map(|r| PresetRecord::new(r.to_vec()))
    }

    /// All records of the main bank
    pub fn records(&self) -> impl Iterator<Item = PresetRecord> + '_ {
        (0..self.layout.record_count).filter_map(move |i| self.record(i))
    }

    /// Trailing auxiliary bank, if the layout has one
    pub fn aux_bank(&self) -> Option<&[u8]> {
        self.layout
            .aux
            .and_then(|(offset, size)| self.data.get(offset..offset + size))
    }

    /// Whole blob
    pub fn raw(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named_record(size: usize, offset: usize, name: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; size];
        data[offset..offset + name.len()].copy_from_slice(name);
        data
    }

    #[test]
    fn test_single_name_stops_at_control_byte() {
        let mut data = named_record(256, SINGLE_NAME_FIRST, b"Pad-Heaven");
        let record = PresetRecord::new(data.clone());
        assert_eq!(record.single_name(), "Pad-Heaven");

        data[SINGLE_NAME_FIRST + 3] = 0x05;
        assert_eq!(PresetRecord::new(data).single_name(), "Pad");
    }

    #[test]
    fn test_multi_name() {
        let record = PresetRecord::new(named_record(256, MULTI_NAME_FIRST, b"Split Bass"));
        assert_eq!(record.multi_name(), "Split Bass");
    }

    #[test]
    fn test_name_of_short_record() {
        assert_eq!(PresetRecord::new(vec![b'A'; 16]).single_name(), "");
    }

    #[test]
    fn test_bank_by_size() {
        let mut data = vec![0u8; 0x10000];
        data[512 * 3] = 0x42;
        let bank = PresetBank::parse(data).unwrap();
        assert_eq!(bank.record_count(), 128);
        assert_eq!(bank.record(3).unwrap().bytes()[0], 0x42);
        assert!(bank.record(128).is_none());
        assert!(bank.aux_bank().is_none());
    }

    #[test]
    fn test_bank_with_aux() {
        let mut data = vec![0u8; 0x24000];
        data[0x20000] = 0x99;
        let bank = PresetBank::parse(data).unwrap();
        assert_eq!(bank.layout().record_size, 1024);
        let aux = bank.aux_bank().unwrap();
        assert_eq!(aux.len(), 0x4000);
        assert_eq!(aux[0], 0x99);
    }

    #[test]
    fn test_unknown_bank_size() {
        assert!(matches!(
            PresetBank::parse(vec![0u8; 1000]),
            Err(SynthError::Format(_))
        ));
    }

    #[test]
    fn test_uniform_records() {
        let bank = PresetBank::with_record_size(vec![1u8; 0x800], ROM_RECORD_SIZE).unwrap();
        assert_eq!(bank.records().count(), 8);
        assert!(PresetBank::with_record_size(vec![1u8; 100], ROM_RECORD_SIZE).is_err());
    }
}
