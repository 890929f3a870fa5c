//! Chip Boot Sequencing
//!
//! Booting a chip takes two steps: the boot code of a [`FirmwareImage`] is
//! written into program memory and the PC pointed at it, then the command
//! stream is replayed through the chip's host interface queue. The replay
//! runs on its own thread per chip, since it can only progress while the
//! chip (running on its emulator thread) reads its receive FIFO. Callers join
//! every [`BootHandle`] before processing audio.
//!
//! [`BootLoader`] covers the other path, where the chip's boot ROM receives
//! its program through the host port.

pub mod loader;

pub use loader::{BootLoader, BootState};

use crate::firmware::FirmwareImage;
use crate::hdi08::Hdi08Queue;
use crate::{ChipWord, Result, SynthError};
use log::{debug, info};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Sleep between drain attempts while the chip's FIFO is full
pub const BOOT_BACKOFF_MICROS: u64 = 100;

/// Chip memory spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryArea {
    /// X data memory
    X,
    /// Y data memory
    Y,
    /// Program memory
    P,
}

/// Registers touched while booting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Address register 0
    R0,
    /// Address register 1
    R1,
    /// Status register
    Sr,
}

/// The instruction emulator as seen by the boot code
pub trait ChipEmulator: Send {
    /// Store one word
    fn write_memory(&mut self, area: MemoryArea, address: ChipWord, value: ChipWord);

    /// Load one word
    fn read_memory(&self, area: MemoryArea, address: ChipWord) -> ChipWord;

    /// Read a register
    fn read_register(&self, register: Register) -> ChipWord;

    /// Write a register
    fn write_register(&mut self, register: Register, value: ChipWord);

    /// Set the program counter
    fn set_pc(&mut self, pc: ChipWord);

    /// Program memory at `address` changed, drop anything derived from it
    fn notify_program_write(&mut self, _address: ChipWord) {}
}

/// Pending command stream replay of one chip
#[derive(Debug)]
pub struct BootHandle {
    name: String,
    handle: JoinHandle<usize>,
}

impl BootHandle {
    /// Chip name given at boot
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replay has handed every word to the hardware FIFO
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the replay; returns the number of words sent
    pub fn join(self) -> Result<usize> {
        let words = self.handle.join().map_err(|_| {
            SynthError::DeviceInvalid(format!("Boot thread of {} panicked", self.name))
        })?;
        info!("{}: command stream of {} words delivered", self.name, words);
        Ok(words)
    }
}

/// Boots chips from a firmware image
pub struct BootSequencer;

impl BootSequencer {
    /// Write the boot code to program memory and point the PC at it
    pub fn load_program(image: &FirmwareImage, chip: &mut dyn ChipEmulator) {
        let offset = image.boot_offset();
        for (i, &word) in image.boot_code().iter().enumerate() {
            let address = offset + i as ChipWord;
            chip.write_memory(MemoryArea::P, address, word);
            chip.notify_program_write(address);
        }
        chip.set_pc(offset);
    }

    /// Load the boot code, then replay the command stream on a new thread
    pub fn boot(
        image: Arc<FirmwareImage>,
        chip: &mut dyn ChipEmulator,
        queue: Arc<Hdi08Queue>,
        name: &str,
    ) -> Result<BootHandle> {
        if !image.is_valid() {
            return Err(SynthError::DeviceInvalid(format!(
                "{name}: firmware image has no boot code"
            )));
        }

        debug!(
            "{}: boot code 0x{:x} words at 0x{:x}",
            name,
            image.boot_code().len(),
            image.boot_offset()
        );
        Self::load_program(&image, chip);

        let handle = std::thread::Builder::new()
            .name(format!("boot-{name}"))
            .spawn(move || replay_command_stream(&image, &queue))?;

        Ok(BootHandle {
            name: name.to_string(),
            handle,
        })
    }

    /// Boot every chip concurrently and wait for all of them
    ///
    /// All handles are joined even if one fails; the first error is returned.
    pub fn boot_all(
        image: &Arc<FirmwareImage>,
        chips: Vec<(&mut dyn ChipEmulator, Arc<Hdi08Queue>)>,
    ) -> Result<()> {
        let mut handles = Vec::with_capacity(chips.len());
        let mut first_error = None;

        for (index, (chip, queue)) in chips.into_iter().enumerate() {
            let name = format!("dsp{index}");
            match Self::boot(image.clone(), chip, queue, &name) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.join() {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn replay_command_stream(image: &FirmwareImage, queue: &Hdi08Queue) -> usize {
    let words = image.command_stream();
    queue.enqueue(words);

    while queue.pending_len() > 0 {
        std::thread::sleep(Duration::from_micros(BOOT_BACKOFF_MICROS));
        queue.drain();
    }

    words.len()
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeChip;
    use super::*;
    use crate::firmware::rom_dump::DspProgram;
    use crate::hdi08::test_support::FakeHostInterface;
    use crate::model::DeviceModel;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn image(commands: usize) -> Arc<FirmwareImage> {
        Arc::new(FirmwareImage::from_parts(
            DeviceModel::Ti,
            DspProgram {
                boot_code: vec![0x0a, 0x0b, 0x0c],
                boot_offset: 0x80,
                command_stream: (0..commands as ChipWord).collect(),
            },
            Vec::new(),
        ))
    }

    #[test]
    fn test_load_program() {
        let mut chip = FakeChip::default();
        BootSequencer::load_program(&image(0), &mut chip);
        assert_eq!(chip.p_memory(0x80, 3), vec![0x0a, 0x0b, 0x0c]);
        assert_eq!(chip.pc, 0x80);
    }

    #[test]
    fn test_boot_replays_command_stream() {
        let hdi = Arc::new(FakeHostInterface::with_capacity(1 << 16));
        let queue = Arc::new(Hdi08Queue::new(hdi.clone()));
        let mut chip = FakeChip::default();

        let handle = BootSequencer::boot(image(500), &mut chip, queue, "dsp").unwrap();
        assert_eq!(handle.name(), "dsp");
        assert_eq!(handle.join().unwrap(), 500);
        assert_eq!(hdi.delivered(), (0..500).collect::<Vec<ChipWord>>());
    }

    #[test]
    fn test_boot_waits_for_chip() {
        let hdi = Arc::new(FakeHostInterface::with_capacity(4));
        let queue = Arc::new(Hdi08Queue::new(hdi.clone()));
        let done = Arc::new(AtomicBool::new(false));

        // stands in for the chip thread reading its FIFO
        let reader = {
            let hdi = hdi.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    hdi.consume(1);
                    std::thread::yield_now();
                }
            })
        };

        let mut chip = FakeChip::default();
        let handle = BootSequencer::boot(image(200), &mut chip, queue, "slow").unwrap();
        assert_eq!(handle.join().unwrap(), 200);
        done.store(true, Ordering::Release);
        reader.join().unwrap();

        assert_eq!(hdi.delivered(), (0..200).collect::<Vec<ChipWord>>());
    }

    #[test]
    fn test_boot_all_two_chips() {
        let hdi_a = Arc::new(FakeHostInterface::with_capacity(1 << 12));
        let hdi_b = Arc::new(FakeHostInterface::with_capacity(1 << 12));
        let mut chip_a = FakeChip::default();
        let mut chip_b = FakeChip::default();

        BootSequencer::boot_all(
            &image(64),
            vec![
                (&mut chip_a as &mut dyn ChipEmulator, Arc::new(Hdi08Queue::new(hdi_a.clone()))),
                (&mut chip_b as &mut dyn ChipEmulator, Arc::new(Hdi08Queue::new(hdi_b.clone()))),
            ],
        )
        .unwrap();

        assert_eq!(hdi_a.delivered().len(), 64);
        assert_eq!(hdi_a.delivered(), hdi_b.delivered());
        assert_eq!(chip_a.pc, chip_b.pc);
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let hdi = Arc::new(FakeHostInterface::with_capacity(4));
        let mut chip = FakeChip::default();
        let result = BootSequencer::boot(
            Arc::new(FirmwareImage::empty(DeviceModel::C)),
            &mut chip,
            Arc::new(Hdi08Queue::new(hdi)),
            "dsp",
        );
        assert!(matches!(result, Err(SynthError::DeviceInvalid(_))));
    }
}
