//! Host-port bootstrap
//!
//! After reset the chip's boot ROM reads its program through the host
//! interface: a length word, a load address, then `length` program words.
//! Once the address is known the ROM primes R0 with the end address and R1
//! with the start, clears the condition code bits and jumps to the start.

use super::{ChipEmulator, MemoryArea, Register};
use crate::ChipWord;
use log::{debug, info};

/// Phase of the bootstrap protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    /// Waiting for the word count
    Length,
    /// Waiting for the load address
    Address,
    /// Receiving program words
    Data,
    /// All words stored
    Finished,
}

/// Boot ROM emulation fed one host word at a time
#[derive(Debug, Clone)]
pub struct BootLoader {
    state: BootState,
    length: ChipWord,
    remaining: ChipWord,
    address: ChipWord,
    initial_pc: ChipWord,
}

impl Default for BootLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl BootLoader {
    /// Loader waiting for the length word
    pub fn new() -> Self {
        Self {
            state: BootState::Length,
            length: 0,
            remaining: 0,
            address: 0,
            initial_pc: 0,
        }
    }

    /// Consume one word; returns true once the program is complete
    pub fn write(&mut self, chip: &mut dyn ChipEmulator, word: ChipWord) -> bool {
        match self.state {
            BootState::Length => {
                self.length = word;
                self.remaining = word;
                self.state = BootState::Address;
                false
            }
            BootState::Address => {
                self.address = word;
                self.initial_pc = word;

                debug!("Boot: {} words, initial PC 0x{:06x}", self.remaining, word);

                chip.write_register(Register::R0, word.wrapping_add(self.remaining));
                chip.write_register(Register::R1, word);
                let sr = chip.read_register(Register::Sr);
                chip.write_register(Register::Sr, sr & !0xff);
                chip.set_pc(word);

                if self.remaining == 0 {
                    self.state = BootState::Finished;
                    return true;
                }
                self.state = BootState::Data;
                false
            }
            BootState::Data => {
                chip.write_memory(MemoryArea::P, self.address, word);
                chip.notify_program_write(self.address);
                self.address = self.address.wrapping_add(1);
                self.remaining -= 1;
                if self.remaining == 0 {
                    info!("Boot: finished, {} words loaded", self.length);
                    self.state = BootState::Finished;
                    return true;
                }
                false
            }
            BootState::Finished => true,
        }
    }

    /// Feed a whole stream; returns the number of words consumed
    pub fn write_all(&mut self, chip: &mut dyn ChipEmulator, words: &[ChipWord]) -> usize {
        for (i, &word) in words.iter().enumerate() {
            if self.write(chip, word) {
                return i + 1;
            }
        }
        words.len()
    }

    /// Current phase
    pub fn state(&self) -> BootState {
        self.state
    }

    /// All program words have been stored
    pub fn is_finished(&self) -> bool {
        self.state == BootState::Finished
    }

    /// Declared program length
    pub fn length(&self) -> ChipWord {
        self.length
    }

    /// Address execution starts at
    pub fn initial_pc(&self) -> ChipWord {
        self.initial_pc
    }
}
