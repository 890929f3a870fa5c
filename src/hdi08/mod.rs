//! Host Interface Queues
//!
//! The chips receive commands and MIDI through their host interface: a
//! small receive FIFO plus two out-of-band host flag lines. The queues in
//! this module sit between producers (audio thread, boot threads) and that
//! FIFO:
//!
//! - [`Hdi08Queue`]: software FIFO for one chip, attaches host flag changes to
//!   the next word and never writes into a full hardware FIFO
//! - [`Hdi08List`]: fans every operation out to all chips of a device
//! - [`Hdi08MidiQueue`]: holds MIDI events back until the running sample
//!   counter reaches their timestamp
//!
//! The hardware side is reached through [`HostInterface`], implemented by
//! the instruction emulator.

pub mod list;
pub mod midi_queue;
pub mod queue;

pub use list::Hdi08List;
pub use midi_queue::Hdi08MidiQueue;
pub use queue::{Hdi08Queue, QueueStatus};

use crate::ChipWord;
use bitflags::bitflags;

bitflags! {
    /// The two host flag lines
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HostFlags: u8 {
        /// Host flag 0
        const FLAG0 = 0x01;
        /// Host flag 1
        const FLAG1 = 0x02;
    }
}

impl HostFlags {
    /// Build from the two line states
    pub fn from_lines(flag0: bool, flag1: bool) -> Self {
        let mut flags = HostFlags::empty();
        flags.set(HostFlags::FLAG0, flag0);
        flags.set(HostFlags::FLAG1, flag1);
        flags
    }

    /// Host flag 0 line state
    pub fn flag0(self) -> bool {
        self.contains(HostFlags::FLAG0)
    }

    /// Host flag 1 line state
    pub fn flag1(self) -> bool {
        self.contains(HostFlags::FLAG1)
    }
}

/// 24-bit word with an optional host flag change applied before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostWord {
    /// Data word
    pub value: ChipWord,
    /// Flag state to establish before the word is written
    pub flags: Option<HostFlags>,
}

/// Receive side of a chip's host interface
///
/// Implementations are shared between the audio thread and the chip thread
/// and synchronize internally.
pub trait HostInterface: Send + Sync {
    /// Hardware receive FIFO cannot take another word
    fn rx_full(&self) -> bool;

    /// Words are still waiting in the hardware receive FIFO
    fn has_rx_data(&self) -> bool;

    /// Push one word into the hardware receive FIFO
    fn write_rx(&self, word: ChipWord);

    /// An earlier flag change has not been acknowledged by the chip yet
    fn needs_to_wait_for_host_flags(&self, flags: HostFlags) -> bool;

    /// Drive the flag lines; the chip acknowledges asynchronously
    fn set_host_flags(&self, flags: HostFlags);
}
