//! Platform abstraction traits.
//!
//! These traits are the seams between the load sequence and a board:
//! console output, a free-running timer, the SD controller, the view of
//! DRAM, and the final jump.

use crate::error::{MemoryError, StorageError, TransferError};
use crate::handoff::KernelEntry;
use crate::memory::{MemoryRegion, PhysAddr};
use crate::storage::BusConfig;

/// Serial console used as the diagnostic sink.
///
/// Line setup (baud, pins, clocks) belongs to board bring-up; by the time
/// the loader writes, the port is already configured.
pub trait Serial {
    /// Write a single byte, blocking until the transmitter takes it.
    fn write_byte(&mut self, byte: u8);

    /// Block until everything written so far has left the shift register.
    fn flush(&mut self) {}

    /// Write a byte slice.
    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    /// Write a string.
    fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }
}

/// Timer interface for delays and deadlines.
pub trait Timer {
    /// Get current tick count (platform-specific resolution).
    fn ticks(&self) -> u64;

    /// Get tick frequency in Hz.
    fn frequency(&self) -> u64;

    /// Convert milliseconds to ticks of this timer.
    fn ms_to_ticks(&self, ms: u32) -> u64 {
        (u64::from(ms) * self.frequency()) / 1000
    }

    /// Delay for specified microseconds.
    fn delay_us(&self, us: u64) {
        let start = self.ticks();
        let ticks_needed = (us * self.frequency()) / 1_000_000;
        while self.ticks().wrapping_sub(start) < ticks_needed {
            core::hint::spin_loop();
        }
    }

    /// Delay for specified milliseconds.
    fn delay_ms(&self, ms: u64) {
        self.delay_us(ms * 1000);
    }
}

/// Raw whole-block access to the boot medium.
///
/// Blocks are [`crate::BLOCK_SIZE`] bytes; addresses are block numbers
/// regardless of how the card addresses itself internally.
pub trait BlockDevice {
    /// Power the controller, identify the card and apply `config`.
    fn init(&mut self, config: &BusConfig) -> Result<(), StorageError>;

    /// Ask the card whether it sits in the transfer state.
    fn is_transfer_ready(&mut self) -> Result<bool, StorageError>;

    /// Read `buffer.len() / BLOCK_SIZE` blocks starting at `start`.
    ///
    /// Blocks until the transfer finishes, the controller reports a
    /// fault, or `timeout_ms` elapses. Only whole blocks that arrived
    /// are counted in a timeout; bytes past them are left untouched.
    fn read_blocks(
        &mut self,
        start: u32,
        buffer: &mut [u8],
        timeout_ms: u32,
    ) -> Result<(), TransferError>;
}

/// Working memory as seen by the loader.
///
/// This is the one place where a physical address becomes a slice.
/// Boards with identity-mapped DRAM build the slice straight from the
/// address; tests back regions with heap buffers.
pub trait PhysicalMemory {
    /// Borrow the bytes of `region`.
    fn bytes(&self, region: MemoryRegion) -> Result<&[u8], MemoryError>;

    /// Mutably borrow the bytes of `region`.
    fn bytes_mut(&mut self, region: MemoryRegion) -> Result<&mut [u8], MemoryError>;
}

/// The two ways the loader can end.
pub trait ControlTransfer {
    /// Hand the CPU to `entry` with the device tree at `dtb`.
    ///
    /// Nothing after this call runs: the loader's stack and statics are
    /// dead once the kernel owns the machine.
    fn transfer(&mut self, entry: KernelEntry, dtb: PhysAddr) -> !;

    /// Enter the terminal state. Only an external reset leaves it.
    fn halt(&mut self) -> !;
}
