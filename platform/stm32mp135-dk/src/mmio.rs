//! Memory-Mapped I/O (MMIO) Operations
//!
//! Low-level volatile read/write operations for hardware registers.
//! All STM32MP135 peripheral access goes through these functions.

use core::ptr::{read_volatile, write_volatile};

/// UART4, the ST-LINK virtual COM port on the DK board.
pub const UART4_BASE: usize = 0x4001_0000;

/// SDMMC1, wired to the microSD slot.
pub const SDMMC1_BASE: usize = 0x5800_5000;

/// Read a 32-bit value from a memory-mapped register.
///
/// Callers pass only the register constants defined against
/// [`UART4_BASE`] and [`SDMMC1_BASE`]; both blocks are always mapped with
/// the MMU off.
#[inline(always)]
pub fn read(addr: usize) -> u32 {
    unsafe { read_volatile(addr as *const u32) }
}

/// Write a 32-bit value to a memory-mapped register.
///
/// Same address rule as [`read`].
#[inline(always)]
pub fn write(addr: usize, value: u32) {
    unsafe { write_volatile(addr as *mut u32, value) }
}

/// Read-modify-write: clear `clear`, then set `set`.
#[inline(always)]
pub fn modify(addr: usize, clear: u32, set: u32) {
    write(addr, (read(addr) & !clear) | set);
}

/// Write a 32-bit value with memory barrier.
#[inline(always)]
pub fn write_barrier(addr: usize, value: u32) {
    arch_armv7a::dmb();
    write(addr, value);
}
