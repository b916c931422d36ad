//! Error kinds for every stage of the load.
//!
//! Each concern gets its own small `Copy` enum so that a board can log the
//! value and halt without allocating. [`BootError`] is the only type the
//! sequencer hands back to the board.

use thiserror::Error;

use crate::memory::PhysAddr;

/// Faults reported by the storage controller or the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Controller or card identification failed.
    #[error("storage initialization failed")]
    InitFailed,
    /// Card never left the busy state during voltage negotiation.
    #[error("card rejected operating conditions")]
    VoltageRejected,
    /// No response to a command.
    #[error("no response to CMD{0}")]
    CommandTimeout(u8),
    /// Response arrived with a bad CRC.
    #[error("response CRC error on CMD{0}")]
    CommandCrc(u8),
    /// R1 card status carried error bits.
    #[error("card status error {0:#010x}")]
    CardStatus(u32),
    /// Card did not reach the transfer state within the wait bound.
    #[error("card not ready after {0} ms")]
    ReadyTimeout(u32),
    /// Data block failed its CRC check.
    #[error("data CRC error")]
    DataCrc,
    /// Card stopped sending data (hardware data timer).
    #[error("data timeout")]
    DataTimeout,
    /// Receive FIFO overrun.
    #[error("receive FIFO overrun")]
    RxOverrun,
    /// Operation attempted outside the `Ready` state.
    #[error("storage session not ready")]
    NotReady,
    /// Destination buffer does not match the requested block range.
    #[error("buffer is {actual} bytes, transfer needs {expected}")]
    BufferSize { expected: usize, actual: usize },
    /// More blocks than one transfer can express.
    #[error("{0} blocks exceed the longest single transfer")]
    TransferTooLong(u32),
}

/// Result of a single blocking transfer at the driver level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Software deadline expired; `blocks_transferred` whole blocks landed.
    #[error("transfer timed out after {blocks_transferred} blocks")]
    TimedOut { blocks_transferred: u32 },
    /// Unrecoverable controller or card fault.
    #[error(transparent)]
    Fault(#[from] StorageError),
}

/// Failures turning a memory region into something we can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Base address is not word aligned.
    #[error("region base {0} is not word aligned")]
    Unaligned(PhysAddr),
    /// Region end does not fit in the address space.
    #[error("region at {0} wraps the address space")]
    Overflow(PhysAddr),
    /// Region is not backed by working memory.
    #[error("region {base} (+{words} words) is not mapped")]
    Unmapped { base: PhysAddr, words: usize },
}

/// Violations of the boot plan invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("{0}: destination is not word aligned")]
    Unaligned(&'static str),
    #[error("{0}: block range is empty")]
    EmptyRange(&'static str),
    #[error("{0}: block range is longer than one transfer")]
    RangeTooLong(&'static str),
    #[error("{0}: destination region is smaller than its block range")]
    RegionTooSmall(&'static str),
    #[error("{0}: destination lies outside DRAM")]
    OutsideDram(&'static str),
    #[error("{0}: destination overlaps the loader itself")]
    OverlapsLoader(&'static str),
    #[error("destination regions overlap")]
    RegionsOverlap,
    #[error("block ranges overlap on the medium")]
    RangesOverlap,
}

/// Why the sequencer refused to transfer control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BootError {
    #[error("boot plan rejected: {0}")]
    Plan(#[from] PlanError),
    #[error("storage is not ready")]
    StorageNotReady,
    #[error("{image}: read failed: {error}")]
    Load { image: &'static str, error: StorageError },
    #[error("{image}: read timed out after {blocks_transferred} of {expected} blocks")]
    Timeout {
        image: &'static str,
        blocks_transferred: u32,
        expected: u32,
    },
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
