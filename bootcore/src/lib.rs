//! # bootcore
//!
//! Shared core of the rustboot SD-card Linux loader.
//! This crate owns everything between "DRAM and the SD controller are up"
//! and "the CPU belongs to the kernel": the storage session, the memory
//! utilities, the load sequence and the final jump. Boards plug in through
//! the traits in [`traits`].

#![cfg_attr(not(test), no_std)]

pub mod boot;
pub mod error;
pub mod fmt;
pub mod handoff;
pub mod memory;
pub mod panic;
pub mod plan;
pub mod poll;
pub mod storage;
pub mod traits;

#[cfg(test)]
mod sim;

pub use boot::{BootSequencer, LoadPolicy, LoadReport};
pub use error::{BootError, MemoryError, PlanError, StorageError, TransferError};
pub use handoff::KernelEntry;
pub use memory::{MemoryRegion, PhysAddr};
pub use plan::{BootPlan, ImageSpec, TimeoutPolicy};
pub use storage::{BLOCK_SIZE, BlockRange, BusConfig, ReadOutcome, SessionState, StorageSession};
pub use traits::*;
