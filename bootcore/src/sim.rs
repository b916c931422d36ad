//! Host-side stand-ins for the board: an SD card, DRAM windows, a timer
//! and a control transfer that unwinds instead of jumping.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{MemoryError, StorageError, TransferError};
use crate::handoff::KernelEntry;
use crate::memory::{MemoryRegion, PhysAddr};
use crate::storage::{BLOCK_SIZE, BusConfig};
use crate::traits::{BlockDevice, ControlTransfer, PhysicalMemory, Timer};

/// Deterministic content of byte `offset` in block `block`.
pub fn pattern(block: u32, offset: usize) -> u8 {
    let mixed = block.wrapping_mul(0x9E37_79B9) ^ (offset as u32).wrapping_mul(0x85EB_CA6B);
    (mixed >> 13) as u8 ^ (offset as u8)
}

/// Fault to inject on a read starting at a given block.
#[derive(Debug, Clone, Copy)]
pub enum Injected {
    Fault(StorageError),
    TimeoutAfter(u32),
}

/// SD card whose every block holds [`pattern`].
#[derive(Debug)]
pub struct SimCard {
    init_error: Option<StorageError>,
    status_error: Option<StorageError>,
    ready_after: Option<u32>,
    injected: Vec<(u32, Injected)>,
    pub configured: Option<BusConfig>,
    pub ready_polls: u32,
    /// `(start, blocks)` of every read the card served.
    pub reads: Vec<(u32, u32)>,
}

impl SimCard {
    pub fn new() -> Self {
        Self {
            init_error: None,
            status_error: None,
            ready_after: Some(0),
            injected: Vec::new(),
            configured: None,
            ready_polls: 0,
            reads: Vec::new(),
        }
    }

    /// Report busy for the first `polls` status queries.
    pub fn ready_after(mut self, polls: u32) -> Self {
        self.ready_after = Some(polls);
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.ready_after = None;
        self
    }

    pub fn fail_init(mut self, error: StorageError) -> Self {
        self.init_error = Some(error);
        self
    }

    /// Fail every status query with `error`.
    pub fn fail_status(mut self, error: StorageError) -> Self {
        self.status_error = Some(error);
        self
    }

    pub fn inject(mut self, start: u32, what: Injected) -> Self {
        self.injected.push((start, what));
        self
    }
}

impl BlockDevice for SimCard {
    fn init(&mut self, config: &BusConfig) -> Result<(), StorageError> {
        if let Some(e) = self.init_error {
            return Err(e);
        }
        self.configured = Some(*config);
        Ok(())
    }

    fn is_transfer_ready(&mut self) -> Result<bool, StorageError> {
        self.ready_polls += 1;
        if let Some(e) = self.status_error {
            return Err(e);
        }
        Ok(matches!(self.ready_after, Some(n) if self.ready_polls > n))
    }

    fn read_blocks(
        &mut self,
        start: u32,
        buffer: &mut [u8],
        _timeout_ms: u32,
    ) -> Result<(), TransferError> {
        let count = (buffer.len() / BLOCK_SIZE) as u32;
        self.reads.push((start, count));

        let injected = self
            .injected
            .iter()
            .find(|(at, _)| *at == start)
            .map(|(_, what)| *what);
        let landed = match injected {
            Some(Injected::Fault(e)) => return Err(TransferError::Fault(e)),
            Some(Injected::TimeoutAfter(n)) => n.min(count),
            None => count,
        };

        for (i, block) in buffer
            .chunks_exact_mut(BLOCK_SIZE)
            .take(landed as usize)
            .enumerate()
        {
            for (offset, b) in block.iter_mut().enumerate() {
                *b = pattern(start + i as u32, offset);
            }
        }

        if landed < count {
            Err(TransferError::TimedOut {
                blocks_transferred: landed,
            })
        } else {
            Ok(())
        }
    }
}

/// DRAM made of heap-backed windows at chosen physical addresses.
#[derive(Debug, Default)]
pub struct SimDram {
    windows: Vec<(MemoryRegion, Vec<u8>)>,
}

impl SimDram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back `region` with memory pre-filled with a stale-looking byte.
    pub fn with_window(mut self, region: MemoryRegion) -> Self {
        self.windows.push((region, vec![0xA5; region.byte_len()]));
        self
    }

    fn locate(&self, region: MemoryRegion) -> Result<(usize, usize), MemoryError> {
        self.windows
            .iter()
            .position(|(window, _)| window.contains(&region))
            .map(|i| {
                let offset = region.base.as_usize() - self.windows[i].0.base.as_usize();
                (i, offset)
            })
            .ok_or(MemoryError::Unmapped {
                base: region.base,
                words: region.words,
            })
    }
}

impl PhysicalMemory for SimDram {
    fn bytes(&self, region: MemoryRegion) -> Result<&[u8], MemoryError> {
        let (i, offset) = self.locate(region)?;
        Ok(&self.windows[i].1[offset..offset + region.byte_len()])
    }

    fn bytes_mut(&mut self, region: MemoryRegion) -> Result<&mut [u8], MemoryError> {
        let (i, offset) = self.locate(region)?;
        Ok(&mut self.windows[i].1[offset..offset + region.byte_len()])
    }
}

/// 1 kHz timer that moves forward one tick every time it is read.
#[derive(Debug, Default)]
pub struct SimTimer {
    now: Cell<u64>,
}

impl SimTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ticks: u64) {
        self.now.set(self.now.get() + ticks);
    }
}

impl Timer for SimTimer {
    fn ticks(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + 1);
        now
    }

    fn frequency(&self) -> u64 {
        1000
    }
}

/// How a never-returning boot ended, recovered from the unwind payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    Transferred { entry: PhysAddr, args: [usize; 3] },
    Halted,
}

/// Control transfer that unwinds with an [`Ending`] instead of jumping.
#[derive(Debug, Default)]
pub struct SimHandoff;

impl ControlTransfer for SimHandoff {
    fn transfer(&mut self, entry: KernelEntry, dtb: PhysAddr) -> ! {
        panic::panic_any(Ending::Transferred {
            entry: entry.base(),
            args: entry.arguments(dtb),
        })
    }

    fn halt(&mut self) -> ! {
        panic::panic_any(Ending::Halted)
    }
}

/// Run a never-returning boot path and report how it ended.
pub fn ending_of(f: impl FnOnce() -> std::convert::Infallible) -> Ending {
    let payload = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(never) => match never {},
        Err(payload) => payload,
    };
    match payload.downcast::<Ending>() {
        Ok(ending) => *ending,
        Err(other) => panic::resume_unwind(other),
    }
}
