//! DDR as the loader sees it.
//!
//! The MMU is off, so physical addresses are used as-is. Only regions
//! inside the configured window are handed out; everything else (SYSRAM,
//! peripherals) is refused.

use bootcore::{MemoryError, MemoryRegion, PhysicalMemory};

/// Identity-mapped DRAM window.
pub struct IdentityDram {
    window: MemoryRegion,
}

impl IdentityDram {
    /// # Safety
    /// `window` must be initialized DRAM that nothing else in the loader
    /// (code, stack, statics) lives in.
    pub const unsafe fn new(window: MemoryRegion) -> Self {
        Self { window }
    }

    fn check(&self, region: MemoryRegion) -> Result<*mut u8, MemoryError> {
        region.validate()?;
        if !self.window.contains(&region) {
            return Err(MemoryError::Unmapped {
                base: region.base,
                words: region.words,
            });
        }
        Ok(region.base.as_usize() as *mut u8)
    }
}

impl PhysicalMemory for IdentityDram {
    fn bytes(&self, region: MemoryRegion) -> Result<&[u8], MemoryError> {
        let ptr = self.check(region)?;
        // SAFETY: the region is inside the window the caller of `new`
        // vouched for, and the borrow of `self` keeps it exclusive.
        Ok(unsafe { core::slice::from_raw_parts(ptr, region.byte_len()) })
    }

    fn bytes_mut(&mut self, region: MemoryRegion) -> Result<&mut [u8], MemoryError> {
        let ptr = self.check(region)?;
        // SAFETY: as above; `&mut self` makes the slice the only view.
        Ok(unsafe { core::slice::from_raw_parts_mut(ptr, region.byte_len()) })
    }
}
