//! The kernel entry point.
//!
//! ARM Linux (and most kernels loaded the same way) expects to be entered
//! with the MMU off, interrupts masked and
//!
//! | register | value |
//! |----------|-------|
//! | r0 | 0 |
//! | r1 | machine type, unused when a device tree is passed (0) |
//! | r2 | physical address of the device tree blob |
//!
//! [`KernelEntry::enter`] is the only place in the loader where an address
//! becomes something callable.

use crate::memory::PhysAddr;

/// Signature of a loaded image's entry point: three word-sized arguments in
/// the first three argument registers, never returns.
pub type EntryFn = unsafe extern "C" fn(usize, usize, usize) -> !;

/// A loaded kernel's first instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelEntry {
    base: PhysAddr,
}

impl KernelEntry {
    /// Describe the image whose first instruction sits at `base`.
    ///
    /// Constructing the descriptor is harmless; only [`enter`](Self::enter)
    /// acts on it.
    pub const fn at(base: PhysAddr) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> PhysAddr {
        self.base
    }

    /// Argument registers the kernel will see, in order.
    pub const fn arguments(&self, dtb: PhysAddr) -> [usize; 3] {
        [0, 0, dtb.as_usize()]
    }

    /// Jump to the image. Nothing after the call executes.
    ///
    /// # Safety
    /// A complete image must be loaded at `base`, its code must be visible
    /// to instruction fetch (caches cleaned and invalidated), and the CPU
    /// must be in the state the image's boot protocol demands. The
    /// loader's stack, statics and every borrow it holds are abandoned.
    pub unsafe fn enter(self, dtb: PhysAddr) -> ! {
        let [r0, r1, r2] = self.arguments(dtb);
        // SAFETY: the caller guarantees `base` holds executable code with
        // this exact calling convention.
        let entry = unsafe { core::mem::transmute::<usize, EntryFn>(self.base.as_usize()) };
        unsafe { entry(r0, r1, r2) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_arguments() {
        let entry = KernelEntry::at(PhysAddr::new(0xC200_0000));
        assert_eq!(entry.base(), PhysAddr::new(0xC200_0000));
        assert_eq!(entry.arguments(PhysAddr::new(0xC600_0000)), [0, 0, 0xC600_0000]);
    }

    #[test]
    fn test_entry_fn_is_one_word() {
        assert_eq!(core::mem::size_of::<EntryFn>(), core::mem::size_of::<usize>());
    }
}
