//! What to load, from where, to where.
//!
//! A [`BootPlan`] is plain constant data. Boards pick one (usually
//! [`BootPlan::STM32MP135_DK`]), adjust it with the `const` builders and
//! check it at compile time.

use static_assertions::const_assert;

use crate::error::PlanError;
use crate::memory::{MemoryRegion, PhysAddr};
use crate::storage::{BlockRange, MAX_TRANSFER_BLOCKS};

/// What a read timeout means for the boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Warn and carry on with whatever arrived. The image may be truncated.
    Continue,
    /// Treat the timeout like any other read fault.
    Halt,
}

/// One image on the medium and its destination in DRAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpec {
    /// Name used in console messages.
    pub name: &'static str,
    pub blocks: BlockRange,
    pub region: MemoryRegion,
    /// Zero the destination before reading so a short read leaves zeros
    /// instead of stale memory behind the image.
    pub clear_before_load: bool,
}

impl ImageSpec {
    /// The part of the destination the block range covers.
    pub const fn load_region(&self) -> MemoryRegion {
        MemoryRegion::covering(self.region.base, self.blocks.byte_len())
    }

    const fn check(&self, dram: &MemoryRegion, loader: &MemoryRegion) -> Result<(), PlanError> {
        if self.region.validate().is_err() {
            return Err(PlanError::Unaligned(self.name));
        }
        if self.blocks.count == 0 {
            return Err(PlanError::EmptyRange(self.name));
        }
        if self.blocks.count > MAX_TRANSFER_BLOCKS {
            return Err(PlanError::RangeTooLong(self.name));
        }
        if self.region.byte_len() < self.blocks.byte_len() {
            return Err(PlanError::RegionTooSmall(self.name));
        }
        if !dram.contains(&self.region) {
            return Err(PlanError::OutsideDram(self.name));
        }
        if self.region.overlaps(loader) {
            return Err(PlanError::OverlapsLoader(self.name));
        }
        Ok(())
    }
}

/// Everything the sequencer needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootPlan {
    pub device_tree: ImageSpec,
    pub kernel: ImageSpec,
    /// Addressable DRAM.
    pub dram: MemoryRegion,
    /// The loader's own code, data and stack.
    pub loader: MemoryRegion,
    /// Per-image read timeout.
    pub read_timeout_ms: u32,
    /// Bound on waiting for the card to reach the transfer state.
    pub ready_timeout_ms: u32,
    /// Words of each image to dump before the jump; 0 disables the dump.
    pub dump_words: usize,
    pub timeout_policy: TimeoutPolicy,
}

impl BootPlan {
    /// STM32MP135F-DK: 512 MiB DDR at 0xC0000000, loader in SYSRAM.
    ///
    /// The kernel window runs up to the device tree; the device tree gets
    /// 1 MiB. One block of each image is dumped.
    pub const STM32MP135_DK: Self = Self {
        device_tree: ImageSpec {
            name: "DTB",
            blocks: BlockRange::new(2048, 121),
            region: MemoryRegion::new(PhysAddr::new(0xC600_0000), 0x0004_0000),
            clear_before_load: false,
        },
        kernel: ImageSpec {
            name: "kernel image",
            blocks: BlockRange::new(4096, 14855),
            region: MemoryRegion::new(PhysAddr::new(0xC200_0000), 0x0100_0000),
            clear_before_load: false,
        },
        dram: MemoryRegion::new(PhysAddr::new(0xC000_0000), 0x0800_0000),
        loader: MemoryRegion::new(PhysAddr::new(0x2FFE_0000), 0x8000),
        read_timeout_ms: 15_000,
        ready_timeout_ms: 2_000,
        dump_words: 128,
        timeout_policy: TimeoutPolicy::Continue,
    };

    pub const fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    pub const fn with_dump_words(mut self, words: usize) -> Self {
        self.dump_words = words;
        self
    }

    pub const fn with_clear_before_load(mut self, clear: bool) -> Self {
        self.device_tree.clear_before_load = clear;
        self.kernel.clear_before_load = clear;
        self
    }

    /// Images in load order.
    pub const fn images(&self) -> [&ImageSpec; 2] {
        [&self.device_tree, &self.kernel]
    }

    /// Check every layout invariant.
    pub const fn check(&self) -> Result<(), PlanError> {
        if let Err(e) = self.device_tree.check(&self.dram, &self.loader) {
            return Err(e);
        }
        if let Err(e) = self.kernel.check(&self.dram, &self.loader) {
            return Err(e);
        }
        if self.device_tree.region.overlaps(&self.kernel.region) {
            return Err(PlanError::RegionsOverlap);
        }
        if self.device_tree.blocks.overlaps(&self.kernel.blocks) {
            return Err(PlanError::RangesOverlap);
        }
        Ok(())
    }
}

const_assert!(BootPlan::STM32MP135_DK.check().is_ok());

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: BootPlan = BootPlan::STM32MP135_DK;

    #[test]
    fn test_reference_layout() {
        assert_eq!(PLAN.check(), Ok(()));
        assert_eq!(PLAN.kernel.region.base, PhysAddr::new(0xC200_0000));
        assert_eq!(PLAN.device_tree.region.base, PhysAddr::new(0xC600_0000));
        // Kernel window ends exactly where the device tree starts.
        assert_eq!(
            PLAN.kernel.region.base.as_usize() + PLAN.kernel.region.byte_len(),
            PLAN.device_tree.region.base.as_usize()
        );
        assert_eq!(PLAN.kernel.load_region().byte_len(), 14855 * 512);
        assert_eq!(PLAN.images()[0].name, "DTB");
    }

    #[test]
    fn test_builders() {
        let plan = PLAN
            .with_timeout_policy(TimeoutPolicy::Halt)
            .with_dump_words(0)
            .with_clear_before_load(true);
        assert_eq!(plan.timeout_policy, TimeoutPolicy::Halt);
        assert_eq!(plan.dump_words, 0);
        assert!(plan.kernel.clear_before_load && plan.device_tree.clear_before_load);
    }

    #[test]
    fn test_rejects_undersized_region() {
        let mut plan = PLAN;
        plan.device_tree.region.words = 10;
        assert_eq!(plan.check(), Err(PlanError::RegionTooSmall("DTB")));
    }

    #[test]
    fn test_rejects_range_longer_than_one_transfer() {
        let mut plan = PLAN;
        plan.kernel.blocks.count = 70_000;
        assert!(plan.kernel.region.byte_len() >= plan.kernel.blocks.byte_len());
        assert_eq!(plan.check(), Err(PlanError::RangeTooLong("kernel image")));

        plan.kernel.blocks.count = MAX_TRANSFER_BLOCKS;
        assert_eq!(plan.check(), Ok(()));
    }

    #[test]
    fn test_rejects_overlapping_regions() {
        let mut plan = PLAN;
        plan.device_tree.region.base = PhysAddr::new(0xC5FF_0000);
        assert_eq!(plan.check(), Err(PlanError::RegionsOverlap));
    }

    #[test]
    fn test_rejects_overlapping_ranges() {
        let mut plan = PLAN;
        plan.kernel.blocks.start = 2100;
        assert_eq!(plan.check(), Err(PlanError::RangesOverlap));
    }

    #[test]
    fn test_rejects_region_outside_dram() {
        let mut plan = PLAN;
        plan.kernel.region.base = PhysAddr::new(0xBFF0_0000);
        assert_eq!(plan.check(), Err(PlanError::OutsideDram("kernel image")));
    }

    #[test]
    fn test_rejects_loader_overlap() {
        let mut plan = PLAN;
        plan.dram = MemoryRegion::new(PhysAddr::new(0x2000_0000), 0x3000_0000);
        plan.loader = MemoryRegion::new(PhysAddr::new(0xC600_8000), 0x100);
        assert_eq!(plan.check(), Err(PlanError::OverlapsLoader("DTB")));
    }

    #[test]
    fn test_rejects_empty_and_unaligned() {
        let mut plan = PLAN;
        plan.kernel.blocks.count = 0;
        assert_eq!(plan.check(), Err(PlanError::EmptyRange("kernel image")));

        let mut plan = PLAN;
        plan.device_tree.region.base = PhysAddr::new(0xC600_0002);
        assert_eq!(plan.check(), Err(PlanError::Unaligned("DTB")));
    }
}
