//! The load sequence.
//!
//! Strictly linear: storage ready, device tree, kernel, optional dump,
//! jump. Each read's outcome goes through [`LoadPolicy::decide`]; a halt
//! decision ends the sequence before anything later runs, so the jump is
//! only reachable when both reads were accepted.

use log::{error, info, warn};

use crate::error::BootError;
use crate::handoff::KernelEntry;
use crate::memory::{self, MemoryRegion, PhysAddr};
use crate::plan::{BootPlan, ImageSpec, TimeoutPolicy};
use crate::storage::{BlockRange, ReadOutcome, StorageSession};
use crate::traits::{BlockDevice, ControlTransfer, PhysicalMemory};

/// Decides, per read outcome, whether the boot goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPolicy {
    pub on_timeout: TimeoutPolicy,
}

impl LoadPolicy {
    pub const fn new(on_timeout: TimeoutPolicy) -> Self {
        Self { on_timeout }
    }

    /// `Ok` to proceed, `Err` with the reason to halt.
    pub fn decide(&self, image: &ImageSpec, outcome: ReadOutcome) -> Result<(), BootError> {
        match outcome {
            ReadOutcome::Complete => Ok(()),
            ReadOutcome::TimedOut { blocks_transferred } => {
                let err = BootError::Timeout {
                    image: image.name,
                    blocks_transferred,
                    expected: image.blocks.count,
                };
                match self.on_timeout {
                    TimeoutPolicy::Continue => {
                        warn!("{}, continuing with a partial image", err);
                        Ok(())
                    }
                    TimeoutPolicy::Halt => Err(err),
                }
            }
            ReadOutcome::Fault(error) => Err(BootError::Load {
                image: image.name,
                error,
            }),
        }
    }
}

/// What happened to one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLoad {
    pub name: &'static str,
    pub blocks: BlockRange,
    pub region: MemoryRegion,
    pub outcome: ReadOutcome,
}

impl ImageLoad {
    pub fn is_complete(&self) -> bool {
        self.outcome == ReadOutcome::Complete
    }
}

/// Both images accepted; everything needed for the jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub device_tree: ImageLoad,
    pub kernel: ImageLoad,
    pub entry: KernelEntry,
    pub dtb: PhysAddr,
}

/// Runs a [`BootPlan`] against a storage session and working memory.
pub struct BootSequencer<'a, D: BlockDevice, M: PhysicalMemory + ?Sized> {
    plan: &'a BootPlan,
    storage: &'a mut StorageSession<D>,
    memory: &'a mut M,
    policy: LoadPolicy,
}

impl<'a, D: BlockDevice, M: PhysicalMemory + ?Sized> BootSequencer<'a, D, M> {
    pub fn new(plan: &'a BootPlan, storage: &'a mut StorageSession<D>, memory: &'a mut M) -> Self {
        Self {
            plan,
            storage,
            memory,
            policy: LoadPolicy::new(plan.timeout_policy),
        }
    }

    /// Load both images and, if enabled, dump their first words.
    pub fn load(&mut self) -> Result<LoadReport, BootError> {
        let plan = self.plan;
        plan.check()?;

        if !self.storage.is_ready() {
            return Err(BootError::StorageNotReady);
        }

        let device_tree = self.load_image(&plan.device_tree)?;
        let kernel = self.load_image(&plan.kernel)?;

        if plan.dump_words > 0 {
            self.dump(&plan.kernel)?;
            self.dump(&plan.device_tree)?;
        }

        Ok(LoadReport {
            device_tree,
            kernel,
            entry: KernelEntry::at(plan.kernel.region.base),
            dtb: plan.device_tree.region.base,
        })
    }

    /// Load, then jump or halt. Never returns.
    pub fn run<H: ControlTransfer + ?Sized>(mut self, handoff: &mut H) -> ! {
        match self.load() {
            Ok(report) => {
                info!("Jumping to kernel...");
                handoff.transfer(report.entry, report.dtb)
            }
            Err(e) => {
                error!("boot halted: {}", e);
                handoff.halt()
            }
        }
    }

    fn load_image(&mut self, image: &ImageSpec) -> Result<ImageLoad, BootError> {
        let region = image.load_region();
        if image.clear_before_load {
            memory::clear_region(&mut *self.memory, region)?;
        }

        info!(
            "Loading {:5} blocks to ddr_addr={:#010x} from SD offset {:#010x} ...",
            image.blocks.count, region.base, image.blocks.start
        );

        let destination = self.memory.bytes_mut(region)?;
        let outcome = self
            .storage
            .read_blocks(destination, image.blocks, self.plan.read_timeout_ms);
        self.policy.decide(image, outcome)?;

        Ok(ImageLoad {
            name: image.name,
            blocks: image.blocks,
            region,
            outcome,
        })
    }

    fn dump(&self, image: &ImageSpec) -> Result<(), BootError> {
        let region = image.region.prefix(self.plan.dump_words);
        info!("First block of the {}:", image.name);
        for line in memory::dump_region(&*self.memory, region)? {
            info!("{}", line);
        }
        Ok(())
    }
}
