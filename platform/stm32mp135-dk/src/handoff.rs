//! Leaving the loader.

use bootcore::{ControlTransfer, KernelEntry, PhysAddr};

/// Jumps to the kernel, or parks the CPU.
pub struct Handoff;

impl ControlTransfer for Handoff {
    fn transfer(&mut self, entry: KernelEntry, dtb: PhysAddr) -> ! {
        // Let the last console line out before the kernel reprograms UART4.
        log::logger().flush();
        arch_armv7a::prepare_for_handoff();
        // SAFETY: both images were read in full (or accepted by the timeout
        // policy), caches are clean and interrupts masked. The MMU was
        // never turned on.
        unsafe { entry.enter(dtb) }
    }

    fn halt(&mut self) -> ! {
        log::logger().flush();
        arch_armv7a::disable_interrupts();
        bootcore::panic::halt_loop()
    }
}
