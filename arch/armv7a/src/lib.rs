//! ARMv7-A architecture support.
//!
//! Provides the entry point, barriers, interrupt masking and the cache
//! maintenance needed before handing the CPU to a kernel, for Cortex-A7
//! platforms (STM32MP135).
//!
//! Everything that touches the CPU is only emitted for `target_arch = "arm"`;
//! on the host the helpers compile to nothing so the pure parts (cache
//! geometry decoding) can be unit tested.

#![cfg_attr(not(test), no_std)]

pub mod cache;
pub mod cpu;

#[cfg(all(feature = "default-entry", target_arch = "arm"))]
use core::arch::global_asm;

// Entry point assembly.
// The boot ROM copies the loader into SYSRAM and branches to _start in
// ARM state. We mask interrupts, enable the FPU (the hard-float ABI may
// use it), set up the stack and call into Rust.
// Only included when "default-entry" feature is enabled.
#[cfg(all(feature = "default-entry", target_arch = "arm"))]
global_asm!(
    r#"
.section .text._start
.global _start
.arm

_start:
    // Supervisor mode, IRQ and FIQ masked
    cpsid   if, #0x13

    // Park all cores except core 0
    mrc     p15, 0, r0, c0, c0, 5
    ands    r0, r0, #0xFF
    bne     .Lhalt

    // Full access to cp10/cp11, then switch the FPU on
    mrc     p15, 0, r0, c1, c0, 2
    orr     r0, r0, #(0xF << 20)
    mcr     p15, 0, r0, c1, c0, 2
    isb
    mov     r0, #0x40000000
    vmsr    fpexc, r0

    // Set up stack pointer
    ldr     sp, =_stack_top

    // Clear BSS
    ldr     r0, =__bss_start
    ldr     r1, =__bss_end
    mov     r2, #0
.Lclear_bss:
    cmp     r0, r1
    strlo   r2, [r0], #4
    blo     .Lclear_bss

    // Call Rust entry point
    bl      boot_main

    // If boot_main returns, halt
.Lhalt:
    wfe
    b       .Lhalt
"#
);

/// Memory barrier - ensure all previous memory accesses complete.
#[inline]
pub fn dmb() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("dmb sy", options(nostack));
    }
}

/// Data synchronization barrier.
#[inline]
pub fn dsb() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("dsb sy", options(nostack));
    }
}

/// Instruction synchronization barrier.
#[inline]
pub fn isb() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("isb", options(nostack));
    }
}

/// Wait for event (low power idle).
#[inline]
pub fn wfe() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("wfe", options(nomem, nostack));
    }
}

/// Mask IRQ and FIQ.
#[inline]
pub fn disable_interrupts() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("cpsid if", options(nomem, nostack));
    }
}

/// Put caches and the branch predictor in the state a freshly loaded image
/// expects: everything written so far is in memory, and no stale
/// instruction or prediction survives.
///
/// Interrupts are masked first and stay masked.
pub fn prepare_for_handoff() {
    disable_interrupts();
    cache::clean_dcache_all();
    cache::invalidate_icache_all();
    cache::invalidate_branch_predictor();
    dsb();
    isb();
}
