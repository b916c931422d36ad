//! STM32MP135F-DK Linux loader
//!
//! The MP135 is a single Cortex-A7 with 128 KiB of SYSRAM and 512 MiB of
//! DDR3L on the DK board.
//!
//! ## Boot Chain
//!
//! 1. **Boot ROM** - Hardcoded in silicon
//!    - Reads the FSBL from the SD card (GPT partition `fsbl1`)
//!    - Copies it to SYSRAM and jumps to it
//!
//! 2. **This loader** (FSBL)
//!    - Brings up clocks, console and DDR through the vendor hooks
//!    - Reads the device tree and the kernel from raw SD blocks
//!    - Jumps to the kernel with the device tree address in r2
//!
//! 3. **Linux** - `zImage`/`Image` entered with MMU off
//!
//! ## SD Card Layout
//!
//! | Block | Count | Content | Loaded to |
//! |-------|-------|---------|-----------|
//! | 2048  | 121   | DTB     | 0xC6000000 |
//! | 4096  | 14855 | kernel  | 0xC2000000 |
//!
//! `cargo xtask sdimage` assembles an image with this layout.

#![no_std]
#![no_main]

mod bringup;
mod console;
mod dram;
mod handoff;
mod mmio;
mod sdmmc;
mod timer;

use arch_armv7a::cpu::{self, Midr};
use bootcore::{BootPlan, BootSequencer, BusConfig, ControlTransfer, StorageSession, TimeoutPolicy};
use log::{debug, error, info, warn};
use static_assertions::const_assert;

use crate::dram::IdentityDram;
use crate::handoff::Handoff;
use crate::sdmmc::Sdmmc;
use crate::timer::GenericTimer;

/// The reference layout, adjusted by the board features.
const PLAN: BootPlan = BootPlan::STM32MP135_DK
    .with_timeout_policy(if cfg!(feature = "strict-timeout") {
        TimeoutPolicy::Halt
    } else {
        TimeoutPolicy::Continue
    })
    .with_dump_words(if cfg!(feature = "memdump") {
        BootPlan::STM32MP135_DK.dump_words
    } else {
        0
    });

const_assert!(PLAN.check().is_ok());

#[unsafe(no_mangle)]
pub extern "C" fn boot_main() -> ! {
    if bringup::early().is_err() {
        // No console yet.
        bootcore::panic::halt_loop();
    }
    console::init_logger();

    info!("rustboot {} on STM32MP135F-DK", env!("CARGO_PKG_VERSION"));
    let midr = Midr::read();
    debug!(
        "cpu: part {:#05x} r{}p{}, sctlr {:#010x}",
        midr.part_num,
        midr.variant,
        midr.revision,
        cpu::read_sctlr()
    );
    if !midr.is_cortex_a7() {
        warn!("unexpected cpu part {:#05x}", midr.part_num);
    }

    if let Err(e) = bringup::late() {
        error!("{}", e);
        Handoff.halt();
    }

    info!(
        "kernel at {}, device tree at {}",
        PLAN.kernel.region.base, PLAN.device_tree.region.base
    );

    let timer = GenericTimer;
    let mut session = StorageSession::new(Sdmmc::new(timer), BusConfig::DEFAULT_SPEED);
    if let Err(e) = session.initialize(&timer, PLAN.ready_timeout_ms) {
        error!("SD card: {}", e);
        Handoff.halt();
    }

    // SAFETY: DDR was initialized by `bringup::late`; the loader itself
    // runs from SYSRAM.
    let mut dram = unsafe { IdentityDram::new(PLAN.dram) };
    BootSequencer::new(&PLAN, &mut session, &mut dram).run(&mut Handoff)
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    error!("panic: {}", bootcore::panic::PanicInfo::from_core(info));
    log::logger().flush();
    bootcore::panic::halt_loop()
}
