//! ARM generic timer.
//!
//! The physical counter is started by the boot ROM and runs from HSE
//! (24 MHz on the DK board). It only ever counts up, so deadlines are
//! plain subtraction.

use bootcore::Timer;

/// Used when CNTFRQ was never programmed.
const FALLBACK_FREQ_HZ: u64 = 24_000_000;

/// The CP15 physical counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericTimer;

impl Timer for GenericTimer {
    fn ticks(&self) -> u64 {
        arch_armv7a::cpu::read_cntpct()
    }

    fn frequency(&self) -> u64 {
        match arch_armv7a::cpu::read_cntfrq() {
            0 => FALLBACK_FREQ_HZ,
            hz => u64::from(hz),
        }
    }
}
