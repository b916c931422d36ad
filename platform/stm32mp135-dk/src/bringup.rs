//! Vendor bring-up.
//!
//! Clock tree, console pins, the DDR controller and the SDMMC security
//! setting come from the vendor board support package, linked as C
//! objects. Each hook returns 0 on success.

use thiserror::Error;

unsafe extern "C" {
    fn bsp_clock_init() -> i32;
    fn bsp_console_init() -> i32;
    fn bsp_ddr_init() -> i32;
    fn bsp_sdmmc_unsecure() -> i32;
}

/// A bring-up hook returned non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{stage} bring-up failed with status {status}")]
pub struct BringUpError {
    pub stage: &'static str,
    pub status: i32,
}

fn check(stage: &'static str, status: i32) -> Result<(), BringUpError> {
    match status {
        0 => Ok(()),
        status => Err(BringUpError { stage, status }),
    }
}

/// Clocks and the console. Nothing can be logged before this succeeds.
pub fn early() -> Result<(), BringUpError> {
    // SAFETY: first thing after reset, single core, nothing else running.
    check("clock", unsafe { bsp_clock_init() })?;
    check("console", unsafe { bsp_console_init() })?;
    Ok(())
}

/// DDR and access to SDMMC1 from the non-secure world.
pub fn late() -> Result<(), BringUpError> {
    // SAFETY: clocks are up; the loader does not touch DDR before this.
    check("ddr", unsafe { bsp_ddr_init() })?;
    check("sdmmc", unsafe { bsp_sdmmc_unsecure() })?;
    Ok(())
}
