//! The terminal state.
//!
//! Every unrecoverable path in the loader (a fatal storage fault, a
//! rejected plan, a panic) ends in [`halt_loop`]. Only an external reset
//! or the watchdog gets the board out again.

/// Panic information that can be captured without allocations.
#[derive(Clone, Copy)]
pub struct PanicInfo<'a> {
    pub message: Option<&'a str>,
    pub file: Option<&'a str>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl<'a> PanicInfo<'a> {
    /// Extract info from core::panic::PanicInfo.
    pub fn from_core(info: &'a core::panic::PanicInfo<'a>) -> Self {
        let location = info.location();

        Self {
            message: info.message().as_str(),
            file: location.map(|l| l.file()),
            line: location.map(|l| l.line()),
            column: location.map(|l| l.column()),
        }
    }
}

impl core::fmt::Display for PanicInfo<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message.unwrap_or("panic"))?;
        if let (Some(file), Some(line)) = (self.file, self.line) {
            write!(f, " at {}:{}", file, line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        Ok(())
    }
}

/// Park the CPU for good.
/// Uses architecture-specific halt instructions when possible.
#[inline(always)]
pub fn halt_loop() -> ! {
    loop {
        #[cfg(target_arch = "arm")]
        unsafe {
            core::arch::asm!("wfe", options(nomem, nostack));
        }

        #[cfg(target_arch = "aarch64")]
        unsafe {
            core::arch::asm!("wfe", options(nomem, nostack));
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "arm")))]
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let info = PanicInfo {
            message: Some("bad block"),
            file: Some("src/sdmmc.rs"),
            line: Some(42),
            column: Some(9),
        };
        assert_eq!(info.to_string(), "bad block at src/sdmmc.rs:42:9");
    }

    #[test]
    fn test_display_without_message() {
        let info = PanicInfo {
            message: None,
            file: None,
            line: None,
            column: None,
        };
        assert_eq!(info.to_string(), "panic");
    }
}
