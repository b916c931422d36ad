//! CP15 register access.
//!
//! Reads return 0 and writes are dropped when not built for ARM.

/// Read a 32-bit CP15 register.
macro_rules! read_cp15 {
    ($name:ident, $op1:literal, $crn:literal, $crm:literal, $op2:literal, $doc:literal) => {
        #[doc = $doc]
        #[inline]
        pub fn $name() -> u32 {
            #[cfg(target_arch = "arm")]
            {
                let val: u32;
                unsafe {
                    core::arch::asm!(
                        concat!("mrc p15, ", $op1, ", {}, ", $crn, ", ", $crm, ", ", $op2),
                        out(reg) val,
                        options(nomem, nostack)
                    );
                }
                val
            }
            #[cfg(not(target_arch = "arm"))]
            {
                0
            }
        }
    };
}

read_cp15!(read_midr, "0", "c0", "c0", "0", "Read the Main ID Register.");
read_cp15!(read_sctlr, "0", "c1", "c0", "0", "Read the System Control Register.");
read_cp15!(read_clidr, "1", "c0", "c0", "1", "Read the Cache Level ID Register.");
read_cp15!(
    read_ccsidr,
    "1",
    "c0",
    "c0",
    "0",
    "Read the Cache Size ID Register of the level picked by CSSELR."
);
read_cp15!(read_cntfrq, "0", "c14", "c0", "0", "Read the counter frequency.");

/// Select the cache level whose geometry CCSIDR reports.
#[inline]
pub fn write_csselr(val: u32) {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("mcr p15, 2, {}, c0, c0, 0", in(reg) val, options(nostack));
    }
    #[cfg(not(target_arch = "arm"))]
    let _ = val;
}

/// Read the 64-bit physical counter.
#[inline]
pub fn read_cntpct() -> u64 {
    #[cfg(target_arch = "arm")]
    {
        let lo: u32;
        let hi: u32;
        unsafe {
            core::arch::asm!(
                "mrrc p15, 0, {}, {}, c14",
                out(reg) lo,
                out(reg) hi,
                options(nomem, nostack)
            );
        }
        (u64::from(hi) << 32) | u64::from(lo)
    }
    #[cfg(not(target_arch = "arm"))]
    {
        0
    }
}

/// Decoded MIDR fields.
#[derive(Debug, Clone, Copy)]
pub struct Midr {
    pub implementer: u8,
    pub variant: u8,
    pub architecture: u8,
    pub part_num: u16,
    pub revision: u8,
}

impl Midr {
    pub fn read() -> Self {
        Self::decode(read_midr())
    }

    pub const fn decode(val: u32) -> Self {
        Self {
            implementer: ((val >> 24) & 0xFF) as u8,
            variant: ((val >> 20) & 0xF) as u8,
            architecture: ((val >> 16) & 0xF) as u8,
            part_num: ((val >> 4) & 0xFFF) as u16,
            revision: (val & 0xF) as u8,
        }
    }

    /// Check if this is an ARM Cortex-A7.
    pub fn is_cortex_a7(&self) -> bool {
        self.implementer == 0x41 && self.part_num == 0xC07
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_cortex_a7() {
        let midr = Midr::decode(0x410F_C075);
        assert!(midr.is_cortex_a7());
        assert_eq!(midr.variant, 0);
        assert_eq!(midr.revision, 5);
    }
}
