//! Cache maintenance.
//!
//! The data cache is cleaned by set/way, walking every level up to the
//! level of coherency reported by CLIDR.

use crate::cpu;

/// Geometry of one cache level as reported by CCSIDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeometry {
    /// log2 of the line length in bytes.
    pub line_shift: u32,
    pub ways: u32,
    pub sets: u32,
}

impl CacheGeometry {
    pub const fn decode(ccsidr: u32) -> Self {
        Self {
            line_shift: (ccsidr & 0x7) + 4,
            ways: ((ccsidr >> 3) & 0x3FF) + 1,
            sets: ((ccsidr >> 13) & 0x7FFF) + 1,
        }
    }

    /// Position of the way field in a set/way operand.
    pub const fn way_shift(&self) -> u32 {
        (self.ways - 1).leading_zeros()
    }

    /// Operand for DCCSW/DCCISW addressing `set` and `way` at `level`
    /// (0 = L1).
    pub const fn set_way(&self, level: u32, set: u32, way: u32) -> u32 {
        let way_bits = match way.checked_shl(self.way_shift()) {
            Some(bits) => bits,
            None => 0,
        };
        way_bits | (set << self.line_shift) | (level << 1)
    }
}

/// Cache levels that hold data, from CLIDR: levels below the level of
/// coherency whose type field is 2 (data) or more (unified, separate).
pub fn data_levels(clidr: u32) -> impl Iterator<Item = u32> {
    let loc = (clidr >> 24) & 0x7;
    (0..loc).filter(move |level| (clidr >> (level * 3)) & 0x7 >= 2)
}

/// Write every dirty data cache line back to memory.
pub fn clean_dcache_all() {
    let clidr = cpu::read_clidr();
    for level in data_levels(clidr) {
        cpu::write_csselr(level << 1);
        crate::isb();
        let geometry = CacheGeometry::decode(cpu::read_ccsidr());
        for way in 0..geometry.ways {
            for set in 0..geometry.sets {
                dccsw(geometry.set_way(level, set, way));
            }
        }
    }
    cpu::write_csselr(0);
    crate::dsb();
    crate::isb();
}

/// Invalidate the whole instruction cache (ICIALLU).
#[inline]
pub fn invalidate_icache_all() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("mcr p15, 0, {}, c7, c5, 0", in(reg) 0u32, options(nostack));
    }
}

/// Invalidate all branch predictor entries (BPIALL).
#[inline]
pub fn invalidate_branch_predictor() {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("mcr p15, 0, {}, c7, c5, 6", in(reg) 0u32, options(nostack));
    }
}

#[inline]
fn dccsw(operand: u32) {
    #[cfg(target_arch = "arm")]
    unsafe {
        core::arch::asm!("mcr p15, 0, {}, c7, c10, 2", in(reg) operand, options(nostack));
    }
    #[cfg(not(target_arch = "arm"))]
    let _ = operand;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cortex-A7 L1 D-cache: 32 KiB, 4 ways, 64-byte lines, 128 sets.
    const A7_L1D: u32 = (127 << 13) | (3 << 3) | 2;

    #[test]
    fn test_decode_a7_l1() {
        let g = CacheGeometry::decode(A7_L1D);
        assert_eq!(g.line_shift, 6);
        assert_eq!(g.ways, 4);
        assert_eq!(g.sets, 128);
        assert_eq!(g.way_shift(), 30);
    }

    #[test]
    fn test_set_way_operand() {
        let g = CacheGeometry::decode(A7_L1D);
        assert_eq!(g.set_way(0, 0, 0), 0);
        assert_eq!(g.set_way(0, 1, 0), 1 << 6);
        assert_eq!(g.set_way(0, 127, 3), (3 << 30) | (127 << 6));
        assert_eq!(g.set_way(1, 0, 1), (1 << 30) | 2);
    }

    #[test]
    fn test_direct_mapped_way_field_is_empty() {
        let g = CacheGeometry::decode(0);
        assert_eq!(g.ways, 1);
        assert_eq!(g.set_way(0, 3, 0), 3 << 4);
    }

    #[test]
    fn test_data_levels() {
        // LoC = 2, L1 separate I/D (3), L2 unified (4).
        let clidr = (2 << 24) | (4 << 3) | 3;
        assert_eq!(data_levels(clidr).collect::<Vec<_>>(), [0, 1]);
        // L1 instruction only (1) is skipped.
        let clidr = (2 << 24) | (4 << 3) | 1;
        assert_eq!(data_levels(clidr).collect::<Vec<_>>(), [1]);
        assert_eq!(data_levels(0).count(), 0);
    }
}
