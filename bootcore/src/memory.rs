//! Physical memory regions and the two utilities the loader runs on them.
//!
//! [`clear_region`] zero-fills a region; [`dump_region`] renders one as
//! `hexdump`-style lines so a loaded image header can be eyeballed on
//! the console before the jump.

use core::fmt;

use crate::error::MemoryError;
use crate::fmt::DumpLine;
use crate::traits::PhysicalMemory;

/// Size of the word unit regions are measured in.
pub const WORD_SIZE: usize = 4;

/// Words rendered per dump line.
pub const WORDS_PER_LINE: usize = 4;

/// Bytes rendered per dump line.
pub const BYTES_PER_LINE: usize = WORDS_PER_LINE * WORD_SIZE;

/// A physical address. DRAM is identity mapped while the loader runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(usize);

impl PhysAddr {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub const fn is_word_aligned(self) -> bool {
        self.0 % WORD_SIZE == 0
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A destination in working memory: base address plus length in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: PhysAddr,
    pub words: usize,
}

impl MemoryRegion {
    pub const fn new(base: PhysAddr, words: usize) -> Self {
        Self { base, words }
    }

    /// Smallest region covering `bytes` bytes.
    pub const fn covering(base: PhysAddr, bytes: usize) -> Self {
        Self::new(base, bytes.div_ceil(WORD_SIZE))
    }

    pub const fn byte_len(&self) -> usize {
        self.words * WORD_SIZE
    }

    /// One past the last byte, computed wide so it never wraps.
    const fn end_wide(&self) -> u128 {
        self.base.as_usize() as u128 + (self.words as u128) * (WORD_SIZE as u128)
    }

    /// The first `words` words of this region (clamped to its length).
    pub const fn prefix(&self, words: usize) -> Self {
        let words = if words < self.words { words } else { self.words };
        Self::new(self.base, words)
    }

    pub const fn contains(&self, other: &MemoryRegion) -> bool {
        other.base.as_usize() >= self.base.as_usize() && other.end_wide() <= self.end_wide()
    }

    pub const fn overlaps(&self, other: &MemoryRegion) -> bool {
        if self.words == 0 || other.words == 0 {
            return false;
        }
        (self.base.as_usize() as u128) < other.end_wide()
            && (other.base.as_usize() as u128) < self.end_wide()
    }

    /// Check that the region is word aligned and does not wrap.
    pub const fn validate(&self) -> Result<(), MemoryError> {
        if !self.base.is_word_aligned() {
            return Err(MemoryError::Unaligned(self.base));
        }
        if self.end_wide() > usize::MAX as u128 + 1 {
            return Err(MemoryError::Overflow(self.base));
        }
        Ok(())
    }
}

/// Zero every word of `region`.
pub fn clear_region<M: PhysicalMemory + ?Sized>(
    memory: &mut M,
    region: MemoryRegion,
) -> Result<(), MemoryError> {
    region.validate()?;
    memory.bytes_mut(region)?.fill(0);
    Ok(())
}

/// Render `region` as dump lines, four words per line.
///
/// A trailing group of fewer than four words is not rendered.
pub fn dump_region<M: PhysicalMemory + ?Sized>(
    memory: &M,
    region: MemoryRegion,
) -> Result<Dump<'_>, MemoryError> {
    region.validate()?;
    let bytes = memory.bytes(region)?;
    Ok(Dump::new(region.base, bytes))
}

/// Lazy, restartable sequence of [`DumpLine`]s over a byte slice.
///
/// Cloning the iterator restarts the walk from where the clone was taken.
#[derive(Debug, Clone)]
pub struct Dump<'a> {
    base: PhysAddr,
    bytes: &'a [u8],
    line: usize,
}

impl<'a> Dump<'a> {
    /// Dump `bytes`, labelling the first byte with `base`.
    pub fn new(base: PhysAddr, bytes: &'a [u8]) -> Self {
        Self {
            base,
            bytes,
            line: 0,
        }
    }

    /// Total number of lines this dump renders.
    pub fn line_count(&self) -> usize {
        self.bytes.len() / BYTES_PER_LINE
    }
}

impl<'a> Iterator for Dump<'a> {
    type Item = DumpLine<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.line >= self.line_count() {
            return None;
        }
        let offset = self.line * BYTES_PER_LINE;
        self.line += 1;
        let bytes = self.bytes[offset..offset + BYTES_PER_LINE]
            .try_into()
            .ok()?;
        Some(DumpLine {
            address: PhysAddr::new(self.base.as_usize() + offset),
            bytes,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.line_count() - self.line;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Dump<'_> {}
