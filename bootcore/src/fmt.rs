//! Console formatting helpers.
//!
//! Dump lines are rendered into a fixed buffer with a lookup table rather
//! than through `core::fmt` padding machinery, so a line costs one
//! `write_str` on the console.

use core::fmt;

use crate::memory::{BYTES_PER_LINE, PhysAddr, WORD_SIZE};

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// Length of one rendered dump line, without the line terminator.
///
/// `0x%08x` address, `" : "`, four groups of four `"%02x "` fields each
/// followed by a space, then sixteen ASCII characters.
pub const DUMP_LINE_LEN: usize = 10 + 3 + (BYTES_PER_LINE / WORD_SIZE) * (WORD_SIZE * 3 + 1) + BYTES_PER_LINE;

/// Stand-in for bytes that do not print.
pub const PLACEHOLDER: u8 = b'.';

/// Write a u32 as hexadecimal with fixed 8-char width.
pub fn write_hex32_fixed(value: u32, buf: &mut [u8; 10]) {
    buf[0] = b'0';
    buf[1] = b'x';

    for i in 0..8 {
        let nibble = (value >> (28 - i * 4)) & 0xF;
        buf[2 + i] = HEX_CHARS[nibble as usize];
    }
}

/// Printable ASCII, space through tilde.
#[inline]
pub const fn is_printable(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7e)
}

/// One line of a memory dump: sixteen bytes and where they live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpLine<'a> {
    pub address: PhysAddr,
    pub bytes: &'a [u8; BYTES_PER_LINE],
}

impl DumpLine<'_> {
    /// Render the line into a fixed buffer.
    pub fn render(&self) -> [u8; DUMP_LINE_LEN] {
        let mut out = [b' '; DUMP_LINE_LEN];

        // Addresses on this class of SoC are 32 bits wide.
        let mut addr = [0u8; 10];
        write_hex32_fixed(self.address.as_usize() as u32, &mut addr);
        out[..10].copy_from_slice(&addr);
        out[10..13].copy_from_slice(b" : ");

        let mut pos = 13;
        for word in self.bytes.chunks_exact(WORD_SIZE) {
            for &byte in word {
                out[pos] = HEX_CHARS[(byte >> 4) as usize];
                out[pos + 1] = HEX_CHARS[(byte & 0xF) as usize];
                pos += 3;
            }
            pos += 1;
        }

        for &byte in self.bytes {
            out[pos] = if is_printable(byte) { byte } else { PLACEHOLDER };
            pos += 1;
        }

        out
    }
}

impl fmt::Display for DumpLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = self.render();
        f.write_str(core::str::from_utf8(&line).map_err(|_| fmt::Error)?)
    }
}

/// Wrapper to implement core::fmt::Write for any Serial impl.
pub struct SerialWriter<'a, S: crate::Serial + ?Sized>(pub &'a mut S);

impl<S: crate::Serial + ?Sized> fmt::Write for SerialWriter<'_, S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}
