//! UART4 console and the `log` backend.
//!
//! Line settings, pins and clocks are set up by `bsp_console_init`; this
//! driver only pushes bytes through an already running transmitter.

use core::fmt::Write;

use bootcore::Serial;
use bootcore::fmt::SerialWriter;
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::mmio::{self, UART4_BASE};

/// UART registers.
mod regs {
    use super::UART4_BASE;

    /// Interrupt and status register.
    pub const ISR: usize = UART4_BASE + 0x1C;

    /// Transmit data register.
    pub const TDR: usize = UART4_BASE + 0x28;
}

/// ISR bits.
mod isr {
    /// Transmission complete.
    pub const TC: u32 = 1 << 6;
    /// Transmit FIFO not full.
    pub const TXFNF: u32 = 1 << 7;
}

/// UART4 transmitter.
pub struct Uart4;

impl Uart4 {
    pub const fn new() -> Self {
        Self
    }
}

impl Serial for Uart4 {
    fn write_byte(&mut self, byte: u8) {
        while mmio::read(regs::ISR) & isr::TXFNF == 0 {
            core::hint::spin_loop();
        }
        mmio::write(regs::TDR, u32::from(byte));
    }

    fn flush(&mut self) {
        while mmio::read(regs::ISR) & isr::TC == 0 {
            core::hint::spin_loop();
        }
    }
}

#[cfg(feature = "verbose")]
const MAX_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(feature = "verbose"))]
const MAX_LEVEL: LevelFilter = LevelFilter::Info;

/// Writes every record as one line on UART4.
///
/// Info lines go out verbatim so the boot log keeps a stable shape; every
/// other level carries a `level: ` prefix.
pub struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= MAX_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut uart = Uart4::new();
        let prefix = match record.level() {
            Level::Info => "",
            Level::Error => "error: ",
            Level::Warn => "warn: ",
            Level::Debug => "debug: ",
            Level::Trace => "trace: ",
        };
        uart.write_str(prefix);
        let _ = write!(SerialWriter(&mut uart), "{}", record.args());
        uart.write_bytes(b"\r\n");
    }

    fn flush(&self) {
        Uart4::new().flush();
    }
}

/// Route the `log` macros to the console.
pub fn init_logger() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(MAX_LEVEL);
    }
}
