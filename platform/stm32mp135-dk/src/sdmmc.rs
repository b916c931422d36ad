//! SDMMC1 driver for the microSD slot.
//!
//! Polled, FIFO based, no DMA and no interrupts. Implements the
//! identification sequence of the SD Physical Layer Simplified
//! Specification and multi-block reads.
//!
//! The controller's kernel clock is set up by `bsp_clock_init`; the pins
//! and the ETZPC/RIF security setting by `bsp_sdmmc_unsecure`.

use bitflags::bitflags;
use bootcore::poll::Deadline;
use bootcore::storage::{BusWidth, ClockEdge, MAX_TRANSFER_BLOCKS};
use bootcore::{BLOCK_SIZE, BlockDevice, BusConfig, StorageError, Timer, TransferError};
use log::debug;
use static_assertions::const_assert;

use crate::mmio::{self, SDMMC1_BASE};
use crate::timer::GenericTimer;

/// SDMMC kernel clock as configured by the clock bring-up.
const KERNEL_CLOCK_HZ: u32 = 100_000_000;

/// Card clock during identification (<= 400 kHz).
const IDENT_CLOCK_HZ: u32 = 400_000;

/// Bound on a single command/response exchange.
const COMMAND_TIMEOUT_MS: u32 = 100;

/// Bound on ACMD41 voltage negotiation.
const POWER_UP_TIMEOUT_MS: u32 = 1_000;

/// Bound on the card holding DAT0 low after an R1b command.
const BUSY_TIMEOUT_MS: u32 = 500;

/// Words drained per FIFO half-full event.
const FIFO_HALF_WORDS: usize = 8;

/// SDMMC registers.
mod regs {
    use super::SDMMC1_BASE;

    pub const POWER: usize = SDMMC1_BASE + 0x00;
    pub const CLKCR: usize = SDMMC1_BASE + 0x04;
    pub const ARGR: usize = SDMMC1_BASE + 0x08;
    pub const CMDR: usize = SDMMC1_BASE + 0x0C;
    pub const RESP1: usize = SDMMC1_BASE + 0x14;
    pub const RESP2: usize = SDMMC1_BASE + 0x18;
    pub const RESP3: usize = SDMMC1_BASE + 0x1C;
    pub const RESP4: usize = SDMMC1_BASE + 0x20;
    pub const DTIMER: usize = SDMMC1_BASE + 0x24;
    pub const DLENR: usize = SDMMC1_BASE + 0x28;
    pub const DCTRL: usize = SDMMC1_BASE + 0x2C;
    pub const STAR: usize = SDMMC1_BASE + 0x34;
    pub const ICR: usize = SDMMC1_BASE + 0x38;
    pub const MASKR: usize = SDMMC1_BASE + 0x3C;
    pub const FIFOR: usize = SDMMC1_BASE + 0x80;
}

/// POWER fields.
mod power {
    pub const OFF: u32 = 0b00;
    pub const CYCLE: u32 = 0b10;
    pub const ON: u32 = 0b11;
}

/// CLKCR fields.
mod clkcr {
    pub const CLKDIV_MASK: u32 = 0x3FF;
    pub const PWRSAV: u32 = 1 << 12;
    pub const WIDBUS_4: u32 = 0b01 << 14;
    pub const WIDBUS_8: u32 = 0b10 << 14;
    pub const NEGEDGE: u32 = 1 << 16;
    pub const HWFC_EN: u32 = 1 << 17;
}

/// CMDR fields.
mod cmdr {
    pub const CMDTRANS: u32 = 1 << 6;
    pub const CMDSTOP: u32 = 1 << 7;
    pub const WAITRESP_SHIFT: u32 = 8;
    pub const CPSMEN: u32 = 1 << 12;
}

/// DLENR fields.
mod dlenr {
    pub const DATALENGTH_MASK: u32 = 0x01FF_FFFF;
}

/// DCTRL fields.
mod dctrl {
    /// Card to controller.
    pub const DTDIR: u32 = 1 << 1;
    pub const DBLOCKSIZE_SHIFT: u32 = 4;
    /// log2(512)
    pub const DBLOCKSIZE_512: u32 = 9;
}

bitflags! {
    /// STAR/ICR bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Status: u32 {
        const CCRCFAIL = 1 << 0;
        const DCRCFAIL = 1 << 1;
        const CTIMEOUT = 1 << 2;
        const DTIMEOUT = 1 << 3;
        const TXUNDERR = 1 << 4;
        const RXOVERR = 1 << 5;
        const CMDREND = 1 << 6;
        const CMDSENT = 1 << 7;
        const DATAEND = 1 << 8;
        const DHOLD = 1 << 9;
        const DBCKEND = 1 << 10;
        const DABORT = 1 << 11;
        const DPSMACT = 1 << 12;
        const CPSMACT = 1 << 13;
        const TXFIFOHE = 1 << 14;
        const RXFIFOHF = 1 << 15;
        const TXFIFOF = 1 << 16;
        const RXFIFOF = 1 << 17;
        const TXFIFOE = 1 << 18;
        const RXFIFOE = 1 << 19;
        const BUSYD0 = 1 << 20;
        const BUSYD0END = 1 << 21;

        /// Flags cleared through ICR.
        const STATIC = Self::CCRCFAIL.bits()
            | Self::DCRCFAIL.bits()
            | Self::CTIMEOUT.bits()
            | Self::DTIMEOUT.bits()
            | Self::TXUNDERR.bits()
            | Self::RXOVERR.bits()
            | Self::CMDREND.bits()
            | Self::CMDSENT.bits()
            | Self::DATAEND.bits()
            | Self::DHOLD.bits()
            | Self::DBCKEND.bits()
            | Self::DABORT.bits()
            | Self::BUSYD0END.bits();

        /// Any of these ends a data transfer with an error.
        const DATA_ERRORS = Self::DCRCFAIL.bits()
            | Self::DTIMEOUT.bits()
            | Self::RXOVERR.bits()
            | Self::DABORT.bits();
    }
}

impl Status {
    fn read() -> Self {
        Self::from_bits_retain(mmio::read(regs::STAR))
    }

    fn clear(flags: Self) {
        mmio::write(regs::ICR, flags.bits());
    }

    /// First data error, in order of how much it says about the cause.
    fn data_error(self) -> Option<StorageError> {
        if !self.intersects(Self::DATA_ERRORS) {
            None
        } else if self.contains(Self::RXOVERR) {
            Some(StorageError::RxOverrun)
        } else if self.contains(Self::DCRCFAIL) {
            Some(StorageError::DataCrc)
        } else {
            // DTIMEOUT or DABORT.
            Some(StorageError::DataTimeout)
        }
    }
}

/// Response format a command expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Response {
    None,
    /// R1, R6, R7.
    Short,
    /// R1b: short, then the card holds DAT0 low while busy.
    ShortBusy,
    /// R3 carries no valid CRC.
    ShortNoCrc,
    /// R2.
    Long,
}

impl Response {
    const fn waitresp(self) -> u32 {
        match self {
            Response::None => 0b00,
            Response::Short | Response::ShortBusy => 0b01,
            Response::ShortNoCrc => 0b10,
            Response::Long => 0b11,
        }
    }

    /// R1 responses carry card status to check.
    const fn is_r1(self) -> bool {
        matches!(self, Response::Short | Response::ShortBusy)
    }
}

/// One SD command.
#[derive(Debug, Clone, Copy)]
struct Command {
    index: u8,
    response: Response,
    /// Starts the data path (CMDTRANS).
    data: bool,
    /// Stops the data path (CMDSTOP).
    stop: bool,
}

impl Command {
    const fn new(index: u8, response: Response) -> Self {
        Self {
            index,
            response,
            data: false,
            stop: false,
        }
    }

    const fn with_data(mut self) -> Self {
        self.data = true;
        self
    }

    const fn with_stop(mut self) -> Self {
        self.stop = true;
        self
    }

    const fn cmdr(&self) -> u32 {
        let mut value = self.index as u32
            | (self.response.waitresp() << cmdr::WAITRESP_SHIFT)
            | cmdr::CPSMEN;
        if self.data {
            value |= cmdr::CMDTRANS;
        }
        if self.stop {
            value |= cmdr::CMDSTOP;
        }
        value
    }
}

const GO_IDLE_STATE: Command = Command::new(0, Response::None);
const ALL_SEND_CID: Command = Command::new(2, Response::Long);
/// R6 is short with CRC but not R1 formatted.
const SEND_RELATIVE_ADDR: Command = Command::new(3, Response::Short);
const SELECT_CARD: Command = Command::new(7, Response::ShortBusy);
/// R7, no R1 status.
const SEND_IF_COND: Command = Command::new(8, Response::Short);
const SEND_CSD: Command = Command::new(9, Response::Long);
const STOP_TRANSMISSION: Command = Command::new(12, Response::ShortBusy).with_stop();
const SEND_STATUS: Command = Command::new(13, Response::Short);
const SET_BLOCKLEN: Command = Command::new(16, Response::Short);
const READ_SINGLE_BLOCK: Command = Command::new(17, Response::Short).with_data();
const READ_MULTIPLE_BLOCK: Command = Command::new(18, Response::Short).with_data();
const APP_CMD: Command = Command::new(55, Response::Short);
const SET_BUS_WIDTH: Command = Command::new(6, Response::Short);
const SD_SEND_OP_COND: Command = Command::new(41, Response::ShortNoCrc);

/// CMD8 argument: 2.7-3.6 V, check pattern 0xAA.
const IF_COND_ARG: u32 = 0x1AA;

/// ACMD41 argument bits.
mod ocr {
    /// 3.2-3.4 V window.
    pub const VOLTAGE_WINDOW: u32 = 0x0030_0000;
    /// Host supports high capacity.
    pub const HCS: u32 = 1 << 30;
    /// Card capacity status (in the response).
    pub const CCS: u32 = 1 << 30;
    /// Power-up finished (in the response).
    pub const BUSY_DONE: u32 = 1 << 31;
}

/// R1 card status.
mod r1 {
    /// Every error bit (OUT_OF_RANGE .. AKE_SEQ_ERROR).
    pub const ERRORS: u32 = 0xFDFF_E008;
    pub const CURRENT_STATE_SHIFT: u32 = 9;
    pub const CURRENT_STATE_MASK: u32 = 0xF;
    pub const STATE_TRAN: u32 = 4;
}

/// Commands whose short response is not an R1 card status.
const fn has_card_status(command: &Command) -> bool {
    command.response.is_r1()
        && command.index != SEND_RELATIVE_ADDR.index
        && command.index != SEND_IF_COND.index
}

/// Card addressing mode, from the CCS bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capacity {
    /// SDSC: byte addresses.
    Standard,
    /// SDHC/SDXC: block addresses.
    High,
}

/// SDMMC1 with the card behind it.
pub struct Sdmmc {
    timer: GenericTimer,
    rca: u32,
    capacity: Capacity,
}

impl Sdmmc {
    pub const fn new(timer: GenericTimer) -> Self {
        Self {
            timer,
            rca: 0,
            capacity: Capacity::Standard,
        }
    }

    /// Card argument carrying the relative card address.
    fn rca_arg(&self) -> u32 {
        self.rca << 16
    }

    fn power_up(&mut self) {
        mmio::write(regs::POWER, power::CYCLE);
        self.timer.delay_ms(1);
        mmio::write(regs::POWER, power::OFF);
        self.timer.delay_ms(1);

        mmio::write(regs::MASKR, 0);
        Status::clear(Status::STATIC);
        mmio::write(regs::CLKCR, ident_divisor() & clkcr::CLKDIV_MASK);
        mmio::write(regs::POWER, power::ON);

        // 74 card clocks before the first command.
        self.timer.delay_ms(1);
    }

    /// Send `command` and wait for its response. Returns RESP1.
    fn command(&mut self, command: Command, arg: u32) -> Result<u32, StorageError> {
        Status::clear(Status::STATIC);
        mmio::write(regs::ARGR, arg);
        mmio::write_barrier(regs::CMDR, command.cmdr());

        let done = match command.response {
            Response::None => Status::CMDSENT,
            _ => Status::CMDREND | Status::CCRCFAIL | Status::CTIMEOUT,
        };
        let deadline = Deadline::after_ms(&self.timer, COMMAND_TIMEOUT_MS);
        let status = loop {
            let status = Status::read();
            if status.intersects(done) {
                break status;
            }
            if deadline.expired() {
                return Err(StorageError::CommandTimeout(command.index));
            }
        };
        Status::clear(Status::CMDREND | Status::CMDSENT | Status::CCRCFAIL | Status::CTIMEOUT);

        if status.contains(Status::CTIMEOUT) {
            return Err(StorageError::CommandTimeout(command.index));
        }
        if status.contains(Status::CCRCFAIL) && command.response != Response::ShortNoCrc {
            return Err(StorageError::CommandCrc(command.index));
        }

        let resp = mmio::read(regs::RESP1);
        if has_card_status(&command) && resp & r1::ERRORS != 0 {
            return Err(StorageError::CardStatus(resp));
        }
        if command.response == Response::ShortBusy {
            self.wait_not_busy()?;
        }
        Ok(resp)
    }

    fn app_command(&mut self, command: Command, arg: u32) -> Result<u32, StorageError> {
        self.command(APP_CMD, self.rca_arg())?;
        self.command(command, arg)
    }

    fn wait_not_busy(&mut self) -> Result<(), StorageError> {
        let deadline = Deadline::after_ms(&self.timer, BUSY_TIMEOUT_MS);
        while Status::read().contains(Status::BUSYD0) {
            if deadline.expired() {
                return Err(StorageError::DataTimeout);
            }
        }
        Status::clear(Status::BUSYD0END);
        Ok(())
    }

    /// ACMD41 until the card leaves power-up. Returns the OCR.
    fn negotiate_voltage(&mut self, v2: bool) -> Result<u32, StorageError> {
        let arg = ocr::VOLTAGE_WINDOW | if v2 { ocr::HCS } else { 0 };
        let timer = self.timer;
        let deadline = Deadline::after_ms(&timer, POWER_UP_TIMEOUT_MS);
        loop {
            let ocr = self.app_command(SD_SEND_OP_COND, arg)?;
            if ocr & ocr::BUSY_DONE != 0 {
                return Ok(ocr);
            }
            if deadline.expired() {
                return Err(StorageError::InitFailed);
            }
            self.timer.delay_ms(1);
        }
    }

    fn identify(&mut self, bus_width: BusWidth) -> Result<(), StorageError> {
        self.command(GO_IDLE_STATE, 0)?;

        let v2 = match self.command(SEND_IF_COND, IF_COND_ARG) {
            Ok(echo) if echo & 0xFFF == IF_COND_ARG => true,
            Ok(_) => return Err(StorageError::VoltageRejected),
            // Version 1.x cards do not answer CMD8.
            Err(StorageError::CommandTimeout(_)) => false,
            Err(e) => return Err(e),
        };

        let ocr = self.negotiate_voltage(v2)?;
        self.capacity = if ocr & ocr::CCS != 0 {
            Capacity::High
        } else {
            Capacity::Standard
        };

        self.command(ALL_SEND_CID, 0)?;
        self.rca = self.command(SEND_RELATIVE_ADDR, 0)? >> 16;
        self.command(SEND_CSD, self.rca_arg())?;
        let csd = [
            mmio::read(regs::RESP1),
            mmio::read(regs::RESP2),
            mmio::read(regs::RESP3),
            mmio::read(regs::RESP4),
        ];
        self.command(SELECT_CARD, self.rca_arg())?;

        let width_arg = match bus_width {
            BusWidth::One => 0b00,
            BusWidth::Four => 0b10,
            // SD cards have at most four data lines.
            BusWidth::Eight => return Err(StorageError::InitFailed),
        };
        self.app_command(SET_BUS_WIDTH, width_arg)?;
        self.command(SET_BLOCKLEN, BLOCK_SIZE as u32)?;

        debug!(
            "sd: {:?} capacity card, rca {:#06x}, csd {:08x} {:08x} {:08x} {:08x}",
            self.capacity, self.rca, csd[0], csd[1], csd[2], csd[3]
        );
        Ok(())
    }

    fn apply(&mut self, config: &BusConfig) {
        let mut value = u32::from(config.clock_divisor) & clkcr::CLKDIV_MASK;
        value |= match config.bus_width {
            BusWidth::One => 0,
            BusWidth::Four => clkcr::WIDBUS_4,
            BusWidth::Eight => clkcr::WIDBUS_8,
        };
        if config.clock_edge == ClockEdge::Falling {
            value |= clkcr::NEGEDGE;
        }
        if config.hardware_flow_control {
            value |= clkcr::HWFC_EN;
        }
        if config.clock_power_save {
            value |= clkcr::PWRSAV;
        }
        let fields = clkcr::CLKDIV_MASK
            | clkcr::PWRSAV
            | clkcr::WIDBUS_4
            | clkcr::WIDBUS_8
            | clkcr::NEGEDGE
            | clkcr::HWFC_EN;
        mmio::modify(regs::CLKCR, fields, value);
    }

    /// Abort the data path after an error or timeout.
    fn abort(&mut self, multi_block: bool) {
        if multi_block {
            if let Err(e) = self.command(STOP_TRANSMISSION, 0) {
                debug!("sdmmc: stop after abort failed: {}", e);
            }
        }
        mmio::write(regs::DCTRL, 0);
        Status::clear(Status::STATIC);
    }

    fn address_of(&self, block: u32) -> u32 {
        match self.capacity {
            Capacity::High => block,
            Capacity::Standard => block.wrapping_mul(BLOCK_SIZE as u32),
        }
    }
}

/// Identification-mode divisor: kernel clock / (2 * div) <= 400 kHz.
const fn ident_divisor() -> u32 {
    KERNEL_CLOCK_HZ.div_ceil(2 * IDENT_CLOCK_HZ)
}

impl BlockDevice for Sdmmc {
    fn init(&mut self, config: &BusConfig) -> Result<(), StorageError> {
        self.power_up();
        self.identify(config.bus_width)?;
        self.apply(config);
        Ok(())
    }

    fn is_transfer_ready(&mut self) -> Result<bool, StorageError> {
        let status = self.command(SEND_STATUS, self.rca_arg())?;
        let state = (status >> r1::CURRENT_STATE_SHIFT) & r1::CURRENT_STATE_MASK;
        Ok(state == r1::STATE_TRAN)
    }

    fn read_blocks(
        &mut self,
        start: u32,
        buffer: &mut [u8],
        timeout_ms: u32,
    ) -> Result<(), TransferError> {
        if buffer.len() % BLOCK_SIZE != 0 {
            return Err(StorageError::BufferSize {
                expected: buffer.len().next_multiple_of(BLOCK_SIZE),
                actual: buffer.len(),
            }
            .into());
        }
        let blocks = buffer.len() / BLOCK_SIZE;
        if blocks == 0 {
            return Ok(());
        }
        if blocks > MAX_TRANSFER_BLOCKS as usize {
            let blocks = u32::try_from(blocks).unwrap_or(u32::MAX);
            return Err(StorageError::TransferTooLong(blocks).into());
        }
        let multi_block = blocks > 1;

        // The software deadline bounds the transfer; the hardware data
        // timer only catches a card that stops mid-block.
        mmio::write(regs::DCTRL, 0);
        mmio::write(regs::DTIMER, u32::MAX);
        mmio::write(regs::DLENR, buffer.len() as u32);
        mmio::write(
            regs::DCTRL,
            dctrl::DTDIR | (dctrl::DBLOCKSIZE_512 << dctrl::DBLOCKSIZE_SHIFT),
        );

        let command = if multi_block {
            READ_MULTIPLE_BLOCK
        } else {
            READ_SINGLE_BLOCK
        };
        if let Err(e) = self.command(command, self.address_of(start)) {
            self.abort(false);
            return Err(e.into());
        }

        // Bytes land in `staging` and are only copied out per whole block,
        // so a timeout never leaves a torn block in the destination.
        let timer = self.timer;
        let deadline = Deadline::after_ms(&timer, timeout_ms);
        let mut staging = [0u8; BLOCK_SIZE];
        let mut filled = 0;
        let mut blocks_done = 0;
        let mut destination = buffer.chunks_exact_mut(BLOCK_SIZE);

        let mut store = |word: u32, filled: &mut usize, blocks_done: &mut usize| {
            staging[*filled..*filled + 4].copy_from_slice(&word.to_le_bytes());
            *filled += 4;
            if *filled == BLOCK_SIZE {
                if let Some(block) = destination.next() {
                    block.copy_from_slice(&staging);
                }
                *filled = 0;
                *blocks_done += 1;
            }
        };

        loop {
            let status = Status::read();
            if let Some(error) = status.data_error() {
                self.abort(multi_block);
                return Err(error.into());
            }
            if status.contains(Status::RXFIFOHF) && blocks_done < blocks {
                for _ in 0..FIFO_HALF_WORDS {
                    store(mmio::read(regs::FIFOR), &mut filled, &mut blocks_done);
                }
            } else if status.contains(Status::DATAEND) {
                // Whatever is left sits below the half-full mark.
                while blocks_done < blocks && !Status::read().contains(Status::RXFIFOE) {
                    store(mmio::read(regs::FIFOR), &mut filled, &mut blocks_done);
                }
                break;
            }
            if deadline.expired() {
                self.abort(multi_block);
                return Err(TransferError::TimedOut {
                    blocks_transferred: blocks_done as u32,
                });
            }
        }

        if multi_block {
            self.command(STOP_TRANSMISSION, 0)?;
        }
        Status::clear(Status::STATIC);

        if blocks_done < blocks {
            return Err(StorageError::DataTimeout.into());
        }
        Ok(())
    }
}

const_assert!(ident_divisor() <= clkcr::CLKDIV_MASK);
const_assert!(MAX_TRANSFER_BLOCKS as usize * BLOCK_SIZE <= dlenr::DATALENGTH_MASK as usize);
