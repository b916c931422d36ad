//! Storage session: the one owner of the boot medium.
//!
//! The board supplies a [`BlockDevice`]; the session wraps it with the
//! state machine
//!
//! ```text
//! Uninitialized -> Initializing -> Ready <-> Transferring
//!                        |           |            |
//!                        +-----------+------------+--> Faulted
//! ```
//!
//! `Faulted` is terminal. Every read reports a [`ReadOutcome`] instead of
//! deciding on its own whether the boot can go on.

use log::{debug, warn};

use crate::error::{StorageError, TransferError};
use crate::poll::{self, WaitOutcome};
use crate::traits::{BlockDevice, Timer};

/// Size of one block (sector) on the medium.
pub const BLOCK_SIZE: usize = 512;

/// Most blocks a single read may cover. SD host data length counters are
/// 25 bits wide, which leaves room for 65535 whole blocks.
pub const MAX_TRANSFER_BLOCKS: u32 = 0xFFFF;

/// Data bus width between controller and card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    One,
    Four,
    Eight,
}

/// Card clock edge the controller drives data on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEdge {
    Rising,
    Falling,
}

/// Controller settings applied once the card is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub bus_width: BusWidth,
    pub clock_edge: ClockEdge,
    /// Card clock = kernel clock / (2 * divisor); 0 bypasses the divider.
    pub clock_divisor: u16,
    pub hardware_flow_control: bool,
    /// Gate the card clock while the bus is idle.
    pub clock_power_save: bool,
}

impl BusConfig {
    /// 4-bit bus, rising edge, normal-speed divisor, no flow control.
    pub const DEFAULT_SPEED: Self = Self {
        bus_width: BusWidth::Four,
        clock_edge: ClockEdge::Rising,
        clock_divisor: 4,
        hardware_flow_control: false,
        clock_power_save: false,
    };
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::DEFAULT_SPEED
    }
}

/// A contiguous extent on the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u32,
    pub count: u32,
}

impl BlockRange {
    pub const fn new(start: u32, count: u32) -> Self {
        Self { start, count }
    }

    pub const fn byte_len(&self) -> usize {
        self.count as usize * BLOCK_SIZE
    }

    /// First block past the range.
    pub const fn end(&self) -> u64 {
        self.start as u64 + self.count as u64
    }

    pub const fn overlaps(&self, other: &BlockRange) -> bool {
        self.count != 0
            && other.count != 0
            && (self.start as u64) < other.end()
            && (other.start as u64) < self.end()
    }
}

/// Where the session is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Transferring,
    Faulted,
}

/// What a single read did. The caller decides what each outcome means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Every requested block landed.
    Complete,
    /// The deadline passed; only `blocks_transferred` blocks landed.
    TimedOut { blocks_transferred: u32 },
    /// The controller or card failed. The session is now `Faulted`.
    Fault(StorageError),
}

/// Exclusive handle to the boot medium.
pub struct StorageSession<D: BlockDevice> {
    device: D,
    config: BusConfig,
    state: SessionState,
}

impl<D: BlockDevice> StorageSession<D> {
    pub fn new(device: D, config: BusConfig) -> Self {
        Self {
            device,
            config,
            state: SessionState::Uninitialized,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Borrow the underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Bring the card up and wait, at most `ready_timeout_ms`, for it to
    /// reach the transfer state.
    pub fn initialize<T: Timer + ?Sized>(
        &mut self,
        timer: &T,
        ready_timeout_ms: u32,
    ) -> Result<(), StorageError> {
        if self.state != SessionState::Uninitialized {
            return Err(StorageError::InitFailed);
        }
        self.state = SessionState::Initializing;

        if let Err(e) = self.device.init(&self.config) {
            self.state = SessionState::Faulted;
            return Err(e);
        }

        let device = &mut self.device;
        match poll::wait_until(timer, ready_timeout_ms, || device.is_transfer_ready()) {
            Ok(WaitOutcome::Ready) => {
                debug!("storage ready");
                self.state = SessionState::Ready;
                Ok(())
            }
            Ok(WaitOutcome::TimedOut) => {
                self.state = SessionState::Faulted;
                Err(StorageError::ReadyTimeout(ready_timeout_ms))
            }
            Err(e) => {
                self.state = SessionState::Faulted;
                Err(e)
            }
        }
    }

    /// Read `range` into `destination`, which must be exactly
    /// `range.byte_len()` bytes long.
    pub fn read_blocks(
        &mut self,
        destination: &mut [u8],
        range: BlockRange,
        timeout_ms: u32,
    ) -> ReadOutcome {
        if self.state != SessionState::Ready {
            return ReadOutcome::Fault(StorageError::NotReady);
        }
        if range.count > MAX_TRANSFER_BLOCKS {
            return ReadOutcome::Fault(StorageError::TransferTooLong(range.count));
        }
        if destination.len() != range.byte_len() {
            return ReadOutcome::Fault(StorageError::BufferSize {
                expected: range.byte_len(),
                actual: destination.len(),
            });
        }
        if range.count == 0 {
            return ReadOutcome::Complete;
        }

        self.state = SessionState::Transferring;
        match self.device.read_blocks(range.start, destination, timeout_ms) {
            Ok(()) => {
                self.state = SessionState::Ready;
                ReadOutcome::Complete
            }
            Err(TransferError::TimedOut { blocks_transferred }) => {
                warn!(
                    "read of {} blocks at {} timed out after {} blocks",
                    range.count, range.start, blocks_transferred
                );
                self.state = SessionState::Ready;
                ReadOutcome::TimedOut { blocks_transferred }
            }
            Err(TransferError::Fault(e)) => {
                self.state = SessionState::Faulted;
                ReadOutcome::Fault(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Injected, SimCard, SimTimer, pattern};

    fn ready_session(card: SimCard) -> StorageSession<SimCard> {
        let mut session = StorageSession::new(card, BusConfig::default());
        session.initialize(&SimTimer::new(), 100).unwrap();
        session
    }

    #[test]
    fn test_initialize_applies_config() {
        let config = BusConfig {
            clock_edge: ClockEdge::Falling,
            hardware_flow_control: true,
            ..BusConfig::default()
        };
        let mut session = StorageSession::new(SimCard::new(), config);
        assert_eq!(session.state(), SessionState::Uninitialized);

        session.initialize(&SimTimer::new(), 100).unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.device().configured, Some(config));
    }

    #[test]
    fn test_initialize_waits_for_transfer_state() {
        let card = SimCard::new().ready_after(5);
        let session = ready_session(card);
        assert!(session.is_ready());
        assert_eq!(session.device().ready_polls, 6);
    }

    #[test]
    fn test_initialize_ready_wait_is_bounded() {
        let card = SimCard::new().never_ready();
        let mut session = StorageSession::new(card, BusConfig::default());

        let err = session.initialize(&SimTimer::new(), 50).unwrap_err();

        assert_eq!(err, StorageError::ReadyTimeout(50));
        assert_eq!(session.state(), SessionState::Faulted);
    }

    #[test]
    fn test_initialize_status_error_faults() {
        let card = SimCard::new().fail_status(StorageError::CommandTimeout(13));
        let mut session = StorageSession::new(card, BusConfig::default());

        assert_eq!(
            session.initialize(&SimTimer::new(), 50),
            Err(StorageError::CommandTimeout(13))
        );
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(session.device().ready_polls, 1);
    }

    #[test]
    fn test_initialize_fault_is_terminal() {
        let card = SimCard::new().fail_init(StorageError::VoltageRejected);
        let mut session = StorageSession::new(card, BusConfig::default());

        assert_eq!(
            session.initialize(&SimTimer::new(), 50),
            Err(StorageError::VoltageRejected)
        );
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(
            session.initialize(&SimTimer::new(), 50),
            Err(StorageError::InitFailed)
        );

        let mut buf = [0u8; BLOCK_SIZE];
        assert_eq!(
            session.read_blocks(&mut buf, BlockRange::new(0, 1), 10),
            ReadOutcome::Fault(StorageError::NotReady)
        );
    }

    #[test]
    fn test_read_before_initialize() {
        let mut session = StorageSession::new(SimCard::new(), BusConfig::default());
        let mut buf = [0u8; BLOCK_SIZE];
        assert_eq!(
            session.read_blocks(&mut buf, BlockRange::new(0, 1), 10),
            ReadOutcome::Fault(StorageError::NotReady)
        );
        assert!(session.device().reads.is_empty());
    }

    #[test]
    fn test_read_fills_exactly_the_range() {
        let mut session = ready_session(SimCard::new());
        let range = BlockRange::new(2048, 3);
        let mut buf = vec![0xEEu8; range.byte_len() + BLOCK_SIZE];

        let outcome = session.read_blocks(&mut buf[..range.byte_len()], range, 10);

        assert_eq!(outcome, ReadOutcome::Complete);
        assert_eq!(session.state(), SessionState::Ready);
        for (i, &b) in buf[..range.byte_len()].iter().enumerate() {
            let block = 2048 + (i / BLOCK_SIZE) as u32;
            assert_eq!(b, pattern(block, i % BLOCK_SIZE));
        }
        assert!(buf[range.byte_len()..].iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn test_read_rejects_mismatched_buffer() {
        let mut session = ready_session(SimCard::new());
        let mut buf = [0u8; BLOCK_SIZE];
        assert_eq!(
            session.read_blocks(&mut buf, BlockRange::new(0, 2), 10),
            ReadOutcome::Fault(StorageError::BufferSize {
                expected: 2 * BLOCK_SIZE,
                actual: BLOCK_SIZE,
            })
        );
        // Rejected before the device saw it; the session stays usable.
        assert!(session.is_ready());
    }

    #[test]
    fn test_read_rejects_overlong_range() {
        let mut session = ready_session(SimCard::new());
        let mut buf = [0u8; 0];
        assert_eq!(
            session.read_blocks(&mut buf, BlockRange::new(4096, 70_000), 10),
            ReadOutcome::Fault(StorageError::TransferTooLong(70_000))
        );
        assert!(session.is_ready());
        assert!(session.device().reads.is_empty());
    }

    #[test]
    fn test_timeout_keeps_session_ready() {
        let card = SimCard::new().inject(10, Injected::TimeoutAfter(2));
        let mut session = ready_session(card);
        let range = BlockRange::new(10, 4);
        let mut buf = vec![0u8; range.byte_len()];

        let outcome = session.read_blocks(&mut buf, range, 10);

        assert_eq!(outcome, ReadOutcome::TimedOut { blocks_transferred: 2 });
        assert!(session.is_ready());
        assert_eq!(buf[0], pattern(10, 0));
        assert!(buf[2 * BLOCK_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fault_is_terminal() {
        let card = SimCard::new().inject(10, Injected::Fault(StorageError::DataCrc));
        let mut session = ready_session(card);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(
            session.read_blocks(&mut buf, BlockRange::new(10, 1), 10),
            ReadOutcome::Fault(StorageError::DataCrc)
        );
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(
            session.read_blocks(&mut buf, BlockRange::new(0, 1), 10),
            ReadOutcome::Fault(StorageError::NotReady)
        );
    }

    #[test]
    fn test_block_range_overlap() {
        let dtb = BlockRange::new(2048, 121);
        let kernel = BlockRange::new(4096, 14855);
        assert!(!dtb.overlaps(&kernel));
        assert!(dtb.overlaps(&BlockRange::new(2168, 1)));
        assert!(!dtb.overlaps(&BlockRange::new(2169, 1)));
        assert_eq!(kernel.end(), 18951);
        assert_eq!(dtb.byte_len(), 121 * 512);
    }
}
