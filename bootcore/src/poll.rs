//! Bounded busy-waiting.
//!
//! Every wait on hardware in the loader goes through [`wait_until`], so no
//! unresponsive peripheral can hang the boot without a report.

use crate::traits::Timer;

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
}

/// A point in time measured on a [`Timer`].
pub struct Deadline<'t, T: Timer + ?Sized> {
    timer: &'t T,
    start: u64,
    ticks: u64,
}

impl<'t, T: Timer + ?Sized> Deadline<'t, T> {
    pub fn after_ms(timer: &'t T, ms: u32) -> Self {
        Self {
            timer,
            start: timer.ticks(),
            ticks: timer.ms_to_ticks(ms),
        }
    }

    pub fn expired(&self) -> bool {
        self.timer.ticks().wrapping_sub(self.start) >= self.ticks
    }
}

/// Poll `ready` until it reports true, fails, or `timeout_ms` passes.
///
/// `ready` is always called at least once, and once more after the
/// deadline, so a condition that turns true late is not misreported.
pub fn wait_until<T, E, F>(timer: &T, timeout_ms: u32, mut ready: F) -> Result<WaitOutcome, E>
where
    T: Timer + ?Sized,
    F: FnMut() -> Result<bool, E>,
{
    let deadline = Deadline::after_ms(timer, timeout_ms);
    loop {
        let expired = deadline.expired();
        if ready()? {
            return Ok(WaitOutcome::Ready);
        }
        if expired {
            return Ok(WaitOutcome::TimedOut);
        }
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTimer;

    #[test]
    fn test_ready_immediately() {
        let timer = SimTimer::new();
        let mut calls = 0;
        let outcome = wait_until::<_, (), _>(&timer, 10, || {
            calls += 1;
            Ok(true)
        });
        assert_eq!(outcome, Ok(WaitOutcome::Ready));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_times_out() {
        let timer = SimTimer::new();
        let mut calls = 0u32;
        let outcome = wait_until::<_, (), _>(&timer, 10, || {
            calls += 1;
            Ok(false)
        });
        assert_eq!(outcome, Ok(WaitOutcome::TimedOut));
        assert!(calls >= 2);
        assert!(calls <= 12);
    }

    #[test]
    fn test_error_stops_wait() {
        let timer = SimTimer::new();
        let outcome = wait_until(&timer, 10, || Err::<bool, _>("card gone"));
        assert_eq!(outcome, Err("card gone"));
    }

    #[test]
    fn test_zero_timeout_still_polls_once() {
        let timer = SimTimer::new();
        let outcome = wait_until::<_, (), _>(&timer, 0, || Ok(true));
        assert_eq!(outcome, Ok(WaitOutcome::Ready));
    }

    #[test]
    fn test_deadline() {
        let timer = SimTimer::new();
        let deadline = Deadline::after_ms(&timer, 3);
        assert!(!deadline.expired());
        timer.advance(3);
        assert!(deadline.expired());
    }
}
