//! Single-flight guard for session initialization

use std::sync::atomic::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const IN_FLIGHT: u8 = 1;
/// In flight, but released meanwhile; the commit will not stick
const REVOKED: u8 = 2;
const COMMITTED: u8 = 3;

/// Check-and-set flag allowing one initialization at a time
///
/// A held [`FlightGuard`] always blocks further acquires. The flag stays
/// set after a committed initialization and is cleared by
/// [`SingleFlight::release`] on disconnect or reset. Releasing during an
/// outstanding flight only marks it, so the flight ends idle instead of
/// committed.
#[derive(Debug, Default)]
pub struct SingleFlight {
    state: AtomicU8,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag, or `None` if it is already set
    pub fn try_acquire(&self) -> Option<FlightGuard<'_>> {
        self.state
            .compare_exchange(IDLE, IN_FLIGHT, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                state: &self.state,
                committed: false,
            })
    }

    pub fn release(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| match state {
                COMMITTED => Some(IDLE),
                IN_FLIGHT => Some(REVOKED),
                _ => None,
            });
    }

    /// In flight or committed
    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), IN_FLIGHT | REVOKED)
    }

    pub fn is_committed(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMMITTED
    }
}

/// Clears the flag on drop unless committed
#[derive(Debug)]
pub struct FlightGuard<'a> {
    state: &'a AtomicU8,
    committed: bool,
}

impl FlightGuard<'_> {
    /// Keep the flag set after the guard goes away; `false` when the
    /// flight was released meanwhile and the flag went back to idle
    pub fn commit(mut self) -> bool {
        self.committed = true;
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| match state {
                IN_FLIGHT => Some(COMMITTED),
                _ => Some(IDLE),
            });
        previous == Ok(IN_FLIGHT)
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.state.store(IDLE, Ordering::Release);
        }
    }
}
