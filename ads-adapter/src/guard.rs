//! Overload guard for the async connect/disconnect/poll operations.
//!
//! The transport does not always signal a broken connection promptly, so
//! an externally driven polling timer can fire faster than the network
//! round trip and pile up concurrent operations. The guard is a coarse
//! non-blocking mutual exclusion with an escalation policy: denied
//! operations are dropped, never queued, and repeated denials escalate to
//! a hard transport reset.

/// Consecutive denials before the guard escalates.
pub const OVERLOAD_LIMIT: u32 = 3;

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// The caller owns the guard and must call [`OverloadGuard::release`].
    Granted,
    /// Another operation is in flight; drop this one.
    Busy,
    /// Denial limit reached: force-close the transport, then drop this
    /// operation. The reset will drive a disconnect/reconnect cycle.
    Overloaded,
}

/// Operation-agnostic overload state, one per device instance.
#[derive(Debug, Default)]
pub struct OverloadGuard {
    working: bool,
    overloading: u32,
}

impl OverloadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to start an operation.
    pub fn acquire(&mut self) -> GuardDecision {
        if self.working {
            self.overloading += 1;
            if self.overloading >= OVERLOAD_LIMIT {
                // Re-arm so a stuck operation keeps tripping the breaker.
                self.overloading = 0;
                GuardDecision::Overloaded
            } else {
                GuardDecision::Busy
            }
        } else {
            self.working = true;
            self.overloading = 0;
            GuardDecision::Granted
        }
    }

    /// Mark the current operation as finished.
    pub fn release(&mut self) {
        self.working = false;
        self.overloading = 0;
    }

    pub fn is_working(&self) -> bool {
        self.working
    }
}
