//! Global safety switch: close-only mode and the kill flag.
//!
//! Level 5 of the escalation invokes both. The order-entry path (outside
//! this crate) reads the flags before accepting new entries.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::error;

/// Global trading safety controls.
pub trait SafetySwitch: Send + Sync {
    /// Block new entries while still permitting exits.
    fn enter_close_only_mode(&self);

    /// Raise the global kill flag.
    fn raise_kill_flag(&self);

    /// Whether close-only mode is active.
    fn is_close_only(&self) -> bool;

    /// Whether the kill flag has been raised.
    fn is_kill_flag_raised(&self) -> bool;
}

/// Process-wide safety switch backed by atomic flags.
///
/// Both transitions are idempotent and latch: once raised, a flag stays
/// raised until operator intervention restarts the process.
#[derive(Debug, Default)]
pub struct TradingSafetySwitch {
    close_only: AtomicBool,
    kill_flag: AtomicBool,
}

impl TradingSafetySwitch {
    /// Create a switch with both flags lowered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SafetySwitch for TradingSafetySwitch {
    fn enter_close_only_mode(&self) {
        if !self.close_only.swap(true, Ordering::SeqCst) {
            error!("Close-only mode activated: new entries are blocked");
        }
    }

    fn raise_kill_flag(&self) {
        if !self.kill_flag.swap(true, Ordering::SeqCst) {
            error!("Global kill flag raised");
        }
    }

    fn is_close_only(&self) -> bool {
        self.close_only.load(Ordering::SeqCst)
    }

    fn is_kill_flag_raised(&self) -> bool {
        self.kill_flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_start_lowered() {
        let switch = TradingSafetySwitch::new();
        assert!(!switch.is_close_only());
        assert!(!switch.is_kill_flag_raised());
    }

    #[test]
    fn test_enter_close_only_latches() {
        let switch = TradingSafetySwitch::new();
        switch.enter_close_only_mode();
        switch.enter_close_only_mode();
        assert!(switch.is_close_only());
        assert!(!switch.is_kill_flag_raised());
    }

    #[test]
    fn test_raise_kill_flag_latches() {
        let switch = TradingSafetySwitch::new();
        switch.raise_kill_flag();
        switch.raise_kill_flag();
        assert!(switch.is_kill_flag_raised());
    }
}
