//! Flow-control windows.
//!
//! Each direction of a connection has one connection-level window and
//! one window per stream. Windows are signed: a SETTINGS change that
//! lowers the initial window size can push a stream window below zero.

use super::frame::{DEFAULT_INITIAL_WINDOW_SIZE, Reason};

/// Maximum window size: 2^31 - 1.
pub const MAX_WINDOW_SIZE: i64 = (1 << 31) - 1;

/// Minimum window size after a retroactive SETTINGS adjustment: -(2^31).
pub const MIN_WINDOW_SIZE: i64 = -(1 << 31);

/// A signed byte credit governing DATA frame transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    window: i64,
}

impl FlowControl {
    #[must_use]
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    #[must_use]
    pub fn with_initial_size(size: u32) -> Self {
        Self {
            window: i64::from(size),
        }
    }

    /// Currently available credit. Negative when a SETTINGS change
    /// shrank the window below what is already in flight.
    #[must_use]
    pub fn available(&self) -> i64 {
        self.window
    }

    /// Grow the window by a WINDOW_UPDATE increment.
    pub fn inc(&mut self, increment: u32) -> Result<(), Reason> {
        let next = self.window + i64::from(increment);
        if next > MAX_WINDOW_SIZE {
            tracing::debug!(window = self.window, increment, "window increment overflows");
            return Err(Reason::FLOW_CONTROL_ERROR);
        }
        self.window = next;
        Ok(())
    }

    /// Consume credit for `n` transferred octets. Fails when the peer
    /// sent more than the window allowed.
    pub fn dec(&mut self, n: u32) -> Result<(), Reason> {
        let n = i64::from(n);
        if n > self.window {
            tracing::debug!(window = self.window, n, "window underflow");
            return Err(Reason::FLOW_CONTROL_ERROR);
        }
        self.window -= n;
        Ok(())
    }

    /// Retroactive SETTINGS_INITIAL_WINDOW_SIZE adjustment. The window
    /// may legally go negative; crossing ±2^31 is a connection error.
    pub fn apply_delta(&mut self, delta: i64) -> Result<(), Reason> {
        let next = self.window + delta;
        if !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&next) {
            return Err(Reason::FLOW_CONTROL_ERROR);
        }
        self.window = next;
        Ok(())
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_default_initial_window() {
        assert_eq!(FlowControl::new().available(), 65_535);
    }

    #[test]
    fn increments_and_decrements() {
        let mut flow = FlowControl::new();
        flow.inc(0x8000).unwrap();
        assert_eq!(flow.available(), 65_535 + 0x8000);
        flow.dec(100).unwrap();
        assert_eq!(flow.available(), 65_535 + 0x8000 - 100);
    }

    #[test]
    fn overflow_is_a_flow_control_error() {
        let mut flow = FlowControl::with_initial_size((MAX_WINDOW_SIZE - 10) as u32);
        assert_eq!(flow.inc(11), Err(Reason::FLOW_CONTROL_ERROR));
    }

    #[test]
    fn underflow_is_a_flow_control_error() {
        let mut flow = FlowControl::with_initial_size(10);
        assert_eq!(flow.dec(11), Err(Reason::FLOW_CONTROL_ERROR));
    }

    #[test]
    fn settings_delta_may_go_negative() {
        let mut flow = FlowControl::with_initial_size(100);
        flow.dec(80).unwrap();
        flow.apply_delta(-50).unwrap();
        assert_eq!(flow.available(), -30);
        flow.apply_delta(50).unwrap();
        assert_eq!(flow.available(), 20);
    }

    #[test]
    fn settings_delta_overflow_is_rejected() {
        let mut flow = FlowControl::with_initial_size(0);
        assert!(flow.apply_delta(MAX_WINDOW_SIZE + 1).is_err());
        assert!(flow.apply_delta(MIN_WINDOW_SIZE - 1).is_err());
    }
}
