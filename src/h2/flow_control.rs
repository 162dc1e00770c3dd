//! Flow control windows (RFC 9113 Section 5.2)
//!
//! A window is signed. Lowering SETTINGS_INITIAL_WINDOW_SIZE shifts every
//! stream window by the difference, so bytes already in flight can leave a
//! send window below zero; DATA waits until WINDOW_UPDATEs bring it back
//! above zero.

use super::error::{Error, Result};
use super::settings::MAX_WINDOW_SIZE;
use super::DEFAULT_INITIAL_WINDOW_SIZE;

/// One direction of credit for a stream or the connection
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    /// SETTINGS_INITIAL_WINDOW_SIZE this window currently tracks
    initial_size: u32,
    /// Remaining credit; negative after the initial size shrinks
    size: i64,
}

impl FlowControlWindow {
    /// Full window of `initial_size` bytes
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            size: i64::from(initial_size),
        }
    }

    /// Current credit, possibly negative
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Initial size the window was last aligned to
    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Zero while the window is exhausted or negative
    pub fn available(&self) -> usize {
        usize::try_from(self.size).unwrap_or(0)
    }

    /// Take up to `amount` bytes of credit and return how much was taken
    pub fn consume(&mut self, amount: usize) -> usize {
        let granted = amount.min(self.available());
        self.size -= granted as i64;
        granted
    }

    /// Credit from a WINDOW_UPDATE; returns the new size.
    ///
    /// A zero increment is a protocol error. Growing past 2^31-1 is a flow
    /// control error and leaves the window as it was.
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol("WINDOW_UPDATE with a zero increment".to_string()));
        }
        self.size = checked_window(self.size + i64::from(increment))?;
        Ok(self.size)
    }

    /// Follow a new SETTINGS_INITIAL_WINDOW_SIZE. The result may be negative.
    pub fn update_initial_size(&mut self, initial_size: u32) -> Result<()> {
        let delta = i64::from(initial_size) - i64::from(self.initial_size);
        self.size = checked_window(self.size + delta)?;
        self.initial_size = initial_size;
        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }
}

fn checked_window(size: i64) -> Result<i64> {
    if size > i64::from(MAX_WINDOW_SIZE) {
        return Err(Error::FlowControl(format!("window would grow to {}", size)));
    }
    Ok(size)
}

/// The pair of windows kept for a stream or for the connection
#[derive(Debug, Clone, Default)]
pub struct FlowControl {
    /// Credit the peer gave us for outbound DATA
    pub send: FlowControlWindow,
    /// Credit we gave the peer
    pub recv: FlowControlWindow,
}

impl FlowControl {
    /// Windows with the given initial sizes
    pub fn new(send_size: u32, recv_size: u32) -> Self {
        FlowControl {
            send: FlowControlWindow::with_initial_size(send_size),
            recv: FlowControlWindow::with_initial_size(recv_size),
        }
    }

    /// Charge an inbound DATA frame to the receive window. A frame larger
    /// than the remaining window is refused and nothing is charged.
    pub fn receive(&mut self, amount: usize) -> Result<()> {
        let window = self.recv.size();
        if (amount as i64) > window {
            return Err(Error::FlowControl(format!(
                "peer sent {} bytes against a window of {}",
                amount, window
            )));
        }
        self.recv.size -= amount as i64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_is_capped_by_window() {
        let mut window = FlowControlWindow::with_initial_size(1000);

        assert_eq!(window.consume(500), 500);
        assert_eq!(window.consume(700), 500);
        assert_eq!(window.size(), 0);
        assert_eq!(window.consume(1), 0);
    }

    #[test]
    fn test_increase_rejects_zero_and_overflow() {
        let mut window = FlowControlWindow::with_initial_size(1000);
        window.consume(500);

        assert_eq!(window.increase(300).unwrap(), 800);
        assert!(matches!(window.increase(0), Err(Error::Protocol(_))));
        assert!(matches!(window.increase(MAX_WINDOW_SIZE), Err(Error::FlowControl(_))));
        assert_eq!(window.size(), 800);
    }

    #[test]
    fn test_lower_initial_size_can_go_negative() {
        let mut window = FlowControlWindow::default();
        window.consume(60000);

        window.update_initial_size(1000).unwrap();
        assert_eq!(window.size(), -59000);
        assert_eq!(window.available(), 0);
        assert_eq!(window.consume(10), 0);

        window.increase(60000).unwrap();
        assert_eq!(window.size(), 1000);
    }

    #[test]
    fn test_initial_size_change_past_maximum_is_refused() {
        let mut window = FlowControlWindow::default();
        window.increase(MAX_WINDOW_SIZE - 65535).unwrap();
        assert!(window.update_initial_size(65536).is_err());
        assert_eq!(window.initial_size(), 65535);
        assert_eq!(window.size(), i64::from(MAX_WINDOW_SIZE));
    }

    #[test]
    fn test_receive_refuses_overrun() {
        let mut flow = FlowControl::new(65535, 100);
        flow.receive(60).unwrap();
        assert!(flow.receive(41).is_err());
        assert_eq!(flow.recv.size(), 40);
        flow.receive(40).unwrap();
        assert_eq!(flow.recv.size(), 0);
    }
}
