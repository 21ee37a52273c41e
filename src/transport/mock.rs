//! Mock transport for testing.
//!
//! Records every collaborator call the core makes so tests can assert on
//! line-signal pushes, configuration reloads, and transmitter kicks without
//! hardware.

use parking_lot::Mutex;
use std::sync::Arc;

use super::UsbTransport;
use crate::config::LineConfig;

#[derive(Debug, Default)]
struct MockState {
    line_signals: Vec<(bool, bool)>,
    configs: Vec<LineConfig>,
    breaks: Vec<bool>,
    activations: Vec<bool>,
    transmit_kicks: usize,
    fail_io: bool,
}

/// Mock implementation of [`UsbTransport`].
///
/// Cloning shares the underlying log, so a test can hand one clone to the
/// port and keep the other for assertions.
///
/// # Example
/// ```
/// use uartstream::transport::{MockTransport, UsbTransport};
///
/// let mock = MockTransport::new();
/// mock.push_line_signals(true, false).unwrap();
/// assert_eq!(mock.line_signal_log(), vec![(true, false)]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(dtr, rts)` pair pushed, in order.
    pub fn line_signal_log(&self) -> Vec<(bool, bool)> {
        self.state.lock().line_signals.clone()
    }

    /// Every line configuration applied, in order.
    pub fn config_log(&self) -> Vec<LineConfig> {
        self.state.lock().configs.clone()
    }

    pub fn break_log(&self) -> Vec<bool> {
        self.state.lock().breaks.clone()
    }

    pub fn activation_log(&self) -> Vec<bool> {
        self.state.lock().activations.clone()
    }

    /// How many times the core asked for a transmission to start.
    pub fn transmit_kicks(&self) -> usize {
        self.state.lock().transmit_kicks
    }

    /// Make subsequent collaborator calls fail with an I/O error. The core
    /// is expected to log and carry on.
    pub fn set_fail_io(&self, fail: bool) {
        self.state.lock().fail_io = fail;
    }

    pub fn clear_logs(&self) {
        let mut state = self.state.lock();
        state.line_signals.clear();
        state.configs.clear();
        state.breaks.clear();
        state.activations.clear();
        state.transmit_kicks = 0;
    }

    fn io_result(&self) -> std::io::Result<()> {
        if self.state.lock().fail_io {
            Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock transport failure",
            ))
        } else {
            Ok(())
        }
    }
}

impl UsbTransport for MockTransport {
    fn push_line_signals(&self, dtr: bool, rts: bool) -> std::io::Result<()> {
        self.state.lock().line_signals.push((dtr, rts));
        self.io_result()
    }

    fn apply_line_config(&self, config: &LineConfig) -> std::io::Result<()> {
        self.state.lock().configs.push(config.clone());
        self.io_result()
    }

    fn set_break(&self, on: bool) -> std::io::Result<()> {
        self.state.lock().breaks.push(on);
        self.io_result()
    }

    fn notify_activation(&self, active: bool) -> std::io::Result<()> {
        self.state.lock().activations.push(active);
        self.io_result()
    }

    fn transmit_ready(&self) {
        self.state.lock().transmit_kicks += 1;
    }
}
