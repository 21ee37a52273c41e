//! Abstraction over the packetized USB transport.
//!
//! The core never touches pipes or endpoints. Everything device-shaped goes
//! through [`UsbTransport`], which lets both real adaptors and the mock in
//! [`mock`] be used interchangeably — the same seam the rest of the host
//! driver plugs into.

mod mock;

pub use mock::MockTransport;

use crate::config::LineConfig;

/// Side-effect interface the flow-control and dispatch layers drive.
///
/// Implementations must not call back into the port synchronously from these
/// methods; the port invokes them with its lock released, and the read/write
/// completion surface (`on_read_complete`, `take_tx_data`,
/// `on_write_complete`) is the intended re-entry path.
///
/// Failures are reported, logged by the core, and otherwise ignored: a device
/// that stops answering control requests is handled by termination, not by
/// unwinding a flow-control decision.
pub trait UsbTransport: Send + Sync + std::fmt::Debug {
    /// Push the modem control outputs to the device.
    fn push_line_signals(&self, dtr: bool, rts: bool) -> std::io::Result<()>;

    /// Program baud rate, character size, stop bits, and parity.
    fn apply_line_config(&self, config: &LineConfig) -> std::io::Result<()>;

    /// Assert or release the line-break signal.
    fn set_break(&self, on: bool) -> std::io::Result<()>;

    /// The session count crossed zero: enable or disable the transport.
    fn notify_activation(&self, active: bool) -> std::io::Result<()>;

    /// The TX queue has data and no transmission is in flight. The transport
    /// should pull bytes with `Port::take_tx_data`, write them, and report
    /// back through `Port::on_write_complete`.
    fn transmit_ready(&self);
}
