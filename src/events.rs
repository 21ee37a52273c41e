//! Typed event and query surface of the port.
//!
//! The stream layer above the driver speaks an ioctl-style interface;
//! `PortEvent` covers the mutating commands and `PortQuery` the read-only
//! probes. `RxEvent` describes what is next in the receive queue.

use crate::config::{Parity, RxParity};
use crate::state::FlowMode;

/// Commands dispatched through `execute_event`.
///
/// Every command requires the port to be acquired. Configuration changes are
/// validated before they touch the stored config and re-apply the line
/// configuration to the device on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEvent {
    /// Reconfigure the XON byte.
    XonByte(u8),
    /// Reconfigure the XOFF byte.
    XoffByte(u8),
    /// Mark a byte value as special in the software flow-control bitmap.
    SpecialByte(u8),
    /// Clear a byte value from the special bitmap.
    ValidDataByte(u8),
    /// Replace the flow-control mode set, unblocking anything the departing
    /// modes held back.
    FlowControl(FlowMode),
    /// Activate or deactivate the port.
    Active(bool),
    /// Baud rate in bits per second.
    DataRate(u32),
    /// Character length in bits, 5 through 8.
    DataSize(u8),
    /// Stop bits in half-bit units, 0 through 20.
    StopBits(u8),
    /// Transmit parity; also resets receive parity to `Default`.
    DataIntegrity(Parity),
    /// Receive parity handling.
    RxDataIntegrity(RxParity),
    /// Drop everything in the receive queue.
    RxqFlush,
    /// Drop everything in the transmit queue.
    TxqFlush,
    /// Assert or release the line-break signal.
    LineBreak(bool),
}

/// Read-only queries answered by `request_event`.
///
/// Replies are plain `u32` values: booleans as 0/1, byte values zero-extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortQuery {
    Active,
    FlowControl,
    TxqSize,
    RxqSize,
    TxqAvailable,
    RxqAvailable,
    DataRate,
    DataSize,
    StopBits,
    DataIntegrity,
    RxDataIntegrity,
    XonByte,
    XoffByte,
    LineBreak,
}

/// What `next_event` found at the head of the receive queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxEvent {
    /// Nothing queued.
    Empty,
    /// Ordinary data is next.
    ValidData,
    /// The next bytes are a parity-error marker; the byte before it arrived
    /// damaged.
    IntegrityError,
}
