//! Session, buffering, and flow-control core of a serial-over-USB adaptor.
//!
//! This library provides the host-facing half of a USB serial adaptor driver:
//! exclusive port acquisition, a watchable state word, paired circular
//! byte queues with watermark-driven flow control, an in-band parity-error
//! channel, and an ioctl-style event interface. The device-facing half plugs
//! in behind the [`transport::UsbTransport`] trait.
//!
//! # Modules
//!
//! - `port`: the [`Port`] itself, session dispatch and the data path
//! - `state`: the state-bit word and flow-control mode set
//! - `config`: line configuration, watermarks, and tunables
//! - `events`: the typed event/query surface
//! - `queue`: the circular byte queue
//! - `watch`: blocking state observation
//! - `transport`: the device seam, plus a recording mock for tests
//! - `error`: the error taxonomy

pub mod config;
pub mod error;
pub mod events;
mod flow;
pub mod port;
pub mod queue;
pub mod state;
pub mod transport;
mod watch;

// Re-export commonly used types for convenience
pub use config::{LineConfig, Parity, PortOptions, RxParity, Watermarks};
pub use error::{PortError, PortResult, TransferError};
pub use events::{PortEvent, PortQuery, RxEvent};
pub use port::Port;
pub use queue::CircularQueue;
pub use state::{FlowMode, StateBits};
pub use transport::{MockTransport, UsbTransport};
