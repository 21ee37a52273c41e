//! The externally visible state-bit word and flow-control mode set.
//!
//! All bit manipulation in the crate is confined to this module plus the flow
//! and watch components; everything else deals in the typed wrappers.

use bitflags::bitflags;

bitflags! {
    /// One port's state word: session flags, queue-occupancy flags, and
    /// RS-232 signal bits.
    ///
    /// Consumers observe this word through `get_state`/`watch_state` and may
    /// mutate a filtered subset through `set_state`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StateBits: u32 {
        /// Exactly one handle holds the port.
        const ACQUIRED       = 1 << 0;
        /// The transport is enabled and the stream is usable.
        const ACTIVE         = 1 << 1;
        /// A transmission is in flight on the bulk-out side.
        const TX_BUSY        = 1 << 2;
        const TX_ENABLE      = 1 << 3;
        const RX_ENABLE      = 1 << 4;

        const TXQ_EMPTY      = 1 << 8;
        const TXQ_LOW_WATER  = 1 << 9;
        const TXQ_HIGH_WATER = 1 << 10;
        const TXQ_FULL       = 1 << 11;

        const RXQ_EMPTY      = 1 << 12;
        const RXQ_LOW_WATER  = 1 << 13;
        const RXQ_HIGH_WATER = 1 << 14;
        const RXQ_FULL       = 1 << 15;

        // RS-232 signal bits. CTS/DSR/RI/CAR are sampled from the line by the
        // transport and are read-only to consumers.
        const CTS            = 1 << 16;
        const DSR            = 1 << 17;
        const RI             = 1 << 18;
        const CAR            = 1 << 19;
        const DTR            = 1 << 20;
        /// Ready-for-receive (the RTS output line).
        const RFR            = 1 << 21;
        const BRK            = 1 << 22;
    }
}

impl StateBits {
    /// Queue-occupancy flags for the transmit side.
    pub const TXQ_MASK: StateBits = StateBits::TXQ_EMPTY
        .union(StateBits::TXQ_LOW_WATER)
        .union(StateBits::TXQ_HIGH_WATER)
        .union(StateBits::TXQ_FULL);

    /// Queue-occupancy flags for the receive side.
    pub const RXQ_MASK: StateBits = StateBits::RXQ_EMPTY
        .union(StateBits::RXQ_LOW_WATER)
        .union(StateBits::RXQ_HIGH_WATER)
        .union(StateBits::RXQ_FULL);

    /// Handshake inputs sampled by the transport; only the transport may
    /// update these.
    pub const HANDSHAKE_IN: StateBits = StateBits::CTS
        .union(StateBits::DSR)
        .union(StateBits::RI)
        .union(StateBits::CAR);

    /// Everything a consumer may observe through `get_state`.
    pub const EXTERNAL: StateBits = StateBits::all();

    /// State installed when a queue pair is first set up: both queues empty
    /// and below low water.
    pub const STREAM_DEFAULTS: StateBits = StateBits::TXQ_EMPTY
        .union(StateBits::TXQ_LOW_WATER)
        .union(StateBits::RXQ_EMPTY)
        .union(StateBits::RXQ_LOW_WATER);

    /// State installed by a successful acquire: both modem outputs start
    /// asserted, matching the flow engine's bookkeeping.
    pub const ACQUIRE_DEFAULTS: StateBits = StateBits::ACQUIRED
        .union(StateBits::TX_ENABLE)
        .union(StateBits::RX_ENABLE)
        .union(StateBits::DTR)
        .union(StateBits::RFR);
}

bitflags! {
    /// Which signals are under automatic control of the flow engine rather
    /// than manual `set_state` calls.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FlowMode: u32 {
        /// RTS/RFR toggled automatically on RX watermarks.
        const AUTO_RTS        = 1 << 0;
        /// DTR toggled automatically on RX watermarks.
        const AUTO_DTR        = 1 << 1;
        /// Inbound software flow control: send XOFF/XON on RX watermarks.
        const AUTO_RX_XONXOFF = 1 << 2;
        /// Honor CTS before transmitting.
        const AUTO_CTS        = 1 << 3;
        /// Honor DSR before transmitting.
        const AUTO_DSR        = 1 << 4;
        /// Outbound software flow control: pause TX on received XOFF.
        const AUTO_TX_XONXOFF = 1 << 5;
        /// Honor carrier detect before transmitting.
        const AUTO_DCD        = 1 << 6;
    }
}

impl FlowMode {
    /// Flow-control modes installed on every acquire.
    pub const DEFAULTS: FlowMode = FlowMode::AUTO_DTR
        .union(FlowMode::AUTO_RTS)
        .union(FlowMode::AUTO_CTS)
        .union(FlowMode::AUTO_DSR);

    /// The signal bits in the state word this mode set makes read-only to
    /// `set_state` callers.
    pub fn read_only_bits(self) -> StateBits {
        let mut bits = StateBits::empty();
        if self.contains(FlowMode::AUTO_RTS) {
            bits |= StateBits::RFR;
        }
        if self.contains(FlowMode::AUTO_DTR) {
            bits |= StateBits::DTR;
        }
        bits
    }
}

/// Select between bits of `a` and `b`: where `mask` is set take `b`, else `a`.
pub(crate) fn mask_mux(a: StateBits, b: StateBits, mask: StateBits) -> StateBits {
    (a - mask) | (b & mask)
}
