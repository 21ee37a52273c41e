//! Flow-control policy engine.
//!
//! [`recompute`] is the single place queue occupancy turns into state bits
//! and automatic flow-control transitions. It runs after every mutation of
//! either queue, always deriving the asserted-signal state fresh from queue
//! depth instead of accumulating it incrementally, so queue depth and signal
//! state cannot drift apart.
//!
//! Nothing here blocks or calls the transport. Side effects are described by
//! the returned [`Effects`] and performed by the dispatcher after the port
//! lock is released.

use tracing::{debug, trace};

use crate::port::PortInner;
use crate::state::StateBits;

/// Deferred side effects of a state transition.
///
/// The dispatcher applies these outside the lock: wake watchers, poke the
/// transmitter, push line signals to the device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Effects {
    /// Bits that changed.
    pub delta: StateBits,
    /// A changed bit intersected the watch mask; wake all waiters.
    pub wake: bool,
    /// Flow control queued a byte (XON/XOFF) that needs the transmitter
    /// started.
    pub kick_tx: bool,
    /// DTR or RFR changed; push `(dtr, rts)` to the device exactly once.
    pub line_signals: Option<(bool, bool)>,
}

impl Effects {
    pub(crate) fn merge(self, other: Effects) -> Effects {
        Effects {
            delta: self.delta | other.delta,
            wake: self.wake || other.wake,
            kick_tx: self.kick_tx || other.kick_tx,
            line_signals: other.line_signals.or(self.line_signals),
        }
    }
}

/// Store `new_state` as the port state and derive the wakeup/side-effect set
/// from the delta against the old word.
pub(crate) fn commit_state(inner: &mut PortInner, new_state: StateBits) -> Effects {
    let delta = new_state ^ inner.state;
    if !delta.is_empty() {
        trace!(old = ?inner.state, new = ?new_state, ?delta, "state transition");
    }
    inner.state = new_state;

    let wake = !(delta & inner.watch_mask).is_empty();
    let line_signals = if delta.intersects(StateBits::DTR | StateBits::RFR) {
        Some((
            new_state.contains(StateBits::DTR),
            new_state.contains(StateBits::RFR),
        ))
    } else {
        None
    };
    Effects {
        delta,
        wake,
        kick_tx: false,
        line_signals,
    }
}

/// Recompute queue-threshold state bits and automatic flow-control
/// transitions from current queue occupancy.
///
/// Idempotent: with no queue mutation between two calls the second produces
/// no additional side effects.
pub(crate) fn recompute(inner: &mut PortInner) -> Effects {
    let mut state = inner.state;
    let mut kick_tx = false;

    // Transmit side: occupancy flags only.
    let used = inner.tx.used_space();
    let free = inner.tx.free_space();
    state.set(StateBits::TXQ_FULL, free == 0);
    state.set(StateBits::TXQ_EMPTY, free != 0 && used == 0);
    state.set(StateBits::TXQ_LOW_WATER, used < inner.tx_marks.low_water);
    state.set(StateBits::TXQ_HIGH_WATER, used > inner.tx_marks.high_water);

    // Receive side: occupancy flags plus automatic flow control.
    let used = inner.rx.used_space();
    let free = inner.rx.free_space();
    state.set(StateBits::RXQ_FULL, free == 0);
    state.set(StateBits::RXQ_EMPTY, free != 0 && used == 0);

    let software = inner.flow.contains(crate::state::FlowMode::AUTO_RX_XONXOFF);
    let auto_rts = inner.flow.contains(crate::state::FlowMode::AUTO_RTS);
    let auto_dtr = inner.flow.contains(crate::state::FlowMode::AUTO_DTR);

    if used < inner.rx_marks.low_water {
        // Under low water: release any active automatic flow control.
        if software && inner.xoff_sent {
            debug!(xon = inner.xon_char, "rx under low water, queueing XON");
            inner.xoff_sent = false;
            let _ = inner.tx.push_byte(inner.xon_char);
            kick_tx = true;
        }
        if auto_rts && !inner.rts_asserted {
            debug!("rx under low water, reasserting RTS");
            inner.rts_asserted = true;
            state |= StateBits::RFR;
        }
        if auto_dtr && !inner.dtr_asserted {
            debug!("rx under low water, reasserting DTR");
            inner.dtr_asserted = true;
            state |= StateBits::DTR;
        }
        state |= StateBits::RXQ_LOW_WATER;
    } else {
        state -= StateBits::RXQ_LOW_WATER;
    }

    if used > inner.rx_marks.high_water {
        // Over high water: block with whatever flow control is enabled.
        if software && !inner.xoff_sent {
            debug!(xoff = inner.xoff_char, "rx over high water, queueing XOFF");
            inner.xoff_sent = true;
            let _ = inner.tx.push_byte(inner.xoff_char);
            kick_tx = true;
        }
        if auto_rts && inner.rts_asserted {
            debug!("rx over high water, deasserting RTS");
            inner.rts_asserted = false;
            state -= StateBits::RFR;
        }
        if auto_dtr && inner.dtr_asserted {
            debug!("rx over high water, deasserting DTR");
            inner.dtr_asserted = false;
            state -= StateBits::DTR;
        }
        state |= StateBits::RXQ_HIGH_WATER;
    } else {
        state -= StateBits::RXQ_HIGH_WATER;
    }

    let mut effects = commit_state(inner, state);
    effects.kick_tx = kick_tx;
    effects
}
