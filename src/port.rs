//! The port: session state machine and serialized dispatch.
//!
//! Every state-mutating operation — acquire, release, set-state, events,
//! enqueue, dequeue, and the transport's completion callbacks — funnels
//! through one `Mutex<PortInner>`. Holding the lock is the serialized
//! execution context; blocking waits park on the condition variable keyed to
//! the state word and hold no lock while asleep. Wakeups and transport side
//! effects are issued after the lock is dropped so no thread wakes into
//! contention and the transport can re-enter through the completion surface
//! without deadlocking.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::config::{LineConfig, PortOptions, RxParity, Watermarks, XOFF_CHAR, XON_CHAR};
use crate::error::{PortError, PortResult, TransferError};
use crate::events::{PortEvent, PortQuery, RxEvent};
use crate::flow::{self, Effects};
use crate::queue::CircularQueue;
use crate::state::{mask_mux, FlowMode, StateBits};
use crate::transport::UsbTransport;

/// The escape byte of the parity-error channel. A literal 0xFF is doubled on
/// the way into RX; `0xFF, 0x00` marks a parity error on the previous byte.
const STUFF_ESCAPE: u8 = 0xFF;
const STUFF_MARKER: u8 = 0x00;

/// Everything the port lock protects.
#[derive(Debug)]
pub(crate) struct PortInner {
    pub(crate) state: StateBits,
    /// Union of the bits any currently blocked waiter cares about. Cleared
    /// and rebuilt on every wakeup round.
    pub(crate) watch_mask: StateBits,
    pub(crate) rx: CircularQueue,
    pub(crate) tx: CircularQueue,
    pub(crate) rx_marks: Watermarks,
    pub(crate) tx_marks: Watermarks,
    pub(crate) config: LineConfig,
    pub(crate) flow: FlowMode,
    pub(crate) xon_char: u8,
    pub(crate) xoff_char: u8,
    pub(crate) xoff_sent: bool,
    pub(crate) rts_asserted: bool,
    pub(crate) dtr_asserted: bool,
    /// A transmission is in flight; gates `transmit_ready` kicks.
    pub(crate) transmitting: bool,
    pub(crate) break_state: bool,
    /// Bitmap of byte values marked "special" for software flow control.
    pub(crate) special: [u32; 8],
    pub(crate) sessions: u32,
    pub(crate) terminated: bool,
    /// Bumped by `cancel_waiters`; blocked waits compare epochs on wake.
    pub(crate) cancel_epoch: u64,
    /// When RX last received bytes; drives the single-byte grace window.
    pub(crate) last_fill: Option<Instant>,
}

impl PortInner {
    pub(crate) fn new(options: &PortOptions) -> Self {
        let marks = Watermarks::for_capacity(options.queue_capacity);
        Self {
            state: StateBits::STREAM_DEFAULTS,
            watch_mask: StateBits::empty(),
            rx: CircularQueue::new(options.queue_capacity),
            tx: CircularQueue::new(options.queue_capacity),
            rx_marks: marks,
            tx_marks: marks,
            config: LineConfig::default(),
            flow: FlowMode::DEFAULTS,
            xon_char: XON_CHAR,
            xoff_char: XOFF_CHAR,
            xoff_sent: false,
            rts_asserted: true,
            dtr_asserted: true,
            transmitting: false,
            break_state: false,
            special: [0; 8],
            sessions: 0,
            terminated: false,
            cancel_epoch: 0,
            last_fill: None,
        }
    }

    /// Reinstall per-acquire defaults. Leaves the state word, queues, and
    /// session bookkeeping alone.
    pub(crate) fn reset_defaults(&mut self) {
        self.config = LineConfig::default();
        self.flow = FlowMode::DEFAULTS;
        self.xon_char = XON_CHAR;
        self.xoff_char = XOFF_CHAR;
        self.xoff_sent = false;
        self.rts_asserted = true;
        self.dtr_asserted = true;
        self.transmitting = false;
        self.break_state = false;
        self.special = [0; 8];
    }

    /// Pop from RX, honoring the single-byte grace window: a queue holding
    /// exactly one byte reads as empty until the cooldown after the last fill
    /// has passed, so a consumer cannot race the second byte of a stuffing
    /// pair.
    fn rx_pop(&mut self, cooldown: Duration) -> Option<u8> {
        if self.rx.used_space() == 1 {
            if let Some(filled) = self.last_fill {
                if filled.elapsed() < cooldown {
                    return None;
                }
            }
        }
        self.rx.pop_byte()
    }

    /// The two-byte marker is next in RX.
    fn marker_ahead(&self) -> bool {
        self.rx.peek_byte(0) == Some(STUFF_ESCAPE) && self.rx.peek_byte(1) == Some(STUFF_MARKER)
    }
}

/// One step of the unescaping RX drain.
enum RxStep {
    /// A parity-error marker is next; stop without consuming it.
    Marker,
    /// One unstuffed data byte.
    Byte(u8),
    Empty,
    /// An escape byte was consumed but its partner has not arrived yet.
    AwaitPartner,
}

fn rx_step(inner: &mut PortInner, cooldown: Duration) -> RxStep {
    if inner.marker_ahead() {
        return RxStep::Marker;
    }
    match inner.rx_pop(cooldown) {
        None => RxStep::Empty,
        Some(STUFF_ESCAPE) => match inner.rx_pop(cooldown) {
            // the partner of a doubled escape is the duplicate itself
            Some(_) => RxStep::Byte(STUFF_ESCAPE),
            None => RxStep::AwaitPartner,
        },
        Some(byte) => RxStep::Byte(byte),
    }
}

/// A serial port: POSIX-style stream semantics over a packetized transport.
///
/// Host-facing calls (`acquire`, `enqueue_data`, ...) may block; the
/// transport-facing completion surface (`on_read_complete`,
/// `on_write_complete`, `take_tx_data`, `sample_line_signals`) never does.
#[derive(Debug)]
pub struct Port {
    pub(crate) inner: Mutex<PortInner>,
    pub(crate) waiters: Condvar,
    transport: Box<dyn UsbTransport>,
    options: PortOptions,
}

impl Port {
    pub fn new(transport: Box<dyn UsbTransport>, options: PortOptions) -> Self {
        Self {
            inner: Mutex::new(PortInner::new(&options)),
            waiters: Condvar::new(),
            transport,
            options,
        }
    }

    pub fn with_defaults(transport: Box<dyn UsbTransport>) -> Self {
        Self::new(transport, PortOptions::default())
    }

    /// Open consumer handles on the port.
    pub fn session_count(&self) -> u32 {
        self.inner.lock().sessions
    }

    // ---- session state machine -------------------------------------------

    /// Take exclusive ownership of the port.
    ///
    /// Non-blocking calls on a busy port fail with `ExclusiveAccess`;
    /// blocking calls wait for the holder to release. The first session
    /// enables the transport.
    pub fn acquire(&self, sleep: bool) -> PortResult<()> {
        let mut guard = self.inner.lock();
        guard.reset_defaults();
        loop {
            if !guard.state.contains(StateBits::ACQUIRED) {
                let mut effects = flow::commit_state(&mut guard, StateBits::ACQUIRE_DEFAULTS);
                effects = effects.merge(flow::recompute(&mut guard));
                guard.sessions += 1;
                let first_session = guard.sessions == 1;
                if first_session {
                    guard.terminated = false;
                }
                drop(guard);
                debug!(first_session, "port acquired");
                self.settle(effects);
                if first_session {
                    if let Err(error) = self.transport.notify_activation(true) {
                        warn!(%error, "transport activation failed");
                    }
                }
                return Ok(());
            }
            if !sleep {
                debug!("non-blocking acquire on busy port");
                return Err(PortError::ExclusiveAccess);
            }
            drop(guard);
            match self.wait_for_bits(StateBits::empty(), StateBits::ACQUIRED, None) {
                // a release or a teardown both mean "try again"
                Ok(_) | Err(PortError::Offline) => {}
                Err(error) => {
                    debug!(%error, "blocking acquire aborted");
                    return Err(error);
                }
            }
            guard = self.inner.lock();
        }
    }

    /// Give the port back. Clears the whole state word, which deactivates
    /// the stream and wakes every watcher.
    pub fn release(&self) -> PortResult<()> {
        let mut guard = self.inner.lock();
        if !guard.state.contains(StateBits::ACQUIRED) {
            return Err(PortError::NotOpen);
        }
        let effects = flow::commit_state(&mut guard, StateBits::empty());
        guard.sessions = guard.sessions.saturating_sub(1);
        let last_session = guard.sessions == 0;
        drop(guard);
        debug!(last_session, "port released");
        self.settle(effects);
        if last_session {
            if let Err(error) = self.transport.notify_activation(false) {
                warn!(%error, "transport deactivation failed");
            }
        }
        Ok(())
    }

    /// Current externally visible state, with queue bits freshly derived.
    pub fn get_state(&self) -> StateBits {
        let mut guard = self.inner.lock();
        let effects = flow::recompute(&mut guard);
        let state = guard.state & StateBits::EXTERNAL;
        drop(guard);
        self.settle(effects);
        state
    }

    /// Set externally settable state bits under `mask`.
    ///
    /// Masks touching `ACQUIRED`/`ACTIVE` are rejected. Bits under automatic
    /// flow control and the sampled handshake inputs are silently dropped
    /// from the effective mask.
    pub fn set_state(&self, bits: StateBits, mask: StateBits) -> PortResult<()> {
        if mask.intersects(StateBits::ACQUIRED | StateBits::ACTIVE) {
            return Err(PortError::BadArgument);
        }
        let mut guard = self.inner.lock();
        if !guard.state.contains(StateBits::ACQUIRED) {
            return Err(PortError::NotOpen);
        }
        let effective = mask - guard.flow.read_only_bits() - StateBits::HANDSHAKE_IN;
        if effective.is_empty() {
            return Ok(());
        }
        let new_state = mask_mux(guard.state, bits, effective);
        let mut effects = flow::commit_state(&mut guard, new_state);
        effects = effects.merge(flow::recompute(&mut guard));
        drop(guard);
        self.settle(effects);
        Ok(())
    }

    /// The device departed. Marks the port offline and forces every blocked
    /// waiter to resolve rather than hang.
    pub fn set_terminated(&self) {
        let mut guard = self.inner.lock();
        guard.terminated = true;
        let new_state = guard.state - StateBits::ACTIVE;
        let effects = flow::commit_state(&mut guard, new_state);
        drop(guard);
        warn!("port terminated, waking all waiters");
        self.settle(effects);
        // waiters whose masks carry the implicit active bit re-check even if
        // the active bit was already clear
        self.waiters.notify_all();
    }

    // ---- events ----------------------------------------------------------

    /// What is next in the receive queue, without consuming anything.
    pub fn next_event(&self) -> RxEvent {
        let guard = self.inner.lock();
        if guard.marker_ahead() {
            RxEvent::IntegrityError
        } else if guard.rx.is_empty() {
            RxEvent::Empty
        } else {
            RxEvent::ValidData
        }
    }

    /// Consume past the head of RX: a marker is discarded and reported, a
    /// data byte is unstuffed and returned.
    pub fn dequeue_event(&self) -> PortResult<(RxEvent, Option<u8>)> {
        let mut guard = self.inner.lock();
        if !guard.state.contains(StateBits::ACTIVE) {
            return Err(PortError::NotOpen);
        }
        let cooldown = self.options.last_byte_cooldown;
        match rx_step(&mut guard, cooldown) {
            RxStep::Marker => {
                guard.rx.pop_byte();
                guard.rx.pop_byte();
                let effects = flow::recompute(&mut guard);
                drop(guard);
                self.settle(effects);
                Ok((RxEvent::IntegrityError, None))
            }
            RxStep::Empty => Ok((RxEvent::Empty, None)),
            RxStep::Byte(byte) => {
                let effects = flow::recompute(&mut guard);
                drop(guard);
                self.settle(effects);
                Ok((RxEvent::ValidData, Some(byte)))
            }
            RxStep::AwaitPartner => {
                guard = self.await_stuffing_partner(guard)?;
                let effects = flow::recompute(&mut guard);
                drop(guard);
                self.settle(effects);
                Ok((RxEvent::ValidData, Some(STUFF_ESCAPE)))
            }
        }
    }

    /// Synchronous command dispatch for configuration and control events.
    pub fn execute_event(&self, event: PortEvent) -> PortResult<()> {
        let mut guard = self.inner.lock();
        if !guard.state.contains(StateBits::ACQUIRED) {
            return Err(PortError::NotOpen);
        }
        trace!(?event, "execute event");
        match event {
            PortEvent::XonByte(byte) => guard.xon_char = byte,
            PortEvent::XoffByte(byte) => guard.xoff_char = byte,
            PortEvent::SpecialByte(byte) => {
                guard.special[usize::from(byte >> 5)] |= 1 << (byte & 31);
            }
            PortEvent::ValidDataByte(byte) => {
                guard.special[usize::from(byte >> 5)] &= !(1 << (byte & 31));
            }
            PortEvent::FlowControl(mode) => return self.switch_flow_mode(guard, mode),
            PortEvent::Active(on) => return self.set_active(guard, on),
            PortEvent::DataRate(baud) => {
                if baud < self.options.min_baud || baud > self.options.max_baud {
                    return Err(PortError::BadArgument);
                }
                guard.config.baud_rate = baud;
                return self.reapply_config(guard);
            }
            PortEvent::DataSize(bits) => {
                if !(5..=8).contains(&bits) {
                    return Err(PortError::BadArgument);
                }
                guard.config.char_length = bits;
                return self.reapply_config(guard);
            }
            PortEvent::StopBits(half_bits) => {
                if half_bits > 20 {
                    return Err(PortError::BadArgument);
                }
                guard.config.stop_bits = half_bits;
                return self.reapply_config(guard);
            }
            PortEvent::DataIntegrity(parity) => {
                guard.config.tx_parity = parity;
                guard.config.rx_parity = RxParity::Default;
                return self.reapply_config(guard);
            }
            PortEvent::RxDataIntegrity(parity) => guard.config.rx_parity = parity,
            PortEvent::RxqFlush => {
                guard.rx.reset();
                let effects = flow::recompute(&mut guard);
                drop(guard);
                self.settle(effects);
                return Ok(());
            }
            PortEvent::TxqFlush => {
                guard.tx.reset();
                let effects = flow::recompute(&mut guard);
                drop(guard);
                self.settle(effects);
                return Ok(());
            }
            PortEvent::LineBreak(on) => {
                guard.break_state = on;
                let bits = if on { StateBits::BRK } else { StateBits::empty() };
                let new_state = mask_mux(guard.state, bits, StateBits::BRK);
                let effects = flow::commit_state(&mut guard, new_state);
                drop(guard);
                self.settle(effects);
                if let Err(error) = self.transport.set_break(on) {
                    warn!(%error, "set_break failed");
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// Read-only query of configuration and queue metrics. Booleans are
    /// reported as 0/1; parity modes use their classic event codes.
    pub fn request_event(&self, query: PortQuery) -> u32 {
        let guard = self.inner.lock();
        match query {
            PortQuery::Active => u32::from(guard.state.contains(StateBits::ACTIVE)),
            PortQuery::FlowControl => guard.flow.bits(),
            PortQuery::TxqSize => guard.tx.capacity() as u32,
            PortQuery::RxqSize => guard.rx.capacity() as u32,
            PortQuery::TxqAvailable => guard.tx.free_space() as u32,
            PortQuery::RxqAvailable => guard.rx.used_space() as u32,
            PortQuery::DataRate => guard.config.baud_rate,
            PortQuery::DataSize => u32::from(guard.config.char_length),
            PortQuery::StopBits => u32::from(guard.config.stop_bits),
            PortQuery::DataIntegrity => match guard.config.tx_parity {
                crate::config::Parity::None => 1,
                crate::config::Parity::Odd => 2,
                crate::config::Parity::Even => 3,
                crate::config::Parity::Mark => 4,
                crate::config::Parity::Space => 5,
            },
            PortQuery::RxDataIntegrity => match guard.config.rx_parity {
                RxParity::Default => 1,
                RxParity::Any => 6,
            },
            PortQuery::XonByte => u32::from(guard.xon_char),
            PortQuery::XoffByte => u32::from(guard.xoff_char),
            PortQuery::LineBreak => u32::from(guard.state.contains(StateBits::BRK)),
        }
    }

    // ---- data path -------------------------------------------------------

    /// Copy as much of `buffer` into TX as fits and start transmission.
    ///
    /// With `sleep`, blocks on TX falling under low water and retries until
    /// everything is queued. Returns the number of bytes accepted; on an
    /// aborted wait the count rides in the error.
    pub fn enqueue_data(&self, buffer: &[u8], sleep: bool) -> Result<usize, TransferError> {
        let mut guard = self.inner.lock();
        if guard.terminated {
            return Err(PortError::Offline.into());
        }
        if !guard.state.contains(StateBits::ACTIVE) {
            return Err(PortError::NotOpen.into());
        }
        let mut count = guard.tx.push_bytes(buffer);
        let effects = flow::recompute(&mut guard);
        drop(guard);
        trace!(queued = count, total = buffer.len(), "enqueue");
        self.settle(effects);
        self.start_tx();

        while count < buffer.len() && sleep {
            match self.wait_for_bits(StateBits::TXQ_LOW_WATER, StateBits::TXQ_LOW_WATER, None) {
                Ok(_) => {}
                Err(error) => return Err(TransferError::new(count, error)),
            }
            let mut guard = self.inner.lock();
            if guard.terminated {
                return Err(TransferError::new(count, PortError::Offline));
            }
            count += guard.tx.push_bytes(&buffer[count..]);
            let effects = flow::recompute(&mut guard);
            drop(guard);
            self.settle(effects);
            self.start_tx();
        }
        Ok(count)
    }

    /// Drain available RX bytes into `buffer`, unstuffing the parity-error
    /// channel, and block until at least `min` bytes were obtained.
    ///
    /// Stops early — without consuming it — when a parity-error marker is
    /// next; `next_event`/`dequeue_event` pick it up from there.
    pub fn dequeue_data(&self, buffer: &mut [u8], min: usize) -> Result<usize, TransferError> {
        if min > buffer.len() {
            return Err(PortError::BadArgument.into());
        }
        let mut guard = self.inner.lock();
        if !guard.state.contains(StateBits::ACTIVE) {
            return Err(PortError::NotOpen.into());
        }

        let cooldown = self.options.last_byte_cooldown;
        let mut count = 0;
        loop {
            // Drain whatever is available right now.
            let mut hit_marker = false;
            let mut pending_escape = false;
            while count < buffer.len() {
                match rx_step(&mut guard, cooldown) {
                    RxStep::Marker => {
                        hit_marker = true;
                        break;
                    }
                    RxStep::Empty => break,
                    RxStep::Byte(byte) => {
                        buffer[count] = byte;
                        count += 1;
                    }
                    RxStep::AwaitPartner => {
                        pending_escape = true;
                        break;
                    }
                }
            }

            if pending_escape {
                // An escape byte was consumed but its partner has not arrived.
                guard = match self.await_stuffing_partner(guard) {
                    Ok(guard) => guard,
                    Err(error) => return Err(TransferError::new(count, error)),
                };
                buffer[count] = STUFF_ESCAPE;
                count += 1;
                continue;
            }

            let effects = flow::recompute(&mut guard);
            drop(guard);
            self.settle(effects);
            if hit_marker || count >= min {
                trace!(count, hit_marker, "dequeue complete");
                return Ok(count);
            }

            // Prefer waiting for high water over nibbling single bytes; when
            // woken below high water, wait out the stuffing window first.
            match self.wait_for_bits(
                StateBits::RXQ_HIGH_WATER,
                StateBits::RXQ_HIGH_WATER | StateBits::RXQ_EMPTY,
                None,
            ) {
                Ok(state) => {
                    if !state.contains(StateBits::RXQ_HIGH_WATER) {
                        std::thread::sleep(self.options.byte_wait_penalty);
                    }
                }
                Err(error) => return Err(TransferError::new(count, error)),
            }
            guard = self.inner.lock();
        }
    }

    // ---- transport completion surface ------------------------------------

    /// Bytes arrived from the device. Stuffs them into RX (doubling literal
    /// escapes, appending a marker on a parity error) and re-derives flow
    /// control. Never blocks; overflow is dropped.
    pub fn on_read_complete(&self, data: &[u8], parity_error: bool) {
        let mut guard = self.inner.lock();
        if guard.terminated {
            return;
        }
        let mut dropped = 0usize;
        for &byte in data {
            // an escape pair goes in whole or not at all
            let ok = if byte == STUFF_ESCAPE {
                if guard.rx.free_space() >= 2 {
                    let _ = guard.rx.push_byte(STUFF_ESCAPE);
                    let _ = guard.rx.push_byte(STUFF_ESCAPE);
                    true
                } else {
                    false
                }
            } else {
                guard.rx.push_byte(byte).is_ok()
            };
            if !ok {
                dropped += 1;
            }
        }
        if parity_error && guard.rx.free_space() >= 2 {
            let _ = guard.rx.push_byte(STUFF_ESCAPE);
            let _ = guard.rx.push_byte(STUFF_MARKER);
        }
        guard.last_fill = Some(Instant::now());
        let effects = flow::recompute(&mut guard);
        drop(guard);
        if dropped > 0 {
            warn!(dropped, "rx overflow, bytes discarded");
        }
        self.settle(effects);
    }

    /// The transport pulls bytes to build the next outgoing packet.
    pub fn take_tx_data(&self, max: usize) -> Vec<u8> {
        let mut guard = self.inner.lock();
        let limit = max.min(self.options.tx_block_size);
        let mut packet = vec![0u8; limit];
        let taken = guard.tx.pop_bytes(&mut packet);
        packet.truncate(taken);
        let effects = flow::recompute(&mut guard);
        drop(guard);
        trace!(bytes = taken, "tx packet drained");
        self.settle(effects);
        packet
    }

    /// The outgoing packet finished. Clears TX-busy and starts the next
    /// transmission if more data is waiting.
    pub fn on_write_complete(&self) {
        let mut guard = self.inner.lock();
        guard.transmitting = false;
        let new_state = guard.state - StateBits::TX_BUSY;
        let mut effects = flow::commit_state(&mut guard, new_state);
        effects = effects.merge(flow::recompute(&mut guard));
        let more = !guard.terminated && guard.tx.used_space() > 0;
        drop(guard);
        self.settle(effects);
        if more {
            self.start_tx();
        }
    }

    /// The transport sampled the modem input lines; overwrite the
    /// handshake-in bits regardless of what any consumer asked for.
    pub fn sample_line_signals(&self, cts: bool, dsr: bool, ri: bool, car: bool) {
        let mut guard = self.inner.lock();
        let mut new_state = guard.state;
        new_state.set(StateBits::CTS, cts);
        new_state.set(StateBits::DSR, dsr);
        new_state.set(StateBits::RI, ri);
        new_state.set(StateBits::CAR, car);
        let effects = flow::commit_state(&mut guard, new_state);
        drop(guard);
        self.settle(effects);
    }

    // ---- internals -------------------------------------------------------

    /// Perform the deferred side effects of a state transition, outside the
    /// lock.
    fn settle(&self, effects: Effects) {
        if effects.wake {
            self.waiters.notify_all();
        }
        if let Some((dtr, rts)) = effects.line_signals {
            debug!(dtr, rts, "pushing line signals");
            if let Err(error) = self.transport.push_line_signals(dtr, rts) {
                warn!(%error, "push_line_signals failed");
            }
        }
        if effects.kick_tx {
            self.start_tx();
        }
    }

    /// Start a transmission if none is in flight and TX has data.
    fn start_tx(&self) {
        let mut guard = self.inner.lock();
        if guard.transmitting || guard.terminated || guard.tx.is_empty() {
            return;
        }
        guard.transmitting = true;
        let new_state = guard.state | StateBits::TX_BUSY;
        let effects = flow::commit_state(&mut guard, new_state);
        drop(guard);
        self.settle(effects);
        self.transport.transmit_ready();
    }

    /// Wait for the partner byte of a split stuffing pair and consume it.
    /// The escape byte itself has already been popped. Drops the lock while
    /// sleeping so the read-completion path can deliver the partner.
    fn await_stuffing_partner<'a>(
        &'a self,
        mut guard: parking_lot::MutexGuard<'a, PortInner>,
    ) -> PortResult<parking_lot::MutexGuard<'a, PortInner>> {
        loop {
            if guard.terminated {
                return Err(PortError::Offline);
            }
            if guard.rx_pop(self.options.last_byte_cooldown).is_some() {
                return Ok(guard);
            }
            drop(guard);
            std::thread::sleep(self.options.byte_wait_penalty);
            guard = self.inner.lock();
        }
    }

    /// Flow-control mode switch, with unblock side effects for whatever the
    /// departing modes held back.
    fn switch_flow_mode(
        &self,
        mut guard: parking_lot::MutexGuard<'_, PortInner>,
        mode: FlowMode,
    ) -> PortResult<()> {
        let old = guard.flow;
        guard.flow = mode;
        debug!(?old, new = ?mode, "flow-control mode change");
        let mut effects = Effects::default();
        if !old.is_empty() && old != mode && !guard.terminated {
            let switching_away =
                |flag: FlowMode| old.contains(flag) && !mode.contains(flag);

            if switching_away(FlowMode::AUTO_RX_XONXOFF) && guard.xoff_sent {
                // leaving software flow control with an XOFF outstanding
                guard.xoff_sent = false;
                let xon = guard.xon_char;
                let _ = guard.tx.push_byte(xon);
                effects.kick_tx = true;
            }
            let mut new_state = guard.state;
            if switching_away(FlowMode::AUTO_RTS) && !guard.rts_asserted {
                guard.rts_asserted = true;
                new_state |= StateBits::RFR;
            }
            if switching_away(FlowMode::AUTO_DTR) && !guard.dtr_asserted {
                guard.dtr_asserted = true;
                new_state |= StateBits::DTR;
            }
            effects = effects.merge(flow::commit_state(&mut guard, new_state));
        }
        drop(guard);
        self.settle(effects);
        Ok(())
    }

    /// Activate or deactivate the stream. Activation resets per-acquire
    /// defaults and re-applies the line configuration to the device.
    fn set_active(
        &self,
        mut guard: parking_lot::MutexGuard<'_, PortInner>,
        on: bool,
    ) -> PortResult<()> {
        if on {
            let mut effects = Effects::default();
            if !guard.state.contains(StateBits::ACTIVE) {
                guard.reset_defaults();
                let new_state = guard.state | StateBits::ACTIVE;
                effects = flow::commit_state(&mut guard, new_state);
            }
            let config = guard.config.clone();
            drop(guard);
            self.settle(effects);
            if let Err(error) = self.transport.apply_line_config(&config) {
                warn!(%error, "apply_line_config failed");
            }
        } else if guard.state.contains(StateBits::ACTIVE) {
            let new_state = guard.state - StateBits::ACTIVE;
            let effects = flow::commit_state(&mut guard, new_state);
            drop(guard);
            self.settle(effects);
        }
        Ok(())
    }

    /// Push the (already validated and stored) line configuration to the
    /// device.
    fn reapply_config(
        &self,
        guard: parking_lot::MutexGuard<'_, PortInner>,
    ) -> PortResult<()> {
        let config = guard.config.clone();
        drop(guard);
        if let Err(error) = self.transport.apply_line_config(&config) {
            warn!(%error, "apply_line_config failed");
        }
        Ok(())
    }
}
