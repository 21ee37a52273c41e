//! Blocking state observation.
//!
//! One condition variable serves every waiter; `PortInner::watch_mask` is
//! the union of the bits anyone currently cares about, so state transitions
//! only broadcast when a watched bit actually changed. Waits hold no lock
//! while parked, which is what lets `release`, the completion surface, and
//! other consumers make the progress a waiter is waiting for.

use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::{PortError, PortResult};
use crate::port::Port;
use crate::state::StateBits;

impl Port {
    /// Block until, for some bit in `mask`, the state bit equals the value
    /// requested for it. Returns the full state word on a match.
    ///
    /// If `mask` names neither `ACQUIRED` nor `ACTIVE`, interest in
    /// `ACTIVE`-going-clear is added implicitly and resolves to `Offline`,
    /// so no waiter can be stranded across a deactivation or teardown.
    pub fn watch_state(
        &self,
        requested: StateBits,
        mask: StateBits,
        timeout: Option<Duration>,
    ) -> PortResult<StateBits> {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.wait_for_bits(requested, mask, deadline)
    }

    /// Abort every blocked wait with `Interrupted`.
    pub fn cancel_waiters(&self) {
        let mut guard = self.inner.lock();
        guard.cancel_epoch += 1;
        drop(guard);
        self.waiters.notify_all();
    }

    /// The wait primitive behind `watch_state` and every internal blocking
    /// path.
    ///
    /// On every exit the shared watch mask is cleared wholesale and all
    /// waiters are woken to re-register; per-waiter bookkeeping of the mask
    /// union is not worth the complexity, and a spurious wakeup only costs a
    /// re-check.
    pub(crate) fn wait_for_bits(
        &self,
        requested: StateBits,
        mask: StateBits,
        deadline: Option<Instant>,
    ) -> PortResult<StateBits> {
        let mut requested = requested;
        let mut mask = mask;
        let mut auto_active = false;
        if !mask.intersects(StateBits::ACQUIRED | StateBits::ACTIVE) {
            requested -= StateBits::ACTIVE;
            mask |= StateBits::ACTIVE;
            auto_active = true;
        }

        let mut guard = self.inner.lock();
        let epoch = guard.cancel_epoch;
        let result = loop {
            // XNOR picks the mask bits whose state equals the request
            let found = !(requested ^ guard.state) & mask;
            if !found.is_empty() {
                if auto_active && found.contains(StateBits::ACTIVE) {
                    break Err(PortError::Offline);
                }
                break Ok(guard.state);
            }
            guard.watch_mask |= mask;
            trace!(?mask, watch = ?guard.watch_mask, "watch sleeping");
            let timed_out = match deadline {
                Some(instant) => self.waiters.wait_until(&mut guard, instant).timed_out(),
                None => {
                    self.waiters.wait(&mut guard);
                    false
                }
            };
            if guard.cancel_epoch != epoch {
                break Err(PortError::Interrupted);
            }
            if timed_out {
                break Err(PortError::Timeout);
            }
        };
        guard.watch_mask = StateBits::empty();
        drop(guard);
        self.waiters.notify_all();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PortEvent;
    use crate::transport::MockTransport;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn active_port() -> Arc<Port> {
        let port = Port::with_defaults(Box::new(MockTransport::new()));
        port.acquire(false).unwrap();
        port.execute_event(PortEvent::Active(true)).unwrap();
        Arc::new(port)
    }

    #[test]
    fn matches_immediately_on_current_bits() {
        let port = active_port();
        let state = port
            .watch_state(StateBits::ACTIVE, StateBits::ACTIVE, None)
            .unwrap();
        assert!(state.contains(StateBits::ACTIVE));
    }

    #[test]
    fn matches_a_cleared_bit() {
        let port = active_port();
        // BRK requested clear, and it is clear
        let state = port
            .watch_state(StateBits::empty(), StateBits::BRK, None)
            .unwrap();
        assert!(!state.contains(StateBits::BRK));
    }

    #[test]
    fn times_out() {
        let port = active_port();
        let result = port.watch_state(
            StateBits::BRK,
            StateBits::BRK,
            Some(Duration::from_millis(20)),
        );
        assert_eq!(result, Err(PortError::Timeout));
    }

    #[test]
    fn wakes_on_state_change_from_another_thread() {
        let port = active_port();
        let waiter = {
            let port = Arc::clone(&port);
            std::thread::spawn(move || port.watch_state(StateBits::BRK, StateBits::BRK, None))
        };
        std::thread::sleep(Duration::from_millis(50));
        port.execute_event(PortEvent::LineBreak(true)).unwrap();
        let state = waiter.join().unwrap().unwrap();
        assert!(state.contains(StateBits::BRK));
    }

    #[test]
    fn implicit_active_interest_reports_offline() {
        let port = active_port();
        let waiter = {
            let port = Arc::clone(&port);
            // TXQ_FULL will never be set; only the teardown can end this wait
            std::thread::spawn(move || {
                port.watch_state(StateBits::TXQ_FULL, StateBits::TXQ_FULL, None)
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        port.set_terminated();
        assert_eq!(waiter.join().unwrap(), Err(PortError::Offline));
    }

    #[test]
    fn inactive_port_is_offline_immediately() {
        let port = Port::with_defaults(Box::new(MockTransport::new()));
        port.acquire(false).unwrap();
        // never activated; a data-bit watch cannot be satisfied
        let result = port.watch_state(StateBits::RXQ_FULL, StateBits::RXQ_FULL, None);
        assert_eq!(result, Err(PortError::Offline));
    }

    #[test]
    fn cancel_interrupts_all_waiters() {
        let port = active_port();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let port = Arc::clone(&port);
                std::thread::spawn(move || port.watch_state(StateBits::BRK, StateBits::BRK, None))
            })
            .collect();
        std::thread::sleep(Duration::from_millis(50));
        port.cancel_waiters();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Err(PortError::Interrupted));
        }
    }
}
