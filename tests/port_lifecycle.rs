//! End-to-end session and data-path tests against the mock transport.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use uartstream::{
    MockTransport, Port, PortError, PortEvent, PortOptions, PortQuery, StateBits,
};

fn make_port(options: PortOptions) -> (Arc<Port>, MockTransport) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let mock = MockTransport::new();
    let port = Arc::new(Port::new(Box::new(mock.clone()), options));
    (port, mock)
}

fn active_port(options: PortOptions) -> (Arc<Port>, MockTransport) {
    let (port, mock) = make_port(options);
    port.acquire(false).unwrap();
    port.execute_event(PortEvent::Active(true)).unwrap();
    (port, mock)
}

fn fast_options(capacity: usize) -> PortOptions {
    PortOptions {
        queue_capacity: capacity,
        last_byte_cooldown: Duration::ZERO,
        byte_wait_penalty: Duration::from_micros(100),
        ..PortOptions::default()
    }
}

#[test]
fn blocking_acquire_waits_for_release() {
    let (port, _mock) = make_port(PortOptions::default());
    port.acquire(false).unwrap();

    let contender = {
        let port = Arc::clone(&port);
        std::thread::spawn(move || port.acquire(true))
    };
    std::thread::sleep(Duration::from_millis(50));
    assert!(!contender.is_finished());

    port.release().unwrap();
    contender.join().unwrap().unwrap();
    assert_eq!(port.session_count(), 1);
}

#[test]
fn enqueued_bytes_stay_queued_until_the_transport_pulls() {
    let (port, mock) = active_port(PortOptions::default());
    mock.clear_logs();

    let sent = port.enqueue_data(b"0123456789", false).unwrap();
    assert_eq!(sent, 10);
    assert_eq!(mock.transmit_kicks(), 1);
    assert_eq!(port.request_event(PortQuery::TxqAvailable), 16_384 - 10);

    let state = port.get_state();
    assert!(state.contains(StateBits::TX_BUSY));
    assert!(!state.contains(StateBits::TXQ_EMPTY));

    let packet = port.take_tx_data(1024);
    assert_eq!(packet, b"0123456789");
    port.on_write_complete();

    let state = port.get_state();
    assert!(!state.contains(StateBits::TX_BUSY));
    assert!(state.contains(StateBits::TXQ_EMPTY));
}

#[test]
fn completion_restarts_transmission_when_data_remains() {
    let (port, mock) = active_port(PortOptions::default());
    mock.clear_logs();

    port.enqueue_data(&[0xAA; 2000], false).unwrap();
    assert_eq!(mock.transmit_kicks(), 1);

    // block size caps a single pull at 1024
    let first = port.take_tx_data(4096);
    assert_eq!(first.len(), 1024);
    port.on_write_complete();
    assert_eq!(mock.transmit_kicks(), 2);

    let second = port.take_tx_data(4096);
    assert_eq!(second.len(), 2000 - 1024);
    port.on_write_complete();
    assert_eq!(mock.transmit_kicks(), 2);
}

#[test]
fn blocking_enqueue_finishes_as_the_transport_drains() {
    let (port, _mock) = active_port(fast_options(64));
    let payload: Vec<u8> = (0..200u16).map(|v| (v % 251) as u8).collect();

    let writer = {
        let port = Arc::clone(&port);
        let payload = payload.clone();
        std::thread::spawn(move || port.enqueue_data(&payload, true))
    };

    let mut received = Vec::new();
    while !writer.is_finished() {
        let chunk = port.take_tx_data(16);
        if chunk.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        } else {
            received.extend_from_slice(&chunk);
            port.on_write_complete();
        }
    }
    assert_eq!(writer.join().unwrap().unwrap(), payload.len());

    // everything accepted but not yet pulled is still owed to us
    loop {
        let chunk = port.take_tx_data(16);
        if chunk.is_empty() {
            break;
        }
        received.extend_from_slice(&chunk);
        port.on_write_complete();
    }
    assert_eq!(received, payload);
}

#[test]
fn release_resolves_a_blocked_dequeue_with_offline() {
    let (port, _mock) = active_port(fast_options(64));
    let reader = {
        let port = Arc::clone(&port);
        std::thread::spawn(move || {
            let mut buffer = [0u8; 8];
            port.dequeue_data(&mut buffer, 1)
        })
    };
    std::thread::sleep(Duration::from_millis(50));
    port.release().unwrap();

    let error = reader.join().unwrap().unwrap_err();
    assert_eq!(error.source, PortError::Offline);
    assert_eq!(error.transferred, 0);
}

#[test]
fn termination_resolves_a_blocked_enqueue() {
    let (port, _mock) = active_port(fast_options(16));
    let writer = {
        let port = Arc::clone(&port);
        std::thread::spawn(move || port.enqueue_data(&[0u8; 64], true))
    };
    std::thread::sleep(Duration::from_millis(50));
    port.set_terminated();

    let error = writer.join().unwrap().unwrap_err();
    assert_eq!(error.source, PortError::Offline);
    // the first 16 bytes fit before the wait began
    assert_eq!(error.transferred, 16);
}

#[test]
fn dequeue_returns_data_fed_by_the_transport() {
    let (port, _mock) = active_port(fast_options(256));
    port.on_read_complete(b"hello, ", false);
    port.on_read_complete(b"world", false);

    let mut buffer = [0u8; 32];
    let count = port.dequeue_data(&mut buffer, 12).unwrap();
    assert_eq!(&buffer[..count], b"hello, world");
    assert!(port.get_state().contains(StateBits::RXQ_EMPTY));
}

#[test]
fn dequeue_blocks_until_minimum_arrives() {
    let (port, _mock) = active_port(fast_options(256));
    port.on_read_complete(b"par", false);

    let reader = {
        let port = Arc::clone(&port);
        std::thread::spawn(move || {
            let mut buffer = [0u8; 8];
            port.dequeue_data(&mut buffer, 6).map(|count| buffer[..count].to_vec())
        })
    };
    std::thread::sleep(Duration::from_millis(50));
    port.on_read_complete(b"tial", false);

    assert_eq!(reader.join().unwrap().unwrap(), b"partial".to_vec());
}

#[test]
fn modem_line_samples_are_observable_and_watchable() {
    let (port, _mock) = active_port(PortOptions::default());
    let watcher = {
        let port = Arc::clone(&port);
        std::thread::spawn(move || port.watch_state(StateBits::CTS, StateBits::CTS, None))
    };
    std::thread::sleep(Duration::from_millis(50));
    port.sample_line_signals(true, true, false, false);

    let state = watcher.join().unwrap().unwrap();
    assert!(state.contains(StateBits::CTS));
    assert!(state.contains(StateBits::DSR));
    assert!(!state.contains(StateBits::RI));

    // consumers cannot overwrite sampled inputs
    port.set_state(StateBits::empty(), StateBits::CTS).unwrap();
    assert!(port.get_state().contains(StateBits::CTS));
}

#[test]
fn reacquire_resets_configuration() {
    let (port, _mock) = active_port(PortOptions::default());
    port.execute_event(PortEvent::DataRate(115_200)).unwrap();
    port.execute_event(PortEvent::XonByte(0x05)).unwrap();
    port.release().unwrap();

    port.acquire(false).unwrap();
    assert_eq!(port.request_event(PortQuery::DataRate), 9_600);
    assert_eq!(port.request_event(PortQuery::XonByte), 0x11);
}
