//! Property tests for the circular queue and the RX stuffing channel.

use std::collections::VecDeque;
use std::time::Duration;

use proptest::prelude::*;
use uartstream::{CircularQueue, Port, PortEvent, PortOptions, MockTransport};

#[derive(Debug, Clone)]
enum Op {
    Push(u8),
    Pop,
    PushSlice(Vec<u8>),
    PopSlice(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u8>().prop_map(Op::Push),
        Just(Op::Pop),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(Op::PushSlice),
        (0usize..16).prop_map(Op::PopSlice),
    ]
}

proptest! {
    /// The queue agrees with a deque model under arbitrary operation mixes.
    #[test]
    fn queue_matches_deque_model(ops in proptest::collection::vec(op_strategy(), 0..200)) {
        let mut queue = CircularQueue::new(32);
        let mut model: VecDeque<u8> = VecDeque::new();

        for op in ops {
            match op {
                Op::Push(byte) => {
                    let accepted = queue.push_byte(byte).is_ok();
                    prop_assert_eq!(accepted, model.len() < 32);
                    if accepted {
                        model.push_back(byte);
                    }
                }
                Op::Pop => {
                    prop_assert_eq!(queue.pop_byte(), model.pop_front());
                }
                Op::PushSlice(data) => {
                    let taken = queue.push_bytes(&data);
                    prop_assert_eq!(taken, data.len().min(32 - model.len()));
                    model.extend(&data[..taken]);
                }
                Op::PopSlice(len) => {
                    let mut out = vec![0u8; len];
                    let got = queue.pop_bytes(&mut out);
                    prop_assert_eq!(got, len.min(model.len()));
                    for byte in out.iter().take(got) {
                        prop_assert_eq!(Some(*byte), model.pop_front());
                    }
                }
            }
            prop_assert_eq!(queue.used_space(), model.len());
            prop_assert_eq!(queue.free_space(), 32 - model.len());
            prop_assert_eq!(queue.is_empty(), model.is_empty());
            prop_assert_eq!(queue.is_full(), model.len() == 32);
        }
    }

    /// Peeking never disturbs the pop order.
    #[test]
    fn peek_is_consistent_with_pop(data in proptest::collection::vec(any::<u8>(), 1..32)) {
        let mut queue = CircularQueue::new(64);
        queue.push_bytes(&data);
        for (offset, expected) in data.iter().enumerate() {
            prop_assert_eq!(queue.peek_byte(offset), Some(*expected));
        }
        prop_assert_eq!(queue.peek_byte(data.len()), None);
        for expected in &data {
            prop_assert_eq!(queue.pop_byte(), Some(*expected));
        }
    }

    /// Whatever the transport delivers, the consumer reads back unchanged:
    /// the escape-doubling on the way in and the unstuffing on the way out
    /// cancel exactly, for any byte values including the escape itself.
    #[test]
    fn rx_stuffing_is_transparent(
        chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..32), 0..8)
    ) {
        let options = PortOptions {
            last_byte_cooldown: Duration::ZERO,
            ..PortOptions::default()
        };
        let port = Port::new(Box::new(MockTransport::new()), options);
        port.acquire(false).unwrap();
        port.execute_event(PortEvent::Active(true)).unwrap();

        let mut expected = Vec::new();
        for chunk in &chunks {
            port.on_read_complete(chunk, false);
            expected.extend_from_slice(chunk);
        }

        let mut buffer = vec![0u8; expected.len().max(1)];
        let count = port.dequeue_data(&mut buffer, expected.len()).unwrap();
        prop_assert_eq!(&buffer[..count], expected.as_slice());
    }
}
