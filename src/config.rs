//! Line configuration and port tunables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default and limit constants for the line parameters, from the adaptor's
/// datasheet ranges.
pub const DEFAULT_BAUD_RATE: u32 = 9_600;
pub const MIN_BAUD_RATE: u32 = 75;
pub const MAX_BAUD_RATE: u32 = 6_000_000;

/// Default XON/XOFF bytes (DC1/DC3).
pub const XON_CHAR: u8 = 0x11;
pub const XOFF_CHAR: u8 = 0x13;

/// Transmit parity modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Receive parity handling: check against the transmit setting, or accept
/// anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RxParity {
    Default,
    Any,
}

/// UART line parameters, pushed to the device whenever they change or the
/// port activates.
///
/// `stop_bits` is in half-bit units (2 = one stop bit), matching the event
/// interface the stream layer speaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    pub baud_rate: u32,
    pub char_length: u8,
    pub stop_bits: u8,
    pub tx_parity: Parity,
    pub rx_parity: RxParity,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            char_length: 8,
            stop_bits: 2,
            tx_parity: Parity::None,
            rx_parity: RxParity::Default,
        }
    }
}

/// Occupancy thresholds derived from a queue's capacity.
///
/// Invariant: `0 <= low_water <= high_water <= capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    pub capacity: usize,
    pub high_water: usize,
    pub low_water: usize,
}

impl Watermarks {
    /// High water at 2/3 of capacity, low water at half of that.
    pub fn for_capacity(capacity: usize) -> Self {
        let high_water = capacity * 2 / 3;
        Self {
            capacity,
            high_water,
            low_water: high_water / 2,
        }
    }
}

/// Tunables for one port instance. The defaults suit a full-speed USB
/// adaptor; hosts can override them at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortOptions {
    /// Capacity of each of the RX and TX rings.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_min_baud")]
    pub min_baud: u32,
    #[serde(default = "default_max_baud")]
    pub max_baud: u32,
    /// Largest chunk handed to the transport per transmission.
    #[serde(default = "default_tx_block_size")]
    pub tx_block_size: usize,
    /// Grace period during which a queue holding exactly one byte reads as
    /// empty, so a dequeue cannot race the second byte of a stuffing pair.
    #[serde(default = "default_last_byte_cooldown", with = "duration_micros")]
    pub last_byte_cooldown: Duration,
    /// Pause applied while waiting out a partially delivered stuffing pair.
    #[serde(default = "default_byte_wait_penalty", with = "duration_micros")]
    pub byte_wait_penalty: Duration,
}

fn default_queue_capacity() -> usize {
    16_384
}

fn default_min_baud() -> u32 {
    MIN_BAUD_RATE
}

fn default_max_baud() -> u32 {
    MAX_BAUD_RATE
}

fn default_tx_block_size() -> usize {
    1_024
}

fn default_last_byte_cooldown() -> Duration {
    Duration::from_micros(100)
}

fn default_byte_wait_penalty() -> Duration {
    Duration::from_millis(2)
}

impl Default for PortOptions {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            min_baud: default_min_baud(),
            max_baud: default_max_baud(),
            tx_block_size: default_tx_block_size(),
            last_byte_cooldown: default_last_byte_cooldown(),
            byte_wait_penalty: default_byte_wait_penalty(),
        }
    }
}

mod duration_micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_line_config_is_9600_8n1() {
        let config = LineConfig::default();
        assert_eq!(config.baud_rate, 9_600);
        assert_eq!(config.char_length, 8);
        assert_eq!(config.stop_bits, 2);
        assert_eq!(config.tx_parity, Parity::None);
        assert_eq!(config.rx_parity, RxParity::Default);
    }

    #[test]
    fn watermarks_match_documented_thresholds() {
        let marks = Watermarks::for_capacity(4096);
        assert_eq!(marks.high_water, 2730);
        assert_eq!(marks.low_water, 1365);
        assert!(marks.low_water <= marks.high_water);
        assert!(marks.high_water <= marks.capacity);
    }

    #[test]
    fn watermark_invariant_holds_for_degenerate_capacities() {
        for capacity in [0usize, 1, 2, 3] {
            let marks = Watermarks::for_capacity(capacity);
            assert!(marks.low_water <= marks.high_water);
            assert!(marks.high_water <= marks.capacity);
        }
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: PortOptions = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(options.queue_capacity, 16_384);
        assert_eq!(options.max_baud, 6_000_000);
        assert_eq!(options.last_byte_cooldown, Duration::from_micros(100));
    }

    #[test]
    fn options_roundtrip_custom_values() {
        let json = r#"{"queue_capacity": 4096, "tx_block_size": 64, "last_byte_cooldown": 250}"#;
        let options: PortOptions = serde_json::from_str(json).expect("deserialize");
        assert_eq!(options.queue_capacity, 4096);
        assert_eq!(options.tx_block_size, 64);
        assert_eq!(options.last_byte_cooldown, Duration::from_micros(250));
        // untouched fields keep their defaults
        assert_eq!(options.min_baud, 75);
    }
}
