//! Fixed-width, lexicographically sortable timestamps.
//!
//! A [`Timestamp`] serializes to `time ++ counter ++ id`, where `time` and
//! `counter` are zero-padded numerals of a configured base and width and `id`
//! is a fixed-length node identifier. Because every field has a fixed width,
//! comparing two serialized timestamps as strings gives the same answer as
//! comparing them field by field.
//!
//! # Example
//!
//! ```
//! use tessera_core::{Timestamp, TimestampConfig};
//!
//! let config = TimestampConfig::default();
//! let ts = Timestamp::new(1602632453863, 15, "12345678azertyui", config).unwrap();
//! assert_eq!(ts.to_string(), "017524568EE7000F12345678azertyui");
//!
//! let parsed = Timestamp::parse("017524568EE7000F12345678azertyui", &config).unwrap();
//! assert_eq!(parsed, ts);
//! ```

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::str::FromStr;

use crate::error::TimestampError;

const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Layout of the serialized timestamp.
///
/// The default is milliseconds in 12 hexadecimal digits, a 4 digit
/// hexadecimal counter and a 16 character node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimestampConfig {
    time_base: u32,
    time_len: usize,
    counter_base: u32,
    counter_len: usize,
    id_len: usize,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            time_base: 16,
            time_len: 12,
            counter_base: 16,
            counter_len: 4,
            id_len: 16,
        }
    }
}

impl TimestampConfig {
    /// Build a custom layout. Bases must lie in `2..=36` and widths must be
    /// non-zero.
    pub fn new(
        time_base: u32,
        time_len: usize,
        counter_base: u32,
        counter_len: usize,
        id_len: usize,
    ) -> Result<Self, TimestampError> {
        if !(2..=36).contains(&time_base) || !(2..=36).contains(&counter_base) {
            return Err(TimestampError::InvalidConfig {
                reason: "bases must lie in 2..=36",
            });
        }
        if time_len == 0 || counter_len == 0 || id_len == 0 {
            return Err(TimestampError::InvalidConfig {
                reason: "field widths must be non-zero",
            });
        }
        Ok(Self {
            time_base,
            time_len,
            counter_base,
            counter_len,
            id_len,
        })
    }

    /// Numeral base of the time field.
    pub fn time_base(&self) -> u32 {
        self.time_base
    }

    /// Width of the time field in characters.
    pub fn time_len(&self) -> usize {
        self.time_len
    }

    /// Numeral base of the counter field.
    pub fn counter_base(&self) -> u32 {
        self.counter_base
    }

    /// Width of the counter field in characters.
    pub fn counter_len(&self) -> usize {
        self.counter_len
    }

    /// Width of the node id.
    pub fn id_len(&self) -> usize {
        self.id_len
    }

    /// Largest representable time value.
    pub fn time_max(&self) -> u64 {
        width_max(self.time_base, self.time_len)
    }

    /// Largest representable counter value.
    pub fn counter_max(&self) -> u64 {
        width_max(self.counter_base, self.counter_len)
    }

    /// Total length of a serialized timestamp.
    pub fn encoded_len(&self) -> usize {
        self.time_len + self.counter_len + self.id_len
    }

    /// Length of the `counter ++ id` suffix stored in Merkle leaves.
    pub fn suffix_len(&self) -> usize {
        self.counter_len + self.id_len
    }

    /// Number of base-4 digits used for a Merkle path, enough to hold
    /// [`time_max`](Self::time_max).
    pub fn merkle_depth(&self) -> usize {
        let mut rest = self.time_max();
        let mut digits = 0;
        while rest > 0 {
            rest /= 4;
            digits += 1;
        }
        digits.max(1)
    }

    /// Base-4 Merkle path of a time value.
    pub fn time_path(&self, time: u64) -> String {
        encode_digits(time, 4, self.merkle_depth())
    }

    /// Inverse of [`time_path`](Self::time_path) for a full-depth path.
    pub fn time_from_path(&self, path: &str) -> Result<u64, TimestampError> {
        if path.len() != self.merkle_depth() {
            return Err(TimestampError::InvalidFormat {
                expected: self.merkle_depth(),
                actual: path.len(),
            });
        }
        decode_digits(path, 4, "path")
    }

    /// Validate a node id against this layout.
    pub fn validate_id(&self, id: &str) -> Result<(), TimestampError> {
        if id.len() == self.id_len && id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Ok(())
        } else {
            Err(TimestampError::InvalidId {
                id: id.to_string(),
                expected: self.id_len,
            })
        }
    }
}

fn width_max(base: u32, len: usize) -> u64 {
    let exponent = u32::try_from(len).unwrap_or(u32::MAX);
    match u64::from(base).checked_pow(exponent) {
        Some(limit) => limit - 1,
        None => u64::MAX,
    }
}

fn encode_digits(mut value: u64, base: u32, len: usize) -> String {
    let base = u64::from(base);
    let mut buf = vec![b'0'; len];
    for slot in buf.iter_mut().rev() {
        *slot = DIGITS[(value % base) as usize];
        value /= base;
    }
    // Only ASCII digits were written.
    String::from_utf8(buf).unwrap_or_default()
}

fn decode_digits(input: &str, base: u32, field: &'static str) -> Result<u64, TimestampError> {
    let parse_err = || TimestampError::Parse {
        field,
        input: input.to_string(),
    };
    let mut value: u64 = 0;
    for byte in input.bytes() {
        let digit = DIGITS
            .iter()
            .position(|d| *d == byte)
            .filter(|d| (*d as u32) < base)
            .ok_or_else(parse_err)?;
        value = value
            .checked_mul(u64::from(base))
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or_else(parse_err)?;
    }
    Ok(value)
}

/// A hybrid logical timestamp: physical time, logical counter and node id.
///
/// Ordering, equality and hashing consider `(time, counter, id)` only, which
/// matches the ordering of the serialized form.
#[derive(Debug, Clone)]
pub struct Timestamp {
    time: u64,
    counter: u64,
    id: String,
    config: TimestampConfig,
}

impl Timestamp {
    /// Construct a timestamp, rejecting values that do not fit the layout.
    pub fn new(
        time: u64,
        counter: u64,
        id: impl Into<String>,
        config: TimestampConfig,
    ) -> Result<Self, TimestampError> {
        let id = id.into();
        if time > config.time_max() {
            return Err(TimestampError::TimeOverflow {
                max: config.time_max(),
            });
        }
        if counter > config.counter_max() {
            return Err(TimestampError::CounterOverflow {
                max: config.counter_max(),
            });
        }
        config.validate_id(&id)?;
        Ok(Self {
            time,
            counter,
            id,
            config,
        })
    }

    /// Parse a serialized timestamp.
    ///
    /// A wrong length is [`TimestampError::InvalidFormat`], a non-numeral
    /// character is [`TimestampError::Parse`] and a bad node id is
    /// [`TimestampError::InvalidId`].
    pub fn parse(input: &str, config: &TimestampConfig) -> Result<Self, TimestampError> {
        if input.len() != config.encoded_len() {
            return Err(TimestampError::InvalidFormat {
                expected: config.encoded_len(),
                actual: input.len(),
            });
        }
        if !input.is_ascii() {
            return Err(TimestampError::Parse {
                field: "timestamp",
                input: input.to_string(),
            });
        }
        let (time, rest) = input.split_at(config.time_len);
        let time = decode_digits(time, config.time_base, "time")?;
        Self::from_suffix(time, rest, config)
    }

    /// Rebuild a timestamp from a time value and a `counter ++ id` suffix.
    pub fn from_suffix(
        time: u64,
        suffix: &str,
        config: &TimestampConfig,
    ) -> Result<Self, TimestampError> {
        if suffix.len() != config.suffix_len() {
            return Err(TimestampError::InvalidFormat {
                expected: config.suffix_len(),
                actual: suffix.len(),
            });
        }
        if !suffix.is_ascii() {
            return Err(TimestampError::Parse {
                field: "suffix",
                input: suffix.to_string(),
            });
        }
        let (counter, id) = suffix.split_at(config.counter_len);
        let counter = decode_digits(counter, config.counter_base, "counter")?;
        Self::new(time, counter, id, *config)
    }

    /// Physical time component.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Logical counter component.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Node id component.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Layout this timestamp was built for.
    pub fn config(&self) -> &TimestampConfig {
        &self.config
    }

    /// Same counter and id at a different time.
    pub fn with_time(&self, time: u64) -> Result<Self, TimestampError> {
        Self::new(time, self.counter, self.id.clone(), self.config)
    }

    /// Same time and counter under a different node id.
    pub fn with_id(&self, id: impl Into<String>) -> Result<Self, TimestampError> {
        Self::new(self.time, self.counter, id, self.config)
    }

    /// Split the serialized form into its time field and `counter ++ id`
    /// suffix.
    pub fn split_time(&self) -> (String, String) {
        let time = encode_digits(self.time, self.config.time_base, self.config.time_len);
        (time, self.suffix())
    }

    /// The `counter ++ id` part of the serialized form.
    pub fn suffix(&self) -> String {
        let mut out = encode_digits(
            self.counter,
            self.config.counter_base,
            self.config.counter_len,
        );
        out.push_str(&self.id);
        out
    }

    /// Base-4 Merkle path of this timestamp's time.
    pub fn time_path(&self) -> String {
        self.config.time_path(self.time)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (time, suffix) = self.split_time();
        write!(f, "{time}{suffix}")
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    /// Parse with the default layout.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, &TimestampConfig::default())
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.counter == other.counter && self.id == other.id
    }
}

impl Eq for Timestamp {}

impl Hash for Timestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.time.hash(state);
        self.counter.hash(state);
        self.id.hash(state);
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then(self.counter.cmp(&other.counter))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
