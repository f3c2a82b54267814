//! Value encodings of the Midea M-Thermal heat pump holding registers.
//!
//! Every register holds one or two raw 16-bit words. This module turns those
//! words into physical values ([`decode`]) and back ([`encode`]), following
//! the [`Encoding`] declared by the register's
//! [`RegisterDescriptor`](crate::catalog::RegisterDescriptor).
//!
//! It also carries the protocol constants of the deployment: slave
//! addresses, the gateway port and the timing of the 9600 baud RS-485 link
//! sitting behind the Modbus-TCP gateway.

use crate::catalog::RegisterDescriptor;
use std::fmt;
use std::time::Duration;

/// Slave address the heat pump ships with.
pub const FACTORY_DEFAULT_SLAVE: u8 = 0x01;
/// Slave address configured on the installed unit.
pub const DEPLOYMENT_SLAVE: u8 = 0x02;
/// TCP port of the Modbus-TCP-to-RTU gateway.
pub const GATEWAY_PORT: u16 = 8899;
/// Baud rate of the RS-485 bus between gateway and heat pump.
pub const LINK_BAUD_RATE: u32 = 9600;

/// Raw word meaning "not available / no sensor".
pub const WORD_SENTINEL: u16 = 0xFFFF;
/// Raw byte meaning "not available / no sensor" inside a packed register.
pub const BYTE_SENTINEL: u8 = 0xFF;

/// Largest quantity of holding registers a single `0x03` request may ask for.
pub const MAX_READ_QUANTITY: u16 = 125;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("value {value} cannot be encoded for register {address}: {reason}")]
    EncodingRange {
        address: u16,
        value: f64,
        reason: &'static str,
    },
    #[error("register {0} is read-only")]
    NotWritable(u16),
    #[error("register {address} is made of {expected} word(s), got {got}")]
    WordCount {
        address: u16,
        expected: usize,
        got: usize,
    },
    #[error("value kind does not match the encoding of register {0}")]
    ValueKind(u16),
    #[error("register {0} must be read before a single zone of it can be written")]
    MissingCurrentWord(u16),
}

fn unit_scale() -> f64 {
    1.0
}

/// How the raw words of a register map to a physical value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoding {
    /// `value = word * scale`.
    UnsignedWord {
        #[serde(default = "unit_scale")]
        scale: f64,
    },
    /// 16-bit two's complement, `value = (word as i16) * scale`.
    SignedWord {
        #[serde(default = "unit_scale")]
        scale: f64,
    },
    /// Two independent byte values, the low byte is the first field
    /// (usually Zone 1) and the high byte the second one (usually Zone 2).
    PackedBytePair {
        low: String,
        high: String,
        #[serde(default = "unit_scale")]
        scale: f64,
    },
    /// A 32-bit unsigned counter spread over two adjacent registers,
    /// `value = (high * 65536 + low) * scale`.
    Composite32 {
        high: u16,
        low: u16,
        #[serde(default = "unit_scale")]
        scale: f64,
    },
}

impl Encoding {
    /// Number of raw words the encoding is made of.
    pub fn word_count(&self) -> usize {
        match self {
            Encoding::Composite32 { .. } => 2,
            _ => 1,
        }
    }

    pub fn scale(&self) -> f64 {
        match self {
            Encoding::UnsignedWord { scale }
            | Encoding::SignedWord { scale }
            | Encoding::PackedBytePair { scale, .. }
            | Encoding::Composite32 { scale, .. } => *scale,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::UnsignedWord { scale } => write!(f, "u16 x{scale}"),
            Encoding::SignedWord { scale } => write!(f, "i16 x{scale}"),
            Encoding::PackedBytePair { low, high, scale } => {
                write!(f, "{low}/{high} u8 x{scale}")
            }
            Encoding::Composite32 { high, low, scale } => {
                write!(f, "u32 {high}:{low} x{scale}")
            }
        }
    }
}

/// A decoded register value.
///
/// `Unavailable` is distinct from any numeric value, a missing sensor never
/// decodes to zero.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    Number(f64),
    /// Both halves of a packed register, `None` marks an absent half.
    Pair {
        low: Option<f64>,
        high: Option<f64>,
    },
    Unavailable,
}

impl DecodedValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            DecodedValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, DecodedValue::Unavailable)
    }
}

fn fmt_half(f: &mut fmt::Formatter<'_>, half: &Option<f64>) -> fmt::Result {
    match half {
        Some(value) => write!(f, "{value}"),
        None => f.write_str("n/a"),
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Number(value) => write!(f, "{value}"),
            DecodedValue::Pair { low, high } => {
                fmt_half(f, low)?;
                f.write_str(" / ")?;
                fmt_half(f, high)
            }
            DecodedValue::Unavailable => f.write_str("n/a"),
        }
    }
}

/// A physical value to be written to a register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteValue {
    Number(f64),
    /// Halves of a packed register. A `None` half keeps the content the
    /// device currently holds.
    Pair {
        low: Option<f64>,
        high: Option<f64>,
    },
}

impl WriteValue {
    /// Whether encoding this value requires the word currently stored in the register.
    pub fn needs_current(&self) -> bool {
        matches!(
            self,
            WriteValue::Pair { low: None, .. } | WriteValue::Pair { high: None, .. }
        )
    }
}

impl From<f64> for WriteValue {
    fn from(value: f64) -> Self {
        WriteValue::Number(value)
    }
}

impl fmt::Display for WriteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteValue::Number(value) => write!(f, "{value}"),
            WriteValue::Pair { low, high } => {
                fmt_half(f, low)?;
                f.write_str(" / ")?;
                fmt_half(f, high)
            }
        }
    }
}

/// Splits a word into its `[low, high]` bytes.
pub fn split_bytes(word: u16) -> [u8; 2] {
    [(word & 0xFF) as u8, ((word >> 8) & 0xFF) as u8]
}

/// Decodes the raw words of a register.
///
/// `words` holds one word, or `[high, low]` for
/// [`Encoding::Composite32`], in the order of
/// [`RegisterDescriptor::word_addresses`].
pub fn decode(descriptor: &RegisterDescriptor, words: &[u16]) -> Result<DecodedValue, Error> {
    let expected = descriptor.encoding.word_count();
    if words.len() != expected {
        return Err(Error::WordCount {
            address: descriptor.address,
            expected,
            got: words.len(),
        });
    }
    let raw = words[0];
    Ok(match &descriptor.encoding {
        Encoding::UnsignedWord { scale } => {
            if descriptor.is_sentinel(raw) {
                DecodedValue::Unavailable
            } else {
                DecodedValue::Number(f64::from(raw) * scale)
            }
        }
        Encoding::SignedWord { scale } => {
            if descriptor.is_sentinel(raw) {
                DecodedValue::Unavailable
            } else {
                DecodedValue::Number(f64::from(raw as i16) * scale)
            }
        }
        Encoding::PackedBytePair { scale, .. } => {
            let [low, high] = split_bytes(raw);
            let half = |byte: u8| (byte != BYTE_SENTINEL).then(|| f64::from(byte) * scale);
            match (half(low), half(high)) {
                (None, None) => DecodedValue::Unavailable,
                (low, high) => DecodedValue::Pair { low, high },
            }
        }
        Encoding::Composite32 { scale, .. } => {
            let (high, low) = (words[0], words[1]);
            if descriptor.is_sentinel(high) && descriptor.is_sentinel(low) {
                DecodedValue::Unavailable
            } else {
                let combined = u32::from(high) << 16 | u32::from(low);
                DecodedValue::Number(f64::from(combined) * scale)
            }
        }
    })
}

fn scaled_raw(address: u16, value: f64, scale: f64) -> Result<f64, Error> {
    let raw = (value / scale).round();
    if raw.is_finite() {
        Ok(raw)
    } else {
        Err(Error::EncodingRange {
            address,
            value,
            reason: "not a finite number",
        })
    }
}

fn encode_byte(address: u16, value: f64, scale: f64) -> Result<u8, Error> {
    let raw = scaled_raw(address, value, scale)?;
    if !(0.0..f64::from(BYTE_SENTINEL)).contains(&raw) {
        return Err(Error::EncodingRange {
            address,
            value,
            reason: "outside 0..=254 after scaling",
        });
    }
    Ok(raw as u8)
}

/// Encodes a physical value into the raw words of a register.
///
/// `current` is the word the register holds right now; it is only consulted
/// when a [`WriteValue::Pair`] leaves one half unspecified. The returned
/// words follow the order of [`RegisterDescriptor::word_addresses`].
pub fn encode(
    descriptor: &RegisterDescriptor,
    value: &WriteValue,
    current: Option<u16>,
) -> Result<Vec<u16>, Error> {
    let address = descriptor.address;
    if !descriptor.access.is_writable() {
        return Err(Error::NotWritable(address));
    }
    match (&descriptor.encoding, value) {
        (Encoding::UnsignedWord { scale }, WriteValue::Number(value)) => {
            let raw = scaled_raw(address, *value, *scale)?;
            if !(0.0..=f64::from(u16::MAX)).contains(&raw) {
                return Err(Error::EncodingRange {
                    address,
                    value: *value,
                    reason: "outside the unsigned 16-bit range",
                });
            }
            let word = raw as u16;
            if descriptor.is_sentinel(word) {
                return Err(Error::EncodingRange {
                    address,
                    value: *value,
                    reason: "raw value is reserved for an absent sensor",
                });
            }
            Ok(vec![word])
        }
        (Encoding::SignedWord { scale }, WriteValue::Number(value)) => {
            let raw = scaled_raw(address, *value, *scale)?;
            if !(f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&raw) {
                return Err(Error::EncodingRange {
                    address,
                    value: *value,
                    reason: "outside the signed 16-bit range",
                });
            }
            let word = raw as i16 as u16;
            if descriptor.is_sentinel(word) {
                return Err(Error::EncodingRange {
                    address,
                    value: *value,
                    reason: "raw value is reserved for an absent sensor",
                });
            }
            Ok(vec![word])
        }
        (Encoding::PackedBytePair { scale, .. }, WriteValue::Pair { low, high }) => {
            let current = current.map(split_bytes);
            let keep = |index: usize| {
                current
                    .map(|bytes| bytes[index])
                    .ok_or(Error::MissingCurrentWord(address))
            };
            let low = match low {
                Some(value) => encode_byte(address, *value, *scale)?,
                None => keep(0)?,
            };
            let high = match high {
                Some(value) => encode_byte(address, *value, *scale)?,
                None => keep(1)?,
            };
            Ok(vec![u16::from(high) << 8 | u16::from(low)])
        }
        (Encoding::Composite32 { scale, .. }, WriteValue::Number(value)) => {
            let raw = scaled_raw(address, *value, *scale)?;
            if !(0.0..=f64::from(u32::MAX)).contains(&raw) {
                return Err(Error::EncodingRange {
                    address,
                    value: *value,
                    reason: "outside the unsigned 32-bit range",
                });
            }
            let raw = raw as u32;
            let words = [(raw >> 16) as u16, (raw & 0xFFFF) as u16];
            if words.iter().all(|word| descriptor.is_sentinel(*word)) {
                return Err(Error::EncodingRange {
                    address,
                    value: *value,
                    reason: "raw value is reserved for an absent sensor",
                });
            }
            Ok(words.to_vec())
        }
        _ => Err(Error::ValueKind(address)),
    }
}

/// Time needed to move `bytes` over a serial link, at 11 bits per character.
pub fn serial_transfer_time(bytes: u32, baud_rate: u32) -> Duration {
    if baud_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(u64::from(bytes) * 11 * 1_000_000 / u64::from(baud_rate))
}

/// Minimum silent interval between two RTU frames (3.5 character times),
/// never below 1.75 ms.
pub fn minimum_inter_frame_delay(baud_rate: u32) -> Duration {
    const PRACTICAL_MIN_INTER_FRAME_DELAY_MICROS: u64 = 1_750;
    if baud_rate == 0 {
        return Duration::from_micros(PRACTICAL_MIN_INTER_FRAME_DELAY_MICROS);
    }
    let micros = 38_500_000 / u64::from(baud_rate);
    Duration::from_micros(micros.max(PRACTICAL_MIN_INTER_FRAME_DELAY_MICROS))
}

/// Wire time of a `0x03` round trip reading `quantity` registers over the
/// serial side of the gateway: 8 request bytes, 5 + 2 * quantity response
/// bytes and the inter-frame gap.
pub fn read_round_trip_time(quantity: u16, baud_rate: u32) -> Duration {
    let bytes = 8 + 5 + 2 * u32::from(quantity);
    serial_transfer_time(bytes, baud_rate) + minimum_inter_frame_delay(baud_rate) * 2
}
