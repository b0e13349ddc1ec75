//! Intensity payload codec
//!
//! Every ANT message payload is exactly 8 bytes. Two data pages are used:
//!
//! # Update page (peer → controller)
//! ```text
//! 01 [value] FF FF FF FF FF FF
//! ```
//! `value` is the current intensity (0..=100) or `FF` when the peer does not
//! know its own value. An unknown value must never be displayed or trusted.
//!
//! # Command page (controller → peer)
//! ```text
//! 10 FF FF FF FF FF [value] [op]
//! ```
//! `op` selects how `value` is applied:
//! - `0x63` (99): set the intensity to `value`
//! - `0x04`: increase by `value` percent
//! - `0x05`: decrease by `value` percent
//!
//! Relative steps are expressed as a percentage of the *larger* of the two
//! endpoints, so the magnitude never exceeds 100 and a zero endpoint never
//! divides by zero.

use std::fmt;

use crate::error::{FrameError, InvalidIntensity, UnknownValue};

/// Length of every ANT data payload
pub const PAYLOAD_LEN: usize = 8;

/// Page id of an intensity update sent by a peer
pub const UPDATE_PAGE: u8 = 0x01;
/// Page id of a command sent by the controller
pub const COMMAND_PAGE: u8 = 0x10;
/// Byte 1 value meaning "intensity unknown"
pub const VALUE_UNKNOWN: u8 = 0xFF;
/// Filler for unused payload bytes
pub const NO_VALUE: u8 = 0xFF;

/// Offset of the value in an update page
const UPDATE_VALUE_OFFSET: usize = 1;
/// Offset of the value in a command page
const COMMAND_VALUE_OFFSET: usize = 6;
/// Offset of the operation selector in a command page
const COMMAND_OP_OFFSET: usize = 7;

/// Maximum intensity percentage
pub const MAX_INTENSITY: u8 = 100;

/// One 8-byte ANT payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame([u8; PAYLOAD_LEN]);

impl Frame {
    /// Wrap raw payload bytes
    pub const fn new(bytes: [u8; PAYLOAD_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an update page reporting `value` (`None` encodes the unknown sentinel)
    pub fn update(value: Option<u8>) -> Self {
        let mut bytes = [NO_VALUE; PAYLOAD_LEN];
        bytes[0] = UPDATE_PAGE;
        bytes[UPDATE_VALUE_OFFSET] = value.unwrap_or(VALUE_UNKNOWN);
        Self(bytes)
    }

    /// Raw payload bytes
    pub fn as_bytes(&self) -> &[u8; PAYLOAD_LEN] {
        &self.0
    }

    /// Data page id (byte 0)
    pub fn page(&self) -> u8 {
        self.0[0]
    }
}

impl From<[u8; PAYLOAD_LEN]> for Frame {
    fn from(bytes: [u8; PAYLOAD_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = FrameError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; PAYLOAD_LEN] =
            data.try_into().map_err(|_| FrameError::InvalidLength {
                expected: PAYLOAD_LEN,
                actual: data.len(),
            })?;
        Ok(Self(bytes))
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// Validated intensity percentage (0..=100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct Intensity(u8);

impl Intensity {
    /// Lowest intensity
    pub const MIN: Intensity = Intensity(0);
    /// Highest intensity
    pub const MAX: Intensity = Intensity(MAX_INTENSITY);

    /// Create an intensity, rejecting values above 100
    pub fn new(value: u8) -> Result<Self, InvalidIntensity> {
        if value > MAX_INTENSITY {
            Err(InvalidIntensity(value))
        } else {
            Ok(Self(value))
        }
    }

    /// Create an intensity, clamping values above 100
    pub fn saturating(value: u8) -> Self {
        Self(value.min(MAX_INTENSITY))
    }

    /// Raw percentage
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Intensity {
    type Error = InvalidIntensity;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Intensity> for u8 {
    fn from(value: Intensity) -> Self {
        value.0
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Last value reported by a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Reading {
    /// Nothing trustworthy has been received yet
    #[default]
    Unknown,
    /// Value decoded from an update page
    Known(u8),
}

impl Reading {
    /// The known value, if any
    pub fn value(self) -> Option<u8> {
        match self {
            Reading::Known(v) => Some(v),
            Reading::Unknown => None,
        }
    }

    /// Whether a value has been received
    pub fn is_known(self) -> bool {
        matches!(self, Reading::Known(_))
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Known(v) => write!(f, "{}", v),
            Reading::Unknown => f.write_str("---"),
        }
    }
}

/// Command page operation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operation {
    /// Set the intensity to an absolute value
    Absolute,
    /// Increase by a percentage
    Increase,
    /// Decrease by a percentage
    Decrease,
}

impl Operation {
    /// Wire selector byte
    pub fn selector(self) -> u8 {
        match self {
            Operation::Absolute => 99,
            Operation::Increase => 4,
            Operation::Decrease => 5,
        }
    }

    /// Parse a wire selector byte
    pub fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            99 => Some(Operation::Absolute),
            4 => Some(Operation::Increase),
            5 => Some(Operation::Decrease),
            _ => None,
        }
    }
}

/// Decoded command page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// How `value` is applied
    pub operation: Operation,
    /// Target value (absolute) or percentage (relative)
    pub value: u8,
}

fn command_frame(operation: Operation, value: u8) -> Frame {
    let mut bytes = [NO_VALUE; PAYLOAD_LEN];
    bytes[0] = COMMAND_PAGE;
    bytes[COMMAND_VALUE_OFFSET] = value;
    bytes[COMMAND_OP_OFFSET] = operation.selector();
    Frame(bytes)
}

/// Build a command setting the peer's intensity to `value`
pub fn encode_absolute(value: Intensity) -> Frame {
    command_frame(Operation::Absolute, value.get())
}

/// Build a command stepping the peer from `from` to `to`
///
/// The magnitude is `round(|to - from| / max(from, to) * 100)`. Equal
/// endpoints encode an increase of zero.
pub fn encode_relative(from: Intensity, to: Intensity) -> Frame {
    let (from, to) = (u32::from(from.get()), u32::from(to.get()));
    let reference = from.max(to);
    let diff = from.abs_diff(to);

    let magnitude = if reference == 0 {
        0
    } else {
        // Round half up in integer arithmetic
        (diff * 100 + reference / 2) / reference
    };

    let operation = if to < from {
        Operation::Decrease
    } else {
        Operation::Increase
    };

    command_frame(operation, magnitude.min(u32::from(u8::MAX)) as u8)
}

/// Whether `frame` is an intensity update page
///
/// An empty frame is never an update.
pub fn is_update_frame(frame: &[u8]) -> bool {
    frame.first() == Some(&UPDATE_PAGE)
}

/// Read the intensity from an update page
///
/// Returns [`UnknownValue`] for the `FF` sentinel and for frames too short to
/// carry a value. Every other byte is returned unchanged.
pub fn decode_value(frame: &[u8]) -> Result<u8, UnknownValue> {
    match frame.get(UPDATE_VALUE_OFFSET) {
        Some(&VALUE_UNKNOWN) | None => Err(UnknownValue),
        Some(&value) => Ok(value),
    }
}

/// Parse a command page
///
/// Returns `None` for other pages, short frames and unknown selectors.
pub fn decode_command(frame: &[u8]) -> Option<Command> {
    if frame.len() < PAYLOAD_LEN || frame[0] != COMMAND_PAGE {
        return None;
    }
    let operation = Operation::from_selector(frame[COMMAND_OP_OFFSET])?;
    Some(Command {
        operation,
        value: frame[COMMAND_VALUE_OFFSET],
    })
}
