//! ANT Light Protocol Library
//!
//! This crate provides the wire-level pieces shared by every part of the
//! light controller:
//!
//! - **Codec**: 8-byte payload encoding for intensity commands and decoding of
//!   intensity update pages, including the "unknown" sentinel
//! - **Messages**: the normalized events a radio service reports for a channel
//!   (broadcast data, channel events, channel death)
//! - **Channel parameters**: the immutable configuration applied to a channel
//!   before it is opened
//! - **Radio service**: the boundary trait to the system radio service that
//!   owns the hardware channels
//!
//! # Payload Format
//!
//! ```text
//! Update  (peer → controller):  01 VV .. .. .. .. .. ..      VV = 0..=100 or FF (unknown)
//! Command (controller → peer):  10 FF FF FF FF FF VV OP      OP = 63 (set), 04 (up), 05 (down)
//! ```
//!
//! # Example
//!
//! ```rust
//! use ant_protocol::codec::{decode_value, encode_absolute, is_update_frame};
//! use ant_protocol::Intensity;
//!
//! let frame = encode_absolute(Intensity::new(40).unwrap());
//! assert_eq!(frame.as_bytes()[6], 40);
//!
//! let update = [0x01, 75, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
//! assert!(is_update_frame(&update));
//! assert_eq!(decode_value(&update), Ok(75));
//! ```

pub mod codec;
pub mod error;
pub mod message;
pub mod params;
pub mod service;

pub use codec::{Command, Frame, Intensity, Operation, Reading, PAYLOAD_LEN};
pub use error::{FrameError, InvalidIntensity, ServiceError, UnknownValue};
pub use message::{ChannelState, EventCode, MessageFromAnt};
pub use params::{ChannelId, ChannelParameters, ChannelType};
pub use service::{ChannelHandle, EventSink, NotAvailableReason, RadioService};
