//! ANT Radio Simulation Library
//!
//! This crate provides a simulation layer for testing the light controller
//! without an ANT radio. It includes:
//!
//! - **SimulatedRadio**: an in-memory radio service with a fixed number of
//!   channels, fault injection, and release accounting
//! - **VirtualPeer**: a light that broadcasts its intensity and applies the
//!   commands it receives
//!
//! # Example
//!
//! ```rust
//! use ant_protocol::{ChannelParameters, RadioService};
//! use ant_sim::{SimulatedRadio, VirtualPeer};
//!
//! let radio = SimulatedRadio::new(4).with_peer(VirtualPeer::new("Desk Lamp", 12));
//!
//! let handle = radio.acquire_channel().unwrap();
//! radio.configure(handle, &ChannelParameters::default()).unwrap();
//! radio.open(handle).unwrap();
//!
//! assert_eq!(radio.peer_intensity(handle), Some(Some(50)));
//! ```

pub mod peer;
pub mod radio;

pub use peer::{VirtualPeer, VirtualPeerConfig};
pub use radio::{SimOp, SimulatedRadio};
