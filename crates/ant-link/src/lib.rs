//! ANT Link Engine
//!
//! This crate manages the channels a light controller holds on a shared ANT
//! radio: acquiring them, searching for peers, keeping connected links alive,
//! and publishing the peers' intensity values.
//!
//! # Architecture
//!
//! - **ChannelResourcePool** hands out the radio's few channels and releases
//!   each exactly once
//! - **ChannelLink** is one channel's state machine
//!   (`Acquired → Configured → Searching → Connected → Closed`), driven by the
//!   radio's messages for that channel
//! - **SearchCoordinator** opens every free channel in parallel under one
//!   shared search window
//! - **LinkRegistry** keeps connected links in connection order and evicts
//!   the ones that die
//! - **LinkController** owns all of the above for one radio service
//!
//! All observer-facing output is a single [`LinkEvent`] stream.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ant_link::{LinkConfig, LinkController};
//! use ant_protocol::Intensity;
//! use ant_sim::SimulatedRadio;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (controller, _events) =
//!     LinkController::new(Arc::new(SimulatedRadio::default()), LinkConfig::default());
//!
//! if let Some(search) = controller.start_search() {
//!     search.await?;
//! }
//! controller.set_intensity(0, Intensity::new(75)?).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod link;
pub mod pool;
pub mod registry;
pub mod search;

pub use config::{CloseMode, LinkConfig};
pub use controller::{LinkController, Selection};
pub use error::LinkError;
pub use events::{CloseReason, EventSender, LinkEvent, SearchSummary};
pub use link::{run_event_pump, ChannelLink, LinkState, LinkUpdate, UpdateSender};
pub use pool::ChannelResourcePool;
pub use registry::LinkRegistry;
pub use search::SearchCoordinator;
