//! Virtual light peer
//!
//! Simulates a remote light that broadcasts its intensity on the update page
//! and applies command pages sent by the controller.

use ant_protocol::codec::{decode_command, MAX_INTENSITY};
use ant_protocol::{ChannelId, Frame, Operation};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for creating a virtual peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualPeerConfig {
    /// Display name
    pub name: String,
    /// Device number (unique per peer)
    pub device_number: u16,
    /// Device type
    #[serde(default = "default_device_type")]
    pub device_type: u16,
    /// Transmission type
    #[serde(default)]
    pub transmission_type: u8,
    /// Initial intensity (`None` reports the unknown sentinel)
    #[serde(default)]
    pub initial_intensity: Option<u8>,
}

fn default_device_type() -> u16 {
    16
}

impl Default for VirtualPeerConfig {
    fn default() -> Self {
        Self {
            name: "Virtual Light".to_string(),
            device_number: 1,
            device_type: default_device_type(),
            transmission_type: 0,
            initial_intensity: Some(50),
        }
    }
}

/// A simulated light peer
#[derive(Debug, Clone)]
pub struct VirtualPeer {
    name: String,
    device_number: u16,
    device_type: u16,
    transmission_type: u8,
    intensity: Option<u8>,
    /// Command pages received (for test verification)
    received: Vec<Frame>,
}

impl VirtualPeer {
    /// Create a peer with the default device type at 50%
    pub fn new(name: impl Into<String>, device_number: u16) -> Self {
        Self {
            name: name.into(),
            device_number,
            device_type: default_device_type(),
            transmission_type: 0,
            intensity: Some(50),
            received: Vec::new(),
        }
    }

    /// Create a peer from configuration
    pub fn from_config(config: VirtualPeerConfig) -> Self {
        Self {
            name: config.name,
            device_number: config.device_number,
            device_type: config.device_type,
            transmission_type: config.transmission_type,
            intensity: config.initial_intensity.map(|v| v.min(MAX_INTENSITY)),
            received: Vec::new(),
        }
    }

    /// Set the intensity reported at creation
    pub fn with_intensity(mut self, intensity: Option<u8>) -> Self {
        self.intensity = intensity.map(|v| v.min(MAX_INTENSITY));
        self
    }

    /// Set the device type
    pub fn with_device_type(mut self, device_type: u16) -> Self {
        self.device_type = device_type;
        self
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device number
    pub fn device_number(&self) -> u16 {
        self.device_number
    }

    /// Current intensity (`None` when unknown)
    pub fn intensity(&self) -> Option<u8> {
        self.intensity
    }

    /// Change the intensity locally (as if adjusted at the light)
    pub fn set_intensity(&mut self, intensity: Option<u8>) {
        self.intensity = intensity.map(|v| v.min(MAX_INTENSITY));
    }

    /// Command pages received so far
    pub fn received(&self) -> &[Frame] {
        &self.received
    }

    /// Whether a search with `filter` would find this peer
    pub fn is_found_by(&self, filter: &ChannelId) -> bool {
        filter.matches(self.device_number, self.device_type, self.transmission_type)
    }

    /// The update page this peer currently broadcasts
    pub fn update_frame(&self) -> Frame {
        Frame::update(self.intensity)
    }

    /// Apply a command page, returning whether the intensity changed
    ///
    /// Relative steps use the larger endpoint as the 100% reference: a
    /// decrease of `m` lands on `cur * (100 - m) / 100`, an increase of `m`
    /// lands on `cur * 100 / (100 - m)`. An increase of 100% can only come
    /// from zero, so it is taken to mean full intensity.
    pub fn apply(&mut self, frame: &Frame) -> bool {
        self.received.push(*frame);

        let Some(cmd) = decode_command(frame.as_ref()) else {
            debug!("Peer {} ignoring non-command page {}", self.name, frame);
            return false;
        };

        let current = u32::from(self.intensity.unwrap_or(0));
        let magnitude = u32::from(cmd.value.min(MAX_INTENSITY));
        let next = match cmd.operation {
            Operation::Absolute => u32::from(cmd.value),
            Operation::Decrease => (current * (100 - magnitude) + 50) / 100,
            Operation::Increase if magnitude >= 100 => u32::from(MAX_INTENSITY),
            Operation::Increase => {
                let remaining = 100 - magnitude;
                (current * 100 + remaining / 2) / remaining
            }
        };
        let next = next.min(u32::from(MAX_INTENSITY)) as u8;

        debug!(
            "Peer {} applying {:?} {} ({:?} -> {})",
            self.name, cmd.operation, cmd.value, self.intensity, next
        );

        let changed = self.intensity != Some(next);
        self.intensity = Some(next);
        changed
    }
}
