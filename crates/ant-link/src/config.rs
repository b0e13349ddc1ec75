//! Link configuration

use std::time::Duration;

use ant_protocol::ChannelParameters;
use serde::{Deserialize, Serialize};

/// How a link gives its channel back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseMode {
    /// Clear the event handler and release without a close command
    #[default]
    Soft,
    /// Send the close command first, then clear the handler and release
    Hard,
}

/// Configuration shared by every link opened by a controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Shared search window for one search batch (seconds)
    pub search_timeout_secs: u64,
    /// Consecutive receive failures that close a link
    pub rx_fail_threshold: u32,
    /// How links are closed
    pub close_mode: CloseMode,
    /// Parameters applied to every channel
    pub channel: ChannelParameters,
}

impl LinkConfig {
    /// Search window as a duration
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    /// Receive failure threshold, never below 1
    pub fn rx_fail_threshold(&self) -> u32 {
        self.rx_fail_threshold.max(1)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            search_timeout_secs: 15,
            rx_fail_threshold: 5,
            close_mode: CloseMode::Soft,
            channel: ChannelParameters::default(),
        }
    }
}
