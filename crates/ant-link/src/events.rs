//! Unified event stream for observers
//!
//! Everything an observer needs to render the link list (search progress,
//! connections, value changes, closures and errors) arrives through a single
//! event channel. Events are sent from blocking-pool threads and link event
//! pumps; the receiving side is the one place that touches presentation.

use std::fmt;

use ant_protocol::{ChannelHandle, Reading};
use tokio::sync::mpsc;

/// Sender half of the observer channel
pub type EventSender = mpsc::UnboundedSender<LinkEvent>;

/// Why a link was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// No peer was found within the search window
    SearchTimedOut,
    /// Too many consecutive receive failures
    ReceiveFailures,
    /// The radio reported the channel closed
    ClosedByRadio,
    /// The radio service lost the channel
    ChannelDeath,
    /// Applying the channel parameters failed
    ConfigureFailed,
    /// Opening the channel failed
    OpenFailed,
    /// Closed on request
    Requested,
    /// Evicted because the channel is no longer alive
    Evicted,
    /// Closed while shutting down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::SearchTimedOut => "search timed out",
            CloseReason::ReceiveFailures => "too many receive failures",
            CloseReason::ClosedByRadio => "closed by radio",
            CloseReason::ChannelDeath => "channel died",
            CloseReason::ConfigureFailed => "configuration failed",
            CloseReason::OpenFailed => "open failed",
            CloseReason::Requested => "closed",
            CloseReason::Evicted => "no longer alive",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

/// Outcome counts for one search batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchSummary {
    /// Free channels reported when the search started
    pub available: usize,
    /// Slots that connected to a peer
    pub connected: usize,
    /// Slots force-closed at the end of the search window
    pub timed_out: usize,
    /// Slots that failed before or during opening
    pub failed: usize,
    /// Slots closed because the search was cancelled
    pub cancelled: usize,
}

/// Events delivered to the observer
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    // -------------------------------------------------------------------------
    // Search lifecycle
    // -------------------------------------------------------------------------
    /// A search batch has started
    SearchStarted,

    /// The search batch is over (fires exactly once per search)
    SearchFinished {
        /// What the batch achieved
        summary: SearchSummary,
    },

    /// No channel was free, so nothing was searched
    NoChannelsAvailable,

    // -------------------------------------------------------------------------
    // Link lifecycle
    // -------------------------------------------------------------------------
    /// A slot found a peer
    LinkConnected {
        /// Handle of the connected link
        handle: ChannelHandle,
    },

    /// A registered link closed and was removed
    LinkClosed {
        /// Handle of the closed link
        handle: ChannelHandle,
        /// Why it closed
        reason: CloseReason,
    },

    /// The set of registered links changed
    ListChanged {
        /// Registered handles in display order
        handles: Vec<ChannelHandle>,
    },

    /// The value vector changed
    ValuesChanged {
        /// One reading per registered link, in display order
        values: Vec<Reading>,
    },

    // -------------------------------------------------------------------------
    // Errors
    // -------------------------------------------------------------------------
    /// A failure the user should hear about
    Error {
        /// Where it happened (e.g. "Search")
        source: String,
        /// Error message
        message: String,
    },
}

impl LinkEvent {
    /// Check if this event belongs to the search lifecycle
    pub fn is_search_lifecycle(&self) -> bool {
        matches!(
            self,
            LinkEvent::SearchStarted
                | LinkEvent::SearchFinished { .. }
                | LinkEvent::NoChannelsAvailable
        )
    }

    /// Get the handle if this event concerns one link
    pub fn handle(&self) -> Option<ChannelHandle> {
        match self {
            LinkEvent::LinkConnected { handle } | LinkEvent::LinkClosed { handle, .. } => {
                Some(*handle)
            }
            _ => None,
        }
    }
}
