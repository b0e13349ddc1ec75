//! Error types for channel links

use ant_protocol::ServiceError;
use thiserror::Error;

use crate::link::LinkState;

/// Errors that can occur while managing channel links
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Every channel slot is taken (an expected outcome, not a fault)
    #[error("no channel available")]
    NoChannelAvailable,

    /// The radio service call failed
    #[error("radio transport error: {0}")]
    Transport(ServiceError),

    /// The radio refused the channel parameters
    #[error("channel configuration rejected: {0}")]
    ConfigurationRejected(ServiceError),

    /// Operation attempted in a state that does not allow it
    #[error("cannot {operation} while link is {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the link was in
        state: LinkState,
    },

    /// No registered link at the requested position
    #[error("no link at position {0}")]
    NoSuchLink(usize),
}

impl LinkError {
    /// Classify a failure from the configure sequence
    pub fn from_configure(err: ServiceError) -> Self {
        match err {
            ServiceError::CommandFailed { .. } => LinkError::ConfigurationRejected(err),
            other => LinkError::Transport(other),
        }
    }

    /// Whether the observer should be told about this error
    pub fn is_user_visible(&self) -> bool {
        matches!(self, LinkError::NoChannelAvailable | LinkError::Transport(_))
    }
}

impl From<ServiceError> for LinkError {
    fn from(err: ServiceError) -> Self {
        if err.is_all_channels_in_use() {
            LinkError::NoChannelAvailable
        } else {
            LinkError::Transport(err)
        }
    }
}
