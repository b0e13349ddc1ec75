//! Radio service boundary
//!
//! The system radio service owns the ANT hardware and hands out a small,
//! fixed number of channels. It is reached over a request/response IPC
//! channel; channel events arrive asynchronously on the sink installed with
//! [`RadioService::set_event_sink`].

use std::fmt;

use tokio::sync::mpsc;

use crate::codec::Frame;
use crate::error::ServiceError;
use crate::message::{ChannelState, MessageFromAnt};
use crate::params::ChannelParameters;

/// Identifier for one hardware channel slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(pub u32);

impl ChannelHandle {
    /// Get the raw handle value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Why the service refused to hand out a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotAvailableReason {
    /// Every channel on the radio is in use
    AllChannelsInUse,
    /// The radio is switched off
    RadioDisabled,
    /// The requested network (ANT+) is not available
    NetworkNotAvailable,
    /// The radio service is not running
    ServiceUnavailable,
    /// The service gave no reason
    Unknown,
}

impl fmt::Display for NotAvailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NotAvailableReason::AllChannelsInUse => "all channels in use",
            NotAvailableReason::RadioDisabled => "radio disabled",
            NotAvailableReason::NetworkNotAvailable => "network not available",
            NotAvailableReason::ServiceUnavailable => "radio service unavailable",
            NotAvailableReason::Unknown => "unknown reason",
        };
        f.write_str(text)
    }
}

/// Where the service delivers a channel's messages
pub type EventSink = mpsc::UnboundedSender<MessageFromAnt>;

/// Request/response interface of the system radio service
///
/// Calls may block on IPC, so async callers should run them on the blocking
/// pool. Implementations must be safe to call from several threads at once.
pub trait RadioService: Send + Sync {
    /// Number of free channels
    ///
    /// Some services return 0 both when no channel is free and when the query
    /// itself failed, so 0 has to be confirmed by other means.
    fn channels_available(&self) -> Result<usize, ServiceError>;

    /// Take ownership of a free channel on the ANT+ network
    fn acquire_channel(&self) -> Result<ChannelHandle, ServiceError>;

    /// Assign the channel type and apply id, frequency and period
    fn configure(&self, handle: ChannelHandle, params: &ChannelParameters)
        -> Result<(), ServiceError>;

    /// Open the channel (starts searching)
    fn open(&self, handle: ChannelHandle) -> Result<(), ServiceError>;

    /// Close the channel
    fn close(&self, handle: ChannelHandle) -> Result<(), ServiceError>;

    /// Give the channel back to the service
    ///
    /// Releasing an unknown or already released channel has no effect.
    fn release_channel(&self, handle: ChannelHandle);

    /// Install (`Some`) or clear (`None`) the channel's event sink
    fn set_event_sink(
        &self,
        handle: ChannelHandle,
        sink: Option<EventSink>,
    ) -> Result<(), ServiceError>;

    /// Set the data broadcast in every channel period
    fn send_broadcast(&self, handle: ChannelHandle, payload: &Frame) -> Result<(), ServiceError>;

    /// Send data the peer has to acknowledge
    fn send_acknowledged(&self, handle: ChannelHandle, payload: &Frame)
        -> Result<(), ServiceError>;

    /// Ask the radio for the channel's current state
    fn request_status(&self, handle: ChannelHandle) -> Result<ChannelState, ServiceError>;
}
