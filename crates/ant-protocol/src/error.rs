//! Error types for payload decoding and radio service calls

use thiserror::Error;

use crate::service::NotAvailableReason;

/// The peer reported the "unknown" sentinel instead of an intensity value
///
/// This is not a fault: callers must suppress the update rather than
/// substitute a fallback number.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("intensity value unknown")]
pub struct UnknownValue;

/// Intensity outside the 0..=100 range
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("intensity {0} out of range (0-100)")]
pub struct InvalidIntensity(pub u8);

/// Errors building a fixed-size frame from raw bytes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Payload is not exactly 8 bytes
    #[error("invalid payload length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Errors reported by the radio service
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The service refused to hand out a channel
    #[error("channel not available: {0}")]
    ChannelNotAvailable(NotAvailableReason),

    /// The IPC call to the service failed
    #[error("radio service call failed: {0}")]
    Remote(String),

    /// The radio rejected a channel command
    #[error("{command} rejected by radio (response 0x{code:02X})")]
    CommandFailed {
        /// Command that was rejected (e.g. "open")
        command: &'static str,
        /// Raw response code from the radio
        code: u8,
    },
}

impl ServiceError {
    /// Whether this error only means "every channel is taken"
    pub fn is_all_channels_in_use(&self) -> bool {
        matches!(
            self,
            ServiceError::ChannelNotAvailable(NotAvailableReason::AllChannelsInUse)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_channels_in_use_is_recognised() {
        let err = ServiceError::ChannelNotAvailable(NotAvailableReason::AllChannelsInUse);
        assert!(err.is_all_channels_in_use());

        let err = ServiceError::ChannelNotAvailable(NotAvailableReason::RadioDisabled);
        assert!(!err.is_all_channels_in_use());
        assert!(!ServiceError::Remote("binder died".into()).is_all_channels_in_use());
    }

    #[test]
    fn command_failed_display_includes_code() {
        let err = ServiceError::CommandFailed {
            command: "close",
            code: 0x15,
        };
        assert_eq!(err.to_string(), "close rejected by radio (response 0x15)");
    }
}
