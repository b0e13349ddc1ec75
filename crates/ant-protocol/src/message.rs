//! Messages reported by the radio service for a channel
//!
//! The radio service delivers these asynchronously to whatever event sink is
//! installed on a channel. Only the subset the controller acts on is modelled
//! in detail; everything else is carried as its raw code.

use crate::codec::Frame;

/// ANT channel event codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    /// The channel searched for the configured timeout without finding a master
    RxSearchTimeout,
    /// A message expected in a channel period was not received
    RxFail,
    /// A broadcast message was transmitted
    Tx,
    /// An acknowledged or burst receive failed
    TransferRxFailed,
    /// An acknowledged transmission was confirmed by the peer
    TransferTxCompleted,
    /// An acknowledged transmission was not confirmed
    TransferTxFailed,
    /// The channel was closed
    ChannelClosed,
    /// Too many receive failures, channel dropped back to search
    RxFailGoToSearch,
    /// Two channels collided on the same timeslot
    ChannelCollision,
    /// A burst transfer has started
    TransferTxStart,
    /// Any other event code
    Other(u8),
}

impl EventCode {
    /// Parse a raw event code
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => EventCode::RxSearchTimeout,
            0x02 => EventCode::RxFail,
            0x03 => EventCode::Tx,
            0x04 => EventCode::TransferRxFailed,
            0x05 => EventCode::TransferTxCompleted,
            0x06 => EventCode::TransferTxFailed,
            0x07 => EventCode::ChannelClosed,
            0x08 => EventCode::RxFailGoToSearch,
            0x09 => EventCode::ChannelCollision,
            0x0A => EventCode::TransferTxStart,
            other => EventCode::Other(other),
        }
    }

    /// Raw event code
    pub fn code(self) -> u8 {
        match self {
            EventCode::RxSearchTimeout => 0x01,
            EventCode::RxFail => 0x02,
            EventCode::Tx => 0x03,
            EventCode::TransferRxFailed => 0x04,
            EventCode::TransferTxCompleted => 0x05,
            EventCode::TransferTxFailed => 0x06,
            EventCode::ChannelClosed => 0x07,
            EventCode::RxFailGoToSearch => 0x08,
            EventCode::ChannelCollision => 0x09,
            EventCode::TransferTxStart => 0x0A,
            EventCode::Other(code) => code,
        }
    }
}

/// Channel state as reported by a status request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// No channel type assigned
    Unassigned,
    /// Assigned and configured but not open
    Assigned,
    /// Open and searching for a master
    Searching,
    /// Open and synchronised with a master
    Tracking,
    /// The channel no longer exists on the radio
    Invalid,
}

impl ChannelState {
    /// Whether the channel still exists and is usable
    pub fn is_alive(self) -> bool {
        !matches!(self, ChannelState::Invalid | ChannelState::Unassigned)
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            ChannelState::Unassigned => "Unassigned",
            ChannelState::Assigned => "Assigned",
            ChannelState::Searching => "Searching",
            ChannelState::Tracking => "Tracking",
            ChannelState::Invalid => "Invalid",
        }
    }
}

/// A message delivered by the radio service for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFromAnt {
    /// Broadcast data received from the peer
    BroadcastData(Frame),
    /// Acknowledged data received from the peer
    AcknowledgedData(Frame),
    /// A channel event
    ChannelEvent(EventCode),
    /// The service lost the channel (service crash or radio removed)
    ChannelDeath,
}

impl MessageFromAnt {
    /// Payload carried by this message, if any
    pub fn payload(&self) -> Option<&Frame> {
        match self {
            MessageFromAnt::BroadcastData(frame) | MessageFromAnt::AcknowledgedData(frame) => {
                Some(frame)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_code_roundtrip_known_codes() {
        for code in 0x01..=0x0A {
            let event = EventCode::from_code(code);
            assert!(!matches!(event, EventCode::Other(_)));
            assert_eq!(event.code(), code);
        }
    }

    #[test]
    fn test_event_code_other() {
        assert_eq!(EventCode::from_code(0x30), EventCode::Other(0x30));
        assert_eq!(EventCode::Other(0x30).code(), 0x30);
    }

    #[test]
    fn test_channel_state_alive() {
        assert!(ChannelState::Searching.is_alive());
        assert!(ChannelState::Tracking.is_alive());
        assert!(ChannelState::Assigned.is_alive());
        assert!(!ChannelState::Invalid.is_alive());
        assert!(!ChannelState::Unassigned.is_alive());
    }

    #[test]
    fn test_payload_accessor() {
        let frame = Frame::update(Some(3));
        assert_eq!(
            MessageFromAnt::BroadcastData(frame).payload(),
            Some(&frame)
        );
        assert_eq!(
            MessageFromAnt::ChannelEvent(EventCode::RxFail).payload(),
            None
        );
    }
}
