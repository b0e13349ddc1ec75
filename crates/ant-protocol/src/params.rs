//! Channel parameters
//!
//! The controller always opens bidirectional slave channels with a wildcard
//! device number, so any peer with a matching device type and transmission
//! type can be found.

/// Channel role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChannelType {
    /// Receives broadcasts from a master and may send data back
    #[default]
    BidirectionalSlave,
}

/// ANT channel id used as a search filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId {
    /// Device number (0 matches any device)
    pub device_number: u16,
    /// Device type
    pub device_type: u16,
    /// Transmission type (0 matches any transmission type)
    pub transmission_type: u8,
}

impl ChannelId {
    /// Device number meaning "any device"
    pub const WILDCARD_DEVICE: u16 = 0;

    /// Whether a peer with this id would be found by a search using `self`
    pub fn matches(&self, device_number: u16, device_type: u16, transmission_type: u8) -> bool {
        (self.device_number == Self::WILDCARD_DEVICE || self.device_number == device_number)
            && self.device_type == device_type
            && (self.transmission_type == 0 || self.transmission_type == transmission_type)
    }
}

/// Immutable configuration applied to a channel before opening
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ChannelParameters {
    /// Channel role (always bidirectional slave)
    #[cfg_attr(feature = "serde", serde(skip))]
    channel_type: ChannelType,
    /// Device type to search for
    device_type: u16,
    /// Transmission type to search for
    transmission_type: u8,
    /// RF frequency as an offset from 2400 MHz
    rf_frequency: u8,
    /// Message period in 1/32768 s ticks
    period: u16,
}

impl ChannelParameters {
    /// Default device type
    pub const DEFAULT_DEVICE_TYPE: u16 = 16;
    /// Default transmission type
    pub const DEFAULT_TRANSMISSION_TYPE: u8 = 0;
    /// Default RF frequency offset (2457 MHz)
    pub const DEFAULT_RF_FREQUENCY: u8 = 57;
    /// Default message period (4 Hz)
    pub const DEFAULT_PERIOD: u16 = 8192;

    /// Create parameters for a bidirectional slave channel
    pub fn new(device_type: u16, transmission_type: u8, rf_frequency: u8, period: u16) -> Self {
        Self {
            channel_type: ChannelType::BidirectionalSlave,
            device_type,
            transmission_type,
            rf_frequency,
            period,
        }
    }

    /// Channel role
    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    /// Device type to search for
    pub fn device_type(&self) -> u16 {
        self.device_type
    }

    /// Transmission type to search for
    pub fn transmission_type(&self) -> u8 {
        self.transmission_type
    }

    /// RF frequency offset from 2400 MHz
    pub fn rf_frequency(&self) -> u8 {
        self.rf_frequency
    }

    /// Message period in 1/32768 s ticks
    pub fn period(&self) -> u16 {
        self.period
    }

    /// Channel id filter with a wildcard device number
    pub fn channel_id(&self) -> ChannelId {
        ChannelId {
            device_number: ChannelId::WILDCARD_DEVICE,
            device_type: self.device_type,
            transmission_type: self.transmission_type,
        }
    }

    /// RF frequency in MHz
    pub fn frequency_mhz(&self) -> u32 {
        2400 + u32::from(self.rf_frequency)
    }

    /// Message rate in Hz
    pub fn message_rate_hz(&self) -> f64 {
        if self.period == 0 {
            return 0.0;
        }
        32768.0 / f64::from(self.period)
    }
}

impl Default for ChannelParameters {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_DEVICE_TYPE,
            Self::DEFAULT_TRANSMISSION_TYPE,
            Self::DEFAULT_RF_FREQUENCY,
            Self::DEFAULT_PERIOD,
        )
    }
}
