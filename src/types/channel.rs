//! Channel payload variants carried inside a packet.

use crate::{Result, TelemetryError};

/// Channel type tag found in every generic channel header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum ChannelType {
    Analog = 1,
    Gps = 2,
    CanFd = 3,
    Tacho = 4,
}

impl ChannelType {
    /// Map a raw wire tag to a known channel type.
    ///
    /// An unknown tag means the device speaks a protocol revision this
    /// library does not understand, so it is reported as a fatal error.
    pub fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            1 => Ok(ChannelType::Analog),
            2 => Ok(ChannelType::Gps),
            3 => Ok(ChannelType::CanFd),
            4 => Ok(ChannelType::Tacho),
            _ => Err(TelemetryError::UnknownChannelType { tag }),
        }
    }

    pub fn tag(self) -> u16 {
        self as u16
    }
}

/// Generic header shared by every channel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelHeader {
    pub channel_type: ChannelType,
    pub channel_id: u16,
    /// Declared size of this generic header in bytes.
    pub header_size: u16,
    /// Device clock timestamp in nanoseconds.
    pub timestamp: u64,
}

/// Block of analog samples from one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogPacket {
    pub header: ChannelHeader,
    /// Envelope minimum reported by the device for this block.
    pub min: f32,
    /// Envelope maximum reported by the device for this block.
    pub max: f32,
    pub samples: Vec<f32>,
}

impl AnalogPacket {
    pub fn channel_id(&self) -> u16 {
        self.header.channel_id
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }
}

/// Raw NMEA text captured by a GPS channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpsPacket {
    pub header: ChannelHeader,
    /// Device clock timestamp at which the sentence was latched.
    pub timestamp: u64,
    /// One or more CR/LF separated NMEA sentences.
    pub message: String,
}

impl GpsPacket {
    pub fn channel_id(&self) -> u16 {
        self.header.channel_id
    }
}

/// CAN FD block; only its size is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFdPacket {
    pub header: ChannelHeader,
    pub frame_count: u32,
    pub data_length: u32,
}

/// Tachometer edge block; only its size is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TachoPacket {
    pub header: ChannelHeader,
    pub edge_count: u32,
}

/// One decoded channel payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPayload {
    Analog(AnalogPacket),
    Gps(GpsPacket),
    CanFd(CanFdPacket),
    Tacho(TachoPacket),
}

impl ChannelPayload {
    pub fn header(&self) -> &ChannelHeader {
        match self {
            ChannelPayload::Analog(p) => &p.header,
            ChannelPayload::Gps(p) => &p.header,
            ChannelPayload::CanFd(p) => &p.header,
            ChannelPayload::Tacho(p) => &p.header,
        }
    }

    pub fn channel_type(&self) -> ChannelType {
        self.header().channel_type
    }

    pub fn channel_id(&self) -> u16 {
        self.header().channel_id
    }
}
