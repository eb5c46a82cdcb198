//! Outer packet envelope.

use super::ChannelPayload;

/// Fixed-size header that precedes every payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u32,
    /// 0 for structured channel data, anything else is opaque.
    pub payload_type: u32,
    pub payload_size: u32,
    pub sequence: u32,
}

impl PacketHeader {
    /// Size of the encoded header in bytes.
    pub const SIZE: usize = 16;

    /// The only header version this library decodes.
    pub const VERSION: u32 = 1;

    /// Payload type carrying channel headers and bodies.
    pub const CHANNEL_DATA: u32 = 0;

    pub fn is_channel_data(&self) -> bool {
        self.payload_type == Self::CHANNEL_DATA
    }
}

/// A decoded frame: header plus every structured payload it carried.
///
/// Opaque frames have an empty payload list.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: PacketHeader,
    pub payloads: Vec<ChannelPayload>,
}

impl Frame {
    /// Encoded size of the frame on the wire.
    pub fn wire_size(&self) -> usize {
        PacketHeader::SIZE + self.header.payload_size as usize
    }
}
