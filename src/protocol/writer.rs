//! Frame encoder for mock devices, recordings and benchmarks.

use super::format::{CHANNEL_HEADER_SIZE, PACKET_HEADER_SIZE};
use crate::types::{ChannelType, PacketHeader};

/// Builds one wire frame in the device's layout.
///
/// ```rust
/// use qsync::protocol::{FrameWriter, decode_frame};
///
/// let bytes = FrameWriter::new(1).analog(3, 1_000, &[0.1, 0.2]).encode();
/// let (frame, consumed) = decode_frame(&bytes).unwrap();
/// assert_eq!(consumed, bytes.len());
/// assert_eq!(frame.payloads[0].channel_id(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct FrameWriter {
    sequence: u32,
    payload_type: u32,
    payload: Vec<u8>,
}

impl FrameWriter {
    /// Start a channel-data frame.
    pub fn new(sequence: u32) -> Self {
        Self { sequence, payload_type: PacketHeader::CHANNEL_DATA, payload: Vec::new() }
    }

    /// Frame with a non-channel payload type and an arbitrary body.
    pub fn opaque(sequence: u32, payload_type: u32, body: &[u8]) -> Self {
        Self { sequence, payload_type, payload: body.to_vec() }
    }

    pub fn analog(mut self, channel_id: u16, timestamp: u64, samples: &[f32]) -> Self {
        let min = samples.iter().copied().fold(f32::INFINITY, f32::min);
        let max = samples.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let (min, max) = if samples.is_empty() { (0.0, 0.0) } else { (min, max) };

        self.channel_header(ChannelType::Analog, channel_id, timestamp);
        self.put_u32(samples.len() as u32);
        self.payload.extend_from_slice(&min.to_le_bytes());
        self.payload.extend_from_slice(&max.to_le_bytes());
        self.put_u32(0);
        for sample in samples {
            self.payload.extend_from_slice(&sample.to_le_bytes());
        }
        self
    }

    pub fn gps(mut self, channel_id: u16, timestamp: u64, message: &str) -> Self {
        self.channel_header(ChannelType::Gps, channel_id, timestamp);
        self.payload.extend_from_slice(&timestamp.to_le_bytes());
        self.put_u32(message.len() as u32);
        self.put_u32(0);
        self.payload.extend_from_slice(message.as_bytes());
        self
    }

    pub fn can_fd(mut self, channel_id: u16, timestamp: u64, data: &[u8]) -> Self {
        self.channel_header(ChannelType::CanFd, channel_id, timestamp);
        self.put_u32(u32::from(!data.is_empty()));
        self.put_u32(data.len() as u32);
        self.payload.extend_from_slice(data);
        self
    }

    pub fn tacho(mut self, channel_id: u16, timestamp: u64, edges: &[u64]) -> Self {
        self.channel_header(ChannelType::Tacho, channel_id, timestamp);
        self.put_u32(edges.len() as u32);
        for edge in edges {
            self.payload.extend_from_slice(&edge.to_le_bytes());
        }
        self
    }

    /// Append raw bytes to the payload, bypassing channel layout.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.payload.extend_from_slice(bytes);
        self
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Header followed by the payload; the header declares the exact payload length.
    pub fn encode(&self) -> Vec<u8> {
        let header = PacketHeader {
            version: PacketHeader::VERSION,
            payload_type: self.payload_type,
            payload_size: self.payload.len() as u32,
            sequence: self.sequence,
        };
        let mut out = Vec::with_capacity(PACKET_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&encode_header(&header));
        out.extend_from_slice(&self.payload);
        out
    }

    fn channel_header(&mut self, channel_type: ChannelType, channel_id: u16, timestamp: u64) {
        self.payload.extend_from_slice(&channel_type.tag().to_le_bytes());
        self.payload.extend_from_slice(&channel_id.to_le_bytes());
        self.payload.extend_from_slice(&(CHANNEL_HEADER_SIZE as u16).to_le_bytes());
        self.payload.extend_from_slice(&0u16.to_le_bytes());
        self.payload.extend_from_slice(&timestamp.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.payload.extend_from_slice(&value.to_le_bytes());
    }
}

/// Encode a packet header.
pub fn encode_header(header: &PacketHeader) -> [u8; PACKET_HEADER_SIZE] {
    let mut out = [0u8; PACKET_HEADER_SIZE];
    out[0..4].copy_from_slice(&header.version.to_le_bytes());
    out[4..8].copy_from_slice(&header.payload_type.to_le_bytes());
    out[8..12].copy_from_slice(&header.payload_size.to_le_bytes());
    out[12..16].copy_from_slice(&header.sequence.to_le_bytes());
    out
}
