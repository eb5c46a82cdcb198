//! Wire format structures and decoding
//!
//! Decodes the repeating `[packet header][payload]` frames a QServer
//! device writes to its streaming socket.
//!
//! ## Frame Structure
//!
//! 1. **Packet Header** (16 bytes) - version, payload type, payload size, sequence
//! 2. **Payload** (`payload_size` bytes) - for payload type 0, a sequence of channel blocks:
//!    - **Generic Channel Header** (16 bytes) - type tag, channel id, header size, timestamp
//!    - **Type Header** - analog/GPS 16 bytes, CAN FD 8 bytes, tacho none
//!    - **Body** - samples, NMEA text, CAN bytes or tacho edges
//!
//! All fields are little-endian. Payloads of any other type are opaque and
//! only skipped.
//!
//! ## Byte Accounting
//!
//! Every channel block is measured as it is decoded and subtracted from the
//! bytes left in the payload. A block that claims more bytes than remain, or a
//! tail too short to hold a generic header, means the stream lost framing.
//! Both are fatal: there is no marker to resynchronize on.

use crate::types::{
    AnalogPacket, CanFdPacket, ChannelHeader, ChannelPayload, ChannelType, Frame, GpsPacket,
    PacketHeader, TachoPacket,
};
use crate::{Result, TelemetryError};
use tracing::{debug, trace};

// Size constants for wire structures
pub const PACKET_HEADER_SIZE: usize = PacketHeader::SIZE;
pub const CHANNEL_HEADER_SIZE: usize = 16;
pub const ANALOG_HEADER_SIZE: usize = 16;
pub const GPS_HEADER_SIZE: usize = 16;
pub const CAN_FD_HEADER_SIZE: usize = 8;
pub const TACHO_COUNT_SIZE: usize = 4;

const SAMPLE_SIZE: usize = 4;
const TACHO_EDGE_SIZE: usize = 8;

/// Decode the fixed packet header.
pub fn decode_header(bytes: &[u8]) -> Result<PacketHeader> {
    if bytes.len() < PACKET_HEADER_SIZE {
        return Err(TelemetryError::framing(
            "packet header",
            format!("need {} bytes, have {}", PACKET_HEADER_SIZE, bytes.len()),
        ));
    }

    let header = PacketHeader {
        version: parse_u32_le(bytes, 0)?,
        payload_type: parse_u32_le(bytes, 4)?,
        payload_size: parse_u32_le(bytes, 8)?,
        sequence: parse_u32_le(bytes, 12)?,
    };

    if header.version != PacketHeader::VERSION {
        return Err(TelemetryError::Version {
            expected: PacketHeader::VERSION,
            found: header.version,
        });
    }

    trace!(
        "Packet header: type={}, size={}, sequence={}",
        header.payload_type, header.payload_size, header.sequence
    );
    Ok(header)
}

/// Decode the generic header every channel block starts with.
pub fn decode_channel_header(bytes: &[u8]) -> Result<ChannelHeader> {
    if bytes.len() < CHANNEL_HEADER_SIZE {
        return Err(TelemetryError::framing(
            "channel header",
            format!(
                "{} bytes left in payload, generic header needs {}",
                bytes.len(),
                CHANNEL_HEADER_SIZE
            ),
        ));
    }

    let channel_type = ChannelType::from_tag(parse_u16_le(bytes, 0)?)?;
    let channel_id = parse_u16_le(bytes, 2)?;
    let header_size = parse_u16_le(bytes, 4)?;
    let timestamp = parse_u64_le(bytes, 8)?;

    if header_size as usize != CHANNEL_HEADER_SIZE {
        return Err(TelemetryError::framing(
            "channel header",
            format!(
                "channel {} declares header size {}, expected {}",
                channel_id, header_size, CHANNEL_HEADER_SIZE
            ),
        ));
    }

    Ok(ChannelHeader { channel_type, channel_id, header_size, timestamp })
}

/// Decode the type header and body following a generic channel header.
///
/// `bytes` starts right after the generic header. Returns the payload and
/// the number of bytes it occupied, excluding the generic header.
pub fn decode_channel_payload(
    generic: &ChannelHeader,
    bytes: &[u8],
) -> Result<(ChannelPayload, usize)> {
    match generic.channel_type {
        ChannelType::Analog => {
            require(bytes, ANALOG_HEADER_SIZE, "analog header", generic)?;
            let sample_count = parse_u32_le(bytes, 0)? as usize;
            let min = parse_f32_le(bytes, 4)?;
            let max = parse_f32_le(bytes, 8)?;

            let body_len = checked_len(sample_count, SAMPLE_SIZE, generic)?;
            let consumed = ANALOG_HEADER_SIZE + body_len;
            require(bytes, consumed, "analog samples", generic)?;

            let samples = bytes[ANALOG_HEADER_SIZE..consumed]
                .chunks_exact(SAMPLE_SIZE)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();

            let packet = AnalogPacket { header: *generic, min, max, samples };
            Ok((ChannelPayload::Analog(packet), consumed))
        }
        ChannelType::Gps => {
            require(bytes, GPS_HEADER_SIZE, "GPS header", generic)?;
            let timestamp = parse_u64_le(bytes, 0)?;
            let message_length = parse_u32_le(bytes, 8)? as usize;

            let consumed = GPS_HEADER_SIZE + message_length;
            require(bytes, consumed, "GPS message", generic)?;
            let message = String::from_utf8_lossy(&bytes[GPS_HEADER_SIZE..consumed])
                .trim_end_matches('\0')
                .to_string();

            Ok((ChannelPayload::Gps(GpsPacket { header: *generic, timestamp, message }), consumed))
        }
        ChannelType::CanFd => {
            require(bytes, CAN_FD_HEADER_SIZE, "CAN FD header", generic)?;
            let frame_count = parse_u32_le(bytes, 0)?;
            let data_length = parse_u32_le(bytes, 4)?;

            let consumed = CAN_FD_HEADER_SIZE + data_length as usize;
            require(bytes, consumed, "CAN FD data", generic)?;

            Ok((
                ChannelPayload::CanFd(CanFdPacket { header: *generic, frame_count, data_length }),
                consumed,
            ))
        }
        ChannelType::Tacho => {
            require(bytes, TACHO_COUNT_SIZE, "tacho edge count", generic)?;
            let edge_count = parse_u32_le(bytes, 0)?;

            let body_len = checked_len(edge_count as usize, TACHO_EDGE_SIZE, generic)?;
            let consumed = TACHO_COUNT_SIZE + body_len;
            require(bytes, consumed, "tacho edges", generic)?;

            Ok((ChannelPayload::Tacho(TachoPacket { header: *generic, edge_count }), consumed))
        }
    }
}

/// Decode every channel block in a payload.
///
/// Opaque payload types and empty payloads yield no channel data. The
/// payload slice must be exactly `header.payload_size` bytes long.
pub fn decode_payload(header: &PacketHeader, payload: &[u8]) -> Result<Vec<ChannelPayload>> {
    if payload.len() != header.payload_size as usize {
        return Err(TelemetryError::framing(
            "packet payload",
            format!("header declares {} bytes, got {}", header.payload_size, payload.len()),
        ));
    }

    if !header.is_channel_data() {
        trace!("Skipping opaque payload type {} ({} bytes)", header.payload_type, payload.len());
        return Ok(Vec::new());
    }

    let mut payloads = Vec::new();
    let mut offset = 0usize;

    while offset < payload.len() {
        let generic = decode_channel_header(&payload[offset..])?;
        offset += CHANNEL_HEADER_SIZE;

        let (decoded, consumed) = decode_channel_payload(&generic, &payload[offset..])?;
        offset += consumed;
        payloads.push(decoded);
    }

    debug!(
        "Decoded {} channel payloads from packet {} ({} bytes)",
        payloads.len(),
        header.sequence,
        payload.len()
    );
    Ok(payloads)
}

/// Decode one whole frame from the front of a contiguous buffer.
///
/// Returns the frame and the number of bytes it occupied.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize)> {
    let header = decode_header(bytes)?;
    let end = PACKET_HEADER_SIZE + header.payload_size as usize;
    if bytes.len() < end {
        return Err(TelemetryError::framing(
            "frame",
            format!("frame needs {} bytes, buffer holds {}", end, bytes.len()),
        ));
    }

    let payloads = decode_payload(&header, &bytes[PACKET_HEADER_SIZE..end])?;
    Ok((Frame { header, payloads }, end))
}

/// Decode back-to-back frames filling a buffer.
pub fn decode_frames(mut bytes: &[u8]) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let (frame, consumed) = decode_frame(bytes)?;
        frames.push(frame);
        bytes = &bytes[consumed..];
    }
    Ok(frames)
}

fn require(bytes: &[u8], needed: usize, what: &str, generic: &ChannelHeader) -> Result<()> {
    if bytes.len() < needed {
        return Err(TelemetryError::framing(
            what,
            format!(
                "channel {} ({:?}) needs {} bytes, {} left in payload",
                generic.channel_id,
                generic.channel_type,
                needed,
                bytes.len()
            ),
        ));
    }
    Ok(())
}

fn checked_len(count: usize, item_size: usize, generic: &ChannelHeader) -> Result<usize> {
    count.checked_mul(item_size).ok_or_else(|| {
        TelemetryError::framing(
            "channel body",
            format!("channel {} declares an impossible count {}", generic.channel_id, count),
        )
    })
}

/// Safe byte parsing helpers with bounds checking
fn parse_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = field(data, offset, 2, "u16")?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn parse_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = field(data, offset, 4, "u32")?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn parse_f32_le(data: &[u8], offset: usize) -> Result<f32> {
    Ok(f32::from_bits(parse_u32_le(data, offset)?))
}

fn parse_u64_le(data: &[u8], offset: usize) -> Result<u64> {
    let bytes = field(data, offset, 8, "u64")?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

fn field<'a>(data: &'a [u8], offset: usize, len: usize, kind: &str) -> Result<&'a [u8]> {
    data.get(offset..offset + len).ok_or_else(|| TelemetryError::Framing {
        context: "Integer parsing".to_string(),
        details: format!(
            "Insufficient data for {} at offset {} (need {} bytes, have {})",
            kind,
            offset,
            len,
            data.len().saturating_sub(offset)
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameWriter;
    use anyhow::{Context, Result, ensure};
    use proptest::prelude::*;

    #[test]
    fn decodes_mixed_channel_frame() -> Result<()> {
        let bytes = FrameWriter::new(7)
            .analog(1, 1_000, &[0.5, -0.25, 1.0])
            .gps(9, 1_000, "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47")
            .can_fd(2, 1_000, &[1, 2, 3, 4, 5])
            .tacho(3, 1_000, &[10, 20])
            .encode();

        let (frame, consumed) = decode_frame(&bytes).context("decoding frame")?;
        ensure!(consumed == bytes.len(), "consumed {} of {}", consumed, bytes.len());
        ensure!(frame.header.sequence == 7);
        ensure!(frame.payloads.len() == 4);

        match &frame.payloads[0] {
            ChannelPayload::Analog(p) => {
                ensure!(p.channel_id() == 1);
                ensure!(p.samples == vec![0.5, -0.25, 1.0]);
                ensure!(p.min == -0.25 && p.max == 1.0);
            }
            other => anyhow::bail!("expected analog, got {:?}", other),
        }
        match &frame.payloads[1] {
            ChannelPayload::Gps(p) => {
                ensure!(p.channel_id() == 9);
                ensure!(p.message.starts_with("$GPGGA"));
            }
            other => anyhow::bail!("expected gps, got {:?}", other),
        }
        ensure!(matches!(&frame.payloads[2], ChannelPayload::CanFd(p) if p.data_length == 5));
        ensure!(matches!(&frame.payloads[3], ChannelPayload::Tacho(p) if p.edge_count == 2));
        Ok(())
    }

    #[test]
    fn opaque_payload_is_skipped_whole() -> Result<()> {
        let mut bytes = FrameWriter::opaque(1, 5, &[0xAB; 40]).encode();
        let next = FrameWriter::new(2).analog(1, 5, &[1.0]).encode();
        bytes.extend_from_slice(&next);

        let (frame, consumed) = decode_frame(&bytes)?;
        ensure!(frame.payloads.is_empty());
        ensure!(consumed == PACKET_HEADER_SIZE + 40);

        let (frame, _) = decode_frame(&bytes[consumed..])?;
        ensure!(frame.header.sequence == 2);
        Ok(())
    }

    #[test]
    fn empty_payload_yields_nothing() -> Result<()> {
        let bytes = FrameWriter::new(0).encode();
        let (frame, consumed) = decode_frame(&bytes)?;
        ensure!(frame.payloads.is_empty());
        ensure!(consumed == PACKET_HEADER_SIZE);
        Ok(())
    }

    #[test]
    fn short_tail_is_a_framing_error() {
        let bytes = FrameWriter::new(0).analog(1, 1, &[1.0]).raw(&[0u8; 10]).encode();
        let err = decode_frame(&bytes).unwrap_err();
        assert!(matches!(err, TelemetryError::Framing { .. }), "{err}");
    }

    #[test]
    fn unknown_channel_tag_is_fatal() {
        let mut block = Vec::new();
        block.extend_from_slice(&42u16.to_le_bytes());
        block.extend_from_slice(&1u16.to_le_bytes());
        block.extend_from_slice(&16u16.to_le_bytes());
        block.extend_from_slice(&0u16.to_le_bytes());
        block.extend_from_slice(&0u64.to_le_bytes());
        let bytes = FrameWriter::new(0).raw(&block).encode();

        let err = decode_frame(&bytes).unwrap_err();
        assert!(matches!(err, TelemetryError::UnknownChannelType { tag: 42 }));
    }

    #[test]
    fn over_consuming_block_is_a_framing_error() {
        // Analog header claims 100 samples but carries none.
        let mut block = Vec::new();
        block.extend_from_slice(&1u16.to_le_bytes());
        block.extend_from_slice(&4u16.to_le_bytes());
        block.extend_from_slice(&16u16.to_le_bytes());
        block.extend_from_slice(&0u16.to_le_bytes());
        block.extend_from_slice(&0u64.to_le_bytes());
        block.extend_from_slice(&100u32.to_le_bytes());
        block.extend_from_slice(&[0u8; 12]);
        let bytes = FrameWriter::new(0).raw(&block).encode();

        let err = decode_frame(&bytes).unwrap_err();
        assert!(err.is_framing_failure());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = FrameWriter::new(0).encode();
        bytes[0..4].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            decode_header(&bytes),
            Err(TelemetryError::Version { expected: 1, found: 9 })
        ));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let bytes = FrameWriter::new(0).analog(1, 1, &[1.0, 2.0]).encode();
        let err = decode_frame(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(err.is_framing_failure());
    }

    #[test]
    fn payload_length_must_match_header() {
        let header = PacketHeader { version: 1, payload_type: 0, payload_size: 32, sequence: 0 };
        let err = decode_payload(&header, &[0u8; 16]).unwrap_err();
        assert!(err.is_framing_failure());
    }

    fn arb_block() -> impl Strategy<Value = (u8, u16, u64, Vec<f32>)> {
        (
            0u8..4,
            any::<u16>(),
            any::<u64>(),
            prop::collection::vec(-10.0f32..10.0, 0..64),
        )
    }

    proptest! {
        #[test]
        fn prop_frames_decode_to_what_was_encoded(
            sequence in any::<u32>(),
            blocks in prop::collection::vec(arb_block(), 0..8),
        ) {
            let mut writer = FrameWriter::new(sequence);
            for (kind, id, ts, samples) in &blocks {
                writer = match kind {
                    0 => writer.analog(*id, *ts, samples),
                    1 => writer.gps(*id, *ts, &format!("$GPGGA,{}", samples.len())),
                    2 => writer.can_fd(*id, *ts, &vec![7u8; samples.len()]),
                    _ => writer.tacho(*id, *ts, &vec![1u64; samples.len()]),
                };
            }
            let bytes = writer.encode();

            let (frame, consumed) = decode_frame(&bytes).unwrap();
            prop_assert_eq!(consumed, bytes.len());
            prop_assert_eq!(frame.header.payload_size as usize, bytes.len() - PACKET_HEADER_SIZE);
            prop_assert_eq!(frame.payloads.len(), blocks.len());

            for (payload, (kind, id, ts, samples)) in frame.payloads.iter().zip(&blocks) {
                prop_assert_eq!(payload.channel_id(), *id);
                prop_assert_eq!(payload.header().timestamp, *ts);
                match (kind, payload) {
                    (0, ChannelPayload::Analog(p)) => prop_assert_eq!(&p.samples, samples),
                    (1, ChannelPayload::Gps(p)) => {
                        prop_assert_eq!(&p.message, &format!("$GPGGA,{}", samples.len()))
                    }
                    (2, ChannelPayload::CanFd(p)) => {
                        prop_assert_eq!(p.data_length as usize, samples.len())
                    }
                    (3, ChannelPayload::Tacho(p)) => {
                        prop_assert_eq!(p.edge_count as usize, samples.len())
                    }
                    _ => prop_assert!(false, "payload kind mismatch"),
                }
            }
        }

        #[test]
        fn prop_opaque_frames_advance_by_payload_size(
            payload_type in 1u32..,
            body in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let bytes = FrameWriter::opaque(0, payload_type, &body).encode();
            let (frame, consumed) = decode_frame(&bytes).unwrap();
            prop_assert!(frame.payloads.is_empty());
            prop_assert_eq!(consumed, PACKET_HEADER_SIZE + body.len());
        }

        #[test]
        fn prop_back_to_back_frames_decode_in_order(count in 1usize..10) {
            let mut bytes = Vec::new();
            for i in 0..count {
                bytes.extend(FrameWriter::new(i as u32).analog(1, i as u64, &[i as f32]).encode());
            }
            let frames = decode_frames(&bytes).unwrap();
            prop_assert_eq!(frames.len(), count);
            for (i, frame) in frames.iter().enumerate() {
                prop_assert_eq!(frame.header.sequence, i as u32);
            }
        }
    }
}
