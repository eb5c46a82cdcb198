//! Test utilities for building synthetic packets, signals and captures
//!
//! Shared by unit tests and benchmarks so they exercise the same data shapes
//! a real device produces.

#![cfg(any(test, feature = "benchmark"))]

use crate::nmea::nmea_checksum;
use crate::protocol::FrameWriter;
use crate::types::{AnalogPacket, Capture, ChannelHeader, ChannelPayload, ChannelType, GpsPacket};

/// Shape written at every pulse position by [`pulse_train`].
pub const PULSE_SHAPE: [f32; 11] = [0.25, 0.5, 0.75, 1.0, 0.75, 0.5, 0.25, 0.0, -0.25, -0.5, -0.25];

pub fn channel_header(channel_type: ChannelType, channel_id: u16, timestamp: u64) -> ChannelHeader {
    ChannelHeader { channel_type, channel_id, header_size: 16, timestamp }
}

pub fn analog_packet(channel_id: u16, timestamp: u64, samples: Vec<f32>) -> AnalogPacket {
    let min = samples.iter().copied().fold(0.0f32, f32::min);
    let max = samples.iter().copied().fold(0.0f32, f32::max);
    AnalogPacket {
        header: channel_header(ChannelType::Analog, channel_id, timestamp),
        min,
        max,
        samples,
    }
}

pub fn analog_payload(channel_id: u16, timestamp: u64, samples: Vec<f32>) -> ChannelPayload {
    ChannelPayload::Analog(analog_packet(channel_id, timestamp, samples))
}

pub fn gps_packet(channel_id: u16, timestamp: u64, message: &str) -> GpsPacket {
    GpsPacket {
        header: channel_header(ChannelType::Gps, channel_id, timestamp),
        timestamp,
        message: message.to_string(),
    }
}

pub fn gps_payload(channel_id: u16, timestamp: u64, message: &str) -> ChannelPayload {
    ChannelPayload::Gps(gps_packet(channel_id, timestamp, message))
}

/// Valid GGA sentence for the given UTC time, checksum included.
///
/// `coordinates` is the four fields `lat,N|S,lon,E|W`.
pub fn gga_sentence(
    talker: &str,
    hour: u32,
    minute: u32,
    second: u32,
    coordinates: &str,
) -> String {
    let body = format!(
        "{}GGA,{:02}{:02}{:02}.00,{},1,08,0.9,545.4,M,46.9,M,,",
        talker, hour, minute, second, coordinates
    );
    format!("${}*{:02X}", body, nmea_checksum(&body))
}

/// Zero signal of `len` samples with [`PULSE_SHAPE`] written at each position.
pub fn pulse_train(len: usize, positions: &[usize]) -> Vec<f32> {
    let mut signal = vec![0.0f32; len];
    for &start in positions {
        for (offset, value) in PULSE_SHAPE.iter().enumerate() {
            if let Some(slot) = signal.get_mut(start + offset) {
                *slot = *value;
            }
        }
    }
    signal
}

/// Copy of `signal` delayed by `k` samples, same length.
pub fn shifted(signal: &[f32], k: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; k.min(signal.len())];
    out.extend_from_slice(&signal[..signal.len().saturating_sub(k)]);
    out
}

/// Split a signal into analog packets of `block` samples.
///
/// Packet `i` is stamped `start + i * step`.
pub fn analog_blocks(
    channel_id: u16,
    signal: &[f32],
    block: usize,
    start: u64,
    step: u64,
) -> Vec<AnalogPacket> {
    signal
        .chunks(block.max(1))
        .enumerate()
        .map(|(i, chunk)| analog_packet(channel_id, start + i as u64 * step, chunk.to_vec()))
        .collect()
}

/// Capture holding one analog channel built by [`analog_blocks`].
pub fn capture_from_signal(
    channel_id: u16,
    signal: &[f32],
    block: usize,
    start: u64,
    step: u64,
) -> Capture {
    let mut capture = Capture::default();
    capture.analog.insert(channel_id, analog_blocks(channel_id, signal, block, start, step));
    capture
}

/// Encoded frames carrying one analog channel, one block per frame.
pub fn signal_frames(
    channel_id: u16,
    signal: &[f32],
    block: usize,
    start: u64,
    step: u64,
) -> Vec<Vec<u8>> {
    analog_blocks(channel_id, signal, block, start, step)
        .iter()
        .enumerate()
        .map(|(i, packet)| {
            FrameWriter::new(i as u32)
                .analog(channel_id, packet.timestamp(), &packet.samples)
                .encode()
        })
        .collect()
}
