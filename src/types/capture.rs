//! Drained reader contents and aligned output blocks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{AnalogPacket, GpsPacket};
use crate::align::delay::estimate_delay;
use crate::{Result, TelemetryError};

/// Everything drained from one reader, keyed by channel id.
///
/// Packets within a channel keep arrival order, which is also timestamp order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capture {
    pub analog: BTreeMap<u16, Vec<AnalogPacket>>,
    pub gps: BTreeMap<u16, Vec<GpsPacket>>,
}

impl Capture {
    pub fn is_empty(&self) -> bool {
        self.analog.values().all(Vec::is_empty) && self.gps.values().all(Vec::is_empty)
    }

    /// Resolve the designated analog channel.
    ///
    /// With no explicit id the lowest analog channel id holding data is used.
    pub fn designated_channel(&self, channel: Option<u16>) -> Result<(u16, &[AnalogPacket])> {
        let found = match channel {
            Some(id) => self.analog.get(&id).map(|packets| (id, packets.as_slice())),
            None => self
                .analog
                .iter()
                .find(|(_, packets)| !packets.is_empty())
                .map(|(id, packets)| (*id, packets.as_slice())),
        };

        match found {
            Some((id, packets)) if !packets.is_empty() => Ok((id, packets)),
            _ => Err(TelemetryError::alignment(match channel {
                Some(id) => format!("no analog packets captured on channel {}", id),
                None => "no analog packets captured".to_string(),
            })),
        }
    }

    /// All samples of one channel concatenated in arrival order.
    pub fn samples(&self, channel: u16) -> Vec<f32> {
        self.analog
            .get(&channel)
            .map(|packets| packets.iter().flat_map(|p| p.samples.iter().copied()).collect())
            .unwrap_or_default()
    }

    /// First and last packet timestamp of one channel.
    pub fn time_range(&self, channel: u16) -> Option<(u64, u64)> {
        let packets = self.analog.get(&channel)?;
        Some((packets.first()?.timestamp(), packets.last()?.timestamp()))
    }

    /// GPS packets from every GPS channel, lowest channel id first.
    pub fn gps_messages(&self) -> impl Iterator<Item = &GpsPacket> {
        self.gps.values().flatten()
    }

    /// Append another capture of the same reader.
    pub fn extend(&mut self, other: Capture) {
        for (id, packets) in other.analog {
            self.analog.entry(id).or_default().extend(packets);
        }
        for (id, packets) in other.gps {
            self.gps.entry(id).or_default().extend(packets);
        }
    }
}

/// Two equal-length sample sequences covering the same physical window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedBlock {
    pub reference: Vec<f32>,
    pub sync: Vec<f32>,
}

/// Parameters for narrowing a block around a calibration pulse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseScope {
    /// Rising edge above `threshold`, falling edge below `-threshold`.
    pub threshold: f32,
    /// Samples kept on each side of the pulse.
    pub margin: usize,
}

impl Default for PulseScope {
    fn default() -> Self {
        Self { threshold: 0.1, margin: 30 }
    }
}

impl AlignedBlock {
    /// Build a block, truncating the longer side to the common length.
    pub fn new(mut reference: Vec<f32>, mut sync: Vec<f32>) -> Self {
        let len = reference.len().min(sync.len());
        reference.truncate(len);
        sync.truncate(len);
        Self { reference, sync }
    }

    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    /// Narrow the block to the pulse visible on both sides.
    ///
    /// The window starts `margin` samples before the earliest rising edge and
    /// ends `margin` samples after the latest falling edge, clamped to the block.
    pub fn scope_pulse(&self, scope: &PulseScope) -> Result<AlignedBlock> {
        let rising = |samples: &[f32]| samples.iter().position(|&s| s > scope.threshold);
        let falling = |samples: &[f32]| samples.iter().rposition(|&s| s < -scope.threshold);

        let first = rising(&self.reference)
            .into_iter()
            .chain(rising(&self.sync))
            .min()
            .ok_or_else(|| TelemetryError::alignment("no rising pulse edge in block"))?;
        let last = falling(&self.reference)
            .into_iter()
            .chain(falling(&self.sync))
            .max()
            .ok_or_else(|| TelemetryError::alignment("no falling pulse edge in block"))?;

        let start = first.saturating_sub(scope.margin);
        let stop = (last + scope.margin).min(self.len().saturating_sub(1));
        if start > stop {
            return Err(TelemetryError::alignment(format!(
                "pulse window is empty (start {} > stop {})",
                start, stop
            )));
        }

        Ok(AlignedBlock::new(
            self.reference[start..=stop].to_vec(),
            self.sync[start..=stop].to_vec(),
        ))
    }

    /// Residual shift between the two sides, in samples.
    pub fn sample_delay(&self, transform_length: usize) -> Result<i64> {
        estimate_delay(&self.reference, &self.sync, transform_length)
    }

    /// Residual shift between the two sides, in seconds.
    pub fn delay_seconds(&self, sample_rate: f64, transform_length: usize) -> Result<f64> {
        Ok(self.sample_delay(transform_length)? as f64 / sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::analog_packet;

    #[test]
    fn aligned_block_truncates_to_common_length() {
        let block = AlignedBlock::new(vec![1.0; 10], vec![2.0; 7]);
        assert_eq!(block.reference.len(), 7);
        assert_eq!(block.sync.len(), 7);
    }

    #[test]
    fn scope_pulse_keeps_margin_around_edges() {
        let mut reference = vec![0.0f32; 200];
        let mut sync = vec![0.0f32; 200];
        reference[100] = 1.0;
        reference[120] = -1.0;
        sync[104] = 1.0;
        sync[118] = -1.0;

        let block = AlignedBlock::new(reference, sync);
        let scoped = block.scope_pulse(&PulseScope { threshold: 0.1, margin: 30 }).unwrap();

        // Window [100 - 30, 120 + 30]
        assert_eq!(scoped.len(), 81);
        assert_eq!(scoped.reference[30], 1.0);
        assert_eq!(scoped.sync[34], 1.0);
    }

    #[test]
    fn scope_pulse_clamps_to_block_bounds() {
        let mut samples = vec![0.0f32; 50];
        samples[5] = 0.5;
        samples[45] = -0.5;
        let block = AlignedBlock::new(samples.clone(), samples);
        let scoped = block.scope_pulse(&PulseScope::default()).unwrap();
        assert_eq!(scoped.len(), 50);
    }

    #[test]
    fn scope_pulse_without_pulse_is_alignment_failure() {
        let block = AlignedBlock::new(vec![0.0; 64], vec![0.0; 64]);
        let err = block.scope_pulse(&PulseScope::default()).unwrap_err();
        assert!(err.is_alignment_failure());
    }

    #[test]
    fn designated_channel_defaults_to_lowest_id() {
        let mut capture = Capture::default();
        capture.analog.insert(7, vec![analog_packet(7, 10, vec![1.0])]);
        capture.analog.insert(3, vec![analog_packet(3, 10, vec![2.0])]);

        let (id, packets) = capture.designated_channel(None).unwrap();
        assert_eq!(id, 3);
        assert_eq!(packets[0].samples, vec![2.0]);

        let (id, _) = capture.designated_channel(Some(7)).unwrap();
        assert_eq!(id, 7);
        assert!(capture.designated_channel(Some(9)).unwrap_err().is_alignment_failure());
    }

    #[test]
    fn samples_and_time_range_follow_arrival_order() {
        let mut capture = Capture::default();
        capture.analog.insert(
            1,
            vec![analog_packet(1, 100, vec![1.0, 2.0]), analog_packet(1, 200, vec![3.0])],
        );
        assert_eq!(capture.samples(1), vec![1.0, 2.0, 3.0]);
        assert_eq!(capture.time_range(1), Some((100, 200)));
        assert_eq!(capture.time_range(2), None);
        assert!(capture.samples(2).is_empty());
    }

    #[test]
    fn extend_appends_per_channel() {
        let mut first = Capture::default();
        first.analog.insert(1, vec![analog_packet(1, 1, vec![1.0])]);
        let mut second = Capture::default();
        second.analog.insert(1, vec![analog_packet(1, 2, vec![2.0])]);
        second.analog.insert(2, vec![analog_packet(2, 2, vec![5.0])]);

        first.extend(second);
        assert_eq!(first.samples(1), vec![1.0, 2.0]);
        assert_eq!(first.samples(2), vec![5.0]);
        assert!(!first.is_empty());
        assert!(Capture::default().is_empty());
    }
}
