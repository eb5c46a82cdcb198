//! Alignment on a shared hardware clock.

use tracing::debug;

use super::TimeAligner;
use crate::types::{AlignedBlock, AnalogPacket, Capture};
use crate::{Result, TelemetryError};

/// Aligner for devices whose clocks are already synchronized over PTP.
///
/// Each call intersects the two timestamp ranges and keeps the packets of
/// both streams that fall inside the intersection. No state is kept.
#[derive(Debug, Clone, Default)]
pub struct PtpAligner {
    reference_channel: Option<u16>,
    sync_channel: Option<u16>,
}

impl PtpAligner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channels(mut self, reference: Option<u16>, sync: Option<u16>) -> Self {
        self.reference_channel = reference;
        self.sync_channel = sync;
        self
    }
}

fn within(packets: &[AnalogPacket], start: u64, stop: u64) -> Vec<f32> {
    packets
        .iter()
        .filter(|p| (start..=stop).contains(&p.timestamp()))
        .flat_map(|p| p.samples.iter().copied())
        .collect()
}

fn range(packets: &[AnalogPacket]) -> (u64, u64) {
    let first = packets.first().map_or(0, AnalogPacket::timestamp);
    let last = packets.last().map_or(0, AnalogPacket::timestamp);
    (first, last)
}

impl TimeAligner for PtpAligner {
    fn aligned_block(&mut self, reference: &Capture, sync: &Capture) -> Result<AlignedBlock> {
        let (ref_id, ref_packets) = reference.designated_channel(self.reference_channel)?;
        let (sync_id, sync_packets) = sync.designated_channel(self.sync_channel)?;

        let (ref_first, ref_last) = range(ref_packets);
        let (sync_first, sync_last) = range(sync_packets);
        let start = ref_first.max(sync_first);
        let stop = ref_last.min(sync_last);

        if start > stop {
            return Err(TelemetryError::alignment(format!(
                "no common capture window: reference [{}, {}], sync [{}, {}]",
                ref_first, ref_last, sync_first, sync_last
            )));
        }

        let reference_samples = within(ref_packets, start, stop);
        let sync_samples = within(sync_packets, start, stop);
        if reference_samples.is_empty() || sync_samples.is_empty() {
            return Err(TelemetryError::alignment(format!(
                "window [{}, {}] holds no samples on one stream",
                start, stop
            )));
        }

        debug!(
            "PTP window [{}, {}]: channel {} -> {} samples, channel {} -> {} samples",
            start,
            stop,
            ref_id,
            reference_samples.len(),
            sync_id,
            sync_samples.len()
        );
        Ok(AlignedBlock::new(reference_samples, sync_samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{analog_packet, capture_from_signal};

    fn ramp(first: u64, last: u64) -> Vec<f32> {
        (first..=last).map(|t| t as f32).collect()
    }

    #[test]
    fn intersects_unit_spaced_ranges() {
        let reference = capture_from_signal(1, &ramp(0, 100), 1, 0, 1);
        let sync = capture_from_signal(1, &ramp(20, 120), 1, 20, 1);

        let block = PtpAligner::new().aligned_block(&reference, &sync).unwrap();
        assert_eq!(block.len(), 81);
        assert_eq!(block.reference.first(), Some(&20.0));
        assert_eq!(block.reference.last(), Some(&100.0));
        assert_eq!(block.reference, block.sync);
    }

    #[test]
    fn disjoint_ranges_fail() {
        let reference = capture_from_signal(1, &ramp(0, 10), 1, 0, 1);
        let sync = capture_from_signal(1, &ramp(50, 60), 1, 50, 1);
        let err = PtpAligner::new().aligned_block(&reference, &sync).unwrap_err();
        assert!(err.is_alignment_failure());
    }

    #[test]
    fn uses_configured_channels() {
        let mut reference = capture_from_signal(1, &ramp(0, 10), 1, 0, 1);
        reference.analog.insert(4, vec![analog_packet(4, 5, vec![40.0])]);
        let sync = capture_from_signal(9, &ramp(0, 10), 1, 0, 1);

        let mut aligner = PtpAligner::new().with_channels(Some(4), Some(9));
        let block = aligner.aligned_block(&reference, &sync).unwrap();
        assert_eq!(block.reference, vec![40.0]);
        assert_eq!(block.sync, vec![5.0]);
    }

    #[test]
    fn empty_capture_fails() {
        let reference = capture_from_signal(1, &ramp(0, 10), 1, 0, 1);
        let err = PtpAligner::new().aligned_block(&reference, &Capture::default()).unwrap_err();
        assert!(err.is_alignment_failure());
    }
}
