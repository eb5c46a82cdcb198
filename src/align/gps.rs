//! Alignment through a GPS fix seen by both devices.

use chrono::NaiveTime;
use tracing::{debug, info, trace};

use super::{TimeAligner, trim_leading};
use crate::nmea::GgaSentence;
use crate::types::{AlignedBlock, Capture, GpsPacket};
use crate::{Result, TelemetryError};

/// Device timestamps at which both readers saw the same GPS second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockOffsets {
    /// Reference device clock, nanoseconds
    pub reference: u64,
    /// Sync device clock, nanoseconds
    pub sync: u64,
    /// UTC time both messages carried
    pub utc: NaiveTime,
}

/// Aligner that maps both device clocks onto GPS time.
///
/// The first successful call pairs one GGA fix from each capture carrying the
/// same UTC second and records the device timestamp of each as that reader's
/// clock offset. The offsets are kept until [`reset`](Self::reset); later
/// calls only compare GPS-relative start times.
#[derive(Debug, Clone)]
pub struct GpsAligner {
    sample_rate: f64,
    reference_channel: Option<u16>,
    sync_channel: Option<u16>,
    offsets: Option<ClockOffsets>,
}

impl GpsAligner {
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate, reference_channel: None, sync_channel: None, offsets: None }
    }

    pub fn with_channels(mut self, reference: Option<u16>, sync: Option<u16>) -> Self {
        self.reference_channel = reference;
        self.sync_channel = sync;
        self
    }

    pub fn offsets(&self) -> Option<ClockOffsets> {
        self.offsets
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.offsets.is_some()
    }

    /// Forget the cached offsets; the next call bootstraps again.
    pub fn reset(&mut self) {
        self.offsets = None;
    }

    fn bootstrap(&self, reference: &Capture, sync: &Capture) -> Result<ClockOffsets> {
        let reference_fixes = decoded_fixes(reference);
        let sync_fixes = decoded_fixes(sync);
        if reference_fixes.is_empty() || sync_fixes.is_empty() {
            return Err(TelemetryError::alignment(format!(
                "no decodable GPS message (reference: {}, sync: {})",
                reference_fixes.len(),
                sync_fixes.len()
            )));
        }

        for (ref_packet, ref_fix) in &reference_fixes {
            let matching = sync_fixes.iter().find(|(_, fix)| fix.time == ref_fix.time);
            if let Some((sync_packet, _)) = matching {
                return Ok(ClockOffsets {
                    reference: ref_packet.timestamp,
                    sync: sync_packet.timestamp,
                    utc: ref_fix.time,
                });
            }
        }

        Err(TelemetryError::alignment(format!(
            "GPS times never match: reference first fix {}, sync first fix {}",
            reference_fixes[0].1.time, sync_fixes[0].1.time
        )))
    }
}

fn decoded_fixes(capture: &Capture) -> Vec<(&GpsPacket, GgaSentence)> {
    capture
        .gps_messages()
        .filter_map(|packet| match packet.gga() {
            Ok(fix) => Some((packet, fix)),
            Err(e) => {
                trace!("Skipping GPS message on channel {}: {}", packet.channel_id(), e);
                None
            }
        })
        .collect()
}

impl TimeAligner for GpsAligner {
    fn aligned_block(&mut self, reference: &Capture, sync: &Capture) -> Result<AlignedBlock> {
        let (ref_id, ref_packets) = reference.designated_channel(self.reference_channel)?;
        let (sync_id, sync_packets) = sync.designated_channel(self.sync_channel)?;

        let offsets = match self.offsets {
            Some(offsets) => offsets,
            None => {
                let offsets = self.bootstrap(reference, sync)?;
                info!(
                    "GPS clock offsets at {}: reference {} ns, sync {} ns",
                    offsets.utc, offsets.reference, offsets.sync
                );
                self.offsets = Some(offsets);
                offsets
            }
        };

        let ref_start = ref_packets.first().map_or(0, |p| p.timestamp());
        let sync_start = sync_packets.first().map_or(0, |p| p.timestamp());
        let ref_relative = i128::from(ref_start) - i128::from(offsets.reference);
        let sync_relative = i128::from(sync_start) - i128::from(offsets.sync);
        let delta_ns = sync_relative - ref_relative;
        let shift = (delta_ns.unsigned_abs() as f64 * self.sample_rate / 1e9).round() as usize;

        debug!(
            "GPS-relative start: channel {} at {} ns, channel {} at {} ns, shift {} samples",
            ref_id, ref_relative, sync_id, sync_relative, shift
        );

        let reference_samples = reference.samples(ref_id);
        let sync_samples = sync.samples(sync_id);
        let (reference_samples, sync_samples) = if delta_ns > 0 {
            // Sync started later: drop the reference's head.
            (trim_leading(reference_samples, shift, "reference")?, sync_samples)
        } else {
            (reference_samples, trim_leading(sync_samples, shift, "sync")?)
        };

        Ok(AlignedBlock::new(reference_samples, sync_samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{capture_from_signal, gga_sentence, gps_packet};

    const COORDS: &str = "4807.038,N,01131.000,E";
    const RATE: f64 = 1000.0;
    const MS: u64 = 1_000_000;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    /// Capture with one analog channel starting at `start` and one GPS fix.
    fn capture(samples: &[f32], start: u64, gps_at: u64, second: u32) -> Capture {
        let mut capture = capture_from_signal(1, samples, 10, start, 10 * MS);
        capture
            .gps
            .insert(5, vec![gps_packet(5, gps_at, &gga_sentence("GP", 12, 0, second, COORDS))]);
        capture
    }

    #[test]
    fn trims_the_stream_that_started_first() {
        let signal = ramp(500);
        // Reference clock: fix at 500 ms, data from 1000 ms.
        let reference = capture(&signal, 1000 * MS, 500 * MS, 30);
        // Sync clock runs 7 s ahead and its data starts 10 ms later in GPS time.
        let sync = capture(&signal[10..], 8010 * MS, 7500 * MS, 30);

        let mut aligner = GpsAligner::new(RATE);
        let block = aligner.aligned_block(&reference, &sync).unwrap();

        assert_eq!(block.reference[0], 10.0);
        assert_eq!(block.reference, block.sync);
        assert_eq!(block.len(), 490);
        assert!(aligner.is_bootstrapped());
        assert_eq!(aligner.offsets().map(|o| o.sync), Some(7500 * MS));
    }

    #[test]
    fn trims_sync_when_it_started_first() {
        let signal = ramp(300);
        let reference = capture(&signal[25..], 1025 * MS, 500 * MS, 30);
        let sync = capture(&signal, 3000 * MS, 2500 * MS, 30);

        let block = GpsAligner::new(RATE).aligned_block(&reference, &sync).unwrap();
        assert_eq!(block.sync[0], 25.0);
        assert_eq!(block.reference, block.sync);
    }

    #[test]
    fn repeated_calls_are_idempotent() {
        let signal = ramp(200);
        let reference = capture(&signal, 1000 * MS, 500 * MS, 30);
        let sync = capture(&signal[4..], 2004 * MS, 1500 * MS, 30);

        let mut aligner = GpsAligner::new(RATE);
        let first = aligner.aligned_block(&reference, &sync).unwrap();
        let offsets = aligner.offsets();
        let second = aligner.aligned_block(&reference, &sync).unwrap();
        assert_eq!(first, second);
        assert_eq!(offsets, aligner.offsets());
    }

    #[test]
    fn offsets_survive_captures_without_gps() {
        let signal = ramp(200);
        let mut aligner = GpsAligner::new(RATE);
        aligner
            .aligned_block(
                &capture(&signal, 1000 * MS, 1000 * MS, 30),
                &capture(&signal, 1000 * MS, 1000 * MS, 30),
            )
            .unwrap();

        // A zero offset is a real offset, not a missing one.
        let later = capture_from_signal(1, &signal, 10, 2000 * MS, 10 * MS);
        assert!(aligner.aligned_block(&later, &later).is_ok());
    }

    #[test]
    fn mismatched_gps_times_fail_without_caching() {
        let signal = ramp(100);
        let reference = capture(&signal, 1000 * MS, 500 * MS, 30);
        let sync = capture(&signal, 1000 * MS, 500 * MS, 31);

        let mut aligner = GpsAligner::new(RATE);
        let err = aligner.aligned_block(&reference, &sync).unwrap_err();
        assert!(err.is_alignment_failure());
        assert!(!aligner.is_bootstrapped());
    }

    #[test]
    fn undecodable_gps_fails() {
        let signal = ramp(100);
        let mut reference = capture_from_signal(1, &signal, 10, 0, 10 * MS);
        reference.gps.insert(5, vec![gps_packet(5, 0, "$GPGGA,garbage*00")]);
        let sync = capture(&signal, 0, 0, 30);

        let err = GpsAligner::new(RATE).aligned_block(&reference, &sync).unwrap_err();
        assert!(err.is_alignment_failure());
    }

    #[test]
    fn shift_past_the_buffer_fails() {
        let signal = ramp(20);
        let reference = capture(&signal, 0, 0, 30);
        let sync = capture(&signal, 5000 * MS, 0, 30);
        let err = GpsAligner::new(RATE).aligned_block(&reference, &sync).unwrap_err();
        assert!(err.is_alignment_failure());
    }
}
