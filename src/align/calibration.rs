//! Delay calibration across several acquisition systems.
//!
//! A pulse generator feeds the same sync channel on every system. The first
//! system is the reference; for each other system the calibrator finds the
//! first block holding the pulse, measures the residual shift against the
//! reference block, and records the clock difference at those blocks.
//! Recorded delays are then applied to any later series of that system.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::delay::{DelayEstimator, transform_length_for};
use crate::types::Capture;
use crate::{Result, TelemetryError};

/// Clock and sample offset of one system relative to the reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayRecord {
    /// Seconds between the two systems' clocks at the pulse block.
    pub time_zero: f64,
    /// Residual shift in samples measured by cross-correlation.
    pub sample_delay: i64,
}

impl DelayRecord {
    /// Record of the reference system itself.
    pub const REFERENCE: DelayRecord = DelayRecord { time_zero: 0.0, sample_delay: 0 };

    /// Rebase a series of this system onto the reference clock.
    ///
    /// Drops every sample before the instant the reference series would
    /// have started, shifted by `sample_delay`.
    pub fn apply(&self, series: &ChannelSeries) -> ChannelSeries {
        let Some(&first) = series.timestamps.first() else {
            return ChannelSeries::default();
        };

        let time_delta = first - self.time_zero;
        let in_sync = series
            .timestamps
            .iter()
            .position(|&t| t >= time_delta)
            .unwrap_or(series.timestamps.len()) as i64;
        let start = (in_sync - self.sample_delay).clamp(0, series.len() as i64) as usize;

        ChannelSeries {
            timestamps: series.timestamps[start..].to_vec(),
            samples: series.samples[start..].to_vec(),
        }
    }
}

/// One channel's samples with per-sample timestamps in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSeries {
    pub timestamps: Vec<f64>,
    pub samples: Vec<f32>,
}

impl ChannelSeries {
    /// Flatten a captured channel, stamping each sample from its packet start.
    pub fn from_capture(capture: &Capture, channel: u16, sample_rate: f64) -> Result<Self> {
        let (_, packets) = capture.designated_channel(Some(channel))?;
        let mut series = ChannelSeries::default();
        for packet in packets {
            let start = packet.timestamp() as f64 / 1e9;
            series
                .timestamps
                .extend((0..packet.samples.len()).map(|i| start + i as f64 / sample_rate));
            series.samples.extend_from_slice(&packet.samples);
        }
        Ok(series)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn truncate(&mut self, len: usize) {
        self.timestamps.truncate(len);
        self.samples.truncate(len);
    }
}

/// Finds the pulse on every system and measures its delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayCalibrator {
    /// Samples per compared block.
    pub compare_period: usize,
    /// A pulse block holds a sample above this level...
    pub high_threshold: f32,
    /// ...and a sample below this one.
    pub low_threshold: f32,
}

impl Default for DelayCalibrator {
    fn default() -> Self {
        Self { compare_period: 65536, high_threshold: 0.2, low_threshold: -0.02 }
    }
}

impl DelayCalibrator {
    pub fn validate(&self) -> Result<()> {
        if self.compare_period < 2 {
            return Err(TelemetryError::config("calibration compare period must be at least 2"));
        }
        if self.low_threshold >= self.high_threshold {
            return Err(TelemetryError::config(
                "calibration low threshold must be below the high threshold",
            ));
        }
        Ok(())
    }

    fn is_pulse_block(&self, block: &[f32]) -> bool {
        block.iter().any(|&s| s > self.high_threshold)
            && block.iter().any(|&s| s < self.low_threshold)
    }

    /// Start of the first pulse block, scanning in steps of `step`.
    fn find_pulse(&self, samples: &[f32], step: usize) -> Option<usize> {
        (0..samples.len()).step_by(step).find(|&start| {
            let stop = (start + self.compare_period).min(samples.len());
            self.is_pulse_block(&samples[start..stop])
        })
    }

    fn block<'a>(&self, samples: &'a [f32], start: usize) -> &'a [f32] {
        &samples[start..(start + self.compare_period).min(samples.len())]
    }

    /// Delay records for `reference` followed by each of `systems`.
    ///
    /// All series are first cut to the shortest length. The reference is
    /// scanned in half-overlapping blocks, the other systems block by block.
    pub fn calibrate(
        &self,
        reference: &ChannelSeries,
        systems: &[ChannelSeries],
    ) -> Result<Vec<DelayRecord>> {
        self.validate()?;
        let shortest =
            systems.iter().map(ChannelSeries::len).fold(reference.len(), usize::min);

        let mut reference = reference.clone();
        reference.truncate(shortest);

        let ref_start = self
            .find_pulse(&reference.samples, self.compare_period / 2)
            .ok_or_else(|| TelemetryError::alignment("no pulse block on the reference system"))?;
        let ref_block = self.block(&reference.samples, ref_start);
        let ref_time = reference.timestamps[ref_start];
        debug!("Reference pulse block starts at sample {} ({} s)", ref_start, ref_time);

        let mut estimator = DelayEstimator::new();
        let transform_length = transform_length_for(self.compare_period);
        let mut records = vec![DelayRecord::REFERENCE];

        for (index, system) in systems.iter().enumerate() {
            let mut system = system.clone();
            system.truncate(shortest);

            let start = self.find_pulse(&system.samples, self.compare_period).ok_or_else(|| {
                TelemetryError::alignment(format!("no pulse block on system {}", index + 1))
            })?;
            let sample_delay = estimator.estimate(
                ref_block,
                self.block(&system.samples, start),
                transform_length,
            )?;
            let record =
                DelayRecord { time_zero: system.timestamps[start] - ref_time, sample_delay };

            info!(
                "System {}: time zero {:.6} s, sample delay {}",
                index + 1,
                record.time_zero,
                record.sample_delay
            );
            records.push(record);
        }

        Ok(records)
    }
}

/// Write delay records as JSON.
pub fn save_delays(path: impl AsRef<Path>, records: &[DelayRecord]) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string(records)
        .map_err(|e| TelemetryError::config(format!("cannot encode delays: {}", e)))?;
    std::fs::write(path, json).map_err(|e| TelemetryError::file_error(path.to_path_buf(), e))
}

/// Read delay records written by [`save_delays`].
pub fn load_delays(path: impl AsRef<Path>) -> Result<Vec<DelayRecord>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|e| TelemetryError::file_error(path.to_path_buf(), e))?;
    serde_json::from_str(&json).map_err(|e| {
        TelemetryError::config(format!("invalid delay file {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{capture_from_signal, pulse_train, shifted};
    use anyhow::Result;

    const RATE: f64 = 1024.0;

    fn series(samples: Vec<f32>, start: f64) -> ChannelSeries {
        let timestamps = (0..samples.len()).map(|i| start + i as f64 / RATE).collect();
        ChannelSeries { timestamps, samples }
    }

    fn calibrator() -> DelayCalibrator {
        DelayCalibrator { compare_period: 256, ..Default::default() }
    }

    #[test]
    fn reference_record_comes_first() -> Result<()> {
        let signal = pulse_train(2048, &[600]);
        let records = calibrator().calibrate(&series(signal.clone(), 0.0), &[])?;
        assert_eq!(records, vec![DelayRecord::REFERENCE]);
        Ok(())
    }

    #[test]
    fn measures_shift_and_clock_difference() -> Result<()> {
        let signal = pulse_train(2048, &[600]);
        let reference = series(signal.clone(), 10.0);
        // Pulse lands 20 samples later, clock starts 3 s later.
        let other = series(shifted(&signal, 20), 13.0);

        let records = calibrator().calibrate(&reference, &[other])?;
        assert_eq!(records.len(), 2);

        // Pulse blocks start at 384 (half steps) and 512 (whole steps), so the
        // pulse sits 216 samples into one block and 108 into the other.
        let record = records[1];
        assert_eq!(record.sample_delay, 108 - 216);
        assert!((record.time_zero - 3.125).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn system_without_pulse_fails() {
        let reference = series(pulse_train(1024, &[300]), 0.0);
        let flat = series(vec![0.0; 1024], 0.0);
        let err = calibrator().calibrate(&reference, &[flat]).unwrap_err();
        assert!(err.is_alignment_failure());
    }

    #[test]
    fn apply_drops_samples_before_reference_start() {
        let series = series((0..100).map(|i| i as f32).collect(), 5.0);
        // Clock 0.05 s ahead: the first 52 samples predate the reference start.
        let record = DelayRecord { time_zero: -0.05, sample_delay: 0 };
        let rebased = record.apply(&series);
        assert_eq!(rebased.samples.first(), Some(&52.0));

        let shifted = DelayRecord { time_zero: -0.05, sample_delay: 2 }.apply(&series);
        assert_eq!(shifted.samples.first(), Some(&50.0));

        let unchanged = DelayRecord::REFERENCE.apply(&series);
        assert_eq!(unchanged, series);
        assert!(DelayRecord::REFERENCE.apply(&ChannelSeries::default()).is_empty());
    }

    #[test]
    fn series_from_capture_stamps_samples() -> Result<()> {
        let samples = [1.0, 2.0, 3.0, 4.0];
        let capture = capture_from_signal(3, &samples, 2, 1_000_000_000, 500_000_000);
        let series = ChannelSeries::from_capture(&capture, 3, 4.0)?;
        assert_eq!(series.samples, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(series.timestamps, vec![1.0, 1.25, 1.5, 1.75]);
        assert!(ChannelSeries::from_capture(&capture, 9, 4.0).is_err());
        Ok(())
    }

    #[test]
    fn delays_round_trip_through_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("saved_delays.json");
        let records =
            vec![DelayRecord::REFERENCE, DelayRecord { time_zero: 1.5, sample_delay: -3 }];

        save_delays(&path, &records)?;
        let text = std::fs::read_to_string(&path)?;
        assert!(text.contains("\"timeZero\":1.5"));
        assert!(text.contains("\"sampleDelay\":-3"));
        assert_eq!(load_delays(&path)?, records);
        Ok(())
    }

    #[test]
    fn corrupt_delay_file_is_config_error() -> Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        std::fs::write(file.path(), "not json")?;
        assert!(matches!(load_delays(file.path()), Err(TelemetryError::Config { .. })));
        assert!(matches!(
            load_delays(file.path().with_extension("missing")),
            Err(TelemetryError::File { .. })
        ));
        Ok(())
    }
}
