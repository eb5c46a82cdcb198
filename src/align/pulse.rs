//! Alignment on a calibration pulse recorded by both devices.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::delay::{DelayEstimator, transform_length_for};
use super::{TimeAligner, trim_leading};
use crate::types::{AlignedBlock, Capture};
use crate::{Result, TelemetryError};

/// Pulse search parameters.
///
/// The defaults are empirical values for the calibration pulse generator and
/// are expected to be tuned per installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    /// A rising edge is the first sample above this level.
    pub threshold: f32,
    /// Samples kept before the edge.
    pub pre_samples: usize,
    /// Samples kept from the edge onwards.
    pub post_samples: usize,
    /// Rising edges ignored before the one used.
    pub skip_pulses: usize,
    /// Correlation length; next power of two of twice the window when unset.
    pub transform_length: Option<usize>,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            pre_samples: 1024,
            post_samples: 4096,
            skip_pulses: 0,
            transform_length: None,
        }
    }
}

impl PulseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pre_samples == 0 || self.post_samples == 0 {
            return Err(TelemetryError::config("pulse window needs pre and post samples"));
        }
        if !self.threshold.is_finite() {
            return Err(TelemetryError::config("pulse threshold must be finite"));
        }
        if let Some(n) = self.transform_length
            && (n == 0 || !n.is_power_of_two())
        {
            return Err(TelemetryError::config(format!(
                "pulse transform length {} is not a power of two",
                n
            )));
        }
        Ok(())
    }

    fn transform_length(&self) -> usize {
        self.transform_length.unwrap_or_else(|| transform_length_for(self.window()))
    }

    fn window(&self) -> usize {
        self.pre_samples + self.post_samples
    }

    /// Index of the qualifying rising edge.
    fn rising_edge(&self, samples: &[f32]) -> Option<usize> {
        let threshold = self.threshold;
        (0..samples.len())
            .filter(|&i| samples[i] > threshold && (i == 0 || samples[i - 1] <= threshold))
            .nth(self.skip_pulses)
    }

    /// Window around the edge, clamped to the buffer. Returns the start index too.
    fn window_around<'a>(&self, samples: &'a [f32], edge: usize) -> (usize, &'a [f32]) {
        let start = edge.saturating_sub(self.pre_samples);
        let stop = (edge + self.post_samples).min(samples.len());
        (start, &samples[start..stop])
    }
}

/// Aligner that measures the shift between two recordings of the same pulse.
#[derive(Debug)]
pub struct PulseAligner {
    config: PulseConfig,
    reference_channel: Option<u16>,
    sync_channel: Option<u16>,
    estimator: DelayEstimator,
}

impl PulseAligner {
    pub fn new(config: PulseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            reference_channel: None,
            sync_channel: None,
            estimator: DelayEstimator::new(),
        })
    }

    pub fn with_channels(mut self, reference: Option<u16>, sync: Option<u16>) -> Self {
        self.reference_channel = reference;
        self.sync_channel = sync;
        self
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    /// Samples by which the sync stream lags the reference stream.
    pub fn lag(&mut self, reference: &[f32], sync: &[f32]) -> Result<i64> {
        let ref_edge = self.config.rising_edge(reference).ok_or_else(|| {
            TelemetryError::alignment(format!(
                "no pulse above {} on the reference stream",
                self.config.threshold
            ))
        })?;
        let sync_edge = self.config.rising_edge(sync).ok_or_else(|| {
            TelemetryError::alignment(format!(
                "no pulse above {} on the sync stream",
                self.config.threshold
            ))
        })?;

        let (ref_start, ref_window) = self.config.window_around(reference, ref_edge);
        let (sync_start, sync_window) = self.config.window_around(sync, sync_edge);
        let residual =
            self.estimator.estimate(ref_window, sync_window, self.config.transform_length())?;

        let lag = sync_start as i64 - ref_start as i64 + residual;
        debug!(
            "Pulse edges at {} (reference) and {} (sync), residual {}, lag {}",
            ref_edge, sync_edge, residual, lag
        );
        Ok(lag)
    }
}

impl TimeAligner for PulseAligner {
    fn aligned_block(&mut self, reference: &Capture, sync: &Capture) -> Result<AlignedBlock> {
        let (ref_id, _) = reference.designated_channel(self.reference_channel)?;
        let (sync_id, _) = sync.designated_channel(self.sync_channel)?;
        let reference_samples = reference.samples(ref_id);
        let sync_samples = sync.samples(sync_id);

        let lag = self.lag(&reference_samples, &sync_samples)?;
        let shift = lag.unsigned_abs() as usize;
        let (reference_samples, sync_samples) = if lag > 0 {
            (reference_samples, trim_leading(sync_samples, shift, "sync")?)
        } else {
            (trim_leading(reference_samples, shift, "reference")?, sync_samples)
        };

        Ok(AlignedBlock::new(reference_samples, sync_samples))
    }
}
