//! Cross-system time alignment.
//!
//! Two readers on two independent devices buffer samples on two unrelated
//! clocks. An aligner turns their drained captures into one [`AlignedBlock`]
//! whose two sides start at the same physical instant.
//!
//! Three policies share the [`TimeAligner`] contract:
//! - [`GpsAligner`] bootstraps a per-reader clock offset from one GGA fix seen
//!   by both devices, then compares GPS-relative start times
//! - [`PtpAligner`] trusts a shared hardware clock and intersects timestamp ranges
//! - [`PulseAligner`] locates a calibration pulse on both sides and measures
//!   the shift by cross-correlation
//!
//! [`Aligner`] picks one from configuration.

pub mod calibration;
pub mod delay;
pub mod gps;
pub mod ptp;
pub mod pulse;

pub use calibration::{ChannelSeries, DelayCalibrator, DelayRecord, load_delays, save_delays};
pub use delay::{DelayEstimator, estimate_delay, estimate_delay_seconds, transform_length_for};
pub use gps::{ClockOffsets, GpsAligner};
pub use ptp::PtpAligner;
pub use pulse::{PulseAligner, PulseConfig};

use crate::Result;
use crate::config::{AlignmentConfig, AlignmentPolicy};
use crate::types::{AlignedBlock, Capture};

/// Produces equal-length sample blocks from two readers' captures.
pub trait TimeAligner {
    /// Align the designated channel of `reference` with that of `sync`.
    ///
    /// Fails with [`TelemetryError::Alignment`](crate::TelemetryError::Alignment)
    /// when the captures cannot be put on a common time base. Nothing is
    /// returned in that case.
    fn aligned_block(&mut self, reference: &Capture, sync: &Capture) -> Result<AlignedBlock>;
}

/// Aligner selected by [`AlignmentPolicy`].
#[derive(Debug)]
pub enum Aligner {
    Gps(GpsAligner),
    Ptp(PtpAligner),
    Pulse(PulseAligner),
}

impl Aligner {
    pub fn from_config(config: &AlignmentConfig, sample_rate: f64) -> Result<Self> {
        let (reference, sync) = (config.reference_channel, config.sync_channel);
        Ok(match config.policy {
            AlignmentPolicy::Gps => {
                Aligner::Gps(GpsAligner::new(sample_rate).with_channels(reference, sync))
            }
            AlignmentPolicy::Ptp => Aligner::Ptp(PtpAligner::new().with_channels(reference, sync)),
            AlignmentPolicy::Pulse => {
                let aligner = PulseAligner::new(config.pulse.clone())?;
                Aligner::Pulse(aligner.with_channels(reference, sync))
            }
        })
    }

    pub fn policy(&self) -> AlignmentPolicy {
        match self {
            Aligner::Gps(_) => AlignmentPolicy::Gps,
            Aligner::Ptp(_) => AlignmentPolicy::Ptp,
            Aligner::Pulse(_) => AlignmentPolicy::Pulse,
        }
    }
}

impl TimeAligner for Aligner {
    fn aligned_block(&mut self, reference: &Capture, sync: &Capture) -> Result<AlignedBlock> {
        match self {
            Aligner::Gps(aligner) => aligner.aligned_block(reference, sync),
            Aligner::Ptp(aligner) => aligner.aligned_block(reference, sync),
            Aligner::Pulse(aligner) => aligner.aligned_block(reference, sync),
        }
    }
}

/// Drop `count` leading samples, failing when nothing would remain.
pub(crate) fn trim_leading(samples: Vec<f32>, count: usize, side: &str) -> Result<Vec<f32>> {
    if count >= samples.len() {
        return Err(crate::TelemetryError::alignment(format!(
            "{} stream holds {} samples, cannot drop {} to align",
            side,
            samples.len(),
            count
        )));
    }
    Ok(samples[count..].to_vec())
}
