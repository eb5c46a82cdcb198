//! FFT cross-correlation delay estimation.
//!
//! The correlation of `a` and `b` is computed as `IFFT(FFT(a) * conj(FFT(b)))`
//! over a power-of-two transform. The index of the largest magnitude is the
//! circular lag; indices past the midpoint wrap to negative lags. The reported
//! value is the negated lag, so a positive delay means `b` lags `a` and is the
//! number of leading samples to drop from `b` to line it up with `a`.
//!
//! The transform must be long enough to hold the true lag without wrapping;
//! [`transform_length_for`] picks the next power of two at or above twice the
//! expected lag.

use std::collections::HashMap;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::trace;

use crate::{Result, TelemetryError};

/// Delay of `b` relative to `a` in samples, positive when `b` lags.
pub fn estimate_delay(a: &[f32], b: &[f32], transform_length: usize) -> Result<i64> {
    DelayEstimator::new().estimate(a, b, transform_length)
}

/// Delay of `b` relative to `a` in seconds.
pub fn estimate_delay_seconds(
    a: &[f32],
    b: &[f32],
    sample_rate: f64,
    transform_length: usize,
) -> Result<f64> {
    Ok(estimate_delay(a, b, transform_length)? as f64 / sample_rate)
}

/// Smallest power of two that holds a lag of `expected_lag` samples in either direction.
pub fn transform_length_for(expected_lag: usize) -> usize {
    expected_lag.saturating_mul(2).max(1).next_power_of_two()
}

type Plans = (Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>);

/// Cross-correlation estimator that keeps FFT plans between calls.
pub struct DelayEstimator {
    planner: FftPlanner<f64>,
    plans: HashMap<usize, Plans>,
}

impl Default for DelayEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DelayEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayEstimator").field("planned_lengths", &self.plans.keys()).finish()
    }
}

impl DelayEstimator {
    pub fn new() -> Self {
        Self { planner: FftPlanner::new(), plans: HashMap::new() }
    }

    /// Delay of `b` relative to `a` in samples.
    ///
    /// Both inputs are zero-padded or truncated to `transform_length`, which
    /// must be a non-zero power of two.
    pub fn estimate(&mut self, a: &[f32], b: &[f32], transform_length: usize) -> Result<i64> {
        if transform_length == 0 || !transform_length.is_power_of_two() {
            return Err(TelemetryError::config(format!(
                "transform length {} is not a power of two",
                transform_length
            )));
        }

        let (forward, inverse) = self.plans(transform_length);

        let mut spectrum_a = padded(a, transform_length);
        let mut spectrum_b = padded(b, transform_length);
        forward.process(&mut spectrum_a);
        forward.process(&mut spectrum_b);

        let mut correlation: Vec<Complex<f64>> =
            spectrum_a.iter().zip(&spectrum_b).map(|(x, y)| x * y.conj()).collect();
        inverse.process(&mut correlation);

        // First index wins on ties.
        let mut peak_index = 0usize;
        let mut peak = f64::NEG_INFINITY;
        for (index, value) in correlation.iter().enumerate() {
            let magnitude = value.norm();
            if magnitude > peak {
                peak = magnitude;
                peak_index = index;
            }
        }

        let lag = if peak_index > transform_length / 2 {
            peak_index as i64 - transform_length as i64
        } else {
            peak_index as i64
        };

        trace!("Correlation peak at index {} of {} (lag {})", peak_index, transform_length, lag);
        Ok(-lag)
    }

    /// Delay of `b` relative to `a` in seconds.
    pub fn estimate_seconds(
        &mut self,
        a: &[f32],
        b: &[f32],
        sample_rate: f64,
        transform_length: usize,
    ) -> Result<f64> {
        Ok(self.estimate(a, b, transform_length)? as f64 / sample_rate)
    }

    fn plans(&mut self, length: usize) -> Plans {
        let planner = &mut self.planner;
        self.plans
            .entry(length)
            .or_insert_with(|| (planner.plan_fft_forward(length), planner.plan_fft_inverse(length)))
            .clone()
    }
}

fn padded(signal: &[f32], length: usize) -> Vec<Complex<f64>> {
    let mut buffer = vec![Complex::new(0.0, 0.0); length];
    for (slot, &sample) in buffer.iter_mut().zip(signal) {
        *slot = Complex::new(f64::from(sample), 0.0);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{pulse_train, shifted};
    use proptest::prelude::*;

    #[test]
    fn identical_signals_have_zero_delay() {
        let signal = pulse_train(512, &[100, 300]);
        assert_eq!(estimate_delay(&signal, &signal, 1024).unwrap(), 0);
    }

    #[test]
    fn lagging_b_is_positive() {
        let a = pulse_train(1024, &[200]);
        let b = shifted(&a, 17);
        assert_eq!(estimate_delay(&a, &b, 2048).unwrap(), 17);
        assert_eq!(estimate_delay(&b, &a, 2048).unwrap(), -17);
    }

    #[test]
    fn seconds_scale_by_sample_rate() {
        let a = pulse_train(1024, &[200]);
        let b = shifted(&a, 64);
        let seconds = estimate_delay_seconds(&a, &b, 65536.0, 2048).unwrap();
        assert!((seconds - 64.0 / 65536.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_power_of_two_lengths() {
        let signal = vec![0.0f32; 8];
        assert!(matches!(estimate_delay(&signal, &signal, 0), Err(TelemetryError::Config { .. })));
        assert!(matches!(
            estimate_delay(&signal, &signal, 1000),
            Err(TelemetryError::Config { .. })
        ));
    }

    #[test]
    fn longer_inputs_are_truncated() {
        let a = pulse_train(4096, &[10]);
        let b = shifted(&a, 5);
        assert_eq!(estimate_delay(&a, &b, 64).unwrap(), 5);
    }

    #[test]
    fn transform_length_covers_twice_the_lag() {
        assert_eq!(transform_length_for(0), 1);
        assert_eq!(transform_length_for(1), 2);
        assert_eq!(transform_length_for(100), 256);
        assert_eq!(transform_length_for(128), 256);
        assert_eq!(transform_length_for(65536), 131072);
    }

    #[test]
    fn estimator_reuses_plans() {
        let mut estimator = DelayEstimator::new();
        let a = pulse_train(256, &[50]);
        for k in [0usize, 3, 9] {
            let b = shifted(&a, k);
            assert_eq!(estimator.estimate(&a, &b, 512).unwrap(), k as i64);
        }
        assert_eq!(estimator.plans.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_estimate_is_antisymmetric(k in 0usize..100, pulse_at in 150usize..300) {
            let a = pulse_train(512, &[pulse_at, pulse_at + 40]);
            let b = shifted(&a, k);
            let forward = estimate_delay(&a, &b, 1024).unwrap();
            let backward = estimate_delay(&b, &a, 1024).unwrap();
            prop_assert!((forward - k as i64).abs() <= 1, "forward {} for k {}", forward, k);
            prop_assert!((backward + k as i64).abs() <= 1, "backward {} for k {}", backward, k);
        }
    }
}
