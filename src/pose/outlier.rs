//! Statistical rejection of corrupted detections before they reach the window.

use crate::defaults;
use crate::pose::sample::Sample;

/// Result of checking one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Accept,
    /// Rejected; carries the largest absolute z-score seen.
    Reject { max_z: f32 },
}

/// Rejects samples in which any coordinate lies too far from the sample mean.
///
/// The z-score is computed over the 63 flattened coordinates of the sample
/// itself, so a single jittered landmark stands out against the rest of the
/// hand. Stateless.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierFilter {
    max_abs_z: f32,
}

impl Default for OutlierFilter {
    fn default() -> Self {
        Self::new(defaults::OUTLIER_Z)
    }
}

impl OutlierFilter {
    pub fn new(max_abs_z: f32) -> Self {
        Self { max_abs_z }
    }

    pub fn max_abs_z(&self) -> f32 {
        self.max_abs_z
    }

    pub fn check(&self, sample: &Sample) -> Verdict {
        let max_z = max_abs_z_score(sample);
        if max_z > self.max_abs_z {
            Verdict::Reject { max_z }
        } else {
            Verdict::Accept
        }
    }

    pub fn accepts(&self, sample: &Sample) -> bool {
        self.check(sample) == Verdict::Accept
    }
}

/// Largest absolute z-score over the sample's coordinates (population std).
///
/// A constant sample has zero spread and therefore no outliers.
pub fn max_abs_z_score(sample: &Sample) -> f32 {
    let values = sample.to_flat();
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = variance.sqrt();
    if std <= f64::EPSILON {
        return 0.0;
    }
    values
        .iter()
        .map(|&v| ((v as f64 - mean) / std).abs())
        .fold(0.0, f64::max) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::SAMPLE_LEN;
    use crate::pose::sample::HandPose;

    fn sample_from(values: &[f32]) -> Sample {
        Sample::new(HandPose::from_flat(values).unwrap())
    }

    /// 62 values spread around 0.5 with a small deterministic wobble.
    fn baseline() -> Vec<f32> {
        (0..SAMPLE_LEN)
            .map(|i| 0.5 + if i % 2 == 0 { 0.01 } else { -0.01 })
            .collect()
    }

    #[test]
    fn test_single_spike_is_rejected() {
        let mut values = baseline();
        // Ten baseline standard deviations above the rest.
        values[17] = 0.5 + 10.0 * 0.01;
        let sample = sample_from(&values);
        assert!(matches!(
            OutlierFilter::default().check(&sample),
            Verdict::Reject { max_z } if max_z > 2.5
        ));
    }

    #[test]
    fn test_uniform_low_variance_sample_is_accepted() {
        let values: Vec<f32> = (0..SAMPLE_LEN)
            .map(|i| 0.40 + 0.2 * i as f32 / (SAMPLE_LEN - 1) as f32)
            .collect();
        let sample = sample_from(&values);
        assert!(max_abs_z_score(&sample) < 2.0);
        assert!(OutlierFilter::default().accepts(&sample));
    }

    #[test]
    fn test_constant_sample_has_zero_z() {
        let sample = sample_from(&[0.3; SAMPLE_LEN]);
        assert_eq!(max_abs_z_score(&sample), 0.0);
        assert!(OutlierFilter::default().accepts(&sample));
    }

    #[test]
    fn test_empty_sample_is_accepted_by_filter() {
        assert!(OutlierFilter::default().accepts(&Sample::empty()));
    }

    #[test]
    fn test_threshold_is_configurable() {
        let mut values = baseline();
        values[0] = 0.56;
        let sample = sample_from(&values);
        let z = max_abs_z_score(&sample);
        assert!(OutlierFilter::new(z + 0.1).accepts(&sample));
        assert!(!OutlierFilter::new(z - 0.1).accepts(&sample));
    }
}
