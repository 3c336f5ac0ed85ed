//! Heart rate variability from beat-to-beat intervals
//!
//! # Filtering
//!
//! An interval is kept only when the sensor had skin contact, no motion was
//! flagged and the interval lies in `[min_interval_ms, max_interval_ms]`
//! (300-2000 ms by default, i.e. 30-200 bpm).
//!
//! # Metrics
//!
//! - SDNN: population standard deviation of the valid intervals
//! - RMSSD: root mean square of successive differences, reported alongside
//!
//! Providers that only publish RMSSD get an SDNN estimate of `RMSSD × 1.5`.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use super::HrvConfig;
use crate::error::ExtractionError;
use crate::models::RawIntervalSample;

/// HRV extracted for one day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvReading {
    /// Standard deviation of NN intervals (ms)
    pub sdnn_ms: f64,
    /// Root mean square of successive differences (ms)
    pub rmssd_ms: Option<f64>,
    /// Intervals that passed filtering
    pub valid_count: usize,
    /// Intervals dropped by filtering
    pub rejected_count: usize,
}

/// Whether a single interval survives artifact filtering
pub fn is_valid_interval(sample: &RawIntervalSample, config: &HrvConfig) -> bool {
    sample.skin_contact
        && !sample.motion_detected
        && sample.interval_ms >= config.min_interval_ms
        && sample.interval_ms <= config.max_interval_ms
}

/// Valid intervals in milliseconds, ordered by timestamp
pub fn valid_intervals(samples: &[&RawIntervalSample], config: &HrvConfig) -> Vec<f64> {
    let mut valid: Vec<&RawIntervalSample> = samples
        .iter()
        .copied()
        .filter(|s| is_valid_interval(s, config))
        .collect();
    valid.sort_by_key(|s| s.timestamp);
    valid.into_iter().map(|s| f64::from(s.interval_ms)).collect()
}

/// Population standard deviation; `NaN` for an empty slice
pub fn sdnn(intervals: &[f64]) -> f64 {
    intervals.iter().population_std_dev()
}

/// RMSSD over consecutive intervals
pub fn rmssd(intervals: &[f64]) -> Result<f64, ExtractionError> {
    if intervals.len() < 2 {
        return Err(ExtractionError::InsufficientData {
            metric: "rmssd",
            required: 2,
            found: intervals.len(),
        });
    }

    let sum_sq: f64 = intervals
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).powi(2))
        .sum();
    Ok((sum_sq / (intervals.len() - 1) as f64).sqrt())
}

/// Estimate SDNN from a provider-reported RMSSD
pub fn sdnn_from_rmssd(rmssd_ms: f64, factor: f64) -> f64 {
    rmssd_ms * factor
}

/// Filter intervals and compute SDNN
pub fn extract_hrv(
    samples: &[&RawIntervalSample],
    config: &HrvConfig,
) -> Result<HrvReading, ExtractionError> {
    let intervals = valid_intervals(samples, config);
    let rejected_count = samples.len() - intervals.len();

    if intervals.len() < config.min_valid_intervals {
        return Err(ExtractionError::InsufficientData {
            metric: "hrv",
            required: config.min_valid_intervals,
            found: intervals.len(),
        });
    }

    let sdnn_ms = sdnn(&intervals);
    if !sdnn_ms.is_finite() {
        return Err(ExtractionError::OutOfRange {
            metric: "hrv",
            value: sdnn_ms,
        });
    }

    Ok(HrvReading {
        sdnn_ms,
        rmssd_ms: rmssd(&intervals).ok(),
        valid_count: intervals.len(),
        rejected_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn samples_from(values: &[u32]) -> Vec<RawIntervalSample> {
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 2, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| RawIntervalSample {
                timestamp: start + Duration::seconds(i as i64),
                interval_ms: *v,
                skin_contact: true,
                motion_detected: false,
            })
            .collect()
    }

    fn refs(samples: &[RawIntervalSample]) -> Vec<&RawIntervalSample> {
        samples.iter().collect()
    }

    #[test]
    fn test_interval_filtering() {
        let config = HrvConfig::default();
        let mut samples = samples_from(&[250, 300, 1000, 2000, 2100]);
        samples[2].skin_contact = false;

        let valid = valid_intervals(&refs(&samples), &config);
        assert_eq!(valid, vec![300.0, 2000.0]);

        let mut moving = samples_from(&[800]);
        moving[0].motion_detected = true;
        assert!(!is_valid_interval(&moving[0], &config));
    }

    #[test]
    fn test_sdnn_known_values() {
        // Population std dev of 2, 4, 4, 4, 5, 5, 7, 9 is exactly 2
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((sdnn(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rmssd() {
        let values = [800.0, 810.0, 790.0, 800.0];
        // Differences 10, -20, 10 -> sqrt((100 + 400 + 100) / 3)
        let expected = (600.0f64 / 3.0).sqrt();
        assert!((rmssd(&values).unwrap() - expected).abs() < 1e-9);

        assert!(rmssd(&[800.0]).is_err());
    }

    #[test]
    fn test_sdnn_from_rmssd() {
        assert_eq!(sdnn_from_rmssd(40.0, 1.5), 60.0);
    }

    #[test]
    fn test_extract_requires_enough_valid_intervals() {
        let config = HrvConfig::default();

        // 29 valid plus junk
        let mut values = vec![850; 29];
        values.extend([100, 5000, 150]);
        let samples = samples_from(&values);

        let err = extract_hrv(&refs(&samples), &config).unwrap_err();
        assert_eq!(
            err,
            ExtractionError::InsufficientData {
                metric: "hrv",
                required: 30,
                found: 29
            }
        );
    }

    #[test]
    fn test_extract_hrv() {
        let config = HrvConfig::default();
        let values: Vec<u32> = (0..60).map(|i| if i % 2 == 0 { 900 } else { 1000 }).collect();
        let samples = samples_from(&values);

        let reading = extract_hrv(&refs(&samples), &config).unwrap();
        assert_eq!(reading.valid_count, 60);
        assert_eq!(reading.rejected_count, 0);
        assert!((reading.sdnn_ms - 50.0).abs() < 1e-9);
        assert!((reading.rmssd_ms.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_intervals_have_zero_sdnn() {
        let samples = samples_from(&[1000; 40]);
        let reading = extract_hrv(&refs(&samples), &HrvConfig::default()).unwrap();
        assert_eq!(reading.sdnn_ms, 0.0);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_sdnn_matches_population_std_dev(
            values in prop::collection::vec(300u32..=2000u32, 30..200)
        ) {
            let samples = samples_from(&values);
            let reading = extract_hrv(&refs(&samples), &HrvConfig::default()).unwrap();

            let n = values.len() as f64;
            let mean = values.iter().map(|v| f64::from(*v)).sum::<f64>() / n;
            let variance = values
                .iter()
                .map(|v| (f64::from(*v) - mean).powi(2))
                .sum::<f64>()
                / n;

            prop_assert!(reading.sdnn_ms >= 0.0);
            prop_assert!((reading.sdnn_ms - variance.sqrt()).abs() < 1e-6);
            prop_assert_eq!(reading.valid_count, values.len());
        }
    }
}
