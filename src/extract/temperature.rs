//! Skin temperature
//!
//! Nightly mean of wrist skin temperature. The body-equivalent value uses an
//! empirical +8.5 °C offset and is informational only; scoring works on the
//! deviation from the personal baseline.

use serde::{Deserialize, Serialize};

use super::TemperatureConfig;
use crate::error::ExtractionError;
use crate::models::RawTemperatureSample;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Mean skin temperature (°C)
    pub skin_c: f64,
    /// Estimated core temperature (°C)
    pub body_equivalent_c: f64,
    pub sample_count: usize,
}

pub fn extract_temperature(
    samples: &[&RawTemperatureSample],
    config: &TemperatureConfig,
) -> Result<TemperatureReading, ExtractionError> {
    let values: Vec<f64> = samples
        .iter()
        .map(|s| s.celsius)
        .filter(|c| c.is_finite())
        .collect();

    if values.is_empty() {
        return Err(ExtractionError::InsufficientData {
            metric: "temperature",
            required: 1,
            found: 0,
        });
    }

    let skin_c = values.iter().sum::<f64>() / values.len() as f64;
    if skin_c < config.min_skin_c || skin_c > config.max_skin_c {
        return Err(ExtractionError::OutOfRange {
            metric: "temperature",
            value: skin_c,
        });
    }

    Ok(TemperatureReading {
        skin_c,
        body_equivalent_c: skin_c + config.body_offset_c,
        sample_count: values.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn readings(values: &[f64]) -> Vec<RawTemperatureSample> {
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 1, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, c)| RawTemperatureSample {
                timestamp: start + Duration::minutes(i as i64 * 5),
                celsius: *c,
            })
            .collect()
    }

    #[test]
    fn test_mean_and_body_equivalent() {
        let samples = readings(&[33.8, 34.0, 34.2]);
        let refs: Vec<_> = samples.iter().collect();

        let reading = extract_temperature(&refs, &TemperatureConfig::default()).unwrap();
        assert!((reading.skin_c - 34.0).abs() < 1e-9);
        assert!((reading.body_equivalent_c - 42.5).abs() < 1e-9);
        assert_eq!(reading.sample_count, 3);
    }

    #[test]
    fn test_range_is_inclusive() {
        let samples = readings(&[38.0]);
        let refs: Vec<_> = samples.iter().collect();
        assert!(extract_temperature(&refs, &TemperatureConfig::default()).is_ok());
    }

    #[test]
    fn test_out_of_range() {
        // Sensor off-wrist reads ambient air
        let samples = readings(&[18.5, 19.0]);
        let refs: Vec<_> = samples.iter().collect();

        let err = extract_temperature(&refs, &TemperatureConfig::default()).unwrap_err();
        assert!(matches!(err, ExtractionError::OutOfRange { metric: "temperature", .. }));
    }

    #[test]
    fn test_non_finite_samples_are_ignored() {
        let samples = readings(&[f64::NAN, 34.0, f64::INFINITY]);
        let refs: Vec<_> = samples.iter().collect();

        let reading = extract_temperature(&refs, &TemperatureConfig::default()).unwrap();
        assert_eq!(reading.sample_count, 1);

        let samples = readings(&[f64::NAN]);
        let refs: Vec<_> = samples.iter().collect();
        assert!(extract_temperature(&refs, &TemperatureConfig::default()).is_err());
    }
}
