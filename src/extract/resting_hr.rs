//! Resting heart rate from heart-rate samples
//!
//! Resting HR is the lowest mean over a short stable window during sleep.
//! Windows are scored by their mean bpm and only means in the physiological
//! range `[30, 100)` qualify. Averaging over a window keeps a single spike
//! (or a single dropout reading) from deciding the result.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::RestingHrConfig;
use crate::error::ExtractionError;
use crate::models::RawHeartRateSample;

/// How samples are grouped into candidate windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestingHrMethod {
    /// Time-duration window starting at every sample
    SlidingTime {
        /// Window length in seconds
        target_window_secs: u32,
        /// Shortest span a window must cover to count
        min_window_secs: u32,
        /// Fewest samples a window must hold to count
        min_window_samples: usize,
    },
    /// Runs of consecutive samples
    FixedCount { window_samples: usize },
}

impl Default for RestingHrMethod {
    fn default() -> Self {
        RestingHrMethod::SlidingTime {
            target_window_secs: 300,
            min_window_secs: 180,
            min_window_samples: 3,
        }
    }
}

impl RestingHrMethod {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RestingHrMethod::SlidingTime {
                target_window_secs,
                min_window_secs,
                min_window_samples,
            } => {
                if *target_window_secs == 0 {
                    return Err("Resting HR window must be longer than 0s".to_string());
                }
                if min_window_secs > target_window_secs {
                    return Err(format!(
                        "Resting HR minimum span {}s exceeds the {}s window",
                        min_window_secs, target_window_secs
                    ));
                }
                if *min_window_samples == 0 {
                    return Err("Resting HR windows need at least one sample".to_string());
                }
                Ok(())
            }
            RestingHrMethod::FixedCount { window_samples } => {
                if *window_samples == 0 {
                    return Err("Resting HR windows need at least one sample".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Resting heart rate for one day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestingHrReading {
    pub bpm: f64,
    /// First sample of the winning window
    pub window_start: DateTime<Utc>,
    /// Samples in the winning window
    pub sample_count: usize,
}

/// Candidate window over a sorted sample slice
#[derive(Debug, Clone, Copy)]
struct Candidate {
    start: usize,
    len: usize,
    mean: f64,
}

fn mean_bpm(samples: &[&RawHeartRateSample]) -> f64 {
    let sum: f64 = samples.iter().map(|s| f64::from(s.bpm)).sum();
    sum / samples.len() as f64
}

/// Every window of `target` duration (half-open) starting at each sample
fn sliding_time_windows(
    sorted: &[&RawHeartRateSample],
    target: Duration,
    min_span: Duration,
    min_samples: usize,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut end = 0;

    for start in 0..sorted.len() {
        if end < start {
            end = start;
        }
        while end < sorted.len() && sorted[end].timestamp - sorted[start].timestamp < target {
            end += 1;
        }

        let len = end - start;
        if len == 0 || len < min_samples {
            continue;
        }
        let span = sorted[end - 1].timestamp - sorted[start].timestamp;
        if span < min_span {
            continue;
        }

        candidates.push(Candidate {
            start,
            len,
            mean: mean_bpm(&sorted[start..end]),
        });
    }

    candidates
}

fn fixed_count_windows(sorted: &[&RawHeartRateSample], window_samples: usize) -> Vec<Candidate> {
    sorted
        .windows(window_samples)
        .enumerate()
        .map(|(start, window)| Candidate {
            start,
            len: window_samples,
            mean: mean_bpm(window),
        })
        .collect()
}

/// Lowest valid window mean across the samples
pub fn extract_resting_hr(
    samples: &[&RawHeartRateSample],
    config: &RestingHrConfig,
) -> Result<RestingHrReading, ExtractionError> {
    if samples.len() < config.min_samples {
        return Err(ExtractionError::InsufficientData {
            metric: "resting_hr",
            required: config.min_samples,
            found: samples.len(),
        });
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| s.timestamp);

    let candidates = match &config.strategy {
        RestingHrMethod::SlidingTime {
            target_window_secs,
            min_window_secs,
            min_window_samples,
        } => sliding_time_windows(
            &sorted,
            Duration::seconds(i64::from(*target_window_secs)),
            Duration::seconds(i64::from(*min_window_secs)),
            *min_window_samples,
        ),
        RestingHrMethod::FixedCount { window_samples } => {
            fixed_count_windows(&sorted, (*window_samples).max(1))
        }
    };

    // Strict comparison keeps the earliest window on ties
    let best = candidates
        .into_iter()
        .filter(|c| c.mean >= config.min_valid_bpm && c.mean < config.max_valid_bpm)
        .fold(None::<Candidate>, |best, c| match best {
            Some(b) if b.mean <= c.mean => Some(b),
            _ => Some(c),
        });

    match best {
        Some(window) => Ok(RestingHrReading {
            bpm: window.mean,
            window_start: sorted[window.start].timestamp,
            sample_count: window.len,
        }),
        None => Err(ExtractionError::InsufficientData {
            metric: "resting_hr",
            required: 1,
            found: 0,
        }),
    }
}
