//! Composite Vigor scoring
//!
//! Each metric is mapped to a sub-score in `[0, 1]` by a fixed curve, then
//! the available sub-scores are combined with weights renormalized over only
//! the metrics present that day. Stored and displayed values are scaled to
//! `[0, 100]`.
//!
//! | Metric      | Input                         | Full score        |
//! |-------------|-------------------------------|-------------------|
//! | Sleep       | hours asleep                  | 7-9 h             |
//! | HRV         | SDNN / personal baseline      | ratio ≥ 1.6       |
//! | Resting HR  | bpm - personal baseline       | 10 bpm below      |
//! | Temperature | \|deviation\| from baseline   | within 0.5 °C     |
//!
//! Scoring is pure: the same metrics and baseline always give the same score.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::baseline::Baseline;
use crate::error::{Result, VigorError};
use crate::models::{DailyMetrics, MetricTag, RawInputs, SubScores, VigorScore};
use crate::sleep::SleepQuality;

/// How sleep is scored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepScoringMethod {
    /// Hours asleep only
    DurationOnly,
    /// 60% duration, 40% stage distribution when stages are known
    #[default]
    DurationWithStages,
}

impl fmt::Display for SleepScoringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepScoringMethod::DurationOnly => write!(f, "duration only"),
            SleepScoringMethod::DurationWithStages => write!(f, "duration with stages"),
        }
    }
}

/// Per-metric weights over the full metric set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub sleep: f64,
    pub hrv: f64,
    pub rhr: f64,
    pub temperature: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            sleep: 0.30,
            hrv: 0.30,
            rhr: 0.25,
            temperature: 0.15,
        }
    }
}

impl ScoreWeights {
    pub fn get(&self, tag: MetricTag) -> f64 {
        match tag {
            MetricTag::Sleep => self.sleep,
            MetricTag::Hrv => self.hrv,
            MetricTag::Rhr => self.rhr,
            MetricTag::Temperature => self.temperature,
        }
    }

    /// Weights must be finite, non-negative and sum to 1
    pub fn validate(&self) -> std::result::Result<(), String> {
        for tag in MetricTag::ALL {
            let weight = self.get(tag);
            if !weight.is_finite() || weight < 0.0 {
                return Err(format!("Weight for {} must be a non-negative number", tag));
            }
        }

        let total: f64 = MetricTag::ALL.iter().map(|tag| self.get(*tag)).sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(format!("Score weights sum to {:.4}, expected 1.0", total));
        }
        Ok(())
    }
}

/// Scorer configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: ScoreWeights,
    pub sleep_method: SleepScoringMethod,
}

/// Sleep duration curve: full marks for 7-9 hours
pub fn sleep_duration_score(hours: f64) -> f64 {
    if hours < 7.0 {
        (1.0 - (7.0 - hours) * 0.15).max(0.0)
    } else if hours <= 9.0 {
        1.0
    } else {
        (1.0 - (hours - 9.0) * 0.05).max(0.7)
    }
}

fn stage_component(pct: f64, low: f64, high: f64) -> f64 {
    if pct < low {
        (pct / low).max(0.0)
    } else if pct <= high {
        1.0
    } else {
        (1.0 - (pct - high) / 25.0).max(0.0)
    }
}

/// Stage distribution quality in `[0, 1]`
///
/// Deep sleep is ideal at 15-25% and REM at 20-25% of time asleep. An
/// efficiency above 85% adds a 0.1 bonus.
pub fn sleep_stage_score(quality: &SleepQuality) -> f64 {
    let deep = stage_component(quality.deep_pct, 15.0, 25.0);
    let rem = stage_component(quality.rem_pct, 20.0, 25.0);
    let bonus = if quality.efficiency_pct > 85.0 { 0.1 } else { 0.0 };

    ((deep + rem) / 2.0 + bonus).min(1.0)
}

pub fn sleep_score(hours: f64, quality: Option<&SleepQuality>, method: SleepScoringMethod) -> f64 {
    let duration = sleep_duration_score(hours);
    match (method, quality) {
        (SleepScoringMethod::DurationWithStages, Some(quality)) => {
            duration * 0.6 + sleep_stage_score(quality) * 0.4
        }
        _ => duration,
    }
}

/// HRV relative to baseline: 0.7 at baseline, rising to 1.0 at +60%
pub fn hrv_score(current: f64, baseline: f64) -> f64 {
    let ratio = current / baseline;
    let score = if ratio >= 1.0 {
        0.7 + ((ratio - 1.0) * 0.5).min(0.3)
    } else {
        0.7 - (1.0 - ratio) * 1.5
    };
    score.clamp(0.0, 1.0)
}

/// Resting HR relative to baseline: 0.8 at baseline, lower is better
pub fn rhr_score(current: f64, baseline: f64) -> f64 {
    let deviation = current - baseline;
    let score = if deviation <= 0.0 {
        0.8 + (deviation.abs() * 0.02).min(0.2)
    } else {
        0.8 - deviation * 0.08
    };
    score.clamp(0.0, 1.0)
}

/// Skin temperature deviation in either direction
pub fn temperature_score(deviation: f64) -> f64 {
    let dev = deviation.abs();
    if dev <= 0.5 {
        1.0
    } else if dev <= 1.0 {
        0.85
    } else if dev <= 1.5 {
        0.7
    } else if dev <= 2.0 {
        0.5
    } else {
        (0.5 - (dev - 2.0) * 0.1).max(0.3)
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Weighted, missing-data-aware composite scorer
#[derive(Debug, Clone, Default)]
pub struct VigorScorer {
    config: ScoringConfig,
}

impl VigorScorer {
    pub fn new(config: ScoringConfig) -> Result<Self> {
        config.weights.validate().map_err(VigorError::Configuration)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Sub-scores in `[0, 1]` for whatever metrics have usable inputs
    fn unit_scores(&self, metrics: &DailyMetrics, baseline: &Baseline) -> SubScores {
        let sleep = finite(metrics.sleep_hours).map(|hours| {
            sleep_score(hours, metrics.sleep_quality.as_ref(), self.config.sleep_method)
        });

        let hrv = match (
            finite(metrics.hrv_sdnn_ms),
            finite(baseline.hrv_avg).filter(|b| *b > 0.0),
        ) {
            (Some(current), Some(base)) => Some(hrv_score(current, base)),
            _ => None,
        };

        let rhr = match (finite(metrics.resting_hr_bpm), finite(baseline.rhr_avg)) {
            (Some(current), Some(base)) => Some(rhr_score(current, base)),
            _ => None,
        };

        let temperature = finite(metrics.wrist_temp_deviation_c).map(temperature_score);

        SubScores {
            sleep,
            hrv,
            rhr,
            temperature,
        }
    }

    /// Score one day from its metrics and the baselines in effect for it
    pub fn score(&self, metrics: &DailyMetrics, baseline: &Baseline) -> VigorScore {
        let units = self.unit_scores(metrics, baseline);

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for tag in MetricTag::ALL {
            if let Some(score) = units.get(tag) {
                let weight = self.config.weights.get(tag);
                weighted += score * weight;
                total_weight += weight;
            }
        }

        let composite = if total_weight > 0.0 {
            (100.0 * weighted / total_weight).clamp(0.0, 100.0)
        } else {
            0.0
        };

        let scale = |v: Option<f64>| v.map(|s| s * 100.0);
        let sub_scores = SubScores {
            sleep: scale(units.sleep),
            hrv: scale(units.hrv),
            rhr: scale(units.rhr),
            temperature: scale(units.temperature),
        };

        let present = sub_scores.present();
        let missing_metrics: BTreeSet<MetricTag> = MetricTag::ALL
            .into_iter()
            .filter(|tag| !present.contains(tag))
            .collect();

        VigorScore {
            day: metrics.day,
            composite,
            sub_scores,
            raw_inputs: RawInputs {
                sleep_hours: metrics.sleep_hours,
                hrv_sdnn_ms: metrics.hrv_sdnn_ms,
                resting_hr_bpm: metrics.resting_hr_bpm,
                wrist_temp_deviation_c: metrics.wrist_temp_deviation_c,
                hrv_baseline_ms: baseline.hrv_avg,
                rhr_baseline_bpm: baseline.rhr_avg,
            },
            missing_metrics,
        }
    }
}
