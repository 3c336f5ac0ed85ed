//! Personal rolling baselines
//!
//! A baseline is the arithmetic mean of a metric over the days strictly
//! before the scored day (`[day - 30, day - 1]` by default). Days without a
//! value are skipped, and zero qualifying days means no baseline. Baselines
//! are never cached; every call reads the store fresh.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::DailyStore;
use crate::error::DatabaseError;
use crate::models::DailyMetrics;

/// Default baseline window in days
pub const DEFAULT_BASELINE_WINDOW: u32 = 30;

/// Metrics that carry a personal baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMetric {
    Hrv,
    RestingHr,
    WristTemperature,
}

impl BaselineMetric {
    pub const ALL: [BaselineMetric; 3] = [
        BaselineMetric::Hrv,
        BaselineMetric::RestingHr,
        BaselineMetric::WristTemperature,
    ];

    fn value(&self, record: &DailyMetrics) -> Option<f64> {
        match self {
            BaselineMetric::Hrv => record.hrv_sdnn_ms,
            BaselineMetric::RestingHr => record.resting_hr_bpm,
            BaselineMetric::WristTemperature => record.wrist_temp_c,
        }
    }
}

impl fmt::Display for BaselineMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaselineMetric::Hrv => write!(f, "HRV"),
            BaselineMetric::RestingHr => write!(f, "Resting HR"),
            BaselineMetric::WristTemperature => write!(f, "Wrist temperature"),
        }
    }
}

/// Baselines in effect for one day
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Mean SDNN (ms)
    pub hrv_avg: Option<f64>,
    /// Mean resting heart rate (bpm)
    pub rhr_avg: Option<f64>,
    /// Mean absolute skin temperature (°C)
    pub wrist_temp_avg: Option<f64>,
}

impl Baseline {
    pub fn get(&self, metric: BaselineMetric) -> Option<f64> {
        match metric {
            BaselineMetric::Hrv => self.hrv_avg,
            BaselineMetric::RestingHr => self.rhr_avg,
            BaselineMetric::WristTemperature => self.wrist_temp_avg,
        }
    }
}

/// Computes rolling baselines from stored history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineTracker {
    window_days: u32,
}

impl Default for BaselineTracker {
    fn default() -> Self {
        Self::new(DEFAULT_BASELINE_WINDOW)
    }
}

impl BaselineTracker {
    pub fn new(window_days: u32) -> Self {
        Self {
            window_days: window_days.max(1),
        }
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    /// First and last day of history that feed `day`'s baseline
    pub fn window(&self, day: NaiveDate) -> (NaiveDate, NaiveDate) {
        (
            day - Duration::days(i64::from(self.window_days)),
            day - Duration::days(1),
        )
    }

    /// Baseline of one metric for `day`
    pub fn baseline(
        &self,
        store: &dyn DailyStore,
        metric: BaselineMetric,
        day: NaiveDate,
    ) -> Result<Option<f64>, DatabaseError> {
        let (start, end) = self.window(day);
        let history = store.get_metrics_range(start, end)?;
        Ok(self.from_history(&history, metric, day))
    }

    /// All baselines for `day` from a single range read
    pub fn baselines(
        &self,
        store: &dyn DailyStore,
        day: NaiveDate,
    ) -> Result<Baseline, DatabaseError> {
        let (start, end) = self.window(day);
        let history = store.get_metrics_range(start, end)?;

        Ok(Baseline {
            hrv_avg: self.from_history(&history, BaselineMetric::Hrv, day),
            rhr_avg: self.from_history(&history, BaselineMetric::RestingHr, day),
            wrist_temp_avg: self.from_history(&history, BaselineMetric::WristTemperature, day),
        })
    }

    /// Same computation over records already in memory; records outside the
    /// window are ignored
    pub fn from_history(
        &self,
        records: &[DailyMetrics],
        metric: BaselineMetric,
        day: NaiveDate,
    ) -> Option<f64> {
        let (start, end) = self.window(day);

        let (sum, count) = records
            .iter()
            .filter(|r| r.day >= start && r.day <= end)
            .filter_map(|r| metric.value(r))
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

        (count > 0).then(|| sum / count as f64)
    }
}
