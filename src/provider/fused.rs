//! Precedence fusion across providers
//!
//! Each metric of a day is taken from the reading whose attributed source
//! ranks highest, so a peripheral's raw HRV beats a cloud estimate and the
//! estimate only fills days or metrics nobody else covered.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::PhysiologicalDataProvider;
use crate::error::{ExtractionError, ProviderError};
use crate::extract::first_success;
use crate::models::{DailyReading, DayRange, SourceKind};

/// Attribution assumed for a present metric its provider did not attribute
const UNATTRIBUTED: SourceKind = SourceKind::CloudEstimate;

pub struct FusedProvider {
    providers: Vec<Arc<dyn PhysiologicalDataProvider>>,
    name: String,
}

impl FusedProvider {
    pub fn new(providers: Vec<Arc<dyn PhysiologicalDataProvider>>) -> Self {
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        let name = format!("fused [{}]", names.join(", "));
        Self { providers, name }
    }

    /// Merge one day's readings, metric by metric
    pub fn fuse_day(day: NaiveDate, readings: &[DailyReading]) -> DailyReading {
        let mut fused = DailyReading::new(day);

        let absent = |metric: &'static str| ExtractionError::InsufficientData {
            metric,
            required: 1,
            found: 0,
        };

        if let Ok(sleep) = first_success(
            "sleep",
            readings.iter().map(|r| {
                (r.sources.sleep.unwrap_or(UNATTRIBUTED), move || {
                    r.sleep_hours
                        .map(|hours| (hours, r.sleep_quality))
                        .ok_or_else(|| absent("sleep"))
                })
            }),
        ) {
            fused.sleep_hours = Some(sleep.value.0);
            fused.sleep_quality = sleep.value.1;
            fused.sources.sleep = Some(sleep.source);
        }

        if let Ok(hrv) = first_success(
            "hrv",
            readings.iter().map(|r| {
                (r.sources.hrv.unwrap_or(UNATTRIBUTED), move || {
                    r.hrv_sdnn_ms.ok_or_else(|| absent("hrv"))
                })
            }),
        ) {
            fused.hrv_sdnn_ms = Some(hrv.value);
            fused.sources.hrv = Some(hrv.source);
        }

        if let Ok(rhr) = first_success(
            "resting_hr",
            readings.iter().map(|r| {
                (r.sources.resting_hr.unwrap_or(UNATTRIBUTED), move || {
                    r.resting_hr_bpm.ok_or_else(|| absent("resting_hr"))
                })
            }),
        ) {
            fused.resting_hr_bpm = Some(rhr.value);
            fused.sources.resting_hr = Some(rhr.source);
        }

        // Absolute value and deviation travel together from one source
        if let Ok(temp) = first_success(
            "temperature",
            readings.iter().map(|r| {
                (r.sources.temperature.unwrap_or(UNATTRIBUTED), move || {
                    if r.wrist_temp_c.is_none() && r.wrist_temp_deviation_c.is_none() {
                        Err(absent("temperature"))
                    } else {
                        Ok((r.wrist_temp_c, r.wrist_temp_deviation_c))
                    }
                })
            }),
        ) {
            fused.wrist_temp_c = temp.value.0;
            fused.wrist_temp_deviation_c = temp.value.1;
            fused.sources.temperature = Some(temp.source);
        }

        fused
    }
}

#[async_trait]
impl PhysiologicalDataProvider for FusedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_daily(&self, range: DayRange) -> Result<Vec<DailyReading>, ProviderError> {
        let results = join_all(self.providers.iter().map(|p| p.fetch_daily(range))).await;

        // Providers in configured order; a repeated day keeps its last reading
        let mut by_day: BTreeMap<NaiveDate, Vec<DailyReading>> = BTreeMap::new();
        for (provider, result) in self.providers.iter().zip(results) {
            let readings = result.map_err(|err| {
                warn!(provider = provider.name(), error = %err, "Provider failed, aborting fused fetch");
                err
            })?;

            let mut latest: BTreeMap<NaiveDate, DailyReading> = BTreeMap::new();
            for reading in readings.into_iter().filter(|r| range.contains(r.day)) {
                latest.insert(reading.day, reading);
            }
            for (day, reading) in latest {
                by_day.entry(day).or_default().push(reading);
            }
        }

        let readings: Vec<DailyReading> = by_day
            .into_iter()
            .map(|(day, readings)| Self::fuse_day(day, &readings))
            .filter(|reading| !reading.is_empty())
            .collect();

        debug!(
            provider = %self.name,
            %range,
            providers = self.providers.len(),
            days = readings.len(),
            "Fused provider readings"
        );
        Ok(readings)
    }
}
