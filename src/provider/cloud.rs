//! Cloud recovery service adapter
//!
//! The service publishes day-bounded records:
//!
//! - **cycle**: one physiological day, from waking to waking
//! - **sleep**: a sleep period with a stage summary in milliseconds
//! - **recovery**: nightly RMSSD, resting HR and skin temperature, tied to
//!   the cycle it closes and the sleep it was measured in
//!
//! A recovery belongs to the local calendar date on which its cycle ended,
//! or to the date it was created when the cycle is unknown or still open.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::PhysiologicalDataProvider;
use crate::error::ProviderError;
use crate::extract::hrv::sdnn_from_rmssd;
use crate::models::{local_day, DailyReading, DayRange, MetricSources, SourceKind};
use crate::sleep::SleepQuality;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudCycle {
    pub id: i64,
    pub start: DateTime<Utc>,
    /// Open cycles have no end yet
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub total_in_bed_time_milli: i64,
    pub total_awake_time_milli: i64,
    pub total_light_sleep_time_milli: i64,
    pub total_slow_wave_sleep_time_milli: i64,
    pub total_rem_sleep_time_milli: i64,
}

impl StageSummary {
    pub fn asleep_hours(&self) -> f64 {
        (self.total_in_bed_time_milli - self.total_awake_time_milli).max(0) as f64
            / MILLIS_PER_HOUR
    }

    pub fn quality(&self) -> Option<SleepQuality> {
        SleepQuality::from_totals(
            self.total_slow_wave_sleep_time_milli as f64,
            self.total_light_sleep_time_milli as f64,
            self.total_rem_sleep_time_milli as f64,
            self.total_awake_time_milli as f64,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudSleepScore {
    #[serde(default)]
    pub stage_summary: Option<StageSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudSleep {
    pub id: String,
    #[serde(default)]
    pub cycle_id: Option<i64>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub nap: bool,
    #[serde(default)]
    pub score: Option<CloudSleepScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRecoveryScore {
    #[serde(default)]
    pub hrv_rmssd_milli: Option<f64>,
    #[serde(default)]
    pub resting_heart_rate: Option<f64>,
    /// Absolute skin temperature
    #[serde(default)]
    pub skin_temp_celsius: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRecovery {
    pub cycle_id: i64,
    #[serde(default)]
    pub sleep_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub score: Option<CloudRecoveryScore>,
}

/// One page of records as returned by the service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudRecords {
    #[serde(default)]
    pub cycles: Vec<CloudCycle>,
    #[serde(default)]
    pub sleeps: Vec<CloudSleep>,
    #[serde(default)]
    pub recoveries: Vec<CloudRecovery>,
}

/// Transport to the cloud recovery service
#[async_trait]
pub trait CloudRecoveryApi: Send + Sync {
    /// Records overlapping `range`; may include records just outside it
    async fn fetch_records(&self, range: DayRange) -> Result<CloudRecords, ProviderError>;
}

/// Reads a JSON export of the service's records
#[derive(Debug, Clone)]
pub struct FileCloudApi {
    path: PathBuf,
}

impl FileCloudApi {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CloudRecoveryApi for FileCloudApi {
    async fn fetch_records(&self, _range: DayRange) -> Result<CloudRecords, ProviderError> {
        let provider = format!("cloud export {}", self.path.display());
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ProviderError::Unavailable {
                    provider: provider.clone(),
                },
                _ => ProviderError::Fetch {
                    provider: provider.clone(),
                    reason: e.to_string(),
                },
            })?;

        serde_json::from_str(&content).map_err(|e| ProviderError::Parse {
            provider,
            reason: e.to_string(),
        })
    }
}

/// Maps cloud recovery records to daily readings
pub struct CloudRecoveryProvider<A> {
    api: A,
    offset: FixedOffset,
    rmssd_to_sdnn_factor: f64,
}

impl<A: CloudRecoveryApi> CloudRecoveryProvider<A> {
    pub fn new(api: A, offset: FixedOffset, rmssd_to_sdnn_factor: f64) -> Self {
        Self {
            api,
            offset,
            rmssd_to_sdnn_factor,
        }
    }

    /// Calendar day a recovery is credited to
    pub fn recovery_day(&self, recovery: &CloudRecovery, cycles: &[CloudCycle]) -> NaiveDate {
        let cycle_end = cycles
            .iter()
            .find(|c| c.id == recovery.cycle_id)
            .and_then(|c| c.end);

        local_day(cycle_end.unwrap_or(recovery.created_at), self.offset)
    }

    fn sleep_for<'a>(recovery: &CloudRecovery, sleeps: &'a [CloudSleep]) -> Option<&'a CloudSleep> {
        match &recovery.sleep_id {
            Some(id) => sleeps.iter().find(|s| &s.id == id),
            None => sleeps
                .iter()
                .filter(|s| !s.nap && s.cycle_id == Some(recovery.cycle_id))
                .max_by_key(|s| s.end - s.start),
        }
    }

    /// Convert a page of records into readings for the days in `range`
    pub fn map_records(&self, records: &CloudRecords, range: DayRange) -> Vec<DailyReading> {
        // Latest recovery per day wins
        let mut by_day: BTreeMap<NaiveDate, &CloudRecovery> = BTreeMap::new();
        for recovery in &records.recoveries {
            let day = self.recovery_day(recovery, &records.cycles);
            if !range.contains(day) {
                continue;
            }
            match by_day.get(&day) {
                Some(existing) if existing.created_at >= recovery.created_at => {}
                _ => {
                    by_day.insert(day, recovery);
                }
            }
        }

        by_day
            .into_iter()
            .map(|(day, recovery)| {
                let mut reading = DailyReading::new(day);

                if let Some(score) = &recovery.score {
                    reading.hrv_sdnn_ms = score
                        .hrv_rmssd_milli
                        .filter(|v| v.is_finite() && *v > 0.0)
                        .map(|rmssd| sdnn_from_rmssd(rmssd, self.rmssd_to_sdnn_factor));
                    reading.resting_hr_bpm = score.resting_heart_rate.filter(|v| v.is_finite());
                    reading.wrist_temp_c = score.skin_temp_celsius.filter(|v| v.is_finite());
                }

                let summary = Self::sleep_for(recovery, &records.sleeps)
                    .and_then(|s| s.score.as_ref())
                    .and_then(|s| s.stage_summary.as_ref());
                if let Some(summary) = summary {
                    reading.sleep_hours = Some(summary.asleep_hours());
                    reading.sleep_quality = summary.quality();
                }

                reading.sources = MetricSources::uniform(SourceKind::CloudEstimate, &reading);
                reading
            })
            .collect()
    }
}

#[async_trait]
impl<A: CloudRecoveryApi> PhysiologicalDataProvider for CloudRecoveryProvider<A> {
    fn name(&self) -> &str {
        "cloud recovery"
    }

    async fn fetch_daily(&self, range: DayRange) -> Result<Vec<DailyReading>, ProviderError> {
        let records = self.api.fetch_records(range).await?;

        let orphans = records
            .recoveries
            .iter()
            .filter(|r| !records.cycles.iter().any(|c| c.id == r.cycle_id))
            .count();
        if orphans > 0 {
            warn!(orphans, "Recoveries without a known cycle, using creation time");
        }

        let readings = self.map_records(&records, range);
        debug!(%range, days = readings.len(), "Mapped cloud recovery records");
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn records() -> CloudRecords {
        CloudRecords {
            cycles: vec![CloudCycle {
                id: 7,
                start: utc(9, 7, 0),
                end: Some(utc(10, 6, 45)),
            }],
            sleeps: vec![
                CloudSleep {
                    id: "s-nap".to_string(),
                    cycle_id: Some(7),
                    start: utc(9, 14, 0),
                    end: utc(9, 14, 30),
                    nap: true,
                    score: None,
                },
                CloudSleep {
                    id: "s-night".to_string(),
                    cycle_id: Some(7),
                    start: utc(9, 22, 30),
                    end: utc(10, 6, 30),
                    nap: false,
                    score: Some(CloudSleepScore {
                        stage_summary: Some(StageSummary {
                            // 8 h in bed, 30 min awake
                            total_in_bed_time_milli: 28_800_000,
                            total_awake_time_milli: 1_800_000,
                            total_light_sleep_time_milli: 13_500_000,
                            total_slow_wave_sleep_time_milli: 5_400_000,
                            total_rem_sleep_time_milli: 8_100_000,
                        }),
                    }),
                },
            ],
            recoveries: vec![CloudRecovery {
                cycle_id: 7,
                sleep_id: None,
                created_at: utc(10, 7, 0),
                score: Some(CloudRecoveryScore {
                    hrv_rmssd_milli: Some(40.0),
                    resting_heart_rate: Some(52.0),
                    skin_temp_celsius: Some(33.9),
                }),
            }],
        }
    }

    fn provider() -> CloudRecoveryProvider<FileCloudApi> {
        CloudRecoveryProvider::new(
            FileCloudApi::new("unused.json"),
            FixedOffset::east_opt(0).unwrap(),
            1.5,
        )
    }

    #[test]
    fn test_maps_recovery_to_cycle_end_day() {
        let readings = provider().map_records(&records(), DayRange::trailing(day(12), 7));

        assert_eq!(readings.len(), 1);
        let reading = &readings[0];
        assert_eq!(reading.day, day(10));
        assert_eq!(reading.hrv_sdnn_ms, Some(60.0));
        assert_eq!(reading.resting_hr_bpm, Some(52.0));
        assert_eq!(reading.wrist_temp_c, Some(33.9));
        assert_eq!(reading.wrist_temp_deviation_c, None);
        assert!((reading.sleep_hours.unwrap() - 7.5).abs() < 1e-9);

        // Deep 90 / REM 135 / light 225 minutes of 450 asleep
        let quality = reading.sleep_quality.unwrap();
        assert!((quality.deep_pct - 20.0).abs() < 1e-9);
        assert!((quality.rem_pct - 30.0).abs() < 1e-9);

        assert_eq!(reading.sources.hrv, Some(SourceKind::CloudEstimate));
        assert_eq!(reading.sources.sleep, Some(SourceKind::CloudEstimate));
    }

    #[test]
    fn test_day_follows_local_offset() {
        let mut records = records();
        records.cycles[0].end = Some(utc(10, 23, 30));

        let plus_two = CloudRecoveryProvider::new(
            FileCloudApi::new("unused.json"),
            FixedOffset::east_opt(2 * 3600).unwrap(),
            1.5,
        );
        let readings = plus_two.map_records(&records, DayRange::trailing(day(12), 7));
        assert_eq!(readings[0].day, day(11));
    }

    #[test]
    fn test_unknown_cycle_uses_creation_time() {
        let mut records = records();
        records.cycles.clear();
        records.recoveries[0].created_at = utc(11, 8, 0);

        let readings = provider().map_records(&records, DayRange::trailing(day(12), 7));
        assert_eq!(readings[0].day, day(11));
    }

    #[test]
    fn test_out_of_range_days_are_dropped() {
        let readings = provider().map_records(&records(), DayRange::trailing(day(9), 3));
        assert!(readings.is_empty());
    }

    #[test]
    fn test_unscored_recovery_keeps_sleep() {
        let mut records = records();
        records.recoveries[0].score = None;

        let readings = provider().map_records(&records, DayRange::trailing(day(12), 7));
        assert_eq!(readings[0].hrv_sdnn_ms, None);
        assert!(readings[0].sleep_hours.is_some());
        assert_eq!(readings[0].sources.hrv, None);
    }

    #[tokio::test]
    async fn test_fetch_from_export_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("export.json");
        std::fs::write(&path, serde_json::to_string(&records()).unwrap()).unwrap();

        let provider = CloudRecoveryProvider::new(
            FileCloudApi::new(&path),
            FixedOffset::east_opt(0).unwrap(),
            1.5,
        );
        let readings = provider
            .fetch_daily(DayRange::trailing(day(12), 7))
            .await
            .unwrap();
        assert_eq!(readings.len(), 1);
    }
}
