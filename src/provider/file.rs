use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::PhysiologicalDataProvider;
use crate::error::ProviderError;
use crate::models::{DailyReading, DayRange, MetricSources, SourceKind};

/// Reads a JSON array of daily readings
///
/// Readings without per-metric attribution are attributed to `source`.
#[derive(Debug, Clone)]
pub struct JsonFileProvider {
    path: PathBuf,
    source: SourceKind,
    name: String,
}

impl JsonFileProvider {
    pub fn new<P: AsRef<Path>>(path: P, source: SourceKind) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = format!("JSON file {}", path.display());
        Self { path, source, name }
    }

    fn parse(&self, content: &str) -> Result<Vec<DailyReading>, ProviderError> {
        serde_json::from_str(content).map_err(|e| ProviderError::Parse {
            provider: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl PhysiologicalDataProvider for JsonFileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_daily(&self, range: DayRange) -> Result<Vec<DailyReading>, ProviderError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProviderError::Unavailable {
                    provider: self.name.clone(),
                })
            }
            Err(e) => {
                return Err(ProviderError::Fetch {
                    provider: self.name.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let readings: Vec<DailyReading> = self
            .parse(&content)?
            .into_iter()
            .filter(|r| range.contains(r.day))
            .map(|mut r| {
                if r.sources == MetricSources::default() {
                    r.sources = MetricSources::uniform(self.source, &r);
                }
                r
            })
            .collect();

        debug!(provider = %self.name, %range, days = readings.len(), "Fetched daily readings");
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_reads_and_filters_by_range() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("daily.json");
        std::fs::write(
            &path,
            r#"[
                {"day": "2024-03-09", "sleep_hours": 7.0},
                {"day": "2024-03-10", "sleep_hours": 8.0, "hrv_sdnn_ms": 61.5},
                {"day": "2024-03-11", "resting_hr_bpm": 52.0,
                 "sources": {"resting_hr": "sleep_peripheral"}}
            ]"#,
        )
        .unwrap();

        let provider = JsonFileProvider::new(&path, SourceKind::Wearable);
        let range = DayRange::new(day(10), day(11)).unwrap();
        let readings = provider.fetch_daily(range).await.unwrap();

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].hrv_sdnn_ms, Some(61.5));
        assert_eq!(readings[0].sources.hrv, Some(SourceKind::Wearable));
        assert_eq!(readings[0].sources.resting_hr, None);
        // Explicit attribution is kept
        assert_eq!(
            readings[1].sources.resting_hr,
            Some(SourceKind::SleepPeripheral)
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let provider = JsonFileProvider::new("/nonexistent/daily.json", SourceKind::Wearable);
        let range = DayRange::new(day(1), day(2)).unwrap();

        let err = provider.fetch_daily(range).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_malformed_file_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("daily.json");
        std::fs::write(&path, "{not json").unwrap();

        let provider = JsonFileProvider::new(&path, SourceKind::Wearable);
        let range = DayRange::new(day(1), day(2)).unwrap();

        let err = provider.fetch_daily(range).await.unwrap_err();
        assert!(matches!(err, ProviderError::Parse { .. }));
    }
}
