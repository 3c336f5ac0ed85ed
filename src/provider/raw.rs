use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{PhysiologicalDataProvider, RawSampleSource};
use crate::error::ProviderError;
use crate::extract::{RawDayBundle, SignalExtractor, SourceBundle};
use crate::models::{DailyReading, DayRange, SourceKind};

/// Reduces raw sample streams from several devices to daily readings
///
/// Every (day, device) pair is fetched concurrently and all fetches finish
/// before any day is extracted. A single failed fetch fails the whole call.
pub struct RawSampleProvider {
    sources: Vec<Arc<dyn RawSampleSource>>,
    extractor: SignalExtractor,
}

impl RawSampleProvider {
    pub fn new(extractor: SignalExtractor) -> Self {
        Self {
            sources: Vec::new(),
            extractor,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn RawSampleSource>) -> Self {
        self.sources.push(source);
        self
    }
}

#[async_trait]
impl PhysiologicalDataProvider for RawSampleProvider {
    fn name(&self) -> &str {
        "raw samples"
    }

    #[instrument(skip(self))]
    async fn fetch_daily(&self, range: DayRange) -> Result<Vec<DailyReading>, ProviderError> {
        let fetches = range.days().flat_map(|day| {
            self.sources.iter().map(move |source| {
                let source = Arc::clone(source);
                async move {
                    let bundle = source.fetch_raw(day).await;
                    if let Err(err) = &bundle {
                        warn!(source = source.name(), %day, error = %err, "Raw sample fetch failed");
                    }
                    (day, source.kind(), bundle)
                }
            })
        });

        let mut by_day: BTreeMap<NaiveDate, Vec<SourceBundle>> = BTreeMap::new();
        for (day, kind, bundle) in join_all(fetches).await {
            by_day
                .entry(day)
                .or_default()
                .push(SourceBundle { source: kind, bundle: bundle? });
        }

        let readings = by_day
            .into_iter()
            .map(|(day, bundles)| self.extractor.extract_day(day, &bundles).reading)
            .filter(|reading| !reading.is_empty())
            .collect::<Vec<_>>();

        debug!(
            %range,
            sources = self.sources.len(),
            days = readings.len(),
            "Extracted raw sample days"
        );
        Ok(readings)
    }
}

/// Raw bundles stored as `<dir>/<YYYY-MM-DD>.json`
///
/// A missing file means the device recorded nothing that day.
#[derive(Debug, Clone)]
pub struct RawFileSource {
    dir: PathBuf,
    kind: SourceKind,
    name: String,
}

impl RawFileSource {
    pub fn new<P: AsRef<Path>>(dir: P, kind: SourceKind) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let name = format!("{} ({})", kind, dir.display());
        Self { dir, kind, name }
    }

    pub fn day_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", day.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl RawSampleSource for RawFileSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_raw(&self, day: NaiveDate) -> Result<RawDayBundle, ProviderError> {
        let content = match tokio::fs::read_to_string(self.day_path(day)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RawDayBundle::default())
            }
            Err(e) => {
                return Err(ProviderError::Fetch {
                    provider: self.name.clone(),
                    reason: e.to_string(),
                })
            }
        };

        serde_json::from_str(&content).map_err(|e| ProviderError::Parse {
            provider: self.name.clone(),
            reason: format!("{}: {}", day, e),
        })
    }
}
