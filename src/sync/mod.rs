//! Incremental synchronization
//!
//! The orchestrator pulls daily readings from a provider, upserts them into
//! the store and recomputes the affected scores in chronological order.
//!
//! # Lifecycle
//!
//! 1. **Initial backfill** (no completion flag persisted): the last 30 days
//!    are fetched and every returned day is stored and scored.
//! 2. **Incremental sync**: days from the watermark (inclusive) through
//!    today are re-fetched; only the days returned are rescored.
//!
//! The checkpoint (watermark + backfill flag) is written only after a run
//! completes, and the watermark never moves backwards. A failed fetch aborts
//! before any write, so re-running is always safe.

pub mod events;
pub mod state;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::baseline::{BaselineMetric, BaselineTracker};
use crate::database::DailyStore;
use crate::error::{ErrorSeverity, Result, VigorError};
use crate::models::{DailyMetrics, DailyReading, DayRange, VigorScore};
use crate::provider::PhysiologicalDataProvider;
use crate::scoring::VigorScorer;

pub use events::{EventBus, SyncEvent, DEFAULT_EVENT_CAPACITY};
pub use state::{SyncCheckpoint, SyncState, SyncStatus};

/// Sync tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Days fetched by the initial backfill, ending today
    pub backfill_days: u32,
    /// Deadline applied by the CLI, in seconds
    pub timeout_secs: u64,
    /// Buffer size of the event channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            backfill_days: 30,
            timeout_secs: 120,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    InitialBackfill,
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::InitialBackfill => write!(f, "initial backfill"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub mode: SyncMode,
    pub range: DayRange,
    /// Days the provider returned inside the range
    pub days_fetched: usize,
    /// Days written to the store
    pub days_upserted: usize,
    /// Written days whose values did not change
    pub days_unchanged: usize,
    /// Days the provider returned without any metric
    pub days_skipped: usize,
    pub scores_computed: usize,
    pub watermark: Option<NaiveDate>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives provider → store → scorer
pub struct SyncOrchestrator {
    provider: Arc<dyn PhysiologicalDataProvider>,
    store: Arc<dyn DailyStore>,
    tracker: BaselineTracker,
    scorer: VigorScorer,
    config: SyncConfig,
    status: watch::Sender<SyncStatus>,
    events: EventBus,
    run_guard: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        provider: Arc<dyn PhysiologicalDataProvider>,
        store: Arc<dyn DailyStore>,
        tracker: BaselineTracker,
        scorer: VigorScorer,
        config: SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        let events = EventBus::new(config.event_capacity);

        Self {
            provider,
            store,
            tracker,
            scorer,
            config,
            status,
            events,
            run_guard: Mutex::new(()),
        }
    }

    /// Live state and progress
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Score and run notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn store(&self) -> &Arc<dyn DailyStore> {
        &self.store
    }

    /// Mode and day range the next run would use
    pub fn plan(&self, checkpoint: &SyncCheckpoint, today: NaiveDate) -> (SyncMode, DayRange) {
        if !checkpoint.backfill_completed {
            return (
                SyncMode::InitialBackfill,
                DayRange::trailing(today, self.config.backfill_days),
            );
        }

        let start = checkpoint.watermark.map_or(today, |w| w.min(today));
        (SyncMode::Incremental, DayRange { start, end: today })
    }

    /// Recompute and store the score for one day from stored metrics
    ///
    /// Returns `None` when the day has no metrics record.
    pub fn recompute_score(&self, day: NaiveDate) -> Result<Option<VigorScore>> {
        let Some(metrics) = self.store.get_metrics(day)? else {
            return Ok(None);
        };

        let baseline = self.tracker.baselines(self.store.as_ref(), day)?;
        let score = self.scorer.score(&metrics, &baseline);
        self.store.upsert_score(&score)?;

        debug!(%day, composite = score.composite, missing = ?score.missing_metrics, "Scored day");
        Ok(Some(score))
    }

    /// Run one backfill or incremental cycle, whichever is due
    pub async fn sync(&self, today: NaiveDate) -> Result<SyncReport> {
        self.sync_run(Uuid::new_v4(), today).await
    }

    async fn sync_run(&self, run_id: Uuid, today: NaiveDate) -> Result<SyncReport> {
        let _guard = self.run_guard.lock().await;
        let span = info_span!("sync", %run_id);

        match self.run(run_id, today).instrument(span).await {
            Ok(report) => {
                self.status.send_replace(SyncStatus {
                    state: SyncState::Idle,
                    progress: 1.0,
                    current_day: None,
                    run_id: Some(run_id),
                });
                self.events.publish(SyncEvent::Completed {
                    run_id,
                    days_synced: report.days_upserted,
                    watermark: report.watermark,
                });
                Ok(report)
            }
            Err(err) => {
                self.mark_failed(run_id, &err);
                Err(err)
            }
        }
    }

    /// [`sync`](Self::sync) bounded by a deadline
    ///
    /// Store writes are synchronous, so an expired deadline lands between
    /// days and never leaves a day half written. Time spent waiting for a
    /// run already in progress counts against the deadline.
    pub async fn sync_with_timeout(&self, today: NaiveDate, timeout: Duration) -> Result<SyncReport> {
        let run_id = Uuid::new_v4();

        match tokio::time::timeout(timeout, self.sync_run(run_id, today)).await {
            Ok(result) => result,
            Err(_) => {
                let err = VigorError::Timeout {
                    millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                // The status belongs to whichever run holds the guard
                let started = self.status.borrow().run_id == Some(run_id);
                if started {
                    self.mark_failed(run_id, &err);
                } else {
                    warn!(%run_id, error = %err, "Gave up waiting for the running sync");
                    self.publish_failure(run_id, &err);
                }
                Err(err)
            }
        }
    }

    fn mark_failed(&self, run_id: Uuid, err: &VigorError) {
        match err.severity() {
            ErrorSeverity::Critical | ErrorSeverity::Error => {
                error!(%run_id, error = %err, "Sync failed")
            }
            _ => warn!(%run_id, error = %err, retryable = err.is_retryable(), "Sync failed"),
        }

        self.status.send_modify(|status| {
            status.state = SyncState::Failed {
                reason: err.to_string(),
            };
            status.current_day = None;
            status.run_id = Some(run_id);
        });
        self.publish_failure(run_id, err);
    }

    fn publish_failure(&self, run_id: Uuid, err: &VigorError) {
        self.events.publish(SyncEvent::Failed {
            run_id,
            error: err.to_string(),
            retryable: err.is_retryable(),
        });
    }

    fn publish_progress(
        &self,
        state: &SyncState,
        run_id: Uuid,
        done: usize,
        total: usize,
        day: NaiveDate,
    ) {
        let progress = if total == 0 {
            1.0
        } else {
            (done as f64 / total as f64).min(1.0)
        };

        self.status.send_replace(SyncStatus {
            state: state.clone(),
            progress,
            current_day: Some(day),
            run_id: Some(run_id),
        });
    }

    /// Absolute skin temperature becomes a deviation from its own baseline
    fn derive_temperature_deviation(&self, reading: &mut DailyReading) -> Result<()> {
        if reading.wrist_temp_deviation_c.is_some() {
            return Ok(());
        }
        let Some(absolute) = reading.wrist_temp_c else {
            return Ok(());
        };

        let baseline = self.tracker.baseline(
            self.store.as_ref(),
            BaselineMetric::WristTemperature,
            reading.day,
        )?;
        reading.wrist_temp_deviation_c = baseline.map(|b| absolute - b);
        Ok(())
    }

    async fn run(&self, run_id: Uuid, today: NaiveDate) -> Result<SyncReport> {
        let started_at = Utc::now();
        let checkpoint = self.store.load_checkpoint()?;
        let (mode, range) = self.plan(&checkpoint, today);
        let state = match mode {
            SyncMode::InitialBackfill => SyncState::InitialBackfill,
            SyncMode::Incremental => SyncState::IncrementalSync,
        };

        info!(%mode, %range, provider = self.provider.name(), "Starting sync");
        self.status.send_replace(SyncStatus {
            state: state.clone(),
            progress: 0.0,
            current_day: None,
            run_id: Some(run_id),
        });

        // Nothing is written until the provider has answered for the whole range
        let mut readings: Vec<DailyReading> = self
            .provider
            .fetch_daily(range)
            .await?
            .into_iter()
            .filter(|r| range.contains(r.day))
            .collect();
        readings.sort_by_key(|r| r.day);
        // Keep the last reading when a provider repeats a day
        readings.reverse();
        readings.dedup_by_key(|r| r.day);
        readings.reverse();

        let days_fetched = readings.len();
        let last_returned = readings.last().map(|r| r.day);

        let (mut to_write, skipped): (Vec<_>, Vec<_>) =
            readings.into_iter().partition(|r| !r.is_empty());
        for reading in &skipped {
            debug!(day = %reading.day, "No metrics for day, skipping");
        }

        let total_steps = to_write.len() * 2;
        let mut done = 0;
        let mut days_unchanged = 0;
        let mut written = Vec::with_capacity(to_write.len());

        for reading in to_write.iter_mut() {
            self.derive_temperature_deviation(reading)?;

            let metrics = DailyMetrics::from_reading(reading.clone(), Utc::now());
            if let Some(existing) = self.store.get_metrics(metrics.day)? {
                if existing.same_values(&metrics) {
                    days_unchanged += 1;
                }
            }
            self.store.upsert_metrics(&metrics)?;
            written.push(metrics.day);

            done += 1;
            self.publish_progress(&state, run_id, done, total_steps, metrics.day);
            tokio::task::yield_now().await;
        }

        let mut scores_computed = 0;
        for day in &written {
            if let Some(score) = self.recompute_score(*day)? {
                scores_computed += 1;
                if score.day == today {
                    self.events.publish(SyncEvent::TodayScoreUpdated { score });
                }
            }

            done += 1;
            self.publish_progress(&state, run_id, done, total_steps, *day);
            tokio::task::yield_now().await;
        }

        let candidate = match mode {
            SyncMode::InitialBackfill => Some(last_returned.unwrap_or(range.end)),
            SyncMode::Incremental => last_returned,
        };
        let watermark = match (checkpoint.watermark, candidate) {
            (Some(old), Some(new)) => Some(old.max(new)),
            (old, new) => old.or(new),
        };

        let finished_at = Utc::now();
        self.store.save_checkpoint(&SyncCheckpoint {
            watermark,
            backfill_completed: true,
            last_run_id: Some(run_id),
            last_success_at: Some(finished_at),
        })?;

        info!(
            %mode,
            fetched = days_fetched,
            upserted = written.len(),
            unchanged = days_unchanged,
            skipped = skipped.len(),
            scored = scores_computed,
            watermark = ?watermark,
            "Sync completed"
        );

        Ok(SyncReport {
            run_id,
            mode,
            range,
            days_fetched,
            days_upserted: written.len(),
            days_unchanged,
            days_skipped: skipped.len(),
            scores_computed,
            watermark,
            started_at,
            finished_at,
        })
    }
}
