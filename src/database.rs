use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::models::{DailyMetrics, RawInputs, SubScores, VigorScore};
use crate::sync::SyncCheckpoint;

/// Persistence contract for per-day metrics, scores and sync progress
///
/// Only the sync orchestrator writes. Reads only need to be consistent for
/// a single day.
pub trait DailyStore: Send + Sync {
    /// Insert the day, or overwrite every field of the existing record
    fn upsert_metrics(&self, metrics: &DailyMetrics) -> Result<(), DatabaseError>;

    fn get_metrics(&self, day: NaiveDate) -> Result<Option<DailyMetrics>, DatabaseError>;

    /// Records in `[start, end]`, oldest first
    fn get_metrics_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyMetrics>, DatabaseError>;

    fn upsert_score(&self, score: &VigorScore) -> Result<(), DatabaseError>;

    fn get_score(&self, day: NaiveDate) -> Result<Option<VigorScore>, DatabaseError>;

    /// Scores in `[start, end]`, oldest first
    fn get_score_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<VigorScore>, DatabaseError>;

    /// Score for the most recent day that has one
    fn latest_score(&self) -> Result<Option<VigorScore>, DatabaseError>;

    fn load_checkpoint(&self) -> Result<SyncCheckpoint, DatabaseError>;

    fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<(), DatabaseError>;

    fn stats(&self) -> Result<StoreStats, DatabaseError>;
}

/// Record counts and covered span
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub metrics_days: usize,
    pub score_days: usize,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
}

/// SQLite-backed store
pub struct Database {
    conn: Mutex<Connection>,
}

const METRICS_COLUMNS: &str = "day, sleep_hours, sleep_quality, hrv_sdnn_ms, resting_hr_bpm, \
     wrist_temp_c, wrist_temp_deviation_c, sources, last_updated";

const SCORE_COLUMNS: &str = "day, composite, sleep_score, hrv_score, rhr_score, temperature_score, \
     raw_inputs, missing_metrics";

impl Database {
    /// Create or open a database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(db_path.as_ref())?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema(true)?;

        debug!(path = %db_path.as_ref().display(), "Opened store");
        Ok(db)
    }

    /// Throwaway store for tests and dry runs
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.init_schema(false)?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Initialize database schema with tables and indexes
    fn init_schema(&self, on_disk: bool) -> Result<(), DatabaseError> {
        let conn = self.lock()?;

        if on_disk {
            // journal_mode returns the resulting mode as a row
            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
            conn.execute("PRAGMA synchronous=NORMAL", [])?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS daily_metrics (
                day TEXT PRIMARY KEY,
                sleep_hours REAL,
                sleep_quality TEXT,
                hrv_sdnn_ms REAL,
                resting_hr_bpm REAL,
                wrist_temp_c REAL,
                wrist_temp_deviation_c REAL,
                sources TEXT NOT NULL,
                last_updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vigor_scores (
                day TEXT PRIMARY KEY,
                composite REAL NOT NULL,
                sleep_score REAL,
                hrv_score REAL,
                rhr_score REAL,
                temperature_score REAL,
                raw_inputs TEXT NOT NULL,
                missing_metrics TEXT NOT NULL,
                computed_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Single-row table holding the sync checkpoint
            CREATE TABLE IF NOT EXISTS sync_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                watermark TEXT,
                backfill_completed INTEGER NOT NULL DEFAULT 0,
                last_run_id TEXT,
                last_success_at TEXT
            );
            "#,
        )?;

        Ok(())
    }

    fn metrics_from_row(row: &Row) -> rusqlite::Result<DailyMetrics> {
        Ok(DailyMetrics {
            day: row.get(0)?,
            sleep_hours: row.get(1)?,
            sleep_quality: json_column_opt(row, 2)?,
            hrv_sdnn_ms: row.get(3)?,
            resting_hr_bpm: row.get(4)?,
            wrist_temp_c: row.get(5)?,
            wrist_temp_deviation_c: row.get(6)?,
            sources: json_column(row, 7)?,
            last_updated: row.get(8)?,
        })
    }

    fn score_from_row(row: &Row) -> rusqlite::Result<VigorScore> {
        Ok(VigorScore {
            day: row.get(0)?,
            composite: row.get(1)?,
            sub_scores: SubScores {
                sleep: row.get(2)?,
                hrv: row.get(3)?,
                rhr: row.get(4)?,
                temperature: row.get(5)?,
            },
            raw_inputs: json_column::<RawInputs>(row, 6)?,
            missing_metrics: json_column(row, 7)?,
        })
    }
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column_opt<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

impl DailyStore for Database {
    fn upsert_metrics(&self, metrics: &DailyMetrics) -> Result<(), DatabaseError> {
        let sleep_quality = metrics
            .sleep_quality
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let sources = serde_json::to_string(&metrics.sources)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO daily_metrics (
                day, sleep_hours, sleep_quality, hrv_sdnn_ms, resting_hr_bpm,
                wrist_temp_c, wrist_temp_deviation_c, sources, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(day) DO UPDATE SET
                sleep_hours = excluded.sleep_hours,
                sleep_quality = excluded.sleep_quality,
                hrv_sdnn_ms = excluded.hrv_sdnn_ms,
                resting_hr_bpm = excluded.resting_hr_bpm,
                wrist_temp_c = excluded.wrist_temp_c,
                wrist_temp_deviation_c = excluded.wrist_temp_deviation_c,
                sources = excluded.sources,
                last_updated = excluded.last_updated
            "#,
            params![
                metrics.day,
                metrics.sleep_hours,
                sleep_quality,
                metrics.hrv_sdnn_ms,
                metrics.resting_hr_bpm,
                metrics.wrist_temp_c,
                metrics.wrist_temp_deviation_c,
                sources,
                metrics.last_updated,
            ],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn get_metrics(&self, day: NaiveDate) -> Result<Option<DailyMetrics>, DatabaseError> {
        let conn = self.lock()?;
        let metrics = conn
            .query_row(
                &format!("SELECT {} FROM daily_metrics WHERE day = ?1", METRICS_COLUMNS),
                params![day],
                Self::metrics_from_row,
            )
            .optional()?;

        Ok(metrics)
    }

    fn get_metrics_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyMetrics>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM daily_metrics WHERE day >= ?1 AND day <= ?2 ORDER BY day ASC",
            METRICS_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![start, end], Self::metrics_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn upsert_score(&self, score: &VigorScore) -> Result<(), DatabaseError> {
        let raw_inputs = serde_json::to_string(&score.raw_inputs)?;
        let missing = serde_json::to_string(&score.missing_metrics)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO vigor_scores (
                day, composite, sleep_score, hrv_score, rhr_score, temperature_score,
                raw_inputs, missing_metrics, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, CURRENT_TIMESTAMP)
            ON CONFLICT(day) DO UPDATE SET
                composite = excluded.composite,
                sleep_score = excluded.sleep_score,
                hrv_score = excluded.hrv_score,
                rhr_score = excluded.rhr_score,
                temperature_score = excluded.temperature_score,
                raw_inputs = excluded.raw_inputs,
                missing_metrics = excluded.missing_metrics,
                computed_at = CURRENT_TIMESTAMP
            "#,
            params![
                score.day,
                score.composite,
                score.sub_scores.sleep,
                score.sub_scores.hrv,
                score.sub_scores.rhr,
                score.sub_scores.temperature,
                raw_inputs,
                missing,
            ],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn get_score(&self, day: NaiveDate) -> Result<Option<VigorScore>, DatabaseError> {
        let conn = self.lock()?;
        let score = conn
            .query_row(
                &format!("SELECT {} FROM vigor_scores WHERE day = ?1", SCORE_COLUMNS),
                params![day],
                Self::score_from_row,
            )
            .optional()?;

        Ok(score)
    }

    fn get_score_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<VigorScore>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM vigor_scores WHERE day >= ?1 AND day <= ?2 ORDER BY day ASC",
            SCORE_COLUMNS
        ))?;

        let scores = stmt
            .query_map(params![start, end], Self::score_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(scores)
    }

    fn latest_score(&self) -> Result<Option<VigorScore>, DatabaseError> {
        let conn = self.lock()?;
        let score = conn
            .query_row(
                &format!(
                    "SELECT {} FROM vigor_scores ORDER BY day DESC LIMIT 1",
                    SCORE_COLUMNS
                ),
                [],
                Self::score_from_row,
            )
            .optional()?;

        Ok(score)
    }

    fn load_checkpoint(&self) -> Result<SyncCheckpoint, DatabaseError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT watermark, backfill_completed, last_run_id, last_success_at \
                 FROM sync_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<NaiveDate>>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<DateTime<Utc>>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((watermark, backfill_completed, last_run_id, last_success_at)) = row else {
            return Ok(SyncCheckpoint::default());
        };

        let last_run_id = last_run_id
            .map(|id| {
                Uuid::parse_str(&id)
                    .map_err(|e| DatabaseError::Corrupt(format!("sync_state.last_run_id: {}", e)))
            })
            .transpose()?;

        Ok(SyncCheckpoint {
            watermark,
            backfill_completed,
            last_run_id,
            last_success_at,
        })
    }

    fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<(), DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO sync_state (id, watermark, backfill_completed, last_run_id, last_success_at)
            VALUES (1, ?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                watermark = excluded.watermark,
                backfill_completed = excluded.backfill_completed,
                last_run_id = excluded.last_run_id,
                last_success_at = excluded.last_success_at
            "#,
            params![
                checkpoint.watermark,
                checkpoint.backfill_completed,
                checkpoint.last_run_id.map(|id| id.to_string()),
                checkpoint.last_success_at,
            ],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn stats(&self) -> Result<StoreStats, DatabaseError> {
        let conn = self.lock()?;

        let (metrics_days, first_day, last_day): (i64, Option<NaiveDate>, Option<NaiveDate>) = conn
            .query_row(
                "SELECT COUNT(*), MIN(day), MAX(day) FROM daily_metrics",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        let score_days: i64 =
            conn.query_row("SELECT COUNT(*) FROM vigor_scores", [], |row| row.get(0))?;

        Ok(StoreStats {
            metrics_days: metrics_days as usize,
            score_days: score_days as usize,
            first_day,
            last_day,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricSources, MetricTag, SourceKind};
    use crate::sleep::SleepQuality;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn metrics(d: u32, hrv: f64) -> DailyMetrics {
        DailyMetrics {
            day: day(d),
            sleep_hours: Some(7.5),
            sleep_quality: Some(SleepQuality {
                deep_pct: 20.0,
                rem_pct: 22.5,
                light_pct: 57.5,
                efficiency_pct: 92.0,
            }),
            hrv_sdnn_ms: Some(hrv),
            resting_hr_bpm: Some(54.0),
            wrist_temp_c: None,
            wrist_temp_deviation_c: Some(0.2),
            sources: MetricSources {
                sleep: Some(SourceKind::SleepPeripheral),
                hrv: Some(SourceKind::Wearable),
                resting_hr: Some(SourceKind::Wearable),
                temperature: Some(SourceKind::CloudEstimate),
            },
            last_updated: Utc.with_ymd_and_hms(2024, 3, d, 8, 0, 0).unwrap(),
        }
    }

    fn score(d: u32, composite: f64) -> VigorScore {
        VigorScore {
            day: day(d),
            composite,
            sub_scores: SubScores {
                sleep: Some(100.0),
                hrv: Some(85.0),
                rhr: None,
                temperature: Some(100.0),
            },
            raw_inputs: RawInputs {
                sleep_hours: Some(7.5),
                hrv_sdnn_ms: Some(55.0),
                ..Default::default()
            },
            missing_metrics: BTreeSet::from([MetricTag::Rhr]),
        }
    }

    #[test]
    fn test_metrics_round_trip_through_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("vigor.db");

        {
            let db = Database::new(&db_path).unwrap();
            db.upsert_metrics(&metrics(10, 55.0)).unwrap();
        }

        // Reopen to prove durability
        let db = Database::new(&db_path).unwrap();
        let loaded = db.get_metrics(day(10)).unwrap().unwrap();
        assert_eq!(loaded, metrics(10, 55.0));
        assert!(db.get_metrics(day(11)).unwrap().is_none());
    }

    #[test]
    fn test_upsert_overwrites_all_fields() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_metrics(&metrics(10, 55.0)).unwrap();

        let mut updated = metrics(10, 61.0);
        updated.sleep_hours = None;
        updated.sleep_quality = None;
        updated.last_updated = updated.last_updated + Duration::hours(2);
        db.upsert_metrics(&updated).unwrap();

        let loaded = db.get_metrics(day(10)).unwrap().unwrap();
        assert_eq!(loaded.hrv_sdnn_ms, Some(61.0));
        assert_eq!(loaded.sleep_hours, None);
        assert_eq!(loaded.last_updated, updated.last_updated);
        assert_eq!(db.stats().unwrap().metrics_days, 1);
    }

    #[test]
    fn test_range_is_inclusive_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        for d in [14, 10, 12, 11, 13] {
            db.upsert_metrics(&metrics(d, 50.0 + d as f64)).unwrap();
        }

        let range = db.get_metrics_range(day(11), day(13)).unwrap();
        let days: Vec<_> = range.iter().map(|m| m.day).collect();
        assert_eq!(days, vec![day(11), day(12), day(13)]);
    }

    #[test]
    fn test_scores() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.latest_score().unwrap().is_none());

        db.upsert_score(&score(9, 70.0)).unwrap();
        db.upsert_score(&score(11, 82.5)).unwrap();
        db.upsert_score(&score(10, 64.0)).unwrap();

        assert_eq!(db.get_score(day(9)).unwrap().unwrap(), score(9, 70.0));
        assert_eq!(db.latest_score().unwrap().unwrap().day, day(11));

        db.upsert_score(&score(11, 40.0)).unwrap();
        assert_eq!(db.latest_score().unwrap().unwrap().composite, 40.0);

        let range = db.get_score_range(day(10), day(11)).unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].day, day(10));
    }

    #[test]
    fn test_checkpoint_defaults_and_persistence() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.load_checkpoint().unwrap(), SyncCheckpoint::default());

        let checkpoint = SyncCheckpoint {
            watermark: Some(day(15)),
            backfill_completed: true,
            last_run_id: Some(Uuid::new_v4()),
            last_success_at: Some(Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap()),
        };
        db.save_checkpoint(&checkpoint).unwrap();
        assert_eq!(db.load_checkpoint().unwrap(), checkpoint);

        let advanced = SyncCheckpoint {
            watermark: Some(day(16)),
            ..checkpoint
        };
        db.save_checkpoint(&advanced).unwrap();
        assert_eq!(db.load_checkpoint().unwrap().watermark, Some(day(16)));
    }

    #[test]
    fn test_stats() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.stats().unwrap(), StoreStats::default());

        db.upsert_metrics(&metrics(3, 50.0)).unwrap();
        db.upsert_metrics(&metrics(7, 50.0)).unwrap();
        db.upsert_score(&score(7, 75.0)).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.metrics_days, 2);
        assert_eq!(stats.score_days, 1);
        assert_eq!(stats.first_day, Some(day(3)));
        assert_eq!(stats.last_day, Some(day(7)));
    }
}
