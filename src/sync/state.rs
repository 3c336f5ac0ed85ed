use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Orchestrator state machine
///
/// `Idle -> InitialBackfill -> Idle` on first run, `Idle -> IncrementalSync
/// -> Idle` afterwards. Either phase can end in `Failed`, which the next
/// successful run clears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    InitialBackfill,
    IncrementalSync,
    Failed { reason: String },
}

impl SyncState {
    pub fn is_running(&self) -> bool {
        matches!(self, SyncState::InitialBackfill | SyncState::IncrementalSync)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "Idle"),
            SyncState::InitialBackfill => write!(f, "Initial backfill"),
            SyncState::IncrementalSync => write!(f, "Incremental sync"),
            SyncState::Failed { reason } => write!(f, "Failed: {}", reason),
        }
    }
}

/// Snapshot published on the status channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Fraction of the current run's days done, in `[0, 1]`
    pub progress: f64,
    /// Day being processed, if any
    pub current_day: Option<NaiveDate>,
    pub run_id: Option<Uuid>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            state: SyncState::Idle,
            progress: 0.0,
            current_day: None,
            run_id: None,
        }
    }
}

/// Durable sync progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Most recent day covered by a successful sync
    pub watermark: Option<NaiveDate>,
    pub backfill_completed: bool,
    pub last_run_id: Option<Uuid>,
    pub last_success_at: Option<DateTime<Utc>>,
}
