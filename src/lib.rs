// Library interface for Vigor
// The CLI binary and the integration tests both build on these modules

pub mod baseline;
pub mod config;
pub mod database;
pub mod error;
pub mod extract;
pub mod logging;
pub mod models;
pub mod provider;
pub mod scoring;
pub mod sleep;
pub mod sync;

// Re-export commonly used types for convenience
pub use baseline::{Baseline, BaselineMetric, BaselineTracker};
pub use config::AppConfig;
pub use database::{DailyStore, Database};
pub use error::{Result, VigorError};
pub use extract::{ExtractionConfig, SignalExtractor};
pub use logging::{DiagnosticReport, LogConfig, LogFormat, LogLevel};
pub use models::*;
pub use provider::PhysiologicalDataProvider;
pub use scoring::{ScoreWeights, ScoringConfig, VigorScorer};
pub use sync::{SyncEvent, SyncOrchestrator, SyncReport, SyncState, SyncStatus};
