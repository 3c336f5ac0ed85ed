//! Physiological data providers
//!
//! A provider hands the sync orchestrator one [`DailyReading`] per day it
//! has data for. Three implementations ship with the crate:
//!
//! - [`JsonFileProvider`]: a JSON array of daily readings on disk
//! - [`RawSampleProvider`]: raw interval, heart-rate and temperature streams
//!   from one or more devices, reduced to daily values by the extractor
//! - [`CloudRecoveryProvider`]: cycle/sleep/recovery records from a cloud
//!   recovery service
//!
//! [`FusedProvider`] combines several of them by source precedence.

pub mod cloud;
pub mod file;
pub mod fused;
pub mod raw;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::ProviderError;
use crate::extract::RawDayBundle;
use crate::models::{DailyReading, DayRange, SourceKind};

pub use cloud::{CloudRecords, CloudRecoveryApi, CloudRecoveryProvider, FileCloudApi};
pub use file::JsonFileProvider;
pub use fused::FusedProvider;
pub use raw::{RawFileSource, RawSampleProvider};

/// Source of per-day physiological metrics
#[async_trait]
pub trait PhysiologicalDataProvider: Send + Sync {
    /// Human-readable name used in logs and error messages
    fn name(&self) -> &str;

    /// Readings for the days in `range` that have any data, in any order
    async fn fetch_daily(&self, range: DayRange) -> Result<Vec<DailyReading>, ProviderError>;
}

/// Raw sample stream from a single device
#[async_trait]
pub trait RawSampleSource: Send + Sync {
    /// Precedence class of the device
    fn kind(&self) -> SourceKind;

    fn name(&self) -> &str;

    /// Everything the device captured for `day`; an empty bundle when nothing
    async fn fetch_raw(&self, day: NaiveDate) -> Result<RawDayBundle, ProviderError>;
}
