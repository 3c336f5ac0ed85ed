use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::baseline::{BaselineTracker, DEFAULT_BASELINE_WINDOW};
use crate::extract::{ExtractionConfig, SignalExtractor};
use crate::logging::LogConfig;
use crate::models::SourceKind;
use crate::provider::{
    CloudRecoveryProvider, FileCloudApi, FusedProvider, JsonFileProvider,
    PhysiologicalDataProvider, RawFileSource, RawSampleProvider,
};
use crate::scoring::ScoringConfig;
use crate::sync::SyncConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application metadata
    pub metadata: ConfigMetadata,

    /// General application settings
    pub settings: AppSettings,

    /// Where daily readings come from
    pub provider: ProviderSettings,

    /// Signal extraction thresholds
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Composite weights and sleep method
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Rolling baseline settings
    #[serde(default)]
    pub baseline: BaselineSettings,

    /// Sync tuning
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging setup
    #[serde(default)]
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Data directory path
    pub data_dir: PathBuf,

    /// SQLite file name, relative to `data_dir`
    pub database_file: String,
}

/// Provider selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderSettings {
    /// JSON array of daily readings
    JsonFile { path: PathBuf, source: SourceKind },
    /// Cloud recovery export with cycles, sleeps and recoveries
    CloudExport { path: PathBuf },
    /// Per-device directories of raw day bundles
    RawFiles { sources: Vec<RawSourceSettings> },
    /// Several providers merged metric by metric on source precedence
    Fused { providers: Vec<ProviderSettings> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSourceSettings {
    pub dir: PathBuf,
    pub source: SourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineSettings {
    /// Days preceding the scored day that feed the baseline
    pub window_days: u32,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_BASELINE_WINDOW,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let settings = AppSettings::default();
        let provider = ProviderSettings::JsonFile {
            path: settings.data_dir.join("daily.json"),
            source: SourceKind::Wearable,
        };

        Self {
            metadata: ConfigMetadata::default(),
            settings,
            provider,
            extraction: ExtractionConfig::default(),
            scoring: ScoringConfig::default(),
            baseline: BaselineSettings::default(),
            sync: SyncConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: "vigor.db".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vigor")
}

impl ProviderSettings {
    /// Instantiate the configured provider
    pub fn build(&self, extraction: &ExtractionConfig) -> Arc<dyn PhysiologicalDataProvider> {
        match self {
            ProviderSettings::JsonFile { path, source } => {
                Arc::new(JsonFileProvider::new(path, *source))
            }
            ProviderSettings::CloudExport { path } => Arc::new(CloudRecoveryProvider::new(
                FileCloudApi::new(path),
                extraction.utc_offset(),
                extraction.hrv.rmssd_to_sdnn_factor,
            )),
            ProviderSettings::RawFiles { sources } => {
                let extractor = SignalExtractor::new(extraction.clone());
                let provider = sources.iter().fold(
                    RawSampleProvider::new(extractor),
                    |provider, s| provider.with_source(Arc::new(RawFileSource::new(&s.dir, s.source))),
                );
                Arc::new(provider)
            }
            ProviderSettings::Fused { providers } => Arc::new(FusedProvider::new(
                providers.iter().map(|p| p.build(extraction)).collect(),
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ProviderSettings::RawFiles { sources } if sources.is_empty() => {
                anyhow::bail!("provider.sources is empty")
            }
            ProviderSettings::Fused { providers } => {
                if providers.is_empty() {
                    anyhow::bail!("provider.providers is empty");
                }
                providers.iter().try_for_each(ProviderSettings::validate)
            }
            _ => Ok(()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ProviderSettings::JsonFile { path, source } => {
                format!("daily JSON {} ({})", path.display(), source)
            }
            ProviderSettings::CloudExport { path } => format!("cloud export {}", path.display()),
            ProviderSettings::RawFiles { sources } => format!("{} raw sample source(s)", sources.len()),
            ProviderSettings::Fused { providers } => {
                let parts: Vec<String> = providers.iter().map(|p| p.describe()).collect();
                format!("fused: {}", parts.join(" + "))
            }
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();

        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        if config_path.exists() {
            match Self::load_from_file(&config_path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        path = %config_path.display(),
                        error = %e,
                        "Failed to load config, using defaults"
                    );
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// Write the default configuration to the default path
    pub fn save_default() -> Result<PathBuf> {
        let path = Self::default_config_path();
        let mut config = Self::default();
        config.save_to_file(&path)?;
        Ok(path)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.scoring
            .weights
            .validate()
            .map_err(|e| anyhow::anyhow!("scoring.weights: {}", e))?;
        self.extraction
            .validate()
            .map_err(|e| anyhow::anyhow!("extraction: {}", e))?;

        if self.baseline.window_days == 0 {
            anyhow::bail!("baseline.window_days must be at least 1");
        }
        if self.sync.backfill_days == 0 {
            anyhow::bail!("sync.backfill_days must be at least 1");
        }
        if self.sync.event_capacity == 0 {
            anyhow::bail!("sync.event_capacity must be at least 1");
        }
        self.provider.validate()
    }

    pub fn database_path(&self) -> PathBuf {
        self.settings.data_dir.join(&self.settings.database_file)
    }

    pub fn baseline_tracker(&self) -> BaselineTracker {
        BaselineTracker::new(self.baseline.window_days)
    }
}
