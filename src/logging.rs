//! Structured logging and failure diagnostics
//!
//! Console output in pretty, JSON or compact form, an optional JSON log
//! file, and a diagnostic report the CLI drops next to the database when a
//! sync fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// `[logging]` section of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// JSON log file; console only when unset
    pub file_path: Option<PathBuf>,
    /// One file per day instead of a single growing file
    pub rotation: bool,
    /// Emit span enter/close events and span fields
    pub include_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            file_path: None,
            rotation: true,
            include_spans: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Level raised by `count` repetitions of `-v`; never lowers `self`
    pub fn raised_by(self, count: u8) -> Self {
        let requested = match count {
            0 => return self,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        };
        self.max(requested)
    }

    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

/// `RUST_LOG` wins over the configured level
pub fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vigor={}", config.level.directive())))
}

/// Install the global subscriber
///
/// Console output goes to stderr so tables and scores on stdout stay clean.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let spans = config.include_spans;
    let console_layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_line_number(true)
            .with_span_events(if spans {
                FmtSpan::ENTER | FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            })
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(spans)
            .with_span_list(spans)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let registry = tracing_subscriber::registry()
        .with(build_filter(config))
        .with(console_layer);

    let Some(file_path) = &config.file_path else {
        registry.try_init()?;
        return Ok(());
    };

    let dir = file_path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let file_layer = if config.rotation {
        let prefix = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("vigor.log");
        fmt::layer()
            .json()
            .with_writer(tracing_appender::rolling::daily(dir, prefix))
            .with_current_span(spans)
            .with_span_list(spans)
            .boxed()
    } else {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        fmt::layer()
            .json()
            .with_writer(file)
            .with_current_span(spans)
            .with_span_list(spans)
            .boxed()
    };

    registry.with(file_layer).try_init()?;
    tracing::debug!(file = %file_path.display(), rotation = config.rotation, "File logging enabled");
    Ok(())
}

/// What went wrong during a failed CLI operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub operation: String,
    pub created_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub errors: Vec<ErrorDetail>,
    /// Run id, provider, day and similar
    pub context: Vec<(String, String)>,
    pub os: String,
    pub arch: String,
    pub vigor_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub error_type: String,
    /// `source()` chain, outermost first
    pub causes: Vec<String>,
}

impl DiagnosticReport {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            created_at: Utc::now(),
            elapsed_ms: 0,
            errors: Vec::new(),
            context: Vec::new(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            vigor_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn set_duration(&mut self, elapsed: Duration) {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn add_error<E: std::error::Error>(&mut self, error: &E) {
        let causes = std::iter::successors(error.source(), |cause| cause.source())
            .map(|cause| cause.to_string())
            .collect();

        self.errors.push(ErrorDetail {
            message: error.to_string(),
            error_type: std::any::type_name::<E>().to_string(),
            causes,
        });
    }

    pub fn add_context(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context.push((key.into(), value.into()));
    }

    /// Write the report as `<dir>/diagnostics/vigor_<operation>_<time>.json`
    pub fn save_in(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let dir = dir.join("diagnostics");
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!(
            "vigor_{}_{}.json",
            self.operation.replace(' ', "_"),
            self.created_at.format("%Y%m%d_%H%M%S")
        ));
        fs::write(&path, serde_json::to_string_pretty(self)?)?;

        tracing::info!(path = %path.display(), "Saved diagnostic report");
        Ok(path)
    }
}
