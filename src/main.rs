use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

use vigor::baseline::BaselineMetric;
use vigor::config::{AppConfig, ProviderSettings};
use vigor::database::{DailyStore, Database};
use vigor::logging::{init_logging, DiagnosticReport};
use vigor::models::{local_day, ReadinessBand, SourceKind, VigorScore};
use vigor::provider::PhysiologicalDataProvider;
use vigor::scoring::VigorScorer;
use vigor::sync::{SyncEvent, SyncOrchestrator, SyncState};

/// Vigor - Recovery Readiness CLI
///
/// Syncs daily sleep, HRV, resting heart rate and skin temperature from a
/// provider and computes a 0-100 recovery score against personal baselines.
#[derive(Parser)]
#[command(name = "vigor")]
#[command(version)]
#[command(about = "Recovery readiness scoring CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new data and rescore the affected days
    Sync {
        /// Daily readings JSON file (overrides the configured provider)
        #[arg(short, long, conflicts_with = "cloud")]
        file: Option<PathBuf>,

        /// Cloud recovery export JSON (overrides the configured provider)
        #[arg(long)]
        cloud: Option<PathBuf>,

        /// Treat this day as today (YYYY-MM-DD)
        #[arg(long)]
        today: Option<NaiveDate>,

        /// Deadline in seconds (default from config)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Recompute and print the score for one day
    Score {
        /// Day to score (YYYY-MM-DD, default today)
        #[arg(short, long)]
        day: Option<NaiveDate>,
    },

    /// Show recent scores as a table
    Show {
        /// Number of days ending today
        #[arg(short = 'n', long, default_value = "14")]
        days: u32,

        /// Last day shown (YYYY-MM-DD, default today)
        #[arg(long)]
        until: Option<NaiveDate>,
    },

    /// Print the rolling baselines in effect for a day
    Baseline {
        /// Day (YYYY-MM-DD, default today)
        #[arg(short, long)]
        day: Option<NaiveDate>,
    },

    /// Show sync checkpoint and store statistics
    Status,

    /// Manage the configuration file
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Print the effective configuration
        #[arg(short, long)]
        list: bool,
    },
}

#[derive(Tabled)]
struct ScoreRow {
    #[tabled(rename = "Day")]
    day: String,
    #[tabled(rename = "Vigor")]
    composite: String,
    #[tabled(rename = "Band")]
    band: String,
    #[tabled(rename = "Sleep")]
    sleep: String,
    #[tabled(rename = "HRV")]
    hrv: String,
    #[tabled(rename = "RHR")]
    rhr: String,
    #[tabled(rename = "Temp")]
    temperature: String,
    #[tabled(rename = "Missing")]
    missing: String,
}

impl From<&VigorScore> for ScoreRow {
    fn from(score: &VigorScore) -> Self {
        let cell = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.0}", v));
        let missing = score
            .missing_metrics
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        ScoreRow {
            day: score.day.to_string(),
            composite: format!("{:.1}", score.composite),
            band: score.band().to_string(),
            sleep: cell(score.sub_scores.sleep),
            hrv: cell(score.sub_scores.hrv),
            rhr: cell(score.sub_scores.rhr),
            temperature: cell(score.sub_scores.temperature),
            missing,
        }
    }
}

fn colored_band(band: ReadinessBand) -> ColoredString {
    let label = band.to_string();
    match band {
        ReadinessBand::Primed => label.green().bold(),
        ReadinessBand::Ready => label.green(),
        ReadinessBand::Moderate => label.yellow(),
        ReadinessBand::Low => label.red().bold(),
    }
}

fn print_score(score: &VigorScore) {
    let band = score.band();
    println!(
        "{} {}  {:.1}  {}",
        "Vigor".bold(),
        score.day,
        score.composite,
        colored_band(band)
    );
    println!("  {} - {}", band.description(), band.recommendation().dimmed());

    let sub = &score.sub_scores;
    for (label, value) in [
        ("Sleep", sub.sleep),
        ("HRV", sub.hrv),
        ("Resting HR", sub.rhr),
        ("Temperature", sub.temperature),
    ] {
        match value {
            Some(v) => println!("  {:<12} {:>5.1}", label, v),
            None => println!("  {:<12} {:>5}", label, "-".dimmed()),
        }
    }
}

fn open_store(config: &AppConfig) -> Result<Arc<Database>> {
    std::fs::create_dir_all(&config.settings.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.settings.data_dir.display()
        )
    })?;

    let path = config.database_path();
    let db = Database::new(&path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    Ok(Arc::new(db))
}

fn build_orchestrator(
    config: &AppConfig,
    provider: Arc<dyn PhysiologicalDataProvider>,
) -> Result<SyncOrchestrator> {
    let store = open_store(config)?;
    let scorer = VigorScorer::new(config.scoring)?;

    Ok(SyncOrchestrator::new(
        provider,
        store,
        config.baseline_tracker(),
        scorer,
        config.sync.clone(),
    ))
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load_or_default(),
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    // Verbosity flags can only make logging louder
    config.logging.level = config.logging.level.raised_by(cli.verbose);
    init_logging(&config.logging)?;

    let today = local_day(Utc::now(), config.extraction.utc_offset());

    match cli.command {
        Commands::Sync {
            file,
            cloud,
            today: today_override,
            timeout,
        } => {
            let provider_settings = match (file, cloud) {
                (Some(path), _) => ProviderSettings::JsonFile {
                    path,
                    source: SourceKind::Wearable,
                },
                (None, Some(path)) => ProviderSettings::CloudExport { path },
                (None, None) => config.provider.clone(),
            };
            let timeout =
                std::time::Duration::from_secs(timeout.unwrap_or(config.sync.timeout_secs));

            run_sync(
                &config,
                &provider_settings,
                today_override.unwrap_or(today),
                timeout,
            )
            .await?;
        }

        Commands::Score { day } => {
            let day = day.unwrap_or(today);
            let orchestrator =
                build_orchestrator(&config, config.provider.build(&config.extraction))?;

            match orchestrator.recompute_score(day)? {
                Some(score) => print_score(&score),
                None => println!("{}", format!("No metrics stored for {}", day).yellow()),
            }
        }

        Commands::Show { days, until } => {
            let end = until.unwrap_or(today);
            let start = end - Duration::days(i64::from(days.max(1)) - 1);
            let store = open_store(&config)?;
            let scores = store.get_score_range(start, end)?;

            if scores.is_empty() {
                println!("{}", format!("No scores between {} and {}", start, end).yellow());
            } else {
                let rows: Vec<ScoreRow> = scores.iter().map(ScoreRow::from).collect();
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
        }

        Commands::Baseline { day } => {
            let day = day.unwrap_or(today);
            let store = open_store(&config)?;
            let tracker = config.baseline_tracker();
            let baseline = tracker.baselines(store.as_ref(), day)?;
            let (start, end) = tracker.window(day);

            println!(
                "{} for {} ({} to {})",
                "Baselines".bold(),
                day,
                start,
                end
            );
            for metric in BaselineMetric::ALL {
                match baseline.get(metric) {
                    Some(v) => println!("  {:<18} {:>7.2}", metric.to_string(), v),
                    None => println!("  {:<18} {:>7}", metric.to_string(), "-".dimmed()),
                }
            }
        }

        Commands::Status => {
            let store = open_store(&config)?;
            let checkpoint = store.load_checkpoint()?;
            let stats = store.stats()?;

            println!("{}", "Sync".bold());
            println!("  Provider:        {}", config.provider.describe());
            println!(
                "  Backfill:        {}",
                if checkpoint.backfill_completed {
                    "completed".green()
                } else {
                    "pending".yellow()
                }
            );
            println!(
                "  Watermark:       {}",
                checkpoint
                    .watermark
                    .map_or_else(|| "-".to_string(), |d| d.to_string())
            );
            println!(
                "  Last success:    {}",
                checkpoint
                    .last_success_at
                    .map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
            );

            println!("{}", "Store".bold());
            println!("  Database:        {}", config.database_path().display());
            println!("  Days stored:     {}", stats.metrics_days);
            println!("  Days scored:     {}", stats.score_days);
            if let (Some(first), Some(last)) = (stats.first_day, stats.last_day) {
                println!("  Span:            {} to {}", first, last);
            }
            if let Some(latest) = store.latest_score()? {
                println!(
                    "  Latest score:    {} {:.1} {}",
                    latest.day,
                    latest.composite,
                    colored_band(latest.band())
                );
            }
        }

        Commands::Config { init, list } => {
            if init {
                let path = AppConfig::save_default()?;
                println!(
                    "{}",
                    format!("✓ Wrote default configuration to {}", path.display()).green()
                );
            }
            if list || !init {
                let content = toml::to_string_pretty(&config)
                    .context("Failed to serialize configuration")?;
                println!("{}", content);
            }
        }
    }

    Ok(())
}

async fn run_sync(
    config: &AppConfig,
    provider_settings: &ProviderSettings,
    today: NaiveDate,
    timeout: std::time::Duration,
) -> Result<()> {
    let provider = provider_settings.build(&config.extraction);
    let orchestrator = build_orchestrator(config, provider)?;

    let progress = ProgressBar::new(100);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let mut status = orchestrator.subscribe_status();
    let mut events = orchestrator.subscribe_events();
    let bar = progress.clone();
    let watcher = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if let SyncState::InitialBackfill | SyncState::IncrementalSync = current.state {
                bar.set_position((current.progress * 100.0).round() as u64);
                if let Some(day) = current.current_day {
                    bar.set_message(format!("{} {}", current.state, day));
                }
            }
        }
    });

    let started = std::time::Instant::now();
    let result = orchestrator.sync_with_timeout(today, timeout).await;
    watcher.abort();
    progress.finish_and_clear();

    match result {
        Ok(report) => {
            println!(
                "{}",
                format!(
                    "✓ {} sync {}: {} day(s) stored, {} scored",
                    report.mode, report.range, report.days_upserted, report.scores_computed
                )
                .green()
            );
            if report.days_skipped > 0 {
                println!("  {} day(s) had no data", report.days_skipped);
            }

            while let Ok(event) = events.try_recv() {
                if let SyncEvent::TodayScoreUpdated { score } = event {
                    println!();
                    print_score(&score);
                }
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("{} {}", "✗".red().bold(), err.user_message().red());

            let mut report = DiagnosticReport::new("sync");
            report.set_duration(started.elapsed());
            report.add_error(&err);
            report.add_context("today", today.to_string());
            report.add_context("provider", provider_settings.describe());
            report.add_context("retryable", err.is_retryable().to_string());
            if let Ok(path) = report.save_in(&config.settings.data_dir) {
                eprintln!("  Diagnostic report: {}", path.display());
            }

            Err(err.into())
        }
    }
}
