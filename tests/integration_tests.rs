use chrono::{Duration, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use vigor::baseline::{BaselineMetric, BaselineTracker};
use vigor::database::{DailyStore, Database};
use vigor::models::{DailyMetrics, MetricSources, MetricTag, ReadinessBand, SourceKind};
use vigor::scoring::{ScoreWeights, ScoringConfig, SleepScoringMethod, VigorScorer};
use vigor::sleep::SleepQuality;

/// Integration tests that run the store, baseline tracker and scorer together

fn day(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

fn metrics(day: NaiveDate, hrv: Option<f64>, rhr: Option<f64>) -> DailyMetrics {
    DailyMetrics {
        day,
        sleep_hours: Some(8.0),
        sleep_quality: None,
        hrv_sdnn_ms: hrv,
        resting_hr_bpm: rhr,
        wrist_temp_c: None,
        wrist_temp_deviation_c: None,
        sources: MetricSources {
            sleep: Some(SourceKind::Wearable),
            hrv: hrv.map(|_| SourceKind::Wearable),
            resting_hr: rhr.map(|_| SourceKind::Wearable),
            temperature: None,
        },
        last_updated: Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap(),
    }
}

/// Thirty days before `day` at HRV 60 / RHR 55
fn seed_history(store: &dyn DailyStore, day: NaiveDate) {
    for i in 1..=30 {
        store
            .upsert_metrics(&metrics(day - Duration::days(i), Some(60.0), Some(55.0)))
            .unwrap();
    }
}

fn score_day(store: &dyn DailyStore, scorer: &VigorScorer, day: NaiveDate) -> vigor::VigorScore {
    let tracker = BaselineTracker::default();
    let today = store.get_metrics(day).unwrap().unwrap();
    let baseline = tracker.baselines(store, day).unwrap();
    let score = scorer.score(&today, &baseline);
    store.upsert_score(&score).unwrap();
    score
}

#[test]
fn test_reference_day_end_to_end() {
    let store = Database::open_in_memory().unwrap();
    let today = day(4, 1);
    seed_history(&store, today);

    let mut reading = metrics(today, Some(65.0), Some(50.0));
    reading.wrist_temp_deviation_c = Some(0.3);
    store.upsert_metrics(&reading).unwrap();

    let score = score_day(&store, &VigorScorer::default(), today);

    assert!((score.composite - 89.75).abs() < 1e-6);
    assert!(score.missing_metrics.is_empty());
    assert_eq!(score.band(), ReadinessBand::Primed);
    assert_eq!(store.latest_score().unwrap(), Some(score));
}

#[test]
fn test_missing_metrics_renormalize() {
    let store = Database::open_in_memory().unwrap();
    let today = day(4, 1);

    // No history: HRV and RHR have no baseline
    let mut reading = metrics(today, Some(65.0), Some(50.0));
    reading.sleep_hours = Some(6.0);
    reading.wrist_temp_deviation_c = Some(1.2);
    store.upsert_metrics(&reading).unwrap();

    let score = score_day(&store, &VigorScorer::default(), today);

    // (0.85 * 0.30 + 0.70 * 0.15) / 0.45
    assert!((score.composite - 80.0).abs() < 1e-6);
    assert_eq!(
        score.missing_metrics.iter().copied().collect::<Vec<_>>(),
        vec![MetricTag::Hrv, MetricTag::Rhr]
    );
    assert_eq!(score.sub_scores.hrv, None);
}

#[test]
fn test_day_without_any_metric_scores_zero() {
    let store = Database::open_in_memory().unwrap();
    let today = day(4, 1);
    seed_history(&store, today);

    let mut reading = metrics(today, None, None);
    reading.sleep_hours = None;
    store.upsert_metrics(&reading).unwrap();

    let score = score_day(&store, &VigorScorer::default(), today);
    assert_eq!(score.composite, 0.0);
    assert_eq!(score.missing_metrics.len(), 4);
    assert_eq!(score.band(), ReadinessBand::Low);
}

#[test]
fn test_baseline_only_looks_backwards() {
    let store = Database::open_in_memory().unwrap();
    let tracker = BaselineTracker::default();
    let today = day(4, 1);
    seed_history(&store, today);

    let before = tracker
        .baseline(&store, BaselineMetric::Hrv, today)
        .unwrap();
    store
        .upsert_metrics(&metrics(today, Some(90.0), Some(50.0)))
        .unwrap();
    let after = tracker
        .baseline(&store, BaselineMetric::Hrv, today)
        .unwrap();
    assert_eq!(before, after);

    // Thirty days of 60 slide to 29 days of 60 and one of 90
    let next = tracker
        .baseline(&store, BaselineMetric::Hrv, today + Duration::days(1))
        .unwrap()
        .unwrap();
    assert!((next - 61.0).abs() < 1e-9);
}

#[test]
fn test_sleep_method_changes_sleep_score() {
    let store = Database::open_in_memory().unwrap();
    let today = day(4, 1);
    let mut reading = metrics(today, None, None);
    reading.sleep_quality = SleepQuality::from_totals(10.0, 60.0, 30.0, 50.0);
    store.upsert_metrics(&reading).unwrap();

    let stages = score_day(&store, &VigorScorer::default(), today);
    let duration_only = score_day(
        &store,
        &VigorScorer::new(ScoringConfig {
            sleep_method: SleepScoringMethod::DurationOnly,
            ..Default::default()
        })
        .unwrap(),
        today,
    );

    assert!((duration_only.sub_scores.sleep.unwrap() - 100.0).abs() < 1e-9);
    // Deep at 10% scores 2/3, REM at 30% scores 0.8, no efficiency bonus
    assert!((stages.sub_scores.sleep.unwrap() - 89.333_333_333).abs() < 1e-6);
}

#[test]
fn test_invalid_weights_are_rejected() {
    let config = ScoringConfig {
        weights: ScoreWeights {
            sleep: 0.5,
            hrv: 0.5,
            rhr: 0.5,
            temperature: 0.0,
        },
        ..Default::default()
    };
    assert!(VigorScorer::new(config).is_err());
}

#[test]
fn test_scores_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("vigor.db");
    let today = day(4, 1);

    let score = {
        let store = Database::new(&db_path).unwrap();
        seed_history(&store, today);
        store
            .upsert_metrics(&metrics(today, Some(66.0), Some(53.0)))
            .unwrap();
        score_day(&store, &VigorScorer::default(), today)
    };

    let store = Database::new(&db_path).unwrap();
    assert_eq!(store.get_score(today).unwrap(), Some(score));
    let stats = store.stats().unwrap();
    assert_eq!(stats.metrics_days, 31);
    assert_eq!(stats.score_days, 1);
    assert_eq!(stats.first_day, Some(day(3, 2)));
    assert_eq!(stats.last_day, Some(today));
}
