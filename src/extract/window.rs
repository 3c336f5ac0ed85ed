//! Window selection shared by every extractor
//!
//! Samples are scoped to the reported sleep window when there is one. If
//! there is none, or it holds no samples, the fixed local nocturnal window
//! `[00:00, 06:00)` of the day is used instead. Nothing is ever synthesized:
//! two empty windows mean the extraction fails.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use super::ExtractionConfig;
use crate::error::ExtractionError;
use crate::models::{local_to_utc, Timestamped};
use crate::sleep::SleepWindow;

/// Which window the samples were taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// Reported sleep period, inclusive on both ends
    Sleep,
    /// Fixed local proxy, half-open
    Nocturnal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisWindow {
    pub kind: WindowKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnalysisWindow {
    pub fn from_sleep(sleep: &SleepWindow) -> Self {
        AnalysisWindow {
            kind: WindowKind::Sleep,
            start: sleep.start,
            end: sleep.end,
        }
    }

    /// Local `[start_hour, end_hour)` on `day`
    pub fn nocturnal(day: NaiveDate, config: &ExtractionConfig) -> Self {
        let offset = config.utc_offset();
        let local = |hour: u32| {
            let midnight = day.and_time(NaiveTime::MIN);
            local_to_utc(midnight + chrono::Duration::hours(i64::from(hour)), offset)
        };

        AnalysisWindow {
            kind: WindowKind::Nocturnal,
            start: local(config.nocturnal_start_hour),
            end: local(config.nocturnal_end_hour),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        match self.kind {
            WindowKind::Sleep => ts >= self.start && ts <= self.end,
            WindowKind::Nocturnal => ts >= self.start && ts < self.end,
        }
    }

    fn collect<'a, T: Timestamped>(&self, samples: &'a [T]) -> Vec<&'a T> {
        samples.iter().filter(|s| self.contains(s.timestamp())).collect()
    }
}

/// An extracted value and the window its samples came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Windowed<T> {
    pub value: T,
    pub window: WindowKind,
}

/// Samples that fell inside the chosen window
#[derive(Debug, Clone)]
pub struct Selection<'a, T> {
    pub window: AnalysisWindow,
    pub samples: Vec<&'a T>,
}

/// Pick the window for `day` and return the samples inside it
pub fn select_samples<'a, T: Timestamped>(
    samples: &'a [T],
    day: NaiveDate,
    sleep: Option<&SleepWindow>,
    config: &ExtractionConfig,
    metric: &'static str,
) -> Result<Selection<'a, T>, ExtractionError> {
    if let Some(sleep) = sleep {
        let window = AnalysisWindow::from_sleep(sleep);
        let selected = window.collect(samples);
        if !selected.is_empty() {
            return Ok(Selection {
                window,
                samples: selected,
            });
        }
    }

    let window = AnalysisWindow::nocturnal(day, config);
    let selected = window.collect(samples);
    if selected.is_empty() {
        return Err(ExtractionError::EmptyWindow { metric });
    }

    Ok(Selection {
        window,
        samples: selected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawHeartRateSample;
    use chrono::{Duration, TimeZone};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn sample(ts: DateTime<Utc>) -> RawHeartRateSample {
        RawHeartRateSample { timestamp: ts, bpm: 60 }
    }

    #[test]
    fn test_nocturnal_window_utc() {
        let window = AnalysisWindow::nocturnal(day(), &ExtractionConfig::default());
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap());

        assert!(window.contains(window.start));
        assert!(!window.contains(window.end));
    }

    #[test]
    fn test_nocturnal_window_follows_offset() {
        let config = ExtractionConfig {
            utc_offset_minutes: 120,
            ..Default::default()
        };
        let window = AnalysisWindow::nocturnal(day(), &config);
        // Local midnight at UTC+2 is 22:00 UTC the evening before
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 3, 9, 22, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 3, 10, 4, 0, 0).unwrap());
    }

    #[test]
    fn test_sleep_window_preferred() {
        let start = Utc.with_ymd_and_hms(2024, 3, 9, 23, 0, 0).unwrap();
        let sleep = SleepWindow::new(start, start + Duration::hours(8), Vec::new()).unwrap();
        let samples = vec![
            sample(start - Duration::minutes(5)),
            sample(start),
            sample(start + Duration::hours(8)),
        ];

        let selection =
            select_samples(&samples, day(), Some(&sleep), &ExtractionConfig::default(), "hr")
                .unwrap();
        assert_eq!(selection.window.kind, WindowKind::Sleep);
        assert_eq!(selection.samples.len(), 2);
    }

    #[test]
    fn test_falls_back_to_nocturnal_when_sleep_window_empty() {
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 13, 0, 0).unwrap();
        let nap = SleepWindow::new(start, start + Duration::hours(1), Vec::new()).unwrap();
        let samples = vec![sample(Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap())];

        let selection =
            select_samples(&samples, day(), Some(&nap), &ExtractionConfig::default(), "hr")
                .unwrap();
        assert_eq!(selection.window.kind, WindowKind::Nocturnal);
        assert_eq!(selection.samples.len(), 1);
    }

    #[test]
    fn test_both_windows_empty_fails() {
        let samples = vec![sample(Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap())];

        let result = select_samples(&samples, day(), None, &ExtractionConfig::default(), "hr");
        assert_eq!(
            result.unwrap_err(),
            ExtractionError::EmptyWindow { metric: "hr" }
        );
    }
}
