//! Sleep windows and sleep stage analysis
//!
//! A sleep window scopes which raw samples count as "during sleep" and, when
//! the device reports stage phases, yields a stage distribution used by the
//! stage-aware sleep scoring strategy.
//!
//! # Sleep Science Background
//!
//! Healthy adult sleep architecture (% of total sleep time):
//! - Deep: 15-25%
//! - Light: 45-55%
//! - REM: 20-25%
//! - Awake: <5% of time in bed
//!
//! Efficiency is time asleep divided by time in bed; above 85% is considered
//! good.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ExtractionError;

/// Sleep stages based on polysomnography classifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SleepStage {
    /// Deep sleep / Slow-wave sleep (NREM 3)
    Deep,
    /// Light sleep (NREM 1 & 2)
    Light,
    /// REM (Rapid Eye Movement) sleep
    REM,
    /// Awake periods during sleep
    Awake,
}

impl fmt::Display for SleepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepStage::Deep => write!(f, "Deep"),
            SleepStage::Light => write!(f, "Light"),
            SleepStage::REM => write!(f, "REM"),
            SleepStage::Awake => write!(f, "Awake"),
        }
    }
}

/// Stage change at an offset from the window start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepPhase {
    pub offset_seconds: u32,
    pub stage: SleepStage,
}

/// Time spent in each stage, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageBreakdown {
    pub deep: i64,
    pub light: i64,
    pub rem: i64,
    pub awake: i64,
}

impl StageBreakdown {
    pub fn asleep(&self) -> i64 {
        self.deep + self.light + self.rem
    }

    pub fn in_bed(&self) -> i64 {
        self.asleep() + self.awake
    }
}

/// Stage distribution for one night
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SleepQuality {
    /// Deep sleep as a percentage of time asleep
    pub deep_pct: f64,
    /// REM sleep as a percentage of time asleep
    pub rem_pct: f64,
    /// Light sleep as a percentage of time asleep
    pub light_pct: f64,
    /// Time asleep as a percentage of time in bed
    pub efficiency_pct: f64,
}

impl SleepQuality {
    /// Build from per-stage totals in any common unit; `None` when nothing was asleep
    pub fn from_totals(deep: f64, light: f64, rem: f64, awake: f64) -> Option<Self> {
        let asleep = deep + light + rem;
        if asleep <= 0.0 || !asleep.is_finite() {
            return None;
        }
        let in_bed = asleep + awake.max(0.0);

        Some(SleepQuality {
            deep_pct: deep / asleep * 100.0,
            rem_pct: rem / asleep * 100.0,
            light_pct: light / asleep * 100.0,
            efficiency_pct: asleep / in_bed * 100.0,
        })
    }

    pub fn from_breakdown(breakdown: &StageBreakdown) -> Option<Self> {
        Self::from_totals(
            breakdown.deep as f64,
            breakdown.light as f64,
            breakdown.rem as f64,
            breakdown.awake as f64,
        )
    }
}

/// Sleep period reported by a device or provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Stage changes ordered by offset
    #[serde(default)]
    pub phases: Vec<SleepPhase>,
}

impl SleepWindow {
    /// Create a validated sleep window
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        phases: Vec<SleepPhase>,
    ) -> Result<Self, ExtractionError> {
        let window = SleepWindow { start, end, phases };
        window.validate()?;
        Ok(window)
    }

    /// Reject windows whose start is not before their end
    pub fn validate(&self) -> Result<(), ExtractionError> {
        if self.end <= self.start {
            return Err(ExtractionError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Inclusive on both ends
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Seconds spent in each stage; each phase lasts until the next one starts
    pub fn stage_breakdown(&self) -> Option<StageBreakdown> {
        if self.phases.is_empty() {
            return None;
        }

        let total = self.duration().num_seconds().max(0);
        let mut breakdown = StageBreakdown::default();

        for (i, phase) in self.phases.iter().enumerate() {
            let begin = i64::from(phase.offset_seconds).min(total);
            let finish = self
                .phases
                .get(i + 1)
                .map(|next| i64::from(next.offset_seconds).min(total))
                .unwrap_or(total);
            let span = (finish - begin).max(0);

            match phase.stage {
                SleepStage::Deep => breakdown.deep += span,
                SleepStage::Light => breakdown.light += span,
                SleepStage::REM => breakdown.rem += span,
                SleepStage::Awake => breakdown.awake += span,
            }
        }

        Some(breakdown)
    }

    /// Hours asleep; the whole window when stages are unknown
    pub fn asleep_hours(&self) -> f64 {
        match self.stage_breakdown() {
            Some(breakdown) => breakdown.asleep() as f64 / 3600.0,
            None => self.duration().num_seconds() as f64 / 3600.0,
        }
    }

    pub fn quality(&self) -> Option<SleepQuality> {
        self.stage_breakdown()
            .as_ref()
            .and_then(SleepQuality::from_breakdown)
    }

    /// Number of transitions into an awake phase
    pub fn interruptions(&self) -> usize {
        self.phases
            .windows(2)
            .filter(|pair| pair[0].stage != SleepStage::Awake && pair[1].stage == SleepStage::Awake)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn night_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 23, 0, 0).unwrap()
    }

    fn phase(minutes: u32, stage: SleepStage) -> SleepPhase {
        SleepPhase {
            offset_seconds: minutes * 60,
            stage,
        }
    }

    #[test]
    fn test_sleep_stage_display() {
        assert_eq!(format!("{}", SleepStage::Deep), "Deep");
        assert_eq!(format!("{}", SleepStage::Light), "Light");
        assert_eq!(format!("{}", SleepStage::REM), "REM");
        assert_eq!(format!("{}", SleepStage::Awake), "Awake");
    }

    #[test]
    fn test_sleep_window_invalid_range() {
        let start = night_start();

        let result = SleepWindow::new(start, start, Vec::new());
        assert!(matches!(result, Err(ExtractionError::InvalidRange { .. })));

        let result = SleepWindow::new(start, start - Duration::hours(1), Vec::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_sleep_window_without_phases() {
        let start = night_start();
        let window = SleepWindow::new(start, start + Duration::hours(8), Vec::new()).unwrap();

        assert_eq!(window.asleep_hours(), 8.0);
        assert!(window.quality().is_none());
        assert!(window.contains(start));
        assert!(window.contains(start + Duration::hours(8)));
        assert!(!window.contains(start + Duration::hours(9)));
    }

    #[test]
    fn test_stage_breakdown() {
        let start = night_start();
        // Light 30, Deep 90, Light 60, REM 90, Awake 15, Light 95 (ends at 380 min)
        let phases = vec![
            phase(0, SleepStage::Light),
            phase(30, SleepStage::Deep),
            phase(120, SleepStage::Light),
            phase(180, SleepStage::REM),
            phase(270, SleepStage::Awake),
            phase(285, SleepStage::Light),
        ];
        let window = SleepWindow::new(start, start + Duration::minutes(380), phases).unwrap();

        let breakdown = window.stage_breakdown().unwrap();
        assert_eq!(breakdown.deep, 90 * 60);
        assert_eq!(breakdown.light, (30 + 60 + 95) * 60);
        assert_eq!(breakdown.rem, 90 * 60);
        assert_eq!(breakdown.awake, 15 * 60);
        assert_eq!(breakdown.in_bed(), 380 * 60);

        assert!((window.asleep_hours() - 365.0 / 60.0).abs() < 1e-9);
        assert_eq!(window.interruptions(), 1);

        let quality = window.quality().unwrap();
        assert!((quality.deep_pct - 90.0 / 365.0 * 100.0).abs() < 1e-9);
        assert!((quality.rem_pct - 90.0 / 365.0 * 100.0).abs() < 1e-9);
        assert!((quality.efficiency_pct - 365.0 / 380.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_phase_offsets_past_end_are_clipped() {
        let start = night_start();
        let phases = vec![phase(0, SleepStage::Light), phase(600, SleepStage::Deep)];
        let window = SleepWindow::new(start, start + Duration::hours(7), phases).unwrap();

        let breakdown = window.stage_breakdown().unwrap();
        assert_eq!(breakdown.light, 7 * 3600);
        assert_eq!(breakdown.deep, 0);
    }

    #[test]
    fn test_quality_from_totals() {
        // Minutes: 90 deep, 240 light, 90 REM, 30 awake
        let quality = SleepQuality::from_totals(90.0, 240.0, 90.0, 30.0).unwrap();
        assert!((quality.deep_pct - 21.428).abs() < 0.01);
        assert!((quality.light_pct - 57.142).abs() < 0.01);
        assert!((quality.efficiency_pct - 93.333).abs() < 0.01);

        assert!(SleepQuality::from_totals(0.0, 0.0, 0.0, 30.0).is_none());
    }

    #[test]
    fn test_sleep_window_serialization() {
        let start = night_start();
        let window = SleepWindow::new(
            start,
            start + Duration::hours(7),
            vec![phase(0, SleepStage::Light), phase(60, SleepStage::Deep)],
        )
        .unwrap();

        let json = serde_json::to_string(&window).unwrap();
        let deserialized: SleepWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(window, deserialized);
    }
}
