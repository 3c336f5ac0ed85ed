use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::VigorError;
use crate::sleep::SleepQuality;

/// Metrics that feed the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricTag {
    Sleep,
    Hrv,
    Rhr,
    Temperature,
}

impl MetricTag {
    pub const ALL: [MetricTag; 4] = [
        MetricTag::Sleep,
        MetricTag::Hrv,
        MetricTag::Rhr,
        MetricTag::Temperature,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricTag::Sleep => "sleep",
            MetricTag::Hrv => "hrv",
            MetricTag::Rhr => "rhr",
            MetricTag::Temperature => "temperature",
        }
    }
}

impl fmt::Display for MetricTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a metric came from, in precedence order (highest first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Dedicated sleep-measuring peripheral (ring, strap worn overnight)
    SleepPeripheral,
    /// General-purpose wearable (watch)
    Wearable,
    /// Estimate computed by a cloud service
    CloudEstimate,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::SleepPeripheral => write!(f, "Sleep peripheral"),
            SourceKind::Wearable => write!(f, "Wearable"),
            SourceKind::CloudEstimate => write!(f, "Cloud estimate"),
        }
    }
}

/// Winning source per metric for one day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSources {
    pub sleep: Option<SourceKind>,
    pub hrv: Option<SourceKind>,
    pub resting_hr: Option<SourceKind>,
    pub temperature: Option<SourceKind>,
}

impl MetricSources {
    /// Attribute every present metric to a single source
    pub fn uniform(source: SourceKind, reading: &DailyReading) -> Self {
        let pick = |present: bool| present.then_some(source);
        MetricSources {
            sleep: pick(reading.sleep_hours.is_some()),
            hrv: pick(reading.hrv_sdnn_ms.is_some()),
            resting_hr: pick(reading.resting_hr_bpm.is_some()),
            temperature: pick(
                reading.wrist_temp_c.is_some() || reading.wrist_temp_deviation_c.is_some(),
            ),
        }
    }
}

/// Anything carrying a sample timestamp
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Beat-to-beat interval from a peripheral
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawIntervalSample {
    pub timestamp: DateTime<Utc>,
    pub interval_ms: u32,
    pub skin_contact: bool,
    pub motion_detected: bool,
}

/// Heart rate sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawHeartRateSample {
    pub timestamp: DateTime<Utc>,
    pub bpm: u16,
}

/// Skin temperature sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawTemperatureSample {
    pub timestamp: DateTime<Utc>,
    pub celsius: f64,
}

impl Timestamped for RawIntervalSample {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for RawHeartRateSample {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for RawTemperatureSample {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Per-day values handed over by a provider, before they are stored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyReading {
    pub day: NaiveDate,
    #[serde(default)]
    pub sleep_hours: Option<f64>,
    #[serde(default)]
    pub sleep_quality: Option<SleepQuality>,
    #[serde(default)]
    pub hrv_sdnn_ms: Option<f64>,
    #[serde(default)]
    pub resting_hr_bpm: Option<f64>,
    /// Absolute mean skin temperature
    #[serde(default)]
    pub wrist_temp_c: Option<f64>,
    /// Skin temperature deviation from the personal norm
    #[serde(default)]
    pub wrist_temp_deviation_c: Option<f64>,
    #[serde(default)]
    pub sources: MetricSources,
}

impl DailyReading {
    pub fn new(day: NaiveDate) -> Self {
        DailyReading {
            day,
            ..Default::default()
        }
    }

    /// True when no metric at all was produced for the day
    pub fn is_empty(&self) -> bool {
        self.sleep_hours.is_none()
            && self.hrv_sdnn_ms.is_none()
            && self.resting_hr_bpm.is_none()
            && self.wrist_temp_c.is_none()
            && self.wrist_temp_deviation_c.is_none()
    }
}

/// Stored per-day metrics record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    /// Calendar day the record belongs to (local-midnight normalized)
    pub day: NaiveDate,

    /// Hours asleep
    pub sleep_hours: Option<f64>,

    /// Sleep stage distribution, when stages were known
    pub sleep_quality: Option<SleepQuality>,

    /// HRV as SDNN in milliseconds
    pub hrv_sdnn_ms: Option<f64>,

    /// Resting heart rate in beats per minute
    pub resting_hr_bpm: Option<f64>,

    /// Absolute mean skin temperature in °C
    pub wrist_temp_c: Option<f64>,

    /// Skin temperature deviation from the personal baseline in °C
    pub wrist_temp_deviation_c: Option<f64>,

    /// Winning source for each metric
    pub sources: MetricSources,

    /// When the record was last written
    pub last_updated: DateTime<Utc>,
}

impl DailyMetrics {
    pub fn from_reading(reading: DailyReading, last_updated: DateTime<Utc>) -> Self {
        DailyMetrics {
            day: reading.day,
            sleep_hours: reading.sleep_hours,
            sleep_quality: reading.sleep_quality,
            hrv_sdnn_ms: reading.hrv_sdnn_ms,
            resting_hr_bpm: reading.resting_hr_bpm,
            wrist_temp_c: reading.wrist_temp_c,
            wrist_temp_deviation_c: reading.wrist_temp_deviation_c,
            sources: reading.sources,
            last_updated,
        }
    }

    /// Compare every stored value except `last_updated`
    pub fn same_values(&self, other: &DailyMetrics) -> bool {
        self.day == other.day
            && self.sleep_hours == other.sleep_hours
            && self.sleep_quality == other.sleep_quality
            && self.hrv_sdnn_ms == other.hrv_sdnn_ms
            && self.resting_hr_bpm == other.resting_hr_bpm
            && self.wrist_temp_c == other.wrist_temp_c
            && self.wrist_temp_deviation_c == other.wrist_temp_deviation_c
            && self.sources == other.sources
    }
}

/// Per-metric sub-scores on a 0-100 scale
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub sleep: Option<f64>,
    pub hrv: Option<f64>,
    pub rhr: Option<f64>,
    pub temperature: Option<f64>,
}

impl SubScores {
    pub fn get(&self, tag: MetricTag) -> Option<f64> {
        match tag {
            MetricTag::Sleep => self.sleep,
            MetricTag::Hrv => self.hrv,
            MetricTag::Rhr => self.rhr,
            MetricTag::Temperature => self.temperature,
        }
    }

    /// Metrics that have a sub-score
    pub fn present(&self) -> BTreeSet<MetricTag> {
        MetricTag::ALL
            .into_iter()
            .filter(|tag| self.get(*tag).is_some())
            .collect()
    }
}

/// Inputs a score was computed from, kept for provenance
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawInputs {
    pub sleep_hours: Option<f64>,
    pub hrv_sdnn_ms: Option<f64>,
    pub resting_hr_bpm: Option<f64>,
    pub wrist_temp_deviation_c: Option<f64>,
    pub hrv_baseline_ms: Option<f64>,
    pub rhr_baseline_bpm: Option<f64>,
}

/// Daily recovery readiness score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VigorScore {
    pub day: NaiveDate,

    /// Weighted composite, 0-100
    pub composite: f64,

    pub sub_scores: SubScores,

    pub raw_inputs: RawInputs,

    /// Metrics excluded from the composite
    pub missing_metrics: BTreeSet<MetricTag>,
}

impl VigorScore {
    pub fn band(&self) -> ReadinessBand {
        ReadinessBand::from_composite(self.composite)
    }
}

/// Interpretation ranges for the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadinessBand {
    Primed,   // 80 and above
    Ready,    // 60 to 80
    Moderate, // 40 to 60
    Low,      // below 40
}

impl ReadinessBand {
    pub fn from_composite(composite: f64) -> Self {
        if composite >= 80.0 {
            ReadinessBand::Primed
        } else if composite >= 60.0 {
            ReadinessBand::Ready
        } else if composite >= 40.0 {
            ReadinessBand::Moderate
        } else {
            ReadinessBand::Low
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ReadinessBand::Primed => "Well recovered",
            ReadinessBand::Ready => "Recovered",
            ReadinessBand::Moderate => "Partially recovered",
            ReadinessBand::Low => "Under-recovered",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            ReadinessBand::Primed => "Good day for hard efforts",
            ReadinessBand::Ready => "Train as planned",
            ReadinessBand::Moderate => "Keep intensity moderate",
            ReadinessBand::Low => "Prioritize rest and sleep",
        }
    }
}

impl fmt::Display for ReadinessBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessBand::Primed => write!(f, "Primed"),
            ReadinessBand::Ready => write!(f, "Ready"),
            ReadinessBand::Moderate => write!(f, "Moderate"),
            ReadinessBand::Low => write!(f, "Low"),
        }
    }
}

/// Inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, VigorError> {
        if start > end {
            return Err(VigorError::Validation(format!(
                "Day range start {} is after end {}",
                start, end
            )));
        }
        Ok(DayRange { start, end })
    }

    /// The `days` calendar days ending on `end`
    pub fn trailing(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        DayRange {
            start: end - Duration::days(span),
            end,
        }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }

    pub fn len(&self) -> usize {
        ((self.end - self.start).num_days() + 1) as usize
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }
}

impl fmt::Display for DayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Calendar day of an instant under a fixed local offset
pub fn local_day(ts: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    ts.with_timezone(&offset).date_naive()
}

/// UTC instant of a local wall-clock time under a fixed offset
pub fn local_to_utc(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    let utc = local - Duration::seconds(i64::from(offset.local_minus_utc()));
    DateTime::<Utc>::from_naive_utc_and_offset(utc, Utc)
}
