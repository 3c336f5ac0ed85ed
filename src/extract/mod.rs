//! Signal extraction
//!
//! Turns raw interval, heart-rate and temperature streams into per-day scalar
//! values. Every extraction returns `Result<_, ExtractionError>`; an error is
//! a typed absence that the scorer later treats as a missing metric.
//!
//! When several sources cover the same day, each metric is fused on its own:
//! sources are tried in precedence order and the first successful extraction
//! wins outright (see [`fusion`]).

pub mod fusion;
pub mod hrv;
pub mod resting_hr;
pub mod temperature;
pub mod window;

use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::models::{
    DailyReading, RawHeartRateSample, RawIntervalSample, RawTemperatureSample, SourceKind,
    Timestamped,
};
use crate::sleep::SleepWindow;

pub use fusion::{first_success, Attributed};
pub use hrv::HrvReading;
pub use resting_hr::{RestingHrMethod, RestingHrReading};
pub use temperature::TemperatureReading;
pub use window::{AnalysisWindow, Selection, WindowKind, Windowed};

/// HRV filtering thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrvConfig {
    /// Minimum valid beat intervals required for SDNN
    pub min_valid_intervals: usize,
    /// Shortest plausible beat interval (ms)
    pub min_interval_ms: u32,
    /// Longest plausible beat interval (ms)
    pub max_interval_ms: u32,
    /// Multiplier estimating SDNN from a provider's RMSSD
    pub rmssd_to_sdnn_factor: f64,
}

impl Default for HrvConfig {
    fn default() -> Self {
        HrvConfig {
            min_valid_intervals: 30,
            min_interval_ms: 300,
            max_interval_ms: 2000,
            rmssd_to_sdnn_factor: 1.5,
        }
    }
}

/// Resting heart rate windowing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestingHrConfig {
    pub strategy: RestingHrMethod,
    /// Minimum samples in the selected window before any windowing is tried
    pub min_samples: usize,
    /// Window means below this are rejected (bpm)
    pub min_valid_bpm: f64,
    /// Window means at or above this are rejected (bpm)
    pub max_valid_bpm: f64,
}

impl Default for RestingHrConfig {
    fn default() -> Self {
        RestingHrConfig {
            strategy: RestingHrMethod::default(),
            min_samples: 5,
            min_valid_bpm: 30.0,
            max_valid_bpm: 100.0,
        }
    }
}

/// Skin temperature validity and conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureConfig {
    pub min_skin_c: f64,
    pub max_skin_c: f64,
    /// Empirical skin-to-body offset (°C)
    pub body_offset_c: f64,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        TemperatureConfig {
            min_skin_c: 20.0,
            max_skin_c: 38.0,
            body_offset_c: 8.5,
        }
    }
}

/// Signal extraction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Fixed local offset used for day keys and the nocturnal window
    pub utc_offset_minutes: i32,
    /// Nocturnal proxy window start, local hour (inclusive)
    pub nocturnal_start_hour: u32,
    /// Nocturnal proxy window end, local hour (exclusive)
    pub nocturnal_end_hour: u32,
    pub hrv: HrvConfig,
    pub resting_hr: RestingHrConfig,
    pub temperature: TemperatureConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            utc_offset_minutes: 0,
            nocturnal_start_hour: 0,
            nocturnal_end_hour: 6,
            hrv: HrvConfig::default(),
            resting_hr: RestingHrConfig::default(),
            temperature: TemperatureConfig::default(),
        }
    }
}

impl ExtractionConfig {
    /// Local offset; falls back to UTC when the configured value is out of range
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    pub fn validate(&self) -> Result<(), String> {
        if FixedOffset::east_opt(self.utc_offset_minutes * 60).is_none() {
            return Err(format!(
                "utc_offset_minutes {} is outside ±24h",
                self.utc_offset_minutes
            ));
        }
        if self.nocturnal_start_hour >= self.nocturnal_end_hour || self.nocturnal_end_hour > 24 {
            return Err(format!(
                "Nocturnal window {}:00-{}:00 is empty or invalid",
                self.nocturnal_start_hour, self.nocturnal_end_hour
            ));
        }
        if self.hrv.min_interval_ms >= self.hrv.max_interval_ms {
            return Err("HRV interval bounds are inverted".to_string());
        }
        if self.resting_hr.min_valid_bpm >= self.resting_hr.max_valid_bpm {
            return Err("Resting HR validity bounds are inverted".to_string());
        }
        if self.temperature.min_skin_c >= self.temperature.max_skin_c {
            return Err("Skin temperature bounds are inverted".to_string());
        }
        self.resting_hr.strategy.validate()
    }
}

/// Everything one source captured for one day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDayBundle {
    #[serde(default)]
    pub sleep: Option<SleepWindow>,
    #[serde(default)]
    pub intervals: Vec<RawIntervalSample>,
    #[serde(default)]
    pub heart_rate: Vec<RawHeartRateSample>,
    #[serde(default)]
    pub temperature: Vec<RawTemperatureSample>,
}

/// A bundle tagged with the source that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBundle {
    pub source: SourceKind,
    pub bundle: RawDayBundle,
}

/// Window each fused metric was measured in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricWindows {
    pub hrv: Option<WindowKind>,
    pub resting_hr: Option<WindowKind>,
    pub temperature: Option<WindowKind>,
}

/// Result of extracting one day from all sources
#[derive(Debug, Clone, PartialEq)]
pub struct DayExtraction {
    pub reading: DailyReading,
    pub hrv: Option<Attributed<HrvReading>>,
    pub resting_hr: Option<Attributed<RestingHrReading>>,
    pub temperature: Option<Attributed<TemperatureReading>>,
    pub windows: MetricWindows,
}

fn split<T>(attributed: Attributed<Windowed<T>>) -> (Attributed<T>, WindowKind) {
    let window = attributed.value.window;
    (
        Attributed {
            value: attributed.value.value,
            source: attributed.source,
        },
        window,
    )
}

/// Raw-signal extractor
#[derive(Debug, Clone, Default)]
pub struct SignalExtractor {
    config: ExtractionConfig,
}

impl SignalExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        SignalExtractor { config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn windowed<T, R, F>(
        &self,
        day: NaiveDate,
        samples: &[T],
        sleep: Option<&SleepWindow>,
        metric: &'static str,
        extract: F,
    ) -> Result<Windowed<R>, ExtractionError>
    where
        T: Timestamped,
        F: FnOnce(&[&T]) -> Result<R, ExtractionError>,
    {
        let selection = window::select_samples(samples, day, sleep, &self.config, metric)?;
        debug!(
            %day,
            metric,
            window = ?selection.window.kind,
            samples = selection.samples.len(),
            "Selected window"
        );

        extract(selection.samples.as_slice()).map(|value| Windowed {
            value,
            window: selection.window.kind,
        })
    }

    fn windowed_hrv(
        &self,
        day: NaiveDate,
        samples: &[RawIntervalSample],
        sleep: Option<&SleepWindow>,
    ) -> Result<Windowed<HrvReading>, ExtractionError> {
        self.windowed(day, samples, sleep, "hrv", |s| {
            hrv::extract_hrv(s, &self.config.hrv)
        })
    }

    fn windowed_resting_hr(
        &self,
        day: NaiveDate,
        samples: &[RawHeartRateSample],
        sleep: Option<&SleepWindow>,
    ) -> Result<Windowed<RestingHrReading>, ExtractionError> {
        self.windowed(day, samples, sleep, "resting_hr", |s| {
            resting_hr::extract_resting_hr(s, &self.config.resting_hr)
        })
    }

    fn windowed_temperature(
        &self,
        day: NaiveDate,
        samples: &[RawTemperatureSample],
        sleep: Option<&SleepWindow>,
    ) -> Result<Windowed<TemperatureReading>, ExtractionError> {
        self.windowed(day, samples, sleep, "temperature", |s| {
            temperature::extract_temperature(s, &self.config.temperature)
        })
    }

    /// SDNN (and RMSSD) from beat intervals inside the day's window
    pub fn hrv_for_day(
        &self,
        day: NaiveDate,
        samples: &[RawIntervalSample],
        sleep: Option<&SleepWindow>,
    ) -> Result<HrvReading, ExtractionError> {
        self.windowed_hrv(day, samples, sleep).map(|w| w.value)
    }

    /// Lowest stable heart rate inside the day's window
    pub fn resting_hr_for_day(
        &self,
        day: NaiveDate,
        samples: &[RawHeartRateSample],
        sleep: Option<&SleepWindow>,
    ) -> Result<RestingHrReading, ExtractionError> {
        self.windowed_resting_hr(day, samples, sleep).map(|w| w.value)
    }

    /// Mean skin temperature inside the day's window
    pub fn temperature_for_day(
        &self,
        day: NaiveDate,
        samples: &[RawTemperatureSample],
        sleep: Option<&SleepWindow>,
    ) -> Result<TemperatureReading, ExtractionError> {
        self.windowed_temperature(day, samples, sleep).map(|w| w.value)
    }

    /// Fuse every source's bundle into one reading for `day`
    pub fn extract_day(&self, day: NaiveDate, bundles: &[SourceBundle]) -> DayExtraction {
        let mut reading = DailyReading::new(day);

        let sleep = first_success(
            "sleep",
            bundles.iter().map(|b| {
                (b.source, move || match &b.bundle.sleep {
                    Some(window) => window.validate().map(|_| window),
                    None => Err(ExtractionError::InsufficientData {
                        metric: "sleep",
                        required: 1,
                        found: 0,
                    }),
                })
            }),
        );

        let sleep_window = match sleep {
            Ok(attributed) => {
                debug!(
                    %day,
                    source = %attributed.source,
                    interruptions = attributed.value.interruptions(),
                    "Fused sleep window"
                );
                reading.sleep_hours = Some(attributed.value.asleep_hours());
                reading.sleep_quality = attributed.value.quality();
                reading.sources.sleep = Some(attributed.source);
                Some(attributed.value)
            }
            Err(err) => {
                if matches!(err, ExtractionError::InvalidRange { .. }) {
                    warn!(%day, error = %err, "Rejected sleep window");
                }
                None
            }
        };

        let hrv = first_success(
            "hrv",
            bundles.iter().map(|b| {
                (b.source, move || {
                    self.windowed_hrv(day, &b.bundle.intervals, sleep_window)
                })
            }),
        )
        .ok();

        let resting_hr = first_success(
            "resting_hr",
            bundles.iter().map(|b| {
                (b.source, move || {
                    self.windowed_resting_hr(day, &b.bundle.heart_rate, sleep_window)
                })
            }),
        )
        .ok();

        let temperature = first_success(
            "temperature",
            bundles.iter().map(|b| {
                (b.source, move || {
                    self.windowed_temperature(day, &b.bundle.temperature, sleep_window)
                })
            }),
        )
        .ok();

        let mut windows = MetricWindows::default();
        let hrv = hrv.map(split).map(|(h, window)| {
            reading.hrv_sdnn_ms = Some(h.value.sdnn_ms);
            reading.sources.hrv = Some(h.source);
            windows.hrv = Some(window);
            h
        });
        let resting_hr = resting_hr.map(split).map(|(r, window)| {
            reading.resting_hr_bpm = Some(r.value.bpm);
            reading.sources.resting_hr = Some(r.source);
            windows.resting_hr = Some(window);
            r
        });
        let temperature = temperature.map(split).map(|(t, window)| {
            reading.wrist_temp_c = Some(t.value.skin_c);
            reading.sources.temperature = Some(t.source);
            windows.temperature = Some(window);
            t
        });

        debug!(
            %day,
            sources = bundles.len(),
            sleep = ?reading.sleep_hours,
            hrv = ?reading.hrv_sdnn_ms,
            resting_hr = ?reading.resting_hr_bpm,
            skin_temp = ?reading.wrist_temp_c,
            windows = ?windows,
            "Extracted day"
        );

        DayExtraction {
            reading,
            hrv,
            resting_hr,
            temperature,
            windows,
        }
    }
}
