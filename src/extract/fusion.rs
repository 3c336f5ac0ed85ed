//! Multi-source fusion
//!
//! Each metric is fused independently. Candidates are tried in source
//! precedence order and the first one that extracts successfully supplies
//! the value. Values from different sources are never averaged.

use tracing::debug;

use crate::error::ExtractionError;
use crate::models::SourceKind;

/// A value together with the source that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Attributed<T> {
    pub value: T,
    pub source: SourceKind,
}

/// Run candidate extractions in precedence order and keep the first success
///
/// Extractions are lazy: lower-precedence candidates are not evaluated once a
/// higher one succeeds. Candidates from the same source keep their input
/// order. When every candidate fails, the error of the last one tried is
/// returned.
pub fn first_success<T, F, I>(
    metric: &'static str,
    candidates: I,
) -> Result<Attributed<T>, ExtractionError>
where
    F: FnOnce() -> Result<T, ExtractionError>,
    I: IntoIterator<Item = (SourceKind, F)>,
{
    let mut ordered: Vec<(SourceKind, F)> = candidates.into_iter().collect();
    ordered.sort_by_key(|(source, _)| *source);

    let mut last_error = None;
    for (source, extract) in ordered {
        match extract() {
            Ok(value) => return Ok(Attributed { value, source }),
            Err(err) => {
                debug!(metric, %source, error = %err, "Source did not yield a value");
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or(ExtractionError::InsufficientData {
        metric,
        required: 1,
        found: 0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    type Candidate = Box<dyn FnOnce() -> Result<f64, ExtractionError>>;

    fn ok(value: f64) -> Candidate {
        Box::new(move || Ok(value))
    }

    fn empty() -> Candidate {
        Box::new(|| Err(ExtractionError::EmptyWindow { metric: "hrv" }))
    }

    #[test]
    fn test_highest_precedence_wins() {
        let result = first_success(
            "hrv",
            vec![
                (SourceKind::CloudEstimate, ok(70.0)),
                (SourceKind::SleepPeripheral, ok(50.0)),
                (SourceKind::Wearable, ok(60.0)),
            ],
        )
        .unwrap();

        assert_eq!(result.value, 50.0);
        assert_eq!(result.source, SourceKind::SleepPeripheral);
    }

    #[test]
    fn test_falls_through_failures() {
        let result = first_success(
            "hrv",
            vec![
                (SourceKind::SleepPeripheral, empty()),
                (SourceKind::CloudEstimate, ok(70.0)),
            ],
        )
        .unwrap();

        assert_eq!(result.source, SourceKind::CloudEstimate);
    }

    #[test]
    fn test_lower_candidates_are_not_evaluated() {
        let calls = Cell::new(0);
        let candidates = [SourceKind::Wearable, SourceKind::SleepPeripheral]
            .into_iter()
            .map(|source| {
                let calls = &calls;
                (source, move || {
                    calls.set(calls.get() + 1);
                    Ok::<_, ExtractionError>(source)
                })
            });

        let result = first_success("rhr", candidates).unwrap();
        assert_eq!(result.value, SourceKind::SleepPeripheral);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_all_failed_returns_last_error() {
        let result = first_success(
            "hrv",
            vec![
                (SourceKind::SleepPeripheral, empty()),
                (
                    SourceKind::Wearable,
                    Box::new(|| {
                        Err(ExtractionError::InsufficientData {
                            metric: "hrv",
                            required: 30,
                            found: 4,
                        })
                    }) as Candidate,
                ),
            ],
        );

        assert!(matches!(
            result,
            Err(ExtractionError::InsufficientData { found: 4, .. })
        ));
    }

    #[test]
    fn test_no_candidates() {
        let result = first_success::<f64, Candidate, _>("sleep", Vec::new());
        assert!(matches!(
            result,
            Err(ExtractionError::InsufficientData { metric: "sleep", .. })
        ));
    }
}
