//! # Threshold Evaluator
//!
//! Pure, stage-keyed advancement predicates.
//!
//! | Stage family | Criterion |
//! |--------------|-----------|
//! | Habituation 1 | `Count >= 30` |
//! | Habituation 2 | `Count >= 70` |
//! | Attention (`5csr`) | `Correct >= 30` and mean correct latency `< 1500ms` |
//! | Fixed duration `D` | `Correct >= 30` and mean correct latency `< D/2` (`D*3/4` for 2s) |
//! | Variable ITI | `Correct >= 30` and mean correct latency `< 1500ms` |
//! | Go/No-Go | `Count >= 30` and mean correct latency `< 1500ms` |
//! | Terminal | never |
//!
//! Latency bounds are strict. Every criterion is monotone in the counters:
//! adding trials can only keep a met criterion met, as long as cumulative
//! latencies do not grow.

use crate::TrainError;
use crate::curriculum::{Stage, StageFamily};
use crate::metrics::StageMetrics;
use crate::primitives::{
    FAST_LATENCY_LIMIT_MS, GO_NOGO_MIN_COUNT, HAB1_MIN_COUNT, HAB2_MIN_COUNT,
    MIN_CORRECT_RESPONSES, SHORTEST_STIMULUS_MS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// CRITERION
// =============================================================================

/// An advancement rule over [`StageMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Criterion {
    /// `Count >= min_count`.
    Count { min_count: u64 },
    /// `Correct >= min_correct` and `MeanCorrectLatency < max_mean_latency_ms`.
    CorrectWithLatency {
        min_correct: u64,
        max_mean_latency_ms: u64,
    },
    /// `Count >= min_count` and `MeanCorrectLatency < max_mean_latency_ms`.
    CountWithLatency {
        min_count: u64,
        max_mean_latency_ms: u64,
    },
    /// Never satisfied.
    Never,
}

impl Criterion {
    /// Default criterion for a stage family.
    #[must_use]
    pub fn for_family(family: StageFamily) -> Self {
        match family {
            StageFamily::Habituation1 => Criterion::Count {
                min_count: HAB1_MIN_COUNT,
            },
            StageFamily::Habituation2 => Criterion::Count {
                min_count: HAB2_MIN_COUNT,
            },
            StageFamily::Attention | StageFamily::VariableIti => Criterion::CorrectWithLatency {
                min_correct: MIN_CORRECT_RESPONSES,
                max_mean_latency_ms: FAST_LATENCY_LIMIT_MS,
            },
            StageFamily::FixedDuration { stimulus_ms } => Criterion::CorrectWithLatency {
                min_correct: MIN_CORRECT_RESPONSES,
                max_mean_latency_ms: fixed_duration_limit(stimulus_ms),
            },
            StageFamily::GoNoGo => Criterion::CountWithLatency {
                min_count: GO_NOGO_MIN_COUNT,
                max_mean_latency_ms: FAST_LATENCY_LIMIT_MS,
            },
            StageFamily::Terminal => Criterion::Never,
        }
    }

    /// Evaluate the criterion.
    #[must_use]
    pub fn is_met(&self, metrics: &StageMetrics) -> bool {
        match *self {
            Criterion::Count { min_count } => metrics.count >= min_count,
            Criterion::CorrectWithLatency {
                min_correct,
                max_mean_latency_ms,
            } => {
                metrics.correct >= min_correct
                    && metrics.mean_correct_latency_ms < max_mean_latency_ms
            }
            Criterion::CountWithLatency {
                min_count,
                max_mean_latency_ms,
            } => {
                metrics.count >= min_count && metrics.mean_correct_latency_ms < max_mean_latency_ms
            }
            Criterion::Never => false,
        }
    }

    /// Progress of `metrics` toward this criterion.
    #[must_use]
    pub fn progress(&self, metrics: &StageMetrics) -> Progress {
        let (counter, current, required, latency_limit_ms) = match *self {
            Criterion::Count { min_count } => ("Count", metrics.count, min_count, None),
            Criterion::CorrectWithLatency {
                min_correct,
                max_mean_latency_ms,
            } => (
                "Correct",
                metrics.correct,
                min_correct,
                Some(max_mean_latency_ms),
            ),
            Criterion::CountWithLatency {
                min_count,
                max_mean_latency_ms,
            } => ("Count", metrics.count, min_count, Some(max_mean_latency_ms)),
            Criterion::Never => ("-", 0, 0, None),
        };

        Progress {
            counter,
            current,
            required,
            mean_correct_latency_ms: latency_limit_ms.map(|_| metrics.mean_correct_latency_ms),
            latency_limit_ms,
            met: self.is_met(metrics),
        }
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criterion::Count { min_count } => write!(f, "Count >= {}", min_count),
            Criterion::CorrectWithLatency {
                min_correct,
                max_mean_latency_ms,
            } => write!(
                f,
                "Correct >= {} and mean correct latency < {}ms",
                min_correct, max_mean_latency_ms
            ),
            Criterion::CountWithLatency {
                min_count,
                max_mean_latency_ms,
            } => write!(
                f,
                "Count >= {} and mean correct latency < {}ms",
                min_count, max_mean_latency_ms
            ),
            Criterion::Never => f.write_str("never (terminal stage)"),
        }
    }
}

/// Mean correct latency bound for a fixed stimulus duration.
///
/// Half the duration, except three quarters for the shortest duration.
#[must_use]
pub fn fixed_duration_limit(stimulus_ms: u64) -> u64 {
    if stimulus_ms <= SHORTEST_STIMULUS_MS {
        stimulus_ms.saturating_mul(3) / 4
    } else {
        stimulus_ms / 2
    }
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Where a stage's metrics stand against its criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Name of the gating counter ("Count" or "Correct").
    pub counter: &'static str,
    pub current: u64,
    pub required: u64,
    /// Present when the criterion has a latency bound.
    pub mean_correct_latency_ms: Option<u64>,
    pub latency_limit_ms: Option<u64>,
    pub met: bool,
}

impl Progress {
    /// Counter progress as a whole percentage, capped at 100.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.required == 0 {
            return if self.met { 100 } else { 0 };
        }
        let pct = self.current.saturating_mul(100) / self.required;
        pct.min(100) as u8
    }
}

// =============================================================================
// CRITERION TABLE
// =============================================================================

/// Lookup table from stage to criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriterionTable {
    entries: BTreeMap<Stage, Criterion>,
}

impl CriterionTable {
    /// A table with no entries.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Default criteria for every stage, derived from stage families.
    #[must_use]
    pub fn standard() -> Self {
        let entries = Stage::ALL
            .iter()
            .map(|stage| (*stage, Criterion::for_family(stage.family())))
            .collect();
        Self { entries }
    }

    /// Replace (or add) the criterion for `stage`.
    #[must_use]
    pub fn with(mut self, stage: Stage, criterion: Criterion) -> Self {
        self.entries.insert(stage, criterion);
        self
    }

    /// Look up the criterion for `stage`.
    pub fn get(&self, stage: Stage) -> Result<Criterion, TrainError> {
        self.entries
            .get(&stage)
            .copied()
            .ok_or(TrainError::MissingCriterion(stage))
    }

    /// Evaluate the criterion for `stage`.
    pub fn meets(&self, stage: Stage, metrics: &StageMetrics) -> Result<bool, TrainError> {
        Ok(self.get(stage)?.is_met(metrics))
    }

    /// Iterate entries in curriculum order.
    pub fn iter(&self) -> impl Iterator<Item = (Stage, Criterion)> + '_ {
        self.entries.iter().map(|(s, c)| (*s, *c))
    }
}

impl Default for CriterionTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Evaluate the default criterion for a stage given by name.
///
/// An unknown name is a configuration error, never "not met".
pub fn meets_criterion(stage: &str, metrics: &StageMetrics) -> Result<bool, TrainError> {
    let stage: Stage = stage.parse()?;
    CriterionTable::standard().meets(stage, metrics)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(correct: u64, count: u64, mean_correct_latency_ms: u64) -> StageMetrics {
        StageMetrics {
            correct,
            count,
            mean_correct_latency_ms,
            ..StageMetrics::default()
        }
    }

    #[test]
    fn fixed_duration_limits() {
        assert_eq!(fixed_duration_limit(10_000), 5_000);
        assert_eq!(fixed_duration_limit(8_000), 4_000);
        assert_eq!(fixed_duration_limit(4_000), 2_000);
        assert_eq!(fixed_duration_limit(2_000), 1_500);
    }

    #[test]
    fn hab1_boundary() {
        let table = CriterionTable::standard();
        assert!(!table.meets(Stage::Hab1, &metrics(0, 29, 0)).expect("meets"));
        assert!(table.meets(Stage::Hab1, &metrics(0, 30, 0)).expect("meets"));
    }

    #[test]
    fn hab2_needs_seventy() {
        let table = CriterionTable::standard();
        assert!(!table.meets(Stage::Hab2, &metrics(0, 69, 0)).expect("meets"));
        assert!(table.meets(Stage::Hab2, &metrics(0, 70, 0)).expect("meets"));
    }

    #[test]
    fn fixed_duration_latency_is_strict() {
        let table = CriterionTable::standard();
        assert!(
            table
                .meets(Stage::FiveCsrCiti10, &metrics(30, 0, 4_999))
                .expect("meets")
        );
        assert!(
            !table
                .meets(Stage::FiveCsrCiti10, &metrics(30, 0, 5_000))
                .expect("meets")
        );
        assert!(
            !table
                .meets(Stage::FiveCsrCiti10, &metrics(29, 0, 100))
                .expect("meets")
        );
    }

    #[test]
    fn go_nogo_uses_count_not_correct() {
        let table = CriterionTable::standard();
        assert!(
            !table
                .meets(Stage::RcptViti2, &metrics(40, 29, 1_000))
                .expect("meets")
        );
        assert!(
            table
                .meets(Stage::RcptViti2, &metrics(0, 30, 1_499))
                .expect("meets")
        );
        assert!(
            !table
                .meets(Stage::RcptViti2, &metrics(0, 30, 1_500))
                .expect("meets")
        );
    }

    #[test]
    fn terminal_is_never_met() {
        let table = CriterionTable::standard();
        assert!(
            !table
                .meets(Stage::FiveCpt, &metrics(u64::MAX, u64::MAX, 0))
                .expect("meets")
        );
    }

    #[test]
    fn unknown_stage_name_fails() {
        let result = meets_criterion("hab3", &StageMetrics::default());
        assert_eq!(result, Err(TrainError::UnknownStage("hab3".to_string())));
        assert_eq!(meets_criterion("hab1", &metrics(0, 30, 0)), Ok(true));
    }

    #[test]
    fn missing_entry_fails() {
        let table = CriterionTable::empty();
        assert_eq!(
            table.meets(Stage::Hab1, &StageMetrics::default()),
            Err(TrainError::MissingCriterion(Stage::Hab1))
        );
    }

    #[test]
    fn progress_reports_counter_and_latency() {
        let criterion = Criterion::for_family(StageFamily::FixedDuration { stimulus_ms: 4_000 });
        let progress = criterion.progress(&metrics(15, 0, 1_800));
        assert_eq!(progress.counter, "Correct");
        assert_eq!(progress.required, 30);
        assert_eq!(progress.percent(), 50);
        assert_eq!(progress.latency_limit_ms, Some(2_000));
        assert_eq!(progress.mean_correct_latency_ms, Some(1_800));
        assert!(!progress.met);
    }
}
