//! # Metrics Accumulator
//!
//! Running counters and derived statistics for the current stage.
//!
//! Every derived ratio is 0 when its denominator is 0, and every counter only
//! grows between resets. Means are integer milliseconds (floor); rates are
//! [`Percent`] fixed-point values.
//!
//! Means divide by `stage_trials`, which always restarts with the stage.
//! `total_trials` is the reported total and may span the session.

use crate::Percent;
use crate::curriculum::CountRule;
use crate::ingestor::TrialRecord;
use serde::{Deserialize, Serialize};

// =============================================================================
// TOTAL TRIALS SCOPE
// =============================================================================

/// Whether "Total Trials" restarts with each stage or spans the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalTrialsScope {
    /// Reset on every stage transition, like every other counter.
    #[default]
    Stage,
    /// Carried across stage transitions as a session-wide grand total.
    Session,
}

// =============================================================================
// STAGE METRICS
// =============================================================================

/// Accumulated metrics for one stage of one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    // Raw counters
    /// Reported "Total Trials"; survives a reset under [`TotalTrialsScope::Session`].
    pub total_trials: u64,
    /// Trials recorded in the current stage; the divisor of every mean.
    pub stage_trials: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub premature: u64,
    pub omission: u64,
    pub correct_withholding: u64,
    pub incorrect_withholding: u64,
    pub cumulative_correct_latency_ms: u64,
    pub cumulative_incorrect_latency_ms: u64,
    pub cumulative_reward_latency_ms: u64,
    pub cumulative_premature_latency_ms: u64,
    /// Stage-conditioned qualifying-trial counter.
    pub count: u64,

    // Derived
    pub mean_correct_latency_ms: u64,
    pub mean_incorrect_latency_ms: u64,
    pub mean_reward_latency_ms: u64,
    pub mean_premature_latency_ms: u64,
    pub correct_pct: Percent,
    pub omission_pct: Percent,
    pub correct_withholding_pct: Percent,
    pub false_alarm_rate: Percent,
    pub hit_rate: Percent,
    pub difference_withholding: Percent,
}

impl StageMetrics {
    /// Zero-state metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one trial into the running metrics.
    ///
    /// `rule` decides whether the trial adds to `count`; it comes from the
    /// stage the trial was recorded in.
    pub fn apply(&mut self, record: &TrialRecord, rule: CountRule) -> &Self {
        self.total_trials = self.total_trials.saturating_add(1);
        self.stage_trials = self.stage_trials.saturating_add(1);
        self.correct = self.correct.saturating_add(record.correct);
        self.incorrect = self.incorrect.saturating_add(record.incorrect);
        self.premature = self.premature.saturating_add(record.premature);
        self.omission = self.omission.saturating_add(record.omission);
        self.correct_withholding = self
            .correct_withholding
            .saturating_add(record.correct_withholding);
        self.incorrect_withholding = self
            .incorrect_withholding
            .saturating_add(record.incorrect_withholding);
        self.cumulative_correct_latency_ms = self
            .cumulative_correct_latency_ms
            .saturating_add(record.correct_latency_ms);
        self.cumulative_incorrect_latency_ms = self
            .cumulative_incorrect_latency_ms
            .saturating_add(record.incorrect_latency_ms);
        self.cumulative_reward_latency_ms = self
            .cumulative_reward_latency_ms
            .saturating_add(record.reward_latency_ms);
        self.cumulative_premature_latency_ms = self
            .cumulative_premature_latency_ms
            .saturating_add(record.premature_latency_ms);

        if rule.qualifies(record) {
            self.count = self.count.saturating_add(1);
        }

        self.recompute();
        self
    }

    /// Recompute every derived field from the raw counters.
    pub fn recompute(&mut self) {
        self.mean_correct_latency_ms = mean(self.cumulative_correct_latency_ms, self.stage_trials);
        self.mean_incorrect_latency_ms =
            mean(self.cumulative_incorrect_latency_ms, self.stage_trials);
        self.mean_reward_latency_ms = mean(self.cumulative_reward_latency_ms, self.stage_trials);
        self.mean_premature_latency_ms =
            mean(self.cumulative_premature_latency_ms, self.stage_trials);

        self.correct_pct = correct_pct(self.correct, self.incorrect);
        self.omission_pct = omission_pct(self.omission, self.correct, self.incorrect);
        self.correct_withholding_pct =
            correct_withholding_pct(self.correct_withholding, self.incorrect_withholding);
        self.false_alarm_rate =
            false_alarm_rate(self.correct_withholding, self.incorrect_withholding);
        self.hit_rate = hit_rate(self.correct, self.incorrect, self.omission);
        self.difference_withholding =
            difference_withholding(self.correct_withholding_pct, self.omission_pct);
    }

    /// Return to zero-state for a new stage.
    ///
    /// With [`TotalTrialsScope::Session`] the `total_trials` counter survives;
    /// everything else, `stage_trials` included, is zeroed.
    pub fn reset(&mut self, scope: TotalTrialsScope) {
        let carried = match scope {
            TotalTrialsScope::Stage => 0,
            TotalTrialsScope::Session => self.total_trials,
        };
        *self = Self {
            total_trials: carried,
            ..Self::default()
        };
    }

    /// Whether every counter is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

// =============================================================================
// DERIVED RATIOS
// =============================================================================

/// `cumulative / trials`, floor; 0 when there are no trials.
#[must_use]
pub fn mean(cumulative: u64, trials: u64) -> u64 {
    cumulative.checked_div(trials).unwrap_or(0)
}

/// `correct / (correct + incorrect)`.
#[must_use]
pub fn correct_pct(correct: u64, incorrect: u64) -> Percent {
    Percent::ratio(correct, correct.saturating_add(incorrect))
}

/// `omission / (correct + incorrect + omission)`.
#[must_use]
pub fn omission_pct(omission: u64, correct: u64, incorrect: u64) -> Percent {
    Percent::ratio(
        omission,
        correct.saturating_add(incorrect).saturating_add(omission),
    )
}

/// `correct_wh / (correct_wh + incorrect_wh)`.
#[must_use]
pub fn correct_withholding_pct(correct_wh: u64, incorrect_wh: u64) -> Percent {
    Percent::ratio(correct_wh, correct_wh.saturating_add(incorrect_wh))
}

/// `incorrect_wh / (correct_wh + incorrect_wh)`.
#[must_use]
pub fn false_alarm_rate(correct_wh: u64, incorrect_wh: u64) -> Percent {
    Percent::ratio(incorrect_wh, correct_wh.saturating_add(incorrect_wh))
}

/// `correct / (correct + incorrect + omission)`.
#[must_use]
pub fn hit_rate(correct: u64, incorrect: u64, omission: u64) -> Percent {
    Percent::ratio(
        correct,
        correct.saturating_add(incorrect).saturating_add(omission),
    )
}

/// `correct_withholding_pct - omission_pct`.
#[must_use]
pub fn difference_withholding(correct_withholding_pct: Percent, omission_pct: Percent) -> Percent {
    correct_withholding_pct.minus(omission_pct)
}

// =============================================================================
// TESTS
// =============================================================================
