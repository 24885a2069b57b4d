//! # Training Stages
//!
//! The closed catalogue of curriculum stages and their families.
//!
//! ## Stage Definitions
//!
//! | Stage | Family | Counts toward `Count` |
//! |-------|--------|------------------------|
//! | `hab1` | Habituation 1 | rewarded trials |
//! | `hab2` | Habituation 2 | rewarded trials with a response |
//! | `5csr` | Attention | - |
//! | `5csr_citi_10` .. `5csr_citi_2` | Fixed-duration attention | - |
//! | `5csr_viti` | Variable-ITI attention | - |
//! | `rcpt_viti_*` | Go/No-Go | correct Go, correct withholding |
//! | `5cpt` | Terminal | correct Go, correct withholding |

use crate::TrainError;
use crate::ingestor::TrialRecord;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// STAGE ENUM
// =============================================================================

/// A named phase of the training curriculum.
///
/// Variants are declared in curriculum order, so `Ord` follows the standard
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "hab1")]
    Hab1,
    #[serde(rename = "hab2")]
    Hab2,
    #[serde(rename = "5csr")]
    FiveCsr,
    #[serde(rename = "5csr_citi_10")]
    FiveCsrCiti10,
    #[serde(rename = "5csr_citi_8")]
    FiveCsrCiti8,
    #[serde(rename = "5csr_citi_4")]
    FiveCsrCiti4,
    #[serde(rename = "5csr_citi_2")]
    FiveCsrCiti2,
    #[serde(rename = "5csr_viti")]
    FiveCsrViti,
    #[serde(rename = "rcpt_viti_2_to_1")]
    RcptViti2To1,
    #[serde(rename = "rcpt_viti_2")]
    RcptViti2,
    #[serde(rename = "rcpt_viti_175")]
    RcptViti175,
    #[serde(rename = "rcpt_viti_15")]
    RcptViti15,
    #[serde(rename = "5cpt")]
    FiveCpt,
}

impl Stage {
    /// Every stage, in curriculum order.
    pub const ALL: [Stage; 13] = [
        Stage::Hab1,
        Stage::Hab2,
        Stage::FiveCsr,
        Stage::FiveCsrCiti10,
        Stage::FiveCsrCiti8,
        Stage::FiveCsrCiti4,
        Stage::FiveCsrCiti2,
        Stage::FiveCsrViti,
        Stage::RcptViti2To1,
        Stage::RcptViti2,
        Stage::RcptViti175,
        Stage::RcptViti15,
        Stage::FiveCpt,
    ];

    /// The wire identifier, as published to the device and used in paths.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Stage::Hab1 => "hab1",
            Stage::Hab2 => "hab2",
            Stage::FiveCsr => "5csr",
            Stage::FiveCsrCiti10 => "5csr_citi_10",
            Stage::FiveCsrCiti8 => "5csr_citi_8",
            Stage::FiveCsrCiti4 => "5csr_citi_4",
            Stage::FiveCsrCiti2 => "5csr_citi_2",
            Stage::FiveCsrViti => "5csr_viti",
            Stage::RcptViti2To1 => "rcpt_viti_2_to_1",
            Stage::RcptViti2 => "rcpt_viti_2",
            Stage::RcptViti175 => "rcpt_viti_175",
            Stage::RcptViti15 => "rcpt_viti_15",
            Stage::FiveCpt => "5cpt",
        }
    }

    /// The family that determines counting and criterion defaults.
    #[must_use]
    pub const fn family(&self) -> StageFamily {
        match self {
            Stage::Hab1 => StageFamily::Habituation1,
            Stage::Hab2 => StageFamily::Habituation2,
            Stage::FiveCsr => StageFamily::Attention,
            Stage::FiveCsrCiti10 => StageFamily::FixedDuration { stimulus_ms: 10_000 },
            Stage::FiveCsrCiti8 => StageFamily::FixedDuration { stimulus_ms: 8_000 },
            Stage::FiveCsrCiti4 => StageFamily::FixedDuration { stimulus_ms: 4_000 },
            Stage::FiveCsrCiti2 => StageFamily::FixedDuration { stimulus_ms: 2_000 },
            Stage::FiveCsrViti => StageFamily::VariableIti,
            Stage::RcptViti2To1 | Stage::RcptViti2 | Stage::RcptViti175 | Stage::RcptViti15 => {
                StageFamily::GoNoGo
            }
            Stage::FiveCpt => StageFamily::Terminal,
        }
    }

    /// How trials in this stage contribute to the `Count` counter.
    #[must_use]
    pub const fn count_rule(&self) -> CountRule {
        match self.family() {
            StageFamily::Habituation1 => CountRule::Rewarded,
            StageFamily::Habituation2 => CountRule::RewardedResponse,
            StageFamily::GoNoGo | StageFamily::Terminal => CountRule::GoNoGo,
            StageFamily::Attention
            | StageFamily::FixedDuration { .. }
            | StageFamily::VariableIti => CountRule::None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == name)
            .ok_or_else(|| TrainError::UnknownStage(name.to_string()))
    }
}

// =============================================================================
// STAGE FAMILY
// =============================================================================

/// Groups of stages that share an advancement rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum StageFamily {
    Habituation1,
    Habituation2,
    /// Five-choice serial reaction without a fixed stimulus duration.
    Attention,
    /// Five-choice serial reaction with a fixed stimulus duration.
    FixedDuration { stimulus_ms: u64 },
    /// Five-choice serial reaction with a variable inter-trial interval.
    VariableIti,
    /// Rodent continuous performance with Go and No-Go trials.
    GoNoGo,
    /// Last stage of the curriculum; never advanced from.
    Terminal,
}

impl StageFamily {
    /// Human-readable family name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StageFamily::Habituation1 => "Habituation 1",
            StageFamily::Habituation2 => "Habituation 2",
            StageFamily::Attention => "Attention",
            StageFamily::FixedDuration { .. } => "Fixed-duration attention",
            StageFamily::VariableIti => "Variable-ITI attention",
            StageFamily::GoNoGo => "Go/No-Go",
            StageFamily::Terminal => "Terminal",
        }
    }

    /// Whether this family is one of the habituation stages.
    #[must_use]
    pub fn is_habituation(&self) -> bool {
        matches!(self, StageFamily::Habituation1 | StageFamily::Habituation2)
    }
}

// =============================================================================
// COUNT RULE
// =============================================================================

/// Stage-conditioned rule for the `Count` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountRule {
    /// +1 when the trial was rewarded (reward latency > 0).
    Rewarded,
    /// +1 when rewarded and the subject responded (correct or incorrect).
    RewardedResponse,
    /// +1 for a correct Go trial or a correctly withheld No-Go trial.
    GoNoGo,
    /// `Count` is not used.
    None,
}

/// Classification of a trial in go/no-go stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialKind {
    /// Both withholding fields are 0.
    Go,
    /// A withholding outcome was signaled.
    NoGo,
}

impl TrialKind {
    /// Classify a record by its withholding fields.
    #[must_use]
    pub fn of(record: &TrialRecord) -> Self {
        if record.correct_withholding == 0 && record.incorrect_withholding == 0 {
            TrialKind::Go
        } else {
            TrialKind::NoGo
        }
    }
}

impl CountRule {
    /// Whether `record` adds one to `Count` under this rule.
    #[must_use]
    pub fn qualifies(&self, record: &TrialRecord) -> bool {
        match self {
            CountRule::Rewarded => record.reward_latency_ms > 0,
            CountRule::RewardedResponse => {
                record.reward_latency_ms > 0 && (record.correct > 0 || record.incorrect > 0)
            }
            CountRule::GoNoGo => match TrialKind::of(record) {
                TrialKind::Go => record.correct > 0,
                TrialKind::NoGo => record.correct_withholding > 0,
            },
            CountRule::None => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
