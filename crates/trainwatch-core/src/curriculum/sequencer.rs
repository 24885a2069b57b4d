//! # Stage Sequencer
//!
//! State machine over an ordered stage list.
//!
//! From stage `S`, if the criterion for `S` is met the sequencer moves to the
//! next stage in the sequence, otherwise it stays. The run finishes when the
//! next stage is the configured terminate stage or when there is no next
//! stage. The sequencer decides; [`crate::SubjectSession`] applies the
//! decision (stage change and metrics reset).

use super::Stage;
use crate::TrainError;
use crate::metrics::StageMetrics;
use crate::threshold::CriterionTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// STAGE SEQUENCE
// =============================================================================

/// Fixed, strictly ordered, duplicate-free, non-empty list of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSequence {
    stages: Vec<Stage>,
}

impl StageSequence {
    /// The full curriculum, `hab1` through `5cpt`.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            stages: Stage::ALL.to_vec(),
        }
    }

    /// Build a custom sequence.
    ///
    /// Returns `TrainError::InvalidConfig` for an empty list or a repeated stage.
    pub fn new(stages: Vec<Stage>) -> Result<Self, TrainError> {
        if stages.is_empty() {
            return Err(TrainError::InvalidConfig(
                "stage sequence is empty".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for stage in &stages {
            if !seen.insert(*stage) {
                return Err(TrainError::InvalidConfig(format!(
                    "stage {} appears more than once in the sequence",
                    stage
                )));
            }
        }
        Ok(Self { stages })
    }

    /// Stages in order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Check membership.
    #[must_use]
    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    /// Index of `stage` in the sequence.
    pub fn position(&self, stage: Stage) -> Result<usize, TrainError> {
        self.stages
            .iter()
            .position(|s| *s == stage)
            .ok_or(TrainError::StageNotInSequence(stage))
    }

    /// The stage after `stage`, or `None` if `stage` is last.
    pub fn next_after(&self, stage: Stage) -> Result<Option<Stage>, TrainError> {
        let index = self.position(stage)?;
        Ok(self.stages.get(index.saturating_add(1)).copied())
    }
}

impl Default for StageSequence {
    fn default() -> Self {
        Self::standard()
    }
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Why a session stopped advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FinishReason {
    /// The session reached the configured terminate stage.
    TerminateStage { stage: Stage },
    /// The criterion of the last stage in the sequence was met.
    SequenceExhausted { last: Stage },
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::TerminateStage { stage } => {
                write!(f, "reached terminate stage {}", stage)
            }
            FinishReason::SequenceExhausted { last } => {
                write!(f, "sequence exhausted after {}", last)
            }
        }
    }
}

/// Outcome of one sequencer decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    /// Criterion not met; remain at the stage.
    Stay { stage: Stage },
    /// Criterion met; continue at the next stage with fresh metrics.
    Advance { from: Stage, to: Stage },
    /// Criterion met and the session is over.
    ///
    /// `to` is the terminate stage when one was reached, `None` when the
    /// sequence ran out.
    Finish {
        from: Stage,
        to: Option<Stage>,
        reason: FinishReason,
    },
}

impl Transition {
    /// The stage the session is at after this transition.
    #[must_use]
    pub fn current(&self) -> Stage {
        match self {
            Transition::Stay { stage } => *stage,
            Transition::Advance { to, .. } => *to,
            Transition::Finish { from, to, .. } => to.unwrap_or(*from),
        }
    }

    /// Whether the stage changed.
    #[must_use]
    pub fn is_advance(&self) -> bool {
        match self {
            Transition::Stay { .. } => false,
            Transition::Advance { .. } => true,
            Transition::Finish { to, .. } => to.is_some(),
        }
    }
}

// =============================================================================
// SEQUENCER
// =============================================================================

/// Advance-or-stay decisions over a [`StageSequence`].
#[derive(Debug, Clone)]
pub struct Sequencer {
    sequence: StageSequence,
    criteria: CriterionTable,
    terminate: Option<Stage>,
}

impl Sequencer {
    /// Create a sequencer.
    ///
    /// Every stage in the sequence must have a criterion, and the terminate
    /// stage (if any) must be a member of the sequence.
    pub fn new(
        sequence: StageSequence,
        criteria: CriterionTable,
        terminate: Option<Stage>,
    ) -> Result<Self, TrainError> {
        for stage in sequence.stages() {
            criteria.get(*stage)?;
        }
        if let Some(stage) = terminate {
            sequence.position(stage)?;
        }
        Ok(Self {
            sequence,
            criteria,
            terminate,
        })
    }

    /// The standard curriculum with default criteria.
    #[must_use]
    pub fn standard(terminate: Option<Stage>) -> Self {
        Self {
            sequence: StageSequence::standard(),
            criteria: CriterionTable::standard(),
            terminate,
        }
    }

    /// The stage list.
    #[must_use]
    pub fn sequence(&self) -> &StageSequence {
        &self.sequence
    }

    /// The criterion table.
    #[must_use]
    pub fn criteria(&self) -> &CriterionTable {
        &self.criteria
    }

    /// The configured terminate stage.
    #[must_use]
    pub fn terminate_stage(&self) -> Option<Stage> {
        self.terminate
    }

    /// If a session sitting at `stage` is already over, say why.
    #[must_use]
    pub fn finished_at(&self, stage: Stage) -> Option<FinishReason> {
        if self.terminate == Some(stage) {
            Some(FinishReason::TerminateStage { stage })
        } else {
            None
        }
    }

    /// Decide the transition out of `current` given its accumulated metrics.
    pub fn decide(
        &self,
        current: Stage,
        metrics: &StageMetrics,
    ) -> Result<Transition, TrainError> {
        if !self.criteria.meets(current, metrics)? {
            // Membership is still checked so a stray stage never looks "not met".
            self.sequence.position(current)?;
            return Ok(Transition::Stay { stage: current });
        }

        match self.sequence.next_after(current)? {
            None => Ok(Transition::Finish {
                from: current,
                to: None,
                reason: FinishReason::SequenceExhausted { last: current },
            }),
            Some(next) => match self.finished_at(next) {
                Some(reason) => Ok(Transition::Finish {
                    from: current,
                    to: Some(next),
                    reason,
                }),
                None => Ok(Transition::Advance {
                    from: current,
                    to: next,
                }),
            },
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::Criterion;

    fn hab1_met() -> StageMetrics {
        StageMetrics {
            count: 30,
            ..StageMetrics::default()
        }
    }

    #[test]
    fn sequence_rejects_duplicates_and_empty() {
        assert!(StageSequence::new(vec![]).is_err());
        assert!(StageSequence::new(vec![Stage::Hab1, Stage::Hab2, Stage::Hab1]).is_err());
        assert!(StageSequence::new(vec![Stage::Hab2, Stage::FiveCsr]).is_ok());
    }

    #[test]
    fn next_after_walks_the_curriculum() {
        let seq = StageSequence::standard();
        assert_eq!(seq.next_after(Stage::Hab1).expect("next"), Some(Stage::Hab2));
        assert_eq!(seq.next_after(Stage::FiveCpt).expect("next"), None);
    }

    #[test]
    fn stay_when_not_met() {
        let sequencer = Sequencer::standard(None);
        let metrics = StageMetrics {
            count: 29,
            ..StageMetrics::default()
        };
        assert_eq!(
            sequencer.decide(Stage::Hab1, &metrics).expect("decide"),
            Transition::Stay { stage: Stage::Hab1 }
        );
    }

    #[test]
    fn advance_when_met() {
        let sequencer = Sequencer::standard(None);
        assert_eq!(
            sequencer.decide(Stage::Hab1, &hab1_met()).expect("decide"),
            Transition::Advance {
                from: Stage::Hab1,
                to: Stage::Hab2
            }
        );
    }

    #[test]
    fn finish_on_terminate_stage() {
        let sequencer = Sequencer::standard(Some(Stage::Hab2));
        let transition = sequencer.decide(Stage::Hab1, &hab1_met()).expect("decide");
        assert_eq!(
            transition,
            Transition::Finish {
                from: Stage::Hab1,
                to: Some(Stage::Hab2),
                reason: FinishReason::TerminateStage { stage: Stage::Hab2 },
            }
        );
        assert_eq!(transition.current(), Stage::Hab2);
    }

    #[test]
    fn finish_on_exhausted_sequence() {
        let sequence = StageSequence::new(vec![Stage::Hab1]).expect("sequence");
        let sequencer =
            Sequencer::new(sequence, CriterionTable::standard(), None).expect("sequencer");
        let transition = sequencer.decide(Stage::Hab1, &hab1_met()).expect("decide");
        assert_eq!(
            transition,
            Transition::Finish {
                from: Stage::Hab1,
                to: None,
                reason: FinishReason::SequenceExhausted { last: Stage::Hab1 },
            }
        );
        assert!(!transition.is_advance());
    }

    #[test]
    fn stage_outside_sequence_is_an_error() {
        let sequence = StageSequence::new(vec![Stage::Hab1, Stage::Hab2]).expect("sequence");
        let sequencer =
            Sequencer::new(sequence, CriterionTable::standard(), None).expect("sequencer");
        let err = sequencer
            .decide(Stage::FiveCsr, &StageMetrics::default())
            .expect_err("not a member");
        assert_eq!(err, TrainError::StageNotInSequence(Stage::FiveCsr));
    }

    #[test]
    fn terminate_stage_must_be_in_sequence() {
        let sequence = StageSequence::new(vec![Stage::Hab1, Stage::Hab2]).expect("sequence");
        let result = Sequencer::new(sequence, CriterionTable::standard(), Some(Stage::FiveCpt));
        assert!(matches!(result, Err(TrainError::StageNotInSequence(_))));
    }

    #[test]
    fn missing_criterion_is_rejected_up_front() {
        let table = CriterionTable::empty().with(Stage::Hab1, Criterion::Count { min_count: 3 });
        let sequence = StageSequence::new(vec![Stage::Hab1, Stage::Hab2]).expect("sequence");
        let result = Sequencer::new(sequence, table, None);
        assert_eq!(
            result.map(|_| ()),
            Err(TrainError::MissingCriterion(Stage::Hab2))
        );
    }
}
