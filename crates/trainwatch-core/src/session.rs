//! # Session Module
//!
//! One subject's run through the curriculum.
//!
//! A `SubjectSession` owns the live stage, its metrics, the sequencer and the
//! ingestion cursor. Cursor advancement and metric application happen in the
//! same `&mut self` call, so a caller holding the session behind a lock gets
//! both or neither.
//!
//! ## Lifecycle
//!
//! - Created once per run at a start stage
//! - Metrics reset on every stage change
//! - Finished when the terminate stage is reached or the sequence runs out;
//!   a finished session rejects further records

use crate::TrainError;
use crate::curriculum::{FinishReason, Sequencer, Stage, Transition};
use crate::ingestor::{Ingestor, SourceLine, TrialRecord};
use crate::metrics::{StageMetrics, TotalTrialsScope};
use crate::threshold::Progress;
use serde::Serialize;

// =============================================================================
// CURSOR AND REPORTS
// =============================================================================

/// Position in the data source up to which rows have been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IngestCursor {
    /// Data rows consumed (header and blank lines excluded).
    pub rows: u64,
    /// Byte offset just past the last consumed line.
    pub offset: u64,
}

/// Metrics for one stage at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub subject: String,
    pub stage: Stage,
    pub metrics: StageMetrics,
}

/// Result of applying one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Metrics right after the record, filed under the stage they belong to.
    pub snapshot: Snapshot,
    pub transition: Transition,
}

/// Result of one batch of source lines.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// One update per applied record, in row order.
    pub updates: Vec<Update>,
    /// Complete rows that could not be parsed and were passed over.
    pub skipped: Vec<TrainError>,
    /// The batch was read from an offset the session has already moved past.
    pub stale: bool,
}

impl IngestReport {
    /// Whether any record changed the stage.
    #[must_use]
    pub fn advanced(&self) -> bool {
        self.updates.iter().any(|u| u.transition.is_advance())
    }

    /// The last transition of the batch, if any record was applied.
    #[must_use]
    pub fn last_transition(&self) -> Option<Transition> {
        self.updates.last().map(|u| u.transition)
    }
}

// =============================================================================
// SUBJECT SESSION
// =============================================================================

/// Live state for one subject.
#[derive(Debug, Clone)]
pub struct SubjectSession {
    subject: String,
    stage: Stage,
    metrics: StageMetrics,
    sequencer: Sequencer,
    scope: TotalTrialsScope,
    cursor: IngestCursor,
    trials_applied: u64,
    finished: Option<FinishReason>,
}

impl SubjectSession {
    /// Start a session for `subject` at `start`.
    ///
    /// `start` must be a member of the sequencer's stage list. Starting at the
    /// terminate stage yields a session that is already finished.
    pub fn new(
        subject: impl Into<String>,
        start: Stage,
        sequencer: Sequencer,
        scope: TotalTrialsScope,
    ) -> Result<Self, TrainError> {
        sequencer.sequence().position(start)?;
        let finished = sequencer.finished_at(start);
        Ok(Self {
            subject: subject.into(),
            stage: start,
            metrics: StageMetrics::new(),
            sequencer,
            scope,
            cursor: IngestCursor::default(),
            trials_applied: 0,
            finished,
        })
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[must_use]
    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    #[must_use]
    pub fn cursor(&self) -> IngestCursor {
        self.cursor
    }

    /// Records applied over the whole session.
    #[must_use]
    pub fn trials_applied(&self) -> u64 {
        self.trials_applied
    }

    /// Why the session finished, if it has.
    #[must_use]
    pub fn finished(&self) -> Option<FinishReason> {
        self.finished
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Snapshot of the current stage.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            subject: self.subject.clone(),
            stage: self.stage,
            metrics: self.metrics.clone(),
        }
    }

    /// Progress of the current stage toward its criterion.
    pub fn progress(&self) -> Result<Progress, TrainError> {
        let criterion = self.sequencer.criteria().get(self.stage)?;
        Ok(criterion.progress(&self.metrics))
    }

    /// Apply one trial record: accumulate, evaluate, then advance or stay.
    ///
    /// Returns `TrainError::SessionFinished` once the session is over.
    pub fn apply(&mut self, record: &TrialRecord) -> Result<Update, TrainError> {
        if let Some(reason) = self.finished {
            return Err(TrainError::SessionFinished(reason.to_string()));
        }

        self.metrics.apply(record, self.stage.count_rule());
        self.trials_applied = self.trials_applied.saturating_add(1);
        let snapshot = self.snapshot();

        let transition = self.sequencer.decide(self.stage, &self.metrics)?;
        match transition {
            Transition::Stay { .. } => {}
            Transition::Advance { to, .. } => self.enter(to),
            Transition::Finish { to, reason, .. } => {
                if let Some(to) = to {
                    self.enter(to);
                }
                self.finished = Some(reason);
            }
        }

        Ok(Update {
            snapshot,
            transition,
        })
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.metrics.reset(self.scope);
    }

    /// Consume lines read from byte `start_offset` of the source.
    ///
    /// A batch whose `start_offset` differs from the cursor was read before
    /// another batch moved the cursor; it is reported as stale and nothing is
    /// applied. Otherwise each line moves the cursor past itself. Header and
    /// blank lines are passed over, malformed rows are reported in
    /// `skipped`, and the batch stops at the first row after which the
    /// session is finished.
    pub fn ingest_lines(
        &mut self,
        start_offset: u64,
        lines: &[SourceLine<'_>],
        ingestor: &Ingestor,
    ) -> Result<IngestReport, TrainError> {
        let mut report = IngestReport::default();
        if start_offset != self.cursor.offset {
            report.stale = true;
            return Ok(report);
        }

        for line in lines {
            if self.is_finished() {
                break;
            }
            self.cursor.offset = line.end_offset;
            if line.is_header || line.is_blank() {
                continue;
            }
            self.cursor.rows = self.cursor.rows.saturating_add(1);

            match ingestor.parse(self.stage, self.cursor.rows, line.text) {
                Ok(record) => report.updates.push(self.apply(&record)?),
                Err(err) => report.skipped.push(err),
            }
        }

        Ok(report)
    }

    /// Move the cursor to `offset` without reading anything.
    ///
    /// Used when the source was truncated or replaced.
    pub fn rebase(&mut self, offset: u64) {
        self.cursor.offset = offset;
    }
}

// =============================================================================
// TESTS
// =============================================================================
