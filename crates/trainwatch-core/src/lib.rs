//! # trainwatch-core
//!
//! The deterministic curriculum engine for Trainwatch - THE LOGIC.
//!
//! This crate turns behavioral-trial rows into running stage metrics, decides
//! whether a subject met the criterion of its current training stage, and
//! walks it through a fixed ordered curriculum.
//!
//! ## Modules
//!
//! - `curriculum` → stage catalogue and stage sequencer
//! - `ingestor` → record schema and row parsing
//! - `metrics` → running counters and derived rates
//! - `threshold` → stage-keyed threshold predicates
//! - `session` → one subject's live state and ingestion cursor
//! - `formats` → snapshot log layout
//!
//! ## Architectural Constraints
//!
//! The CORE:
//! - Has NO async, NO network, NO logging dependencies (pure Rust)
//! - Uses integer arithmetic only; percentages are fixed-point
//! - Never guesses: an unknown stage or missing criterion is an error
//! - Never initiates I/O; the app layer feeds rows in and takes snapshots out

// =============================================================================
// MODULES
// =============================================================================

pub mod curriculum;
pub mod formats;
pub mod ingestor;
pub mod metrics;
pub mod primitives;
pub mod session;
pub mod threshold;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{ErrorKind, Percent, TrainError};

// =============================================================================
// RE-EXPORTS: Curriculum Engine
// =============================================================================

pub use curriculum::{
    CountRule, FinishReason, Sequencer, Stage, StageFamily, StageSequence, TrialKind, Transition,
};
pub use ingestor::{Column, Ingestor, LatencyUnit, RecordSchema, SourceLine, TrialRecord};
pub use metrics::{StageMetrics, TotalTrialsScope};
pub use session::{IngestCursor, IngestReport, Snapshot, SubjectSession, Update};
pub use threshold::{Criterion, CriterionTable, Progress, meets_criterion};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{format_snapshot_block, snapshot_fields, snapshot_path};
