//! # Run Configuration
//!
//! Everything a monitoring run needs, loaded from an optional TOML file and
//! then overridden by CLI flags.
//!
//! ```toml
//! subject = "12"
//! start_stage = "hab1"
//! terminate_stage = "5csr_viti"
//! data_file = "test.txt"
//! output_dir = "output"
//! latency_unit = "milliseconds"
//!
//! [criteria.hab2]
//! kind = "count"
//! min_count = 50
//!
//! [schemas.5csr]
//! columns = ["stimulus_duration", "correct", "incorrect", "premature", "omission"]
//! ```
//!
//! Stage names are validated when the session is built, so a typo is a
//! configuration error rather than a silently ignored key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trainwatch_core::{
    Column, Criterion, CriterionTable, Ingestor, LatencyUnit, RecordSchema, Sequencer, Stage,
    StageSequence, SubjectSession, TotalTrialsScope, TrainError,
};

// =============================================================================
// DEFAULTS
// =============================================================================

/// Window within which repeated change notifications are ignored.
pub const DEFAULT_DEBOUNCE_MS: u64 = 1_000;

/// How often the data source metadata is checked.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// How long the gateway waits for a ping before giving up on an announcement.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 100;

// =============================================================================
// RUN CONFIG
// =============================================================================

/// Column layout override for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    pub columns: Vec<Column>,
}

/// Configuration for one monitoring run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub subject: String,
    pub start_stage: String,
    pub terminate_stage: Option<String>,
    /// Stop after this many seconds; run until finished when absent.
    pub duration_secs: Option<u64>,
    pub data_file: PathBuf,
    pub output_dir: PathBuf,
    /// `host:port` of the pub/sub broker; in-process bus when absent.
    pub endpoint: Option<String>,
    pub delimiter: char,
    pub latency_unit: LatencyUnit,
    pub total_trials_scope: TotalTrialsScope,
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
    pub handshake_timeout_secs: u64,
    /// Leave an unterminated trailing line for the next read.
    pub require_line_terminator: bool,
    /// Delete the subject's output directory before starting.
    pub reset_output: bool,
    /// Custom stage order; the full curriculum when absent.
    pub sequence: Option<Vec<String>>,
    pub criteria: BTreeMap<String, Criterion>,
    pub schemas: BTreeMap<String, SchemaConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            subject: "1".to_string(),
            start_stage: Stage::Hab1.as_str().to_string(),
            terminate_stage: None,
            duration_secs: None,
            data_file: PathBuf::from("test.txt"),
            output_dir: PathBuf::from("output"),
            endpoint: None,
            delimiter: '\t',
            latency_unit: LatencyUnit::default(),
            total_trials_scope: TotalTrialsScope::default(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            require_line_terminator: true,
            reset_output: false,
            sequence: None,
            criteria: BTreeMap::new(),
            schemas: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, TrainError> {
        toml::from_str(text).map_err(|e| TrainError::InvalidConfig(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, TrainError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrainError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Check every field that can be checked without touching the filesystem.
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.subject.trim().is_empty() {
            return Err(TrainError::InvalidConfig("subject id is empty".to_string()));
        }
        if self.subject.contains(['/', '\\', ' ']) {
            return Err(TrainError::InvalidConfig(format!(
                "subject id {:?} may not contain '/', '\\' or spaces",
                self.subject
            )));
        }
        if self.delimiter == '\n' || self.delimiter == '\r' {
            return Err(TrainError::InvalidConfig(
                "delimiter may not be a line terminator".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(TrainError::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(TrainError::InvalidConfig(
                "handshake_timeout_secs must be positive".to_string(),
            ));
        }
        self.build_session().map(|_| ())?;
        self.build_ingestor().map(|_| ())
    }

    // =========================================================================
    // CORE OBJECTS
    // =========================================================================

    pub fn start(&self) -> Result<Stage, TrainError> {
        self.start_stage.parse()
    }

    pub fn terminate(&self) -> Result<Option<Stage>, TrainError> {
        self.terminate_stage.as_deref().map(str::parse).transpose()
    }

    /// The stage order, parsed and checked for duplicates.
    pub fn stage_sequence(&self) -> Result<StageSequence, TrainError> {
        match &self.sequence {
            None => Ok(StageSequence::standard()),
            Some(names) => {
                let stages = names
                    .iter()
                    .map(|name| name.parse())
                    .collect::<Result<Vec<Stage>, _>>()?;
                StageSequence::new(stages)
            }
        }
    }

    /// Default criteria with the configured overrides applied.
    pub fn criterion_table(&self) -> Result<CriterionTable, TrainError> {
        let mut table = CriterionTable::standard();
        for (name, criterion) in &self.criteria {
            let stage: Stage = name.parse()?;
            table = table.with(stage, *criterion);
        }
        Ok(table)
    }

    pub fn build_sequencer(&self) -> Result<Sequencer, TrainError> {
        Sequencer::new(
            self.stage_sequence()?,
            self.criterion_table()?,
            self.terminate()?,
        )
    }

    pub fn build_session(&self) -> Result<SubjectSession, TrainError> {
        SubjectSession::new(
            self.subject.clone(),
            self.start()?,
            self.build_sequencer()?,
            self.total_trials_scope,
        )
    }

    pub fn build_ingestor(&self) -> Result<Ingestor, TrainError> {
        let mut ingestor = Ingestor::new(self.delimiter, self.latency_unit);
        for (name, schema) in &self.schemas {
            let stage: Stage = name.parse()?;
            ingestor = ingestor.with_schema(stage, RecordSchema::new(schema.columns.clone())?);
        }
        Ok(ingestor)
    }

    // =========================================================================
    // DURATIONS
    // =========================================================================

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    /// `<output_dir>/subject_<id>`.
    pub fn subject_dir(&self) -> PathBuf {
        self.output_dir.join(format!("subject_{}", self.subject))
    }
}

// =============================================================================
// TESTS
// =============================================================================
