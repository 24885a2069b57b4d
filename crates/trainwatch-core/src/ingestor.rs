//! # Ingestor Module
//!
//! Row splitting, validation and parsing for the trial data source.
//!
//! - Split a byte chunk into complete lines with their end offsets
//! - Recognise the header row
//! - Parse a data row against the stage's column schema
//! - Convert time fields to milliseconds at this boundary
//! - Reject malformed rows; never guess a value

use crate::TrainError;
use crate::curriculum::Stage;
use crate::primitives::SECONDS_TO_MILLIS_DIGITS;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// TRIAL RECORD
// =============================================================================

/// One behavioral trial, as appended by the device.
///
/// Time fields are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrialRecord {
    pub stimulus_duration_ms: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub premature: u64,
    pub omission: u64,
    pub correct_withholding: u64,
    pub incorrect_withholding: u64,
    pub correct_latency_ms: u64,
    pub incorrect_latency_ms: u64,
    pub reward_latency_ms: u64,
    pub premature_latency_ms: u64,
    pub inter_trial_ms: u64,
}

// =============================================================================
// COLUMN SCHEMA
// =============================================================================

/// A column of the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    StimulusDuration,
    Correct,
    Incorrect,
    Premature,
    Omission,
    CorrectWithholding,
    IncorrectWithholding,
    CorrectLatency,
    IncorrectLatency,
    RewardLatency,
    PrematureLatency,
    InterTrialDuration,
    /// Present in the file but not used.
    Ignore,
}

impl Column {
    /// Whether the column holds a time value subject to unit conversion.
    #[must_use]
    pub fn is_time(&self) -> bool {
        matches!(
            self,
            Column::StimulusDuration
                | Column::CorrectLatency
                | Column::IncorrectLatency
                | Column::RewardLatency
                | Column::PrematureLatency
                | Column::InterTrialDuration
        )
    }

    fn assign(&self, record: &mut TrialRecord, value: u64) {
        let slot = match self {
            Column::StimulusDuration => &mut record.stimulus_duration_ms,
            Column::Correct => &mut record.correct,
            Column::Incorrect => &mut record.incorrect,
            Column::Premature => &mut record.premature,
            Column::Omission => &mut record.omission,
            Column::CorrectWithholding => &mut record.correct_withholding,
            Column::IncorrectWithholding => &mut record.incorrect_withholding,
            Column::CorrectLatency => &mut record.correct_latency_ms,
            Column::IncorrectLatency => &mut record.incorrect_latency_ms,
            Column::RewardLatency => &mut record.reward_latency_ms,
            Column::PrematureLatency => &mut record.premature_latency_ms,
            Column::InterTrialDuration => &mut record.inter_trial_ms,
            Column::Ignore => return,
        };
        *slot = value;
    }
}

/// Ordered column layout of a data row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSchema {
    columns: Vec<Column>,
}

impl RecordSchema {
    /// The layout the device writes in every stage:
    /// outcome counts, withholding counts, then cumulative latencies.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            columns: vec![
                Column::Correct,
                Column::Incorrect,
                Column::Premature,
                Column::Omission,
                Column::CorrectWithholding,
                Column::IncorrectWithholding,
                Column::CorrectLatency,
                Column::IncorrectLatency,
                Column::RewardLatency,
                Column::PrematureLatency,
            ],
        }
    }

    /// Build a custom layout.
    ///
    /// Columns other than `Ignore` may appear at most once.
    pub fn new(columns: Vec<Column>) -> Result<Self, TrainError> {
        if columns.is_empty() {
            return Err(TrainError::InvalidConfig(
                "record schema has no columns".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for column in columns.iter().filter(|c| **c != Column::Ignore) {
            if !seen.insert(*column) {
                return Err(TrainError::InvalidConfig(format!(
                    "column {:?} appears more than once in the record schema",
                    column
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Columns in file order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of columns a row must have at least.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always false; schemas are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self::standard()
    }
}

/// Unit of time fields in the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyUnit {
    #[default]
    Milliseconds,
    Seconds,
}

impl LatencyUnit {
    fn scale_digits(self) -> u32 {
        match self {
            LatencyUnit::Milliseconds => 0,
            LatencyUnit::Seconds => SECONDS_TO_MILLIS_DIGITS,
        }
    }
}

// =============================================================================
// SOURCE LINES
// =============================================================================

/// A complete line taken from the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLine<'a> {
    /// Line text without its terminator.
    pub text: &'a str,
    /// Byte offset just past this line's terminator.
    pub end_offset: u64,
    /// The first line of the file.
    pub is_header: bool,
}

impl SourceLine<'_> {
    /// Blank lines are consumed but are not trials.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

// =============================================================================
// INGESTOR
// =============================================================================

/// Parses data rows according to per-stage schemas.
#[derive(Debug, Clone)]
pub struct Ingestor {
    default_schema: RecordSchema,
    overrides: BTreeMap<Stage, RecordSchema>,
    delimiter: char,
    unit: LatencyUnit,
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new('\t', LatencyUnit::Milliseconds)
    }
}

impl Ingestor {
    /// Create an ingestor using the standard schema for every stage.
    #[must_use]
    pub fn new(delimiter: char, unit: LatencyUnit) -> Self {
        Self {
            default_schema: RecordSchema::standard(),
            overrides: BTreeMap::new(),
            delimiter,
            unit,
        }
    }

    /// Use `schema` for rows recorded while in `stage`.
    #[must_use]
    pub fn with_schema(mut self, stage: Stage, schema: RecordSchema) -> Self {
        self.overrides.insert(stage, schema);
        self
    }

    /// Use `schema` for every stage without an override.
    #[must_use]
    pub fn with_default_schema(mut self, schema: RecordSchema) -> Self {
        self.default_schema = schema;
        self
    }

    /// The schema for `stage`.
    #[must_use]
    pub fn schema_for(&self, stage: Stage) -> &RecordSchema {
        self.overrides.get(&stage).unwrap_or(&self.default_schema)
    }

    /// Split `chunk`, read from byte `base_offset` of the source, into lines.
    ///
    /// With `require_terminator`, a trailing fragment without `\n` is left out
    /// (it may be a partial write). The first line of the file (`base_offset`
    /// of 0) is flagged as the header. `\r\n` terminators are accepted.
    #[must_use]
    pub fn split_lines(
        chunk: &str,
        base_offset: u64,
        require_terminator: bool,
    ) -> Vec<SourceLine<'_>> {
        let mut lines = Vec::new();
        let mut cursor = 0usize;

        while cursor < chunk.len() {
            let rest = &chunk[cursor..];
            let (raw, advance) = match rest.find('\n') {
                Some(pos) => (&rest[..pos], pos.saturating_add(1)),
                None if require_terminator => break,
                None => (rest, rest.len()),
            };
            let start_offset = base_offset.saturating_add(cursor as u64);
            cursor = cursor.saturating_add(advance);
            lines.push(SourceLine {
                text: raw.strip_suffix('\r').unwrap_or(raw),
                end_offset: base_offset.saturating_add(cursor as u64),
                is_header: start_offset == 0,
            });
        }

        lines
    }

    /// Parse one data row recorded while in `stage`.
    ///
    /// `row` is the 1-based data row number, used in error messages.
    pub fn parse(&self, stage: Stage, row: u64, line: &str) -> Result<TrialRecord, TrainError> {
        let schema = self.schema_for(stage);
        let fields: Vec<&str> = line.split(self.delimiter).map(str::trim).collect();

        if fields.len() < schema.len() {
            return Err(TrainError::MalformedRow {
                row,
                reason: format!(
                    "expected {} fields for stage {}, found {}",
                    schema.len(),
                    stage,
                    fields.len()
                ),
            });
        }

        let mut record = TrialRecord::default();
        for (column, text) in schema.columns().iter().zip(&fields) {
            if *column == Column::Ignore {
                continue;
            }
            let digits = if column.is_time() {
                self.unit.scale_digits()
            } else {
                0
            };
            let value = parse_scaled(text, digits).ok_or_else(|| TrainError::MalformedRow {
                row,
                reason: format!("field {:?} is not a non-negative number: {:?}", column, text),
            })?;
            column.assign(&mut record, value);
        }

        Ok(record)
    }
}

// =============================================================================
// FIXED-POINT PARSING
// =============================================================================

/// Parse a non-negative decimal (optionally in exponent form) and scale it by
/// `10^scale_digits`, rounding half up to an integer.
///
/// `"1.5"` with 3 digits is `1500`; `"1.000000000000000000e+00"` is `1`.
/// Negative non-zero values, `nan`, `inf` and empty text are rejected.
#[must_use]
pub fn parse_scaled(text: &str, scale_digits: u32) -> Option<u64> {
    let text = text.trim();
    let (mantissa, exponent) = match text.find(['e', 'E']) {
        Some(pos) => (&text[..pos], text[pos.saturating_add(1)..].parse::<i32>().ok()?),
        None => (text, 0),
    };
    let (negative, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, mantissa.strip_prefix('+').unwrap_or(mantissa)),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut value: u128 = 0;
    for b in int_part.bytes().chain(frac_part.bytes()) {
        value = value.checked_mul(10)?.checked_add(u128::from(b - b'0'))?;
    }

    let shift = i64::from(exponent) - frac_part.len() as i64 + i64::from(scale_digits);
    let scaled = if shift >= 0 {
        let factor = 10u128.checked_pow(u32::try_from(shift).ok()?)?;
        value.checked_mul(factor)?
    } else {
        match u32::try_from(-shift).ok().and_then(|s| 10u128.checked_pow(s)) {
            Some(divisor) => value.saturating_add(divisor / 2) / divisor,
            None => 0,
        }
    };

    if negative && scaled != 0 {
        return None;
    }
    u64::try_from(scaled).ok()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scaled_plain_and_decimal() {
        assert_eq!(parse_scaled("0", 0), Some(0));
        assert_eq!(parse_scaled("42", 0), Some(42));
        assert_eq!(parse_scaled("1.0", 0), Some(1));
        assert_eq!(parse_scaled("523.4", 0), Some(523));
        assert_eq!(parse_scaled("523.5", 0), Some(524));
        assert_eq!(parse_scaled("1.5", 3), Some(1_500));
        assert_eq!(parse_scaled(".25", 3), Some(250));
    }

    #[test]
    fn parse_scaled_exponent_form() {
        assert_eq!(parse_scaled("1.000000000000000000e+00", 0), Some(1));
        assert_eq!(parse_scaled("4.500000000000000000e+03", 0), Some(4_500));
        assert_eq!(parse_scaled("2E-3", 3), Some(2));
    }

    #[test]
    fn parse_scaled_rejects_garbage() {
        assert_eq!(parse_scaled("", 0), None);
        assert_eq!(parse_scaled("-1", 0), None);
        assert_eq!(parse_scaled("nan", 0), None);
        assert_eq!(parse_scaled("inf", 0), None);
        assert_eq!(parse_scaled("1.2.3", 0), None);
        assert_eq!(parse_scaled("12a", 0), None);
        assert_eq!(parse_scaled("-0", 0), Some(0));
    }

    #[test]
    fn split_lines_flags_header_and_holds_back_fragment() {
        let chunk = "Corr\tIncorr\n1\t0\n0\t1\n1\t";
        let lines = Ingestor::split_lines(chunk, 0, true);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].is_header);
        assert!(!lines[1].is_header);
        assert_eq!(lines[1].text, "1\t0");
        assert_eq!(lines[2].end_offset, 20);

        let all = Ingestor::split_lines(chunk, 0, false);
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].end_offset, chunk.len() as u64);
    }

    #[test]
    fn split_lines_from_offset_has_no_header() {
        let lines = Ingestor::split_lines("1\t0\r\n", 12, true);
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].is_header);
        assert_eq!(lines[0].text, "1\t0");
        assert_eq!(lines[0].end_offset, 17);
    }

    #[test]
    fn parse_standard_row() {
        let ingestor = Ingestor::default();
        let record = ingestor
            .parse(Stage::Hab1, 1, "1\t0\t0\t0\t0\t0\t850\t0\t400\t0")
            .expect("parse");
        assert_eq!(record.correct, 1);
        assert_eq!(record.correct_latency_ms, 850);
        assert_eq!(record.reward_latency_ms, 400);
    }

    #[test]
    fn parse_converts_seconds() {
        let ingestor = Ingestor::new(',', LatencyUnit::Seconds);
        let record = ingestor
            .parse(Stage::Hab1, 1, "1,0,0,0,0,0,0.85,0,1.2,0")
            .expect("parse");
        assert_eq!(record.correct, 1);
        assert_eq!(record.correct_latency_ms, 850);
        assert_eq!(record.reward_latency_ms, 1_200);
    }

    #[test]
    fn parse_rejects_short_and_bad_rows() {
        let ingestor = Ingestor::default();
        let short = ingestor.parse(Stage::Hab1, 7, "1\t0\t0");
        assert!(matches!(short, Err(TrainError::MalformedRow { row: 7, .. })));

        let bad = ingestor.parse(Stage::Hab1, 8, "1\tx\t0\t0\t0\t0\t0\t0\t0\t0");
        assert!(matches!(bad, Err(TrainError::MalformedRow { row: 8, .. })));
    }

    #[test]
    fn stage_schema_override() {
        let schema = RecordSchema::new(vec![
            Column::StimulusDuration,
            Column::Correct,
            Column::Incorrect,
            Column::Ignore,
            Column::Omission,
        ])
        .expect("schema");
        let ingestor = Ingestor::default().with_schema(Stage::FiveCsr, schema);

        let record = ingestor
            .parse(Stage::FiveCsr, 1, "4000\t1\t0\t9\t0")
            .expect("parse");
        assert_eq!(record.stimulus_duration_ms, 4_000);
        assert_eq!(record.correct, 1);
        assert_eq!(record.omission, 0);

        // Other stages keep the standard layout.
        assert_eq!(ingestor.schema_for(Stage::Hab1).len(), 10);
    }

    #[test]
    fn schema_rejects_duplicate_columns() {
        assert!(RecordSchema::new(vec![Column::Correct, Column::Correct]).is_err());
        assert!(RecordSchema::new(vec![Column::Ignore, Column::Ignore, Column::Correct]).is_ok());
        assert!(RecordSchema::new(vec![]).is_err());
    }
}
