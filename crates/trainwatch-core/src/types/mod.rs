//! # Core Type Definitions
//!
//! Shared value types for the Trainwatch curriculum engine:
//! - Fixed-point percentages (`Percent`)
//! - Error types (`TrainError`, `ErrorKind`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` where they are used as `BTreeMap` keys
//! - Use saturating or widened arithmetic to prevent overflow

use crate::curriculum::Stage;
use crate::primitives::PERCENT_SCALE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// PERCENT
// =============================================================================

/// A percentage stored as hundredths of a percent.
///
/// `Percent(10_000)` is 100.00 %, `Percent(1_250)` is 12.50 %. Differences of
/// percentages may be negative, hence the signed representation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Percent(pub i64);

impl Percent {
    /// 0.00 %
    pub const ZERO: Percent = Percent(0);

    /// 100.00 %
    pub const FULL: Percent = Percent(PERCENT_SCALE);

    /// Compute `numerator / denominator` as a percentage, rounded half up.
    ///
    /// A zero denominator yields `Percent::ZERO`; there is no undefined result.
    #[must_use]
    pub fn ratio(numerator: u64, denominator: u64) -> Self {
        if denominator == 0 {
            return Self::ZERO;
        }
        let num = u128::from(numerator).saturating_mul(2 * PERCENT_SCALE as u128);
        let den = u128::from(denominator);
        let rounded = num.saturating_add(den) / (2 * den);
        Self(i64::try_from(rounded).unwrap_or(i64::MAX))
    }

    /// Signed difference `self - other`.
    #[must_use]
    pub const fn minus(self, other: Percent) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Raw value in hundredths of a percent.
    #[must_use]
    pub const fn hundredths(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Percent {
    /// Renders with two decimals, e.g. `66.67` or `-12.50`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Coarse classification of a [`TrainError`].
///
/// The runtime decides what to do with an error from its kind alone:
/// only `Configuration` stops a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing, empty or malformed data source. Skip the cycle.
    Ingestion,
    /// Unknown stage, invalid sequence or schema. Fatal.
    Configuration,
    /// No ping within the handshake bound. Skip the publish.
    Coordination,
    /// Snapshot persistence, rendering or bus I/O. Logged only.
    Output,
    /// The session has already finished.
    Lifecycle,
}

/// Errors that can occur in the Trainwatch system.
///
/// - No silent failures
/// - Use `Result<T, TrainError>` for fallible operations
/// - The CORE never panics; the caller classifies errors via [`TrainError::kind`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrainError {
    /// A stage name did not match any stage in the catalogue.
    #[error("Unknown stage: {0:?}")]
    UnknownStage(String),

    /// A stage is not a member of the configured sequence.
    #[error("Stage {0} is not part of the configured sequence")]
    StageNotInSequence(Stage),

    /// The criterion table has no entry for a stage.
    #[error("No criterion configured for stage {0}")]
    MissingCriterion(Stage),

    /// A stage sequence, schema or configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The data source does not exist or cannot be read.
    #[error("Data source unavailable: {0}")]
    SourceUnavailable(String),

    /// The data source exists but holds no data.
    #[error("Data source is empty")]
    EmptySource,

    /// A complete data row could not be parsed.
    #[error("Malformed row {row}: {reason}")]
    MalformedRow { row: u64, reason: String },

    /// No ping arrived within the handshake bound.
    #[error("No ping received within {waited_ms}ms")]
    CoordinationTimeout { waited_ms: u64 },

    /// A metrics snapshot could not be appended.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The visualization sink failed.
    #[error("Render error: {0}")]
    Render(String),

    /// The pub/sub transport failed.
    #[error("Bus error: {0}")]
    Bus(String),

    /// A record was offered to a session that has already finished.
    #[error("Session already finished ({0})")]
    SessionFinished(String),
}

impl TrainError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrainError::UnknownStage(_)
            | TrainError::StageNotInSequence(_)
            | TrainError::MissingCriterion(_)
            | TrainError::InvalidConfig(_) => ErrorKind::Configuration,
            TrainError::SourceUnavailable(_)
            | TrainError::EmptySource
            | TrainError::MalformedRow { .. } => ErrorKind::Ingestion,
            TrainError::CoordinationTimeout { .. } => ErrorKind::Coordination,
            TrainError::Persistence(_) | TrainError::Render(_) | TrainError::Bus(_) => {
                ErrorKind::Output
            }
            TrainError::SessionFinished(_) => ErrorKind::Lifecycle,
        }
    }

    /// Whether this error must stop the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_with_zero_denominator_is_zero() {
        assert_eq!(Percent::ratio(0, 0), Percent::ZERO);
        assert_eq!(Percent::ratio(5, 0), Percent::ZERO);
    }

    #[test]
    fn ratio_rounds_half_up() {
        // 2/3 = 66.666..% -> 66.67
        assert_eq!(Percent::ratio(2, 3), Percent(6_667));
        // 1/3 = 33.333..% -> 33.33
        assert_eq!(Percent::ratio(1, 3), Percent(3_333));
        assert_eq!(Percent::ratio(4, 4), Percent::FULL);
    }

    #[test]
    fn display_uses_two_decimals() {
        assert_eq!(Percent(6_667).to_string(), "66.67");
        assert_eq!(Percent(5).to_string(), "0.05");
        assert_eq!(Percent(-1_250).to_string(), "-12.50");
        assert_eq!(Percent::ZERO.to_string(), "0.00");
    }

    #[test]
    fn only_configuration_errors_are_fatal() {
        assert!(TrainError::UnknownStage("x".into()).is_fatal());
        assert!(TrainError::InvalidConfig("x".into()).is_fatal());
        assert!(!TrainError::EmptySource.is_fatal());
        assert!(!TrainError::CoordinationTimeout { waited_ms: 10 }.is_fatal());
        assert!(!TrainError::Render("x".into()).is_fatal());
        assert_eq!(
            TrainError::MalformedRow {
                row: 3,
                reason: "x".into()
            }
            .kind(),
            ErrorKind::Ingestion
        );
    }
}
