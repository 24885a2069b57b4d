//! # Curriculum Primitives
//!
//! Fixed constants of the training curriculum.
//!
//! All time values are milliseconds. Data files that record seconds are
//! converted when rows are parsed (see [`crate::ingestor::LatencyUnit`]).

/// Qualifying trials needed to leave habituation stage 1.
pub const HAB1_MIN_COUNT: u64 = 30;

/// Qualifying trials needed to leave habituation stage 2.
pub const HAB2_MIN_COUNT: u64 = 70;

/// Correct responses needed to leave any attention stage.
pub const MIN_CORRECT_RESPONSES: u64 = 30;

/// Qualifying trials needed to leave any go/no-go stage.
pub const GO_NOGO_MIN_COUNT: u64 = 30;

/// Mean correct latency bound for variable-ITI and go/no-go stages.
pub const FAST_LATENCY_LIMIT_MS: u64 = 1_500;

/// The shortest fixed stimulus duration in the curriculum.
///
/// Its latency bound is three quarters of the duration rather than half.
pub const SHORTEST_STIMULUS_MS: u64 = 2_000;

/// Hundredths of a percent in 100 %.
pub const PERCENT_SCALE: i64 = 10_000;

/// Width of the dashed line that terminates each persisted snapshot block.
pub const SNAPSHOT_SEPARATOR_WIDTH: usize = 40;

/// Decimal digits added when converting seconds to milliseconds.
pub const SECONDS_TO_MILLIS_DIGITS: u32 = 3;
