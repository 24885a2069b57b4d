//! # Snapshot Format
//!
//! The append-only per-stage metrics log.
//!
//! Each update appends one block: a `key: value` line per metric followed by
//! a separator line of dashes. Percentages carry two decimals; latencies are
//! integer milliseconds.
//!
//! ```text
//! Total Trials: 4
//! Correct: 2
//! ...
//! Hit Rate: 50.00
//! ----------------------------------------
//! ```

use crate::curriculum::Stage;
use crate::metrics::StageMetrics;
use crate::primitives::SNAPSHOT_SEPARATOR_WIDTH;
use std::path::PathBuf;

/// Ordered `(key, value)` pairs for one block.
#[must_use]
pub fn snapshot_fields(metrics: &StageMetrics) -> Vec<(&'static str, String)> {
    vec![
        ("Total Trials", metrics.total_trials.to_string()),
        ("Correct", metrics.correct.to_string()),
        ("Incorrect", metrics.incorrect.to_string()),
        ("Premature", metrics.premature.to_string()),
        ("Omission", metrics.omission.to_string()),
        ("Correct Withholding", metrics.correct_withholding.to_string()),
        (
            "Incorrect Withholding",
            metrics.incorrect_withholding.to_string(),
        ),
        ("Correct Percentage", metrics.correct_pct.to_string()),
        ("Omission Percentage", metrics.omission_pct.to_string()),
        (
            "Correct Withholding Percentage",
            metrics.correct_withholding_pct.to_string(),
        ),
        (
            "Difference Withholding",
            metrics.difference_withholding.to_string(),
        ),
        ("False Alarm Rate", metrics.false_alarm_rate.to_string()),
        ("Hit Rate", metrics.hit_rate.to_string()),
        ("Count", metrics.count.to_string()),
        (
            "Mean Correct Latency",
            metrics.mean_correct_latency_ms.to_string(),
        ),
        (
            "Mean Incorrect Latency",
            metrics.mean_incorrect_latency_ms.to_string(),
        ),
        (
            "Mean Reward Latency",
            metrics.mean_reward_latency_ms.to_string(),
        ),
        (
            "Mean Premature Latency",
            metrics.mean_premature_latency_ms.to_string(),
        ),
    ]
}

/// Render one block, separator included.
#[must_use]
pub fn format_snapshot_block(metrics: &StageMetrics) -> String {
    let mut block = String::new();
    for (key, value) in snapshot_fields(metrics) {
        block.push_str(key);
        block.push_str(": ");
        block.push_str(&value);
        block.push('\n');
    }
    block.push_str(&"-".repeat(SNAPSHOT_SEPARATOR_WIDTH));
    block.push('\n');
    block
}

/// Relative path of the log for `subject` at `stage`:
/// `subject_<id>/<stage>/data.txt`.
#[must_use]
pub fn snapshot_path(subject: &str, stage: Stage) -> PathBuf {
    PathBuf::from(format!("subject_{}", subject))
        .join(stage.as_str())
        .join("data.txt")
}
