//! # Output Sinks
//!
//! Consumers of metrics snapshots and device output.
//!
//! - [`SnapshotSink`]: appends a `key: value` block per update to
//!   `subject_<id>/<stage>/data.txt`
//! - [`Renderer`]: turns a snapshot into a visualization artifact;
//!   [`JsonRenderer`] writes `subject_<id>/<stage>/snapshot.json`
//! - [`PassthroughSink`]: appends device data messages to `subject_<id>.txt`
//!
//! Sink failures are logged by the caller and never stop a session.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use trainwatch_core::{
    Percent, Snapshot, Stage, StageMetrics, TrainError, format_snapshot_block, snapshot_path,
};

// =============================================================================
// SNAPSHOT LOG
// =============================================================================

/// Append-only per-stage metrics log.
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    root: PathBuf,
}

impl SnapshotSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where the log for `subject` at `stage` lives.
    pub fn path_for(&self, subject: &str, stage: Stage) -> PathBuf {
        self.root.join(snapshot_path(subject, stage))
    }

    /// Append one block for `snapshot`; returns the file written.
    pub async fn append(&self, snapshot: &Snapshot) -> Result<PathBuf, TrainError> {
        let path = self.path_for(&snapshot.subject, snapshot.stage);
        let block = format_snapshot_block(&snapshot.metrics);
        append_text(&path, &block)
            .await
            .map_err(|e| TrainError::Persistence(format!("{}: {}", path.display(), e)))?;
        Ok(path)
    }
}

async fn append_text(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await
}

// =============================================================================
// VISUALIZATION
// =============================================================================

/// Produces a visualization artifact from a snapshot.
pub trait Renderer: Send + Sync {
    /// Render `snapshot` and return the artifact path.
    fn render(&self, snapshot: &Snapshot) -> Result<PathBuf, TrainError>;
}

/// Which chart a stage gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelKind {
    /// Bar chart of raw outcome counts.
    Counts,
    /// Line chart of derived rates.
    Rates,
}

impl PanelKind {
    pub fn for_stage(stage: Stage) -> Self {
        if stage.family().is_habituation() {
            PanelKind::Counts
        } else {
            PanelKind::Rates
        }
    }
}

/// One labelled value on a panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelPoint {
    pub label: &'static str,
    /// Raw count, or hundredths of a percent on a rates panel.
    pub value: i64,
    pub display: String,
}

/// Renderer-independent chart description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Panel {
    pub title: String,
    pub kind: PanelKind,
    pub points: Vec<PanelPoint>,
}

impl Panel {
    pub fn build(subject: &str, stage: Stage, metrics: &StageMetrics) -> Self {
        let kind = PanelKind::for_stage(stage);
        let points = match kind {
            PanelKind::Counts => vec![
                count_point("Correct", metrics.correct),
                count_point("Incorrect", metrics.incorrect),
                count_point("Omission", metrics.omission),
            ],
            PanelKind::Rates => vec![
                rate_point("Correct %", metrics.correct_pct),
                rate_point("Omission %", metrics.omission_pct),
                rate_point("Correct Withholding %", metrics.correct_withholding_pct),
                rate_point("False Alarm Rate", metrics.false_alarm_rate),
                rate_point("Hit Rate", metrics.hit_rate),
            ],
        };
        Self {
            title: format!("Subject {} - {} Performance", subject, stage),
            kind,
            points,
        }
    }
}

fn count_point(label: &'static str, value: u64) -> PanelPoint {
    PanelPoint {
        label,
        value: i64::try_from(value).unwrap_or(i64::MAX),
        display: value.to_string(),
    }
}

fn rate_point(label: &'static str, value: Percent) -> PanelPoint {
    PanelPoint {
        label,
        value: value.hundredths(),
        display: value.to_string(),
    }
}

#[derive(Serialize)]
struct RenderedSnapshot<'a> {
    subject: &'a str,
    stage: Stage,
    family: &'static str,
    panel: Panel,
    metrics: &'a StageMetrics,
}

/// Writes the panel and the full metrics as pretty JSON.
#[derive(Debug, Clone)]
pub struct JsonRenderer {
    root: PathBuf,
}

impl JsonRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Renderer for JsonRenderer {
    fn render(&self, snapshot: &Snapshot) -> Result<PathBuf, TrainError> {
        let path = self
            .root
            .join(format!("subject_{}", snapshot.subject))
            .join(snapshot.stage.as_str())
            .join("snapshot.json");
        let document = RenderedSnapshot {
            subject: &snapshot.subject,
            stage: snapshot.stage,
            family: snapshot.stage.family().name(),
            panel: Panel::build(&snapshot.subject, snapshot.stage, &snapshot.metrics),
            metrics: &snapshot.metrics,
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| TrainError::Render(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TrainError::Render(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(&path, json)
            .map_err(|e| TrainError::Render(format!("{}: {}", path.display(), e)))?;
        Ok(path)
    }
}

// =============================================================================
// SNAPSHOT FAN-OUT
// =============================================================================

/// The persistence sink and the renderer, driven together after each update.
#[derive(Clone)]
pub struct Outputs {
    snapshots: SnapshotSink,
    renderer: Arc<dyn Renderer>,
}

impl Outputs {
    pub fn new(snapshots: SnapshotSink, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            snapshots,
            renderer,
        }
    }

    /// Standard outputs under `root`.
    pub fn under(root: &Path) -> Self {
        Self::new(SnapshotSink::new(root), Arc::new(JsonRenderer::new(root)))
    }

    /// Persist then render `snapshot`. Failures are logged, not returned.
    pub async fn record(&self, snapshot: &Snapshot) {
        match self.snapshots.append(snapshot).await {
            Ok(path) => tracing::debug!(path = %path.display(), "Metrics saved"),
            Err(e) => tracing::warn!(stage = %snapshot.stage, "Snapshot not saved: {}", e),
        }

        let renderer = Arc::clone(&self.renderer);
        let owned = snapshot.clone();
        match tokio::task::spawn_blocking(move || renderer.render(&owned)).await {
            Ok(Ok(path)) => tracing::debug!(path = %path.display(), "Visualization rendered"),
            Ok(Err(e)) => tracing::warn!(stage = %snapshot.stage, "Render failed: {}", e),
            Err(e) => tracing::warn!(stage = %snapshot.stage, "Render task failed: {}", e),
        }
    }
}

// =============================================================================
// PASSTHROUGH
// =============================================================================

/// Appends device output to `<root>/subject_<id>.txt`, one message per line.
#[derive(Debug, Clone)]
pub struct PassthroughSink {
    path: PathBuf,
}

impl PassthroughSink {
    pub fn new(root: &Path, subject: &str) -> Self {
        Self {
            path: root.join(format!("subject_{}.txt", subject)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `payload` verbatim plus a newline.
    pub async fn append(&self, payload: &str) -> Result<(), TrainError> {
        let mut line = String::with_capacity(payload.len() + 1);
        line.push_str(payload);
        line.push('\n');
        append_text(&self.path, &line)
            .await
            .map_err(|e| TrainError::Persistence(format!("{}: {}", self.path.display(), e)))
    }
}

// =============================================================================
// TESTS
// =============================================================================
