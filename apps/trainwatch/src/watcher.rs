//! # Ingestion Watcher
//!
//! Observes the append-only data file and feeds new rows to the session.
//!
//! ## Change detection
//!
//! The file's length and modification time are polled on an interval. A
//! changed stamp is a change notification; the [`Debouncer`] drops
//! notifications that follow an accepted one too closely. A dropped
//! notification leaves the stamp unrecorded, so the next poll raises it again
//! and no append is ever lost.
//!
//! ## Reading
//!
//! Reads resume at the session cursor. Only complete lines are consumed; a
//! partial trailing write stays for the next read. If the file shrinks below
//! the cursor it was replaced: the cursor is rebased to the new end and the
//! new contents are not replayed.

use crate::gateway::request_announcement;
use crate::runtime::SharedSession;
use crate::sinks::Outputs;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use trainwatch_core::{FinishReason, Ingestor, TrainError, Transition};

// =============================================================================
// DEBOUNCE
// =============================================================================

/// Drops notifications that arrive within `window` of the last accepted one.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    /// Accept or drop a notification observed at `now`.
    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted
            && now.saturating_duration_since(last) < self.window
        {
            return false;
        }
        self.last_accepted = Some(now);
        true
    }
}

// =============================================================================
// SOURCE STAMP
// =============================================================================

/// File metadata that changes whenever the device appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStamp {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl SourceStamp {
    pub async fn of(path: &Path) -> Result<Self, TrainError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| TrainError::SourceUnavailable(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Stamp unchanged since the last accepted notification.
    Unchanged,
    /// A change was seen but fell inside the debounce window.
    Debounced,
    /// New data was read.
    Ingested(IngestSummary),
}

/// What one read did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub applied: usize,
    pub skipped: usize,
    pub advanced: bool,
    pub rebased: bool,
    pub finished: Option<FinishReason>,
}

/// Why the watcher loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherExit {
    Finished(FinishReason),
    Stopped,
}

// =============================================================================
// WATCHER
// =============================================================================

/// Polls one data file on behalf of one session.
pub struct Watcher {
    path: PathBuf,
    session: SharedSession,
    ingestor: Ingestor,
    require_terminator: bool,
    debouncer: Debouncer,
    seen: Option<SourceStamp>,
    outputs: Outputs,
    announcements: watch::Sender<u64>,
    last_problem: Option<String>,
}

impl Watcher {
    pub fn new(
        path: impl Into<PathBuf>,
        session: SharedSession,
        ingestor: Ingestor,
        require_terminator: bool,
        debounce: Duration,
        outputs: Outputs,
        announcements: watch::Sender<u64>,
    ) -> Self {
        Self {
            path: path.into(),
            session,
            ingestor,
            require_terminator,
            debouncer: Debouncer::new(debounce),
            seen: None,
            outputs,
            announcements,
            last_problem: None,
        }
    }

    /// Check the file once and ingest if a notification is accepted.
    pub async fn poll(&mut self) -> Result<PollOutcome, TrainError> {
        let stamp = SourceStamp::of(&self.path).await?;
        if self.seen == Some(stamp) {
            return Ok(PollOutcome::Unchanged);
        }
        if !self.debouncer.admit(Instant::now()) {
            return Ok(PollOutcome::Debounced);
        }
        self.seen = Some(stamp);
        if stamp.len == 0 {
            return Err(TrainError::EmptySource);
        }
        tracing::debug!(path = %self.path.display(), len = stamp.len, "Data file changed");
        self.ingest().await.map(PollOutcome::Ingested)
    }

    /// Read everything past the cursor and apply it.
    pub async fn ingest(&mut self) -> Result<IngestSummary, TrainError> {
        let offset = self.session.lock().await.cursor().offset;
        let unavailable =
            |e: std::io::Error| TrainError::SourceUnavailable(format!("{}: {}", self.path.display(), e));

        let mut file = tokio::fs::File::open(&self.path).await.map_err(unavailable)?;
        let len = file.metadata().await.map_err(unavailable)?.len();
        let mut summary = IngestSummary::default();

        if len < offset {
            let mut session = self.session.lock().await;
            if session.cursor().offset == offset {
                session.rebase(len);
            }
            tracing::warn!(
                path = %self.path.display(),
                offset,
                len,
                "Data file shrank; treating it as replaced and resuming at its end"
            );
            summary.rebased = true;
            return Ok(summary);
        }

        file.seek(SeekFrom::Start(offset)).await.map_err(unavailable)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await.map_err(unavailable)?;

        let (text, undecodable) = decodable_prefix(&bytes);
        let lines = Ingestor::split_lines(text, offset, self.require_terminator);

        let (report, finished) = {
            let mut session = self.session.lock().await;
            let report = session.ingest_lines(offset, &lines, &self.ingestor)?;
            if let Some(bad) = undecodable
                && !report.stale
                && !session.is_finished()
                && session.cursor().offset == offset.saturating_add(bad.line_start)
            {
                session.rebase(offset.saturating_add(bad.next_line));
                summary.skipped = 1;
                tracing::warn!(
                    offset = offset.saturating_add(bad.line_start),
                    "Skipping a line that is not valid UTF-8"
                );
            }
            (report, session.finished())
        };

        if report.stale {
            tracing::debug!(offset, "Read overtaken by another read; discarded");
        }
        for err in &report.skipped {
            tracing::warn!("Skipping row: {}", err);
        }
        for update in &report.updates {
            self.outputs.record(&update.snapshot).await;
            log_transition(&update.transition);
        }

        summary.applied = report.updates.len();
        summary.skipped = summary.skipped.saturating_add(report.skipped.len());
        summary.advanced = report.advanced();
        summary.finished = finished;

        if summary.applied > 0 && finished.is_none() {
            request_announcement(&self.announcements);
        }
        Ok(summary)
    }

    /// Poll until the session finishes, a fatal error occurs, or shutdown.
    pub async fn run(
        mut self,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<WatcherExit, TrainError> {
        if let Some(reason) = self.session.lock().await.finished() {
            return Ok(WatcherExit::Finished(reason));
        }

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(path = %self.path.display(), "Watching data file");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return Ok(WatcherExit::Stopped),
            }

            match self.poll().await {
                Ok(PollOutcome::Ingested(summary)) => {
                    self.last_problem = None;
                    if let Some(reason) = summary.finished {
                        return Ok(WatcherExit::Finished(reason));
                    }
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.report_problem(&e),
            }
        }
    }

    /// Log a recoverable problem once per distinct message.
    fn report_problem(&mut self, err: &TrainError) {
        let message = err.to_string();
        if self.last_problem.as_deref() != Some(message.as_str()) {
            tracing::warn!("Skipping cycle: {}", message);
            self.last_problem = Some(message);
        }
    }
}

/// A complete line holding bytes that are not UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Undecodable {
    /// Offset of the start of the offending line, relative to the read.
    line_start: u64,
    /// Offset just past the offending line's newline.
    next_line: u64,
}

/// The longest valid UTF-8 prefix of `bytes`.
///
/// When the prefix is followed by undecodable bytes rather than a truncated
/// character, and the offending line is complete, also locates that line so
/// it can be stepped over.
fn decodable_prefix(bytes: &[u8]) -> (&str, Option<Undecodable>) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text, None),
        Err(e) => {
            let valid = e.valid_up_to();
            let prefix = std::str::from_utf8(&bytes[..valid]).unwrap_or_default();
            let line_start = prefix.rfind('\n').map_or(0, |pos| pos + 1) as u64;
            let bad = e.error_len().and_then(|_| {
                bytes[valid..]
                    .iter()
                    .position(|b| *b == b'\n')
                    .map(|pos| Undecodable {
                        line_start,
                        next_line: (valid + pos + 1) as u64,
                    })
            });
            (prefix, bad)
        }
    }
}

fn log_transition(transition: &Transition) {
    match transition {
        Transition::Stay { .. } => {}
        Transition::Advance { from, to } => {
            tracing::info!(from = %from, to = %to, "Criterion met; advancing");
        }
        Transition::Finish { from, reason, .. } => {
            tracing::info!(from = %from, "Criterion met; session finished: {}", reason);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debouncer_drops_notifications_inside_window() {
        let mut debouncer = Debouncer::new(Duration::from_secs(1));
        let start = Instant::now();
        assert!(debouncer.admit(start));
        assert!(!debouncer.admit(start + Duration::from_millis(999)));
        assert!(debouncer.admit(start + Duration::from_secs(1)));
        // A dropped notification does not extend the window.
        assert!(!debouncer.admit(start + Duration::from_millis(1_500)));
        assert!(debouncer.admit(start + Duration::from_millis(2_000)));
    }

    #[test]
    fn zero_window_admits_everything() {
        let mut debouncer = Debouncer::new(Duration::ZERO);
        let now = Instant::now();
        assert!(debouncer.admit(now));
        assert!(debouncer.admit(now));
    }

    #[test]
    fn decodable_prefix_stops_at_bad_bytes() {
        assert_eq!(decodable_prefix(b"1\t2\n"), ("1\t2\n", None));
        // Truncated multi-byte character: wait for the rest.
        assert_eq!(decodable_prefix(b"1\n\xE2\x82"), ("1\n", None));
        // Invalid byte: the whole line is stepped over.
        assert_eq!(
            decodable_prefix(b"1\n3\xFF2\n4\n"),
            (
                "1\n3",
                Some(Undecodable {
                    line_start: 2,
                    next_line: 6
                })
            )
        );
    }
}
