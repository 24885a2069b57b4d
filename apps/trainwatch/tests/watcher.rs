//! Integration tests for the ingestion watcher against real files.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Mutex, watch};
use trainwatch::runtime::SharedSession;
use trainwatch::sinks::Outputs;
use trainwatch::watcher::{PollOutcome, Watcher, WatcherExit};
use trainwatch_core::{
    Criterion, CriterionTable, FinishReason, Ingestor, Sequencer, Stage, StageSequence,
    SubjectSession, TotalTrialsScope, TrainError,
};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

const HEADER: &str = "Correct\tIncorrect\tPremature\tOmission\tCW\tIW\tCL\tIL\tRL\tPL\n";
const REWARDED: &str = "0\t0\t0\t0\t0\t0\t0\t0\t500\t0\n";

struct Fixture {
    dir: TempDir,
    path: PathBuf,
    session: SharedSession,
    announcements: watch::Receiver<u64>,
}

impl Fixture {
    fn new(sequencer: Sequencer) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt");
        let session = Arc::new(Mutex::new(
            SubjectSession::new("3", Stage::Hab1, sequencer, TotalTrialsScope::Stage).unwrap(),
        ));
        let (_, announcements) = watch::channel(0u64);
        Self {
            dir,
            path,
            session,
            announcements,
        }
    }

    fn watcher(&mut self, debounce: Duration) -> Watcher {
        let (tx, rx) = watch::channel(0u64);
        self.announcements = rx;
        Watcher::new(
            &self.path,
            Arc::clone(&self.session),
            Ingestor::default(),
            true,
            debounce,
            Outputs::under(&self.dir.path().join("output")),
            tx,
        )
    }

    fn output(&self) -> PathBuf {
        self.dir.path().join("output").join("subject_3")
    }
}

fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

fn ingested(outcome: PollOutcome) -> trainwatch::watcher::IngestSummary {
    match outcome {
        PollOutcome::Ingested(summary) => summary,
        other => panic!("expected an ingest, got {:?}", other),
    }
}

fn quick_hab1(terminate: Option<Stage>) -> Sequencer {
    Sequencer::new(
        StageSequence::standard(),
        CriterionTable::standard().with(Stage::Hab1, Criterion::Count { min_count: 2 }),
        terminate,
    )
    .unwrap()
}

// =============================================================================
// INGESTION
// =============================================================================

#[tokio::test]
async fn appended_rows_are_applied_once() {
    let mut fx = Fixture::new(Sequencer::standard(None));
    let mut watcher = fx.watcher(Duration::ZERO);

    append(&fx.path, HEADER);
    append(&fx.path, REWARDED);
    append(&fx.path, REWARDED);
    assert_eq!(ingested(watcher.poll().await.unwrap()).applied, 2);
    assert_eq!(watcher.poll().await.unwrap(), PollOutcome::Unchanged);

    append(&fx.path, REWARDED);
    assert_eq!(ingested(watcher.poll().await.unwrap()).applied, 1);

    let session = fx.session.lock().await;
    assert_eq!(session.cursor().rows, 3);
    assert_eq!(session.metrics().count, 3);
    assert!(*fx.announcements.borrow_and_update() >= 1);

    let log = std::fs::read_to_string(fx.output().join("hab1").join("data.txt")).unwrap();
    assert_eq!(log.matches("Total Trials:").count(), 3);
    assert!(fx.output().join("hab1").join("snapshot.json").exists());
}

#[tokio::test]
async fn partial_line_waits_for_its_terminator() {
    let mut fx = Fixture::new(Sequencer::standard(None));
    let mut watcher = fx.watcher(Duration::ZERO);

    append(&fx.path, HEADER);
    append(&fx.path, "0\t0\t0\t0");
    assert_eq!(ingested(watcher.poll().await.unwrap()).applied, 0);
    assert_eq!(fx.session.lock().await.cursor().offset, HEADER.len() as u64);

    append(&fx.path, "\t0\t0\t0\t0\t500\t0\n");
    assert_eq!(ingested(watcher.poll().await.unwrap()).applied, 1);
    assert_eq!(fx.session.lock().await.metrics().count, 1);
}

#[tokio::test]
async fn malformed_row_is_skipped() {
    let mut fx = Fixture::new(Sequencer::standard(None));
    let mut watcher = fx.watcher(Duration::ZERO);

    append(&fx.path, HEADER);
    append(&fx.path, "x\ty\n");
    append(&fx.path, REWARDED);
    let summary = ingested(watcher.poll().await.unwrap());

    assert_eq!(summary.applied, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(fx.session.lock().await.cursor().rows, 2);
}

#[tokio::test]
async fn undecodable_line_is_stepped_over() {
    let mut fx = Fixture::new(Sequencer::standard(None));
    let mut watcher = fx.watcher(Duration::ZERO);

    append(&fx.path, HEADER);
    append(&fx.path, REWARDED);
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&fx.path)
        .unwrap();
    file.write_all(b"0\t\xFF\n").unwrap();
    append(&fx.path, REWARDED);

    let summary = ingested(watcher.poll().await.unwrap());
    assert_eq!(summary.applied, 1);
    assert_eq!(summary.skipped, 1);

    // The row after the bad line is read on the next change.
    append(&fx.path, REWARDED);
    assert_eq!(ingested(watcher.poll().await.unwrap()).applied, 2);
    assert_eq!(fx.session.lock().await.metrics().count, 3);
}

#[tokio::test]
async fn empty_or_missing_file_is_reported() {
    let mut fx = Fixture::new(Sequencer::standard(None));
    let mut watcher = fx.watcher(Duration::ZERO);

    assert!(matches!(
        watcher.poll().await,
        Err(TrainError::SourceUnavailable(_))
    ));
    append(&fx.path, "");
    assert_eq!(watcher.poll().await, Err(TrainError::EmptySource));
}

// =============================================================================
// DEBOUNCE AND REPLACEMENT
// =============================================================================

#[tokio::test]
async fn debounced_change_is_picked_up_later() {
    let mut fx = Fixture::new(Sequencer::standard(None));
    let mut watcher = fx.watcher(Duration::from_millis(200));

    append(&fx.path, HEADER);
    append(&fx.path, REWARDED);
    assert_eq!(ingested(watcher.poll().await.unwrap()).applied, 1);

    append(&fx.path, REWARDED);
    assert_eq!(watcher.poll().await.unwrap(), PollOutcome::Debounced);
    assert_eq!(fx.session.lock().await.cursor().rows, 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(ingested(watcher.poll().await.unwrap()).applied, 1);
    assert_eq!(fx.session.lock().await.metrics().count, 2);
}

#[tokio::test]
async fn shrunk_file_is_rebased_without_replay() {
    let mut fx = Fixture::new(Sequencer::standard(None));
    let mut watcher = fx.watcher(Duration::ZERO);

    append(&fx.path, HEADER);
    for _ in 0..3 {
        append(&fx.path, REWARDED);
    }
    assert_eq!(ingested(watcher.poll().await.unwrap()).applied, 3);

    std::fs::write(&fx.path, format!("{}{}", HEADER, REWARDED)).unwrap();
    let summary = ingested(watcher.poll().await.unwrap());
    assert!(summary.rebased);
    assert_eq!(summary.applied, 0);

    append(&fx.path, REWARDED);
    assert_eq!(ingested(watcher.poll().await.unwrap()).applied, 1);
    assert_eq!(fx.session.lock().await.metrics().count, 4);
}

// =============================================================================
// RUN LOOP
// =============================================================================

#[tokio::test]
async fn run_returns_when_terminate_stage_is_reached() {
    let mut fx = Fixture::new(quick_hab1(Some(Stage::Hab2)));
    let watcher = fx.watcher(Duration::ZERO);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    append(&fx.path, HEADER);
    append(&fx.path, REWARDED);
    append(&fx.path, REWARDED);
    // Rows past the finishing one are not applied.
    append(&fx.path, REWARDED);

    let exit = tokio::time::timeout(
        Duration::from_secs(5),
        watcher.run(Duration::from_millis(10), shutdown_rx),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(
        exit,
        WatcherExit::Finished(FinishReason::TerminateStage { stage: Stage::Hab2 })
    );
    let session = fx.session.lock().await;
    assert_eq!(session.stage(), Stage::Hab2);
    assert_eq!(session.trials_applied(), 2);
    assert!(fx.output().join("hab1").join("data.txt").exists());
}

#[tokio::test]
async fn run_stops_on_shutdown_and_survives_a_missing_file() {
    let mut fx = Fixture::new(Sequencer::standard(None));
    let watcher = fx.watcher(Duration::ZERO);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(watcher.run(Duration::from_millis(10), shutdown_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    let exit = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit, WatcherExit::Stopped);
}
