//! End-to-end runs over the in-process bus with a simulated device.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use trainwatch::bus::{Bus, LocalBus};
use trainwatch::config::RunConfig;
use trainwatch::runtime::{self, StopReason};
use trainwatch_core::{Criterion, FinishReason, Stage, TrainError};

const HEADER: &str = "Correct\tIncorrect\tPremature\tOmission\tCW\tIW\tCL\tIL\tRL\tPL\n";
const REWARDED: &str = "0\t0\t0\t0\t0\t0\t0\t0\t500\t0\n";

fn config(root: &Path) -> RunConfig {
    let mut criteria = BTreeMap::new();
    criteria.insert("hab1".to_string(), Criterion::Count { min_count: 2 });
    RunConfig {
        subject: "9".to_string(),
        terminate_stage: Some("hab2".to_string()),
        data_file: root.join("test.txt"),
        output_dir: root.join("output"),
        debounce_ms: 0,
        poll_interval_ms: 10,
        handshake_timeout_secs: 5,
        duration_secs: Some(30),
        criteria,
        ..RunConfig::default()
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

/// Ping until something appears on the stage topic.
async fn ping_until_announced(bus: &LocalBus) -> Vec<String> {
    for _ in 0..500 {
        let announced = bus.published_on("subject_9/stage");
        if !announced.is_empty() {
            return announced;
        }
        bus.publish("subject_9/request", "ping").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no stage was announced");
}

async fn wait_for_file(path: &Path) -> String {
    for _ in 0..500 {
        if let Ok(text) = std::fs::read_to_string(path)
            && !text.is_empty()
        {
            return text;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} was never written", path.display());
}

#[tokio::test]
async fn subject_runs_from_announcement_to_terminate_stage() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    append(&config.data_file, HEADER);

    let bus = LocalBus::new();
    let run = tokio::spawn({
        let config = config.clone();
        let bus: Arc<dyn Bus> = Arc::new(bus.clone());
        async move { runtime::run(&config, bus).await }
    });

    // The device is told where to start before any trial is run.
    assert_eq!(ping_until_announced(&bus).await, vec!["hab1"]);

    bus.publish("subject_9/data", "session started").unwrap();
    let forwarded = wait_for_file(&dir.path().join("output").join("subject_9.txt")).await;
    assert_eq!(forwarded, "session started\n");

    append(&config.data_file, REWARDED);
    append(&config.data_file, REWARDED);

    let summary = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(summary.stop, StopReason::Finished);
    assert_eq!(summary.final_stage, Stage::Hab2);
    assert_eq!(
        summary.finished,
        Some(FinishReason::TerminateStage { stage: Stage::Hab2 })
    );
    assert_eq!(summary.trials_applied, 2);
    // The terminate stage is never announced.
    assert!(!bus.published_on("subject_9/stage").contains(&"hab2".to_string()));

    let log = std::fs::read_to_string(
        dir.path()
            .join("output")
            .join("subject_9")
            .join("hab1")
            .join("data.txt"),
    )
    .unwrap();
    assert_eq!(log.matches("Total Trials:").count(), 2);
    assert!(log.contains("Count: 2\n"));
}

#[tokio::test]
async fn duration_bounds_an_idle_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.duration_secs = Some(1);
    config.reset_output = true;
    append(&config.data_file, HEADER);

    let stale = dir.path().join("output").join("subject_9").join("old.txt");
    std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
    std::fs::write(&stale, "old").unwrap();

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        runtime::run(&config, Arc::new(LocalBus::new())),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.stop, StopReason::DurationElapsed);
    assert_eq!(summary.final_stage, Stage::Hab1);
    assert_eq!(summary.finished, None);
    assert!(!stale.exists());
    assert!(dir.path().join("output").join("subject_9").is_dir());
}

#[tokio::test]
async fn invalid_configuration_stops_before_starting() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.start_stage = "stage9".to_string();

    let result = runtime::run(&config, Arc::new(LocalBus::new())).await;

    assert_eq!(result, Err(TrainError::UnknownStage("stage9".to_string())));
    assert!(!dir.path().join("output").exists());
}

#[tokio::test]
async fn session_starting_at_terminate_stage_ends_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.start_stage = "hab2".to_string();
    let bus = LocalBus::new();

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        runtime::run(&config, Arc::new(bus.clone())),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.stop, StopReason::Finished);
    assert_eq!(summary.trials_applied, 0);
    assert!(bus.published().is_empty());
}
