//! # Runtime
//!
//! Wires the watcher, the gateway and the bus listener around one shared
//! session, and owns shutdown.
//!
//! A run ends when the session finishes, when its duration elapses, on
//! Ctrl-C, or on a configuration error. In every case all tasks are told to
//! stop through one `watch` channel and joined before [`run`] returns.

use crate::bus::{Bus, Topics};
use crate::config::RunConfig;
use crate::gateway::{Gateway, request_announcement};
use crate::sinks::{Outputs, PassthroughSink};
use crate::watcher::{Watcher, WatcherExit};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use trainwatch_core::{FinishReason, Stage, SubjectSession, TrainError};

/// The session handle shared by the watcher and the gateway.
pub type SharedSession = Arc<Mutex<SubjectSession>>;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The terminate stage was reached or the sequence ran out.
    Finished,
    DurationElapsed,
    Interrupted,
}

/// Final state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub subject: String,
    pub final_stage: Stage,
    pub finished: Option<FinishReason>,
    pub trials_applied: u64,
    pub stop: StopReason,
}

/// Run one monitoring session to completion.
pub async fn run(config: &RunConfig, bus: Arc<dyn Bus>) -> Result<RunSummary, TrainError> {
    config.validate()?;
    let session = config.build_session()?;
    let ingestor = config.build_ingestor()?;
    prepare_output(config).await?;

    let subject = session.subject().to_string();
    tracing::info!(
        subject = %subject,
        stage = %session.stage(),
        data_file = %config.data_file.display(),
        "Starting session"
    );

    let already_finished = session.is_finished();
    let shared: SharedSession = Arc::new(Mutex::new(session));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (announce_tx, announce_rx) = watch::channel(0u64);

    let gateway = Arc::new(Gateway::new(
        Topics::for_subject(&subject),
        bus,
        Arc::clone(&shared),
        PassthroughSink::new(&config.output_dir, &subject),
        config.handshake_timeout(),
    ));
    let inbox = gateway.subscribe()?;

    let watcher = Watcher::new(
        &config.data_file,
        Arc::clone(&shared),
        ingestor,
        config.require_line_terminator,
        config.debounce(),
        Outputs::under(&config.output_dir),
        announce_tx.clone(),
    );

    // The device learns the starting stage through the same handshake.
    if !already_finished {
        request_announcement(&announce_tx);
    }

    let listener = tokio::spawn(
        Arc::clone(&gateway).run_listener(inbox, shutdown_rx.clone()),
    );
    let announcer = tokio::spawn(
        Arc::clone(&gateway).run_announcer(announce_rx, shutdown_rx.clone()),
    );
    let mut watcher_task = tokio::spawn(watcher.run(config.poll_interval(), shutdown_rx));

    let duration = config.duration();
    let deadline = async move {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl-C handling unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let (stop, watcher_result) = tokio::select! {
        joined = &mut watcher_task => (StopReason::Finished, Some(flatten(joined))),
        _ = deadline => (StopReason::DurationElapsed, None),
        _ = interrupt => (StopReason::Interrupted, None),
    };

    // Stop everything, then join.
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("All tasks already stopped");
    }
    let watcher_result = match watcher_result {
        Some(result) => result,
        None => flatten(watcher_task.await),
    };
    join("gateway listener", listener).await;
    join("gateway announcer", announcer).await;

    let exit = watcher_result?;
    let stop = match exit {
        WatcherExit::Finished(_) => StopReason::Finished,
        WatcherExit::Stopped => stop,
    };

    let session = shared.lock().await;
    let summary = RunSummary {
        subject,
        final_stage: session.stage(),
        finished: session.finished(),
        trials_applied: session.trials_applied(),
        stop,
    };
    tracing::info!(
        stage = %summary.final_stage,
        trials = summary.trials_applied,
        stop = ?summary.stop,
        "Session ended"
    );
    Ok(summary)
}

/// Create the subject's output directory, clearing it first if configured.
async fn prepare_output(config: &RunConfig) -> Result<(), TrainError> {
    let dir = config.subject_dir();
    if config.reset_output {
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::info!(dir = %dir.display(), "Cleared previous output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(persistence(&dir, e)),
        }
    }
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| persistence(&dir, e))
}

fn persistence(path: &Path, e: std::io::Error) -> TrainError {
    TrainError::Persistence(format!("{}: {}", path.display(), e))
}

fn flatten(
    joined: Result<Result<WatcherExit, TrainError>, tokio::task::JoinError>,
) -> Result<WatcherExit, TrainError> {
    match joined {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Watcher task failed: {}", e);
            Ok(WatcherExit::Stopped)
        }
    }
}

async fn join(name: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::error!(task = name, "Task failed: {}", e);
    }
}
