//! # CLI Command Implementations

use crate::bus::{Bus, LocalBus, TcpBus};
use crate::config::RunConfig;
use crate::runtime::{self, RunSummary};
use std::path::Path;
use std::sync::Arc;
use trainwatch_core::{Ingestor, TrainError, Transition};

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Monitor one subject until the run ends.
pub async fn cmd_run(config: &RunConfig, json_mode: bool, quiet: bool) -> Result<(), TrainError> {
    config.validate()?;

    let summary = match &config.endpoint {
        Some(endpoint) => {
            let tcp = Arc::new(TcpBus::connect(endpoint).await?);
            let bus: Arc<dyn Bus> = Arc::clone(&tcp) as Arc<dyn Bus>;
            let result = runtime::run(config, bus).await;
            tcp.shutdown().await;
            result?
        }
        None => {
            tracing::info!("No endpoint configured; using the in-process bus");
            runtime::run(config, Arc::new(LocalBus::new())).await?
        }
    };

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
    } else if !quiet {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Trainwatch Run Summary");
    println!("======================");
    println!("Subject:        {}", summary.subject);
    println!("Final Stage:    {}", summary.final_stage);
    println!("Trials Applied: {}", summary.trials_applied);
    match summary.finished {
        Some(reason) => println!("Finished:       {}", reason),
        None => println!("Stopped:        {:?}", summary.stop),
    }
}

// =============================================================================
// STAGES COMMAND
// =============================================================================

/// Show the stage sequence with each stage's criterion.
pub fn cmd_stages(config: &RunConfig, json_mode: bool) -> Result<(), TrainError> {
    let sequencer = config.build_sequencer()?;
    let terminate = sequencer.terminate_stage();

    let mut rows = Vec::new();
    for stage in sequencer.sequence().stages() {
        let criterion = sequencer.criteria().get(*stage)?;
        rows.push((*stage, criterion));
    }

    if json_mode {
        let stages: Vec<serde_json::Value> = rows
            .iter()
            .map(|(stage, criterion)| {
                serde_json::json!({
                    "stage": stage,
                    "family": stage.family().name(),
                    "criterion": criterion,
                    "terminate": terminate == Some(*stage),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&stages).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Trainwatch Curriculum");
    println!("=====================");
    for (position, (stage, criterion)) in rows.iter().enumerate() {
        let marker = if terminate == Some(*stage) {
            "  [terminate]"
        } else {
            ""
        };
        println!(
            "{:>2}. {:<12} {:<28} {}{}",
            position + 1,
            stage.as_str(),
            stage.family().name(),
            criterion,
            marker
        );
    }
    Ok(())
}

// =============================================================================
// REPLAY COMMAND
// =============================================================================

/// Feed a complete data file through a fresh session.
///
/// Nothing is written and nothing is published; the result is printed.
pub fn cmd_replay(config: &RunConfig, file: &Path, json_mode: bool) -> Result<(), TrainError> {
    config.validate()?;
    let mut session = config.build_session()?;
    let ingestor = config.build_ingestor()?;

    let text = std::fs::read_to_string(file)
        .map_err(|e| TrainError::SourceUnavailable(format!("{}: {}", file.display(), e)))?;
    if text.is_empty() {
        return Err(TrainError::EmptySource);
    }

    let lines = Ingestor::split_lines(&text, 0, false);
    let report = session.ingest_lines(0, &lines, &ingestor)?;
    for err in &report.skipped {
        tracing::warn!("Skipping row: {}", err);
    }

    let transitions: Vec<Transition> = report
        .updates
        .iter()
        .map(|update| update.transition)
        .filter(|transition| !matches!(transition, Transition::Stay { .. }))
        .collect();
    let progress = if session.is_finished() {
        None
    } else {
        Some(session.progress()?)
    };

    if json_mode {
        let output = serde_json::json!({
            "subject": session.subject(),
            "rows": session.cursor().rows,
            "applied": report.updates.len(),
            "skipped": report.skipped.len(),
            "transitions": transitions,
            "final_stage": session.stage(),
            "finished": session.finished(),
            "progress": progress,
            "metrics": session.metrics(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Trainwatch Replay");
    println!("=================");
    println!("File:    {}", file.display());
    println!("Subject: {}", session.subject());
    println!(
        "Rows:    {} ({} applied, {} skipped)",
        session.cursor().rows,
        report.updates.len(),
        report.skipped.len()
    );
    println!();
    for transition in &transitions {
        match transition {
            Transition::Advance { from, to } => println!("  {} -> {}", from, to),
            Transition::Finish { from, reason, .. } => println!("  {} -> done ({})", from, reason),
            Transition::Stay { .. } => {}
        }
    }
    println!();
    println!("Final Stage: {}", session.stage());
    match (session.finished(), progress) {
        (Some(reason), _) => println!("Finished:    {}", reason),
        (None, Some(progress)) => {
            println!(
                "Progress:    {} {} / {} ({}%)",
                progress.counter,
                progress.current,
                progress.required,
                progress.percent()
            );
            if let (Some(mean), Some(limit)) =
                (progress.mean_correct_latency_ms, progress.latency_limit_ms)
            {
                println!("Latency:     {}ms mean, below {}ms required", mean, limit);
            }
        }
        (None, None) => {}
    }
    Ok(())
}
