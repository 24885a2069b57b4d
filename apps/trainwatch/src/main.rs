//! # Trainwatch - Curriculum Monitor
//!
//! ## Usage
//!
//! ```bash
//! # Monitor subject 12 from habituation, stopping at 5csr_viti
//! trainwatch run -s 12 -S hab1 -t 5csr_viti -e 127.0.0.1:1883
//!
//! # Show the curriculum
//! trainwatch stages
//!
//! # Replay a finished session offline
//! trainwatch replay -f test.txt -s 12
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trainwatch::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // TRAINWATCH_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("TRAINWATCH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trainwatch=info".into());

    // Logs go to stderr so JSON command output on stdout stays parseable.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
