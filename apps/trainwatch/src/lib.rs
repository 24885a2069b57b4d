//! # Trainwatch
//!
//! The async half of the curriculum monitor: everything that touches files,
//! the network, or the clock. The decisions themselves live in
//! `trainwatch-core`.
//!
//! ```text
//!   data file ──▶ Watcher ──▶ SubjectSession ──▶ Outputs (snapshot log, render)
//!                    │
//!                    └─ announcement request ──▶ Gateway ◀── ping ── device
//!                                                   │
//!                                                   └── stage ──▶ Bus ──▶ device
//! ```

pub mod bus;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod runtime;
pub mod sinks;
pub mod watcher;
