//! # Formats Module
//!
//! Text layouts for data that leaves the core.
//!
//! File I/O happens in the app layer; this module only builds the bytes.

pub mod snapshot;

pub use snapshot::{format_snapshot_block, snapshot_fields, snapshot_path};
