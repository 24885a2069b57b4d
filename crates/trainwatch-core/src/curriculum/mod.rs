//! # Curriculum Module
//!
//! The stage catalogue and the stage state machine.
//!
//! Stage identity is a closed enum; everything keyed by stage (criteria,
//! record schemas, counting rules) is a lookup over that enum rather than a
//! chain of string comparisons.

mod sequencer;
mod stage;

pub use sequencer::*;
pub use stage::*;
