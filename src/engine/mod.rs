//! Formatter planning and execution.
//!
//! This module provides:
//! - Formatter descriptors with identity signatures
//! - Dependency-ordered batch planning over `before` edges
//! - File-to-formatter routing
//! - The streaming pipeline that runs formatter processes

mod formatter;
mod pipeline;
mod planner;
mod router;

pub use formatter::{global_signature, load_formatters, Formatter};
pub use pipeline::{Pipeline, PipelineOptions, DEFAULT_BATCH_SIZE};
pub use planner::{plan, Plan};
pub use router::{Route, Router};
