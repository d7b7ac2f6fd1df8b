//! Run outputs.
//!
//! # Submodules
//!
//! - [`checkpoint`]: incremental, crash-safe results file (also the final output)
//! - [`report`]: end-of-run totals logged for the operator

pub mod checkpoint;
pub mod report;
