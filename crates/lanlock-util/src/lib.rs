//! Shared utilities for lanlockd
//!
//! This crate provides:
//! - ID types (StudentId, JobId, ConnId)
//! - Wall-clock helpers
//! - Default paths for config and data directories

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
