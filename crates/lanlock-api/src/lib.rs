//! Protocol types for the lanlockd wire API
//!
//! Everything that crosses the socket lives here:
//! - Request/response command envelopes (NDJSON, request-id correlated)
//! - Server-push event envelopes
//! - Shared data model (session record, roster, violations, run reports)

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Protocol version, bumped on breaking changes
pub const API_VERSION: u32 = 1;
