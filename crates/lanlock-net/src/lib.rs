//! Network layer for lanlockd
//!
//! Provides:
//! - TCP server speaking NDJSON (newline-delimited JSON)
//! - Connection registry with per-connection audience binding
//! - Scoped event fan-out (everyone, proctors only, one student)
//! - A small client, used by exam clients and the tests

mod client;
mod server;

pub use client::*;
pub use server::*;

use thiserror::Error;

/// Network errors
#[derive(Debug, Error)]
pub enum NetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

pub type NetResult<T> = Result<T, NetError>;
