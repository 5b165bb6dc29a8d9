//! Error types for session setup and trace reading

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening or closing a trace sink
///
/// These never reach an instrumented program: the session turns them into
/// permanent disablement and a log line.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to open trace output {path}: {source}")]
    SinkUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Trace sink is already closed")]
    SinkClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while parsing a trace file
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Trace is empty")]
    Empty,

    #[error("Invalid trace header: {0}")]
    InvalidHeader(String),

    #[error("Unsupported trace version {0}")]
    UnsupportedVersion(String),

    #[error("Invalid event record on line {line}: {source}")]
    InvalidEvent {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid trace trailer: {0}")]
    InvalidTrailer(#[source] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, TraceError>;
