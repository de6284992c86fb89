//! Error types for triage-core operations.

use std::path::PathBuf;

/// All errors that can occur while triaging and reporting problems.
///
/// Only `Transport` is fatal to the process; every other variant is scoped to
/// a single problem (or to a single persistence attempt) and is logged by the
/// orchestrator without disturbing other in-flight problems.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    // ─────────────────────────────────────────────────────────────────────
    // Per-problem Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Can't take ownership of '{path}': {details}")]
    Ownership { path: PathBuf, details: String },

    #[error("Can't start handler {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Can't read handler output: {source}")]
    IoRead {
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Can't write seen list {path}: {source}")]
    PersistenceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Process-wide Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Transport unavailable: {0}")]
    Transport(String),

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Cache directory not found")]
    CacheDirNotFound,

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results using TriageError.
pub type Result<T> = std::result::Result<T, TriageError>;

impl From<TriageError> for String {
    fn from(err: TriageError) -> String {
        err.to_string()
    }
}
