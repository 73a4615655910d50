// src/utils/errors.rs
//! Engine error types
//!
//! Startup faults (`ConfigParse`, `ArchiveOpen`, `ScriptLoad`) stop the
//! process before any traffic is served. Per-exchange faults (`LookupMiss`,
//! `Transcode`) are reported next to a 404 placeholder. `Rewrite` and
//! `HijackIo` propagate to the host.

use thiserror::Error;

/// Crate result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the replay engine and the modifier store
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed modifier configuration document
    #[error("modifier configuration error: {0}")]
    ConfigParse(String),

    /// Engine configuration could not be loaded or is invalid
    #[error("engine configuration error: {0}")]
    Config(String),

    /// Archive file missing or corrupt
    #[error("failed to open archive: {0}")]
    ArchiveOpen(String),

    /// Injected script could not be read
    #[error("error opening script {path}: {reason}")]
    ScriptLoad { path: String, reason: String },

    /// No archived response matches the request
    #[error("no archived response for {0}")]
    LookupMiss(String),

    /// Body could not be decoded or re-encoded
    #[error("transcoding failed: {0}")]
    Transcode(String),

    /// Rewriter capability failure
    #[error("rewrite failed: {0}")]
    Rewrite(String),

    /// Writing or flushing a hijacked connection failed
    #[error("hijacked connection I/O failed: {0}")]
    HijackIo(#[source] std::io::Error),

    /// A verifier recorded failed expectations
    #[error("verification failed: {0}")]
    Verification(String),

    /// Generic I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error must stop the process at startup
    pub fn is_startup_fault(&self) -> bool {
        matches!(
            self,
            EngineError::ConfigParse(_)
                | EngineError::Config(_)
                | EngineError::ArchiveOpen(_)
                | EngineError::ScriptLoad { .. }
        )
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(e: config::ConfigError) -> Self {
        EngineError::Config(e.to_string())
    }
}
