//! Error types for Synheart Attune

use thiserror::Error;

/// Errors that can occur while building profiles or scanning sessions.
///
/// The per-frame path (`fuse`, `classify`) never produces these; it degrades
/// to a neutral reading instead.
#[derive(Debug, Error)]
pub enum AttuneError {
    /// Diagnostic label only. Fusion and classification never return it;
    /// they log `reason = "insufficient_signal"` and degrade instead.
    #[error("Insufficient signal: {0}")]
    InsufficientSignal(String),

    #[error("Invalid threshold profile: {0}")]
    InvalidProfile(String),

    #[error("Cannot align histories: {0}")]
    AlignmentFailure(String),

    #[error("Co-regulation scan cancelled after {windows_scanned} windows")]
    ScanCancelled { windows_scanned: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}
