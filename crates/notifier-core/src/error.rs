//! Error taxonomy for schema-change-notifier.
//!
//! Mirrors the kinds enumerated in the specification's error handling
//! design: each kind carries just enough context to log or branch on.

use thiserror::Error;

/// Crate-wide error kinds.
#[derive(Error, Debug)]
pub enum NotifierError {
    /// Startup configuration validation failed. Carries every violation
    /// found, not just the first, so operators get one actionable error.
    #[error("configuration error: {}", .violations.join("; "))]
    Configuration { violations: Vec<String> },

    /// A schema registry call returned a non-404, non-2xx status, or the
    /// network call itself failed.
    #[error("registry error: env={env_id} schema_id={schema_id:?} status={status_code:?}: {message}")]
    Registry {
        env_id: String,
        schema_id: Option<i32>,
        status_code: Option<u16>,
        message: String,
    },

    /// Publisher construction or upfront schema pre-registration failed.
    /// Fatal: the runner must refuse to start.
    #[error("publisher error registering subject '{subject}': {message}")]
    PublisherFatal { subject: String, message: String },

    /// A single publish attempt failed or timed out. Non-fatal; the event
    /// is not marked processed so it can be retried on a later pass.
    #[error("publish failed for subject '{subject:?}': {message}")]
    PublisherTransient {
        subject: Option<String>,
        message: String,
    },

    /// An audit event payload did not parse. Non-fatal; the record is
    /// skipped and polling continues.
    #[error("failed to parse audit event at offset {offset:?}: {message}")]
    ParseSkip {
        offset: Option<i64>,
        message: String,
    },

    /// The process received a termination signal mid-poll. Carried so
    /// shutdown can distinguish a clean signal-driven stop from a poll
    /// loop error.
    #[error("interrupted by termination signal")]
    Interrupted,
}

/// Result alias used throughout the crate for fallible, non-branching
/// call sites.
pub type Result<T> = std::result::Result<T, anyhow::Error>;
