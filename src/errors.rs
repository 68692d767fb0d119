//! Typed error hierarchy for the Shadow-PM pipelines.
//!
//! Four top-level enums cover the subsystems:
//! - `ValidationError`: missing request input, terminal, never retried
//! - `EngineError`: reasoning engine failures, classified transient/permanent
//! - `DownstreamError`: ticket/notification/comment failures, always captured as data
//! - `PipelineError`: what the ingestion and audit pipelines hand back to callers

use thiserror::Error;

/// Whether retrying a failed engine call might succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Required audit input that was absent from a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Missing required PR data: {}", missing.join(", "))]
pub struct ValidationError {
    pub missing: Vec<&'static str>,
}

impl ValidationError {
    pub fn is_missing(&self, field: &str) -> bool {
        self.missing.contains(&field)
    }
}

/// Errors from the reasoning engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Reasoning engine is rate limited or overloaded: {0}")]
    Transient(String),

    #[error("Continuation token rejected: {0}")]
    TokenRejected(String),

    #[error("Asset {asset} failed processing")]
    AssetFailed { asset: String },

    #[error("Asset {asset} still processing after {attempts} status polls")]
    AssetTimeout { asset: String, attempts: u32 },

    #[error("max retries reached after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Reasoning engine error: {0}")]
    Permanent(String),
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient(_) | Self::AssetTimeout { .. } => FailureKind::Transient,
            Self::TokenRejected(_)
            | Self::AssetFailed { .. }
            | Self::RetriesExhausted { .. }
            | Self::Permanent(_) => FailureKind::Permanent,
        }
    }

    /// Only rate-limit/overload signals are retried. An asset timeout is
    /// transient for the caller but has already spent its own deadline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors from a single downstream integration call.
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("{0} integration is not configured")]
    NotConfigured(&'static str),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl From<reqwest::Error> for DownstreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Continuation store failures carry their own context chain.
pub type StoreError = anyhow::Error;

/// Errors surfaced by the ingestion and audit pipelines.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Continuation store error: {0}")]
    Store(#[source] StoreError),
}
