//! Application-wide error types.
//!
//! Each layer of the deployment workflow owns its own error enum so the
//! orchestrator can tell a transport hiccup from a dead transaction from a
//! protocol mismatch when it assembles a run outcome.

use thiserror::Error;

use crate::status::{ExecutionResult, TransactionReceipt, TransactionStatus};

/// Failures at the network boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Transport failure, timeout, rate limit or server-side 5xx.
    #[error("network error: {0}")]
    Network(String),

    /// The node answered with a JSON-RPC error object.
    #[error("rejected by network ({code}): {message}")]
    Rejected { code: i64, message: String },

    /// The node answered, but not in the shape we expect.
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("could not sign submission: {0}")]
    Signing(String),
}

impl ChainError {
    /// Only transport-level failures are worth another read attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Network(_))
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ChainError::Malformed(e.to_string())
        } else {
            ChainError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// Failures of a single `await_status` call.
#[derive(Debug, Clone, Error)]
pub enum PollError {
    #[error("transaction {hash} ended in status {status}")]
    TransactionFailed {
        hash: String,
        status: TransactionStatus,
        /// The receipt that reported the failure.
        receipt: Box<TransactionReceipt>,
    },

    #[error("transaction {hash} did not reach {target} after {attempts} attempts (last seen: {})", last_status.map(|s| s.to_string()).unwrap_or_else(|| "nothing".to_string()))]
    Timeout {
        hash: String,
        target: TransactionStatus,
        attempts: u32,
        last_status: Option<TransactionStatus>,
    },

    #[error("wait for transaction {hash} was cancelled")]
    Cancelled { hash: String },

    #[error("reading receipt for {hash} failed: {source}")]
    Chain { hash: String, source: ChainError },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("Missing resolution URLs or data source domains.")]
    MissingSourcing,

    #[error("Malformed input: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("receipt {hash} has no `{field}` in its output")]
    MissingField { hash: String, field: &'static str },
}

/// Why a plan step failed. This is the `cause` in `FAILED(i, cause)`.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("submission failed: {0}")]
    Submission(ChainError),

    #[error(transparent)]
    Poll(#[from] PollError),

    /// The receipt reached the target status but the leader's execution did not succeed.
    #[error("transaction {hash} reached {status} but execution result was {}", execution_result.map(|r| r.to_string()).unwrap_or_else(|| "missing".to_string()))]
    ExecutionFailed {
        hash: String,
        status: TransactionStatus,
        execution_result: Option<ExecutionResult>,
    },

    #[error("transaction {hash} triggered no follow-up transaction")]
    MissingTriggeredTransaction { hash: String },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("plan misconfigured: {0}")]
    Plan(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Signing key error: {0}")]
    Signing(#[from] SigningError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
