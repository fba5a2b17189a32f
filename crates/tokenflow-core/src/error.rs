//! Error taxonomy for all analyses.
//!
//! Every fallible operation in the crate returns [`AnalysisError`]. Deadlock
//! is *not* an error: analyses report it as a zero-throughput outcome.

use thiserror::Error;

/// Errors surfaced at the API boundary of the analysis library.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The input graph violates a structural invariant (zero rate, empty rate
    /// sequence, dangling port, inconsistent rates).
    #[error("invalid graph: {0}")]
    Validation(String),

    /// The requested operation is not defined for this dialect or input.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Latency and scheduling analyses require a strongly connected graph.
    #[error("graph is not strongly connected")]
    NotStronglyConnected,

    /// No resource allocation satisfies the stated constraint. The mapping
    /// flow catches this variant and retries with a larger storage
    /// distribution; everywhere else it is fatal.
    #[error("infeasible constraint: {0}")]
    Infeasible(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
