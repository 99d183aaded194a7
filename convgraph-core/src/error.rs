//! Structured error types for the convgraph workspace.

use thiserror::Error;

/// Unified error type for all convgraph operations.
///
/// A rejected Metropolis-Hastings proposal is *not* an error; operators report
/// it through their own outcome type. Errors here are either bad input, bad
/// configuration, or a broken graph invariant (a programming fault).
#[derive(Debug, Error)]
pub enum ConvGraphError {
    /// Parse error (malformed extended Newick, bad numbers, unknown labels)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error detected before any chain step runs
    #[error("configuration error: {0}")]
    Config(String),

    /// A graph invariant does not hold
    #[error("invariant violated ({invariant}) at {entity}: {detail}")]
    InvariantViolation {
        /// Short name of the invariant that failed.
        invariant: &'static str,
        /// The node, conversion or locus the failure was found at.
        entity: String,
        /// Human-readable context.
        detail: String,
    },

    /// Catch-all for other errors
    #[error("{0}")]
    Other(String),
}

impl ConvGraphError {
    /// Build an [`ConvGraphError::InvariantViolation`].
    pub fn invariant(
        invariant: &'static str,
        entity: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::InvariantViolation {
            invariant,
            entity: entity.into(),
            detail: detail.into(),
        }
    }

    /// True if this error reports a broken graph invariant.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

/// Convenience alias used throughout the convgraph workspace.
pub type Result<T> = std::result::Result<T, ConvGraphError>;
