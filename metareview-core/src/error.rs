//! Structured error types for the MetaReview engine.

use thiserror::Error;

/// Unified error type for all MetaReview operations.
///
/// Only caller contract violations surface as errors. Insufficient data and
/// numerical degeneracy are reported as `None` or empty results by the
/// functions that can encounter them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetaError {
    /// Invalid input (bad arguments, out-of-range or non-finite values)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An effect measure was requested for a study data variant that cannot
    /// produce it (e.g. a mean difference from a 2×2 table).
    #[error("effect measure {measure} cannot be computed from {data} data")]
    MeasureMismatch {
        /// The requested measure.
        measure: String,
        /// The data variant that was supplied.
        data: String,
    },

    /// The top-level pooling call received no studies.
    #[error("no studies supplied")]
    EmptyStudies,
}

/// Convenience alias used throughout the MetaReview crates.
pub type Result<T> = std::result::Result<T, MetaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_names_both_sides() {
        let err = MetaError::MeasureMismatch {
            measure: "MD".into(),
            data: "binary".into(),
        };
        assert_eq!(
            err.to_string(),
            "effect measure MD cannot be computed from binary data"
        );
    }

    #[test]
    fn empty_studies_message() {
        assert_eq!(MetaError::EmptyStudies.to_string(), "no studies supplied");
    }

    #[test]
    fn invalid_input_message_carries_detail() {
        let err = MetaError::InvalidInput("sei must be positive".into());
        assert_eq!(err.to_string(), "invalid input: sei must be positive");
    }
}
