//! Custom error types for the two-pass search pipeline.
//!
//! This module provides a centralized error handling system using the
//! `thiserror` crate to define structured, typed errors with clear messages.
//!
//! Invariant violations (out-of-window array access, a negative right-context
//! delta, use of a finalized table) are deliberately *not* represented here:
//! they indicate a defect in the producer or consumer logic, not an
//! operational condition, and are handled with assertions instead.

use thiserror::Error;

/// Primary error type for the library, covering all recoverable error cases.
#[derive(Debug, Error)]
pub enum SearchError {
    /// No new arcs were committed before the wait deadline elapsed.
    ///
    /// This is a normal, recoverable condition; the consumer retries or
    /// treats it as "no new data yet".
    #[error("timed out waiting for committed arcs")]
    WaitTimeout,

    /// Errors from invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Errors from invalid input data or parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience type alias for Results with SearchError.
pub type Result<T> = std::result::Result<T, SearchError>;
