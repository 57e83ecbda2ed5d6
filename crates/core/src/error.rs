//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::VariantId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// One variant that could not cover a requested reservation.
///
/// `available` is the value observed under the stock lock, so it is the
/// authoritative quantity at the moment the reservation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub variant_id: VariantId,
    pub variant_name: String,
    pub requested: i64,
    pub available: i64,
}

impl core::fmt::Display for StockShortfall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "'{}': requested {}, available {}",
            self.variant_name, self.requested, self.available
        )
    }
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. concurrent update of the same row).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stock reservation exceeded the available quantity.
    #[error("insufficient stock: {}", format_shortfalls(.0))]
    InsufficientStock(Vec<StockShortfall>),

    /// A status change not permitted from the current status.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Snapshot attempted with zero lines.
    #[error("order has no lines")]
    EmptyOrder,
}

fn format_shortfalls(shortfalls: &[StockShortfall]) -> String {
    shortfalls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn insufficient(shortfall: StockShortfall) -> Self {
        Self::InsufficientStock(vec![shortfall])
    }

    pub fn invalid_transition(
        from: impl core::fmt::Display,
        to: impl core::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
