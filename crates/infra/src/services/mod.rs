//! Application services (orchestration over the store).
//!
//! Domain crates decide, the store commits, services glue the two together
//! and dispatch notifications strictly after commit. Every failure here is
//! scoped to one request's transaction; nothing is fatal to the process.

pub mod checkout;
pub mod invoice_editor;
pub mod order_status;
pub mod stock_ledger;

pub use checkout::{Checkout, CheckoutRequest};
pub use invoice_editor::InvoiceEditor;
pub use order_status::OrderStatusMachine;
pub use stock_ledger::StockLedger;

use thiserror::Error;

use backshop_core::{DomainError, StockShortfall};

use crate::store::StoreError;

/// Error surfaced to the initiating collaborator.
///
/// Collapses domain rejections and store-detected rejections into one enum
/// with enough context to render an inline message (`Display` is written for
/// exactly that).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient stock: {}", format_shortfalls(.0))]
    InsufficientStock(Vec<StockShortfall>),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("order has no lines")]
    EmptyOrder,

    /// Storage-level failure (connection, serialization, ...).
    #[error(transparent)]
    Store(StoreError),
}

fn format_shortfalls(shortfalls: &[StockShortfall]) -> String {
    shortfalls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => ServiceError::Validation(msg),
            DomainError::InvariantViolation(msg) => ServiceError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => ServiceError::Validation(msg),
            DomainError::NotFound => ServiceError::NotFound,
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
            DomainError::InsufficientStock(shortfalls) => {
                ServiceError::InsufficientStock(shortfalls)
            }
            DomainError::InvalidTransition { from, to } => {
                ServiceError::InvalidTransition { from, to }
            }
            DomainError::EmptyOrder => ServiceError::EmptyOrder,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(_) => ServiceError::NotFound,
            StoreError::InsufficientStock(shortfalls) => {
                ServiceError::InsufficientStock(shortfalls)
            }
            StoreError::Conflict(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Store(other),
        }
    }
}
