//! Infrastructure layer: persistence boundary, application services, config.
//!
//! The [`store::Store`] trait is the transactional port the domain crates
//! are written against: every method is a whole transaction (all-or-nothing)
//! and the stock check-and-decrement inside it is atomic per variant. The
//! services in [`services`] orchestrate domain decisions against a store and
//! dispatch notifications strictly after commit.

pub mod config;
pub mod services;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::StoreConfig;
pub use services::{Checkout, InvoiceEditor, OrderStatusMachine, ServiceError, StockLedger};
pub use store::{CheckoutReceipt, MemoryStore, PostgresStore, Store, StoreError};
