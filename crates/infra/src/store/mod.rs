//! Persistence boundary.
//!
//! One [`Store`] trait, implemented by [`MemoryStore`] (tests/dev) and
//! [`PostgresStore`] (production). Every trait method is a single
//! transaction: it either applies all of its writes or none of them, and
//! the stock check-and-decrement inside it never crosses a transaction
//! boundary unguarded.

pub mod memory;
pub mod postgres;
pub mod r#trait;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{CheckoutReceipt, Store, StoreError};
