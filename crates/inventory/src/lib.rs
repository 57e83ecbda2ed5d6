//! Stock ledger domain module.
//!
//! This crate contains the pure vocabulary of stock mutation: change kinds,
//! box/unit breakdowns, and the append-only audit record every mutation
//! produces. The atomic check-and-decrement primitive itself lives behind the
//! persistence boundary; callers describe the intended change as a
//! [`StockChange`] and get back the committed [`StockAudit`].

pub mod audit;

pub use audit::{StockAudit, StockBreakdown, StockChange, StockChangeKind};
