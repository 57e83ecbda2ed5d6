//! Invoicing domain module.
//!
//! The invoice aggregate: an editable, customer-facing document snapshotted
//! from a checkout so later catalog changes cannot alter it. `*_original`
//! values are frozen at creation; `*_final` values change only through the
//! edit-plan machinery in [`edit`], which pairs every accepted change with
//! its audit rows and the stock deltas needed to keep the ledger honest.

pub mod edit;
pub mod invoice;
pub mod snapshot;
pub mod token;

pub use edit::{EditBatch, EditPlan, ItemEdit, ItemUpdate, StockAdjustment};
pub use invoice::{AuditChange, Invoice, InvoiceAudit, InvoiceItem, ItemStockRef};
pub use snapshot::{snapshot, NewInvoice, NewInvoiceItem};
pub use token::AccessToken;
