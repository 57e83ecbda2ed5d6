use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use backshop_catalog::{Product, ProductDisplay, Variant};
use backshop_core::{InvoiceId, OrderId, StockShortfall, VariantId};
use backshop_inventory::{StockAudit, StockChange};
use backshop_invoicing::{AccessToken, EditPlan, Invoice, InvoiceAudit, NewInvoice};
use backshop_orders::{NewOrder, Order, StatusChange};

/// Store operation error.
///
/// Domain-meaningful rejections the store itself detects (a guarded
/// decrement coming up short, a status guard losing a race) get their own
/// variants so the service layer can map them onto the domain error model;
/// everything else is a backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A guarded stock decrement could not be covered. `shortfalls` carries
    /// the authoritative quantities observed under the lock.
    #[error("insufficient stock for {} line(s)", .0.len())]
    InsufficientStock(Vec<StockShortfall>),

    /// A conditional update found the row changed by a concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Backend(String),
}

/// What checkout hands back to the cart/session collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub order_id: OrderId,
    pub invoice_id: InvoiceId,
    pub token: AccessToken,
}

/// Transactional persistence port.
///
/// Implementations must provide at least read-committed isolation and apply
/// each method as one atomic unit. Stock mutations use a conditional update
/// (or an equivalent lock) so that check-then-decrement cannot interleave
/// with another writer on the same variant; a failed method leaves no
/// partial writes behind, audit rows included.
#[async_trait]
pub trait Store: Send + Sync {
    // --- catalog ---

    async fn insert_product(&self, product: Product) -> Result<(), StoreError>;

    async fn insert_variant(&self, variant: Variant) -> Result<(), StoreError>;

    async fn variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StoreError>;

    /// Read-only catalog lookup used when freezing invoice display fields.
    async fn product_display(
        &self,
        variant_id: VariantId,
    ) -> Result<Option<ProductDisplay>, StoreError>;

    // --- stock ledger ---

    /// Apply one stock mutation atomically and append its audit row in the
    /// same transaction. A `Decrease` that exceeds the available quantity
    /// fails with [`StoreError::InsufficientStock`] and writes nothing.
    async fn apply_stock_change(&self, change: StockChange) -> Result<StockAudit, StoreError>;

    /// Audit trail for one variant, oldest first.
    async fn stock_audits(&self, variant_id: VariantId) -> Result<Vec<StockAudit>, StoreError>;

    // --- checkout ---

    /// The whole checkout as one transaction, in strict order: reserve every
    /// line (reporting **all** shortfalls if any line is short), create the
    /// order, create the invoice snapshot, commit.
    async fn commit_checkout(
        &self,
        order: NewOrder,
        invoice: NewInvoice,
        reservations: Vec<StockChange>,
    ) -> Result<CheckoutReceipt, StoreError>;

    // --- orders ---

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Commit a validated status change, guarded on the old status: if a
    /// concurrent writer moved the order first, fails with
    /// [`StoreError::Conflict`] and writes nothing. Appends the status-log
    /// row in the same transaction.
    async fn commit_status_change(&self, change: StatusChange) -> Result<(), StoreError>;

    /// Status history for one order, oldest first.
    async fn status_log(&self, order_id: OrderId) -> Result<Vec<StatusChange>, StoreError>;

    // --- invoices ---

    async fn invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    /// Public lookup by access token. Revoked invoices are not returned.
    async fn invoice_by_token(&self, token: &AccessToken)
        -> Result<Option<Invoice>, StoreError>;

    /// Revoke the public access token.
    async fn revoke_invoice_access(&self, invoice_id: InvoiceId) -> Result<(), StoreError>;

    /// Apply an edit plan as one transaction: stock adjustments (guarded
    /// decrements first-class), item updates, audit rows and the recomputed
    /// total either all commit or none do. Returns the invoice as committed.
    async fn commit_invoice_edit(&self, plan: EditPlan) -> Result<Invoice, StoreError>;

    /// Field-change audit trail for one invoice, oldest first.
    async fn invoice_audits(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<InvoiceAudit>, StoreError>;
}
