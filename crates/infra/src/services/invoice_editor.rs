//! Invoice editing: audited, stock-reconciled corrections.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use backshop_core::{Actor, InvoiceId, InvoiceItemId};
use backshop_invoicing::{edit, AccessToken, EditBatch, Invoice, InvoiceAudit};

use crate::services::ServiceError;
use crate::store::Store;

/// Applies post-creation edits to invoice lines.
///
/// Each batch is one transaction: the store commits every accepted change,
/// its audit rows and the compensating stock deltas together, or nothing.
#[derive(Debug)]
pub struct InvoiceEditor<S> {
    store: Arc<S>,
}

impl<S> InvoiceEditor<S>
where
    S: Store,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, ServiceError> {
        self.store
            .invoice(invoice_id)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Unauthenticated customer lookup; revoked tokens see nothing.
    pub async fn by_token(&self, token: &AccessToken) -> Result<Invoice, ServiceError> {
        self.store
            .invoice_by_token(token)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Kill a leaked public link.
    pub async fn revoke_access(&self, invoice_id: InvoiceId) -> Result<(), ServiceError> {
        Ok(self.store.revoke_invoice_access(invoice_id).await?)
    }

    /// Apply a batch of line edits and return the recomputed invoice.
    ///
    /// A quantity increase that stock cannot cover aborts the whole batch
    /// with `InsufficientStock`; no field, audit row or stock count changes.
    #[instrument(skip(self, batch, actor), fields(invoice_id = %invoice_id))]
    pub async fn apply_edits(
        &self,
        invoice_id: InvoiceId,
        batch: &EditBatch,
        actor: &Actor,
    ) -> Result<Invoice, ServiceError> {
        let invoice = self.invoice(invoice_id).await?;
        let plan = edit::plan_edits(&invoice, batch, actor, Utc::now())?;
        if plan.is_noop() {
            return Ok(invoice);
        }
        Ok(self.store.commit_invoice_edit(plan).await?)
    }

    /// Restore one line to its original snapshot values, reconciling stock
    /// for the quantity difference. Idempotent: resetting an already-reset
    /// line changes nothing and writes no audit rows.
    #[instrument(skip(self, actor), fields(invoice_id = %invoice_id, item_id = %item_id))]
    pub async fn reset_item(
        &self,
        invoice_id: InvoiceId,
        item_id: InvoiceItemId,
        actor: &Actor,
    ) -> Result<Invoice, ServiceError> {
        let invoice = self.invoice(invoice_id).await?;
        let plan = edit::plan_reset(&invoice, item_id, actor, Utc::now())?;
        if plan.is_noop() {
            return Ok(invoice);
        }
        Ok(self.store.commit_invoice_edit(plan).await?)
    }

    /// Field-change audit trail, oldest first.
    pub async fn audits(&self, invoice_id: InvoiceId) -> Result<Vec<InvoiceAudit>, ServiceError> {
        Ok(self.store.invoice_audits(invoice_id).await?)
    }
}
