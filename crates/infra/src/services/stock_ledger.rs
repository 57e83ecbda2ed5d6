//! Stock ledger service: the only sanctioned path to a stock mutation.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use backshop_core::{Actor, VariantId};
use backshop_inventory::{StockAudit, StockBreakdown, StockChange};

use crate::services::ServiceError;
use crate::store::Store;

/// Owns the authoritative stock quantity per variant.
///
/// Each operation is atomic relative to its variant and produces exactly one
/// audit row; a failed operation produces none.
#[derive(Debug)]
pub struct StockLedger<S> {
    store: Arc<S>,
}

impl<S> StockLedger<S>
where
    S: Store,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Atomically decrement stock by `qty` (a reservation).
    ///
    /// Fails with `InsufficientStock` if `qty` exceeds the quantity observed
    /// under the lock, with `NotFound` for an unknown variant.
    #[instrument(skip(self, actor), fields(variant_id = %variant_id, qty))]
    pub async fn reserve(
        &self,
        variant_id: VariantId,
        qty: i64,
        actor: Actor,
        note: Option<String>,
    ) -> Result<StockAudit, ServiceError> {
        let change = StockChange::decrease(variant_id, qty, actor, note, Utc::now());
        change.validate()?;
        Ok(self.store.apply_stock_change(change).await?)
    }

    /// Atomically increment stock by `qty` (undo of a reservation).
    #[instrument(skip(self, actor), fields(variant_id = %variant_id, qty))]
    pub async fn restore(
        &self,
        variant_id: VariantId,
        qty: i64,
        actor: Actor,
        note: Option<String>,
    ) -> Result<StockAudit, ServiceError> {
        let change = StockChange::increase(variant_id, qty, actor, note, Utc::now());
        change.validate()?;
        Ok(self.store.apply_stock_change(change).await?)
    }

    /// Signed adjustment: negative reserves, positive restores, zero is a
    /// no-op that writes no audit row.
    pub async fn adjust_by_delta(
        &self,
        variant_id: VariantId,
        delta: i64,
        actor: Actor,
        note: Option<String>,
    ) -> Result<Option<StockAudit>, ServiceError> {
        if delta == 0 {
            return Ok(None);
        }
        let audit = if delta < 0 {
            self.reserve(variant_id, -delta, actor, note).await?
        } else {
            self.restore(variant_id, delta, actor, note).await?
        };
        Ok(Some(audit))
    }

    /// Administrative overwrite, e.g. after a physical recount. Always
    /// succeeds for an existing variant; the optional breakdown documents
    /// how the figure was arrived at.
    #[instrument(skip(self, actor, breakdown), fields(variant_id = %variant_id, new_stock))]
    pub async fn set_absolute(
        &self,
        variant_id: VariantId,
        new_stock: i64,
        breakdown: Option<StockBreakdown>,
        actor: Actor,
        note: Option<String>,
    ) -> Result<StockAudit, ServiceError> {
        let change = StockChange::set(variant_id, new_stock, breakdown, actor, note, Utc::now());
        change.validate()?;
        Ok(self.store.apply_stock_change(change).await?)
    }

    /// Current stock on hand.
    pub async fn stock_on_hand(&self, variant_id: VariantId) -> Result<i64, ServiceError> {
        let variant = self
            .store
            .variant(variant_id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        Ok(variant.stock)
    }

    /// Audit trail for a variant, oldest first.
    pub async fn audits(&self, variant_id: VariantId) -> Result<Vec<StockAudit>, ServiceError> {
        Ok(self.store.stock_audits(variant_id).await?)
    }
}
