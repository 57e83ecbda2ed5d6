use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backshop_core::{
    Actor, CustomerFields, DomainError, DomainResult, Entity, InvoiceId, InvoiceItemId, Money,
    OrderId, ProductId, VariantId,
};

use crate::token::AccessToken;

/// Whether an invoice line is reconciled against the stock ledger.
///
/// A `Tracked` line carries the catalog references needed to move stock when
/// its quantity changes; a `Manual` line was typed in by hand and has
/// nothing to reconcile, which makes quantity edits on it a validation
/// failure instead of a runtime surprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemStockRef {
    Tracked {
        product_id: ProductId,
        variant_id: VariantId,
    },
    Manual,
}

impl ItemStockRef {
    pub fn variant_id(&self) -> Option<VariantId> {
        match self {
            ItemStockRef::Tracked { variant_id, .. } => Some(*variant_id),
            ItemStockRef::Manual => None,
        }
    }
}

/// One invoice line.
///
/// `*_original` fields are set once at snapshot time and never mutated;
/// `*_final` fields are the only editable values, and only the edit plan
/// changes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: InvoiceItemId,
    pub invoice_id: InvoiceId,
    pub stock_ref: ItemStockRef,
    pub product_name: String,
    pub variant_name: String,
    /// Relative image path copied at snapshot time.
    pub product_image: Option<String>,
    pub qty_original: i64,
    pub qty_final: i64,
    pub unit_price_original: Money,
    pub unit_price_final: Money,
    pub line_total_original: Money,
    pub line_total_final: Money,
}

impl InvoiceItem {
    pub fn is_edited(&self) -> bool {
        self.qty_final != self.qty_original || self.unit_price_final != self.unit_price_original
    }
}

impl Entity for InvoiceItem {
    type Id = InvoiceItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Line total arithmetic shared by snapshot and edit paths.
pub(crate) fn line_total(unit_price: Money, qty: i64) -> DomainResult<Money> {
    unit_price
        .checked_mul_qty(qty)
        .ok_or_else(|| DomainError::invariant("invoice line amount overflow"))
}

/// Sum of line totals, checked.
pub(crate) fn total_of<'a>(totals: impl Iterator<Item = &'a Money>) -> DomainResult<Money> {
    totals.copied().try_fold(Money::ZERO, |acc, t| {
        acc.checked_add(t)
            .ok_or_else(|| DomainError::invariant("invoice total overflow"))
    })
}

/// The editable, customer-facing document derived from an order (or created
/// standalone).
///
/// Invariant after every commit: `total_amount_final` equals the sum of the
/// items' `line_total_final`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub order_id: Option<OrderId>,
    pub token: AccessToken,
    pub is_revoked: bool,
    pub customer: CustomerFields,
    pub created_at: DateTime<Utc>,
    pub total_amount_final: Money,
    pub items: Vec<InvoiceItem>,
}

impl Invoice {
    pub fn item(&self, item_id: InvoiceItemId) -> Option<&InvoiceItem> {
        self.items.iter().find(|it| it.id == item_id)
    }
}

impl Entity for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// What changed on an audited invoice field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "lowercase")]
pub enum AuditChange {
    Qty { old: i64, new: i64 },
    Price { old: Money, new: Money },
}

impl AuditChange {
    pub fn field(&self) -> &'static str {
        match self {
            AuditChange::Qty { .. } => "qty",
            AuditChange::Price { .. } => "price",
        }
    }
}

/// Append-only record of one field change on one invoice line.
///
/// Created only as a byproduct of edit/reset operations; never updated or
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceAudit {
    pub invoice_id: InvoiceId,
    pub item_id: InvoiceItemId,
    pub change: AuditChange,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}
