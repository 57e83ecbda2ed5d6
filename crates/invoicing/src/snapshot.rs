//! Invoice snapshot construction.
//!
//! Converts priced cart lines into an invoice whose display fields and
//! amounts are copied, not referenced: later catalog edits cannot alter the
//! issued document. Stock for every line must already have been reserved by
//! the caller; the snapshot itself is pure bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backshop_catalog::ProductDisplay;
use backshop_core::{CartLine, CustomerFields, DomainError, DomainResult, Money, OrderId};

use crate::invoice::{self, ItemStockRef};
use crate::token::AccessToken;

/// An invoice ready to be persisted (ids assigned by the store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub order_id: Option<OrderId>,
    pub token: AccessToken,
    pub customer: CustomerFields,
    pub total_amount_final: Money,
    pub items: Vec<NewInvoiceItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoiceItem {
    pub stock_ref: ItemStockRef,
    pub product_name: String,
    pub variant_name: String,
    pub product_image: Option<String>,
    pub qty: i64,
    pub unit_price: Money,
    pub line_total: Money,
}

/// Build an invoice snapshot from reserved cart lines.
///
/// Fails with `EmptyOrder` for zero lines; a zero-line invoice is never
/// created. Each line's `original` and `final` values start out equal;
/// divergence only ever comes from audited edits.
pub fn snapshot(
    order_id: Option<OrderId>,
    lines: &[(CartLine, ProductDisplay)],
    customer: CustomerFields,
    created_at: DateTime<Utc>,
) -> DomainResult<NewInvoice> {
    if lines.is_empty() {
        return Err(DomainError::EmptyOrder);
    }

    let mut items = Vec::with_capacity(lines.len());
    for (line, display) in lines {
        if line.qty <= 0 {
            return Err(DomainError::validation("line quantity must be positive"));
        }
        if line.unit_price.is_negative() {
            return Err(DomainError::validation("unit price cannot be negative"));
        }

        let line_total = invoice::line_total(line.unit_price, line.qty)?;
        items.push(NewInvoiceItem {
            stock_ref: ItemStockRef::Tracked {
                product_id: display.product_id,
                variant_id: line.variant_id,
            },
            product_name: display.product_name.clone(),
            variant_name: display.variant_name.clone(),
            product_image: display.image.clone(),
            qty: line.qty,
            unit_price: line.unit_price,
            line_total,
        });
    }

    let total_amount_final = invoice::total_of(items.iter().map(|it| &it.line_total))?;

    Ok(NewInvoice {
        order_id,
        token: AccessToken::generate(),
        customer,
        total_amount_final,
        items,
        created_at,
    })
}
