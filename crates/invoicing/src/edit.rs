//! Invoice edit planning.
//!
//! Edits arrive as a typed batch, validated once at the boundary, and are
//! turned into an [`EditPlan`]: the exact item updates, audit rows and stock
//! deltas one transaction must apply. Planning is pure; whether the stock
//! can actually cover a quantity increase is decided by the store's guarded
//! decrement when the plan is committed, so a short line aborts the whole
//! batch with nothing applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backshop_core::{
    Actor, DomainError, DomainResult, InvoiceId, InvoiceItemId, Money, VariantId,
};

use crate::invoice::{self, AuditChange, Invoice, InvoiceAudit};

/// Proposed change to one invoice line. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEdit {
    pub item_id: InvoiceItemId,
    pub qty: Option<i64>,
    pub unit_price: Option<Money>,
}

/// A batch of line edits, validated on construction.
///
/// Negative quantities and prices are rejected here rather than clamped;
/// the same item may appear only once per batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditBatch {
    edits: Vec<ItemEdit>,
}

impl EditBatch {
    pub fn try_new(edits: Vec<ItemEdit>) -> DomainResult<Self> {
        for (idx, edit) in edits.iter().enumerate() {
            if let Some(qty) = edit.qty {
                if qty < 0 {
                    return Err(DomainError::validation("quantity cannot be negative"));
                }
            }
            if let Some(price) = edit.unit_price {
                if price.is_negative() {
                    return Err(DomainError::validation("unit price cannot be negative"));
                }
            }
            if edits[..idx].iter().any(|e| e.item_id == edit.item_id) {
                return Err(DomainError::validation(format!(
                    "item {} appears more than once in the batch",
                    edit.item_id
                )));
            }
        }
        Ok(Self { edits })
    }

    pub fn edits(&self) -> &[ItemEdit] {
        &self.edits
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}

/// Final values for one line after an accepted edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub item_id: InvoiceItemId,
    pub qty_final: i64,
    pub unit_price_final: Money,
    pub line_total_final: Money,
}

/// Stock motion required by a quantity edit.
///
/// `delta` is expressed in stock units: negative reserves (guarded
/// decrement), positive restores. The display name rides along for
/// shortfall reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub variant_id: VariantId,
    pub delta: i64,
    pub display_name: String,
}

/// Everything one invoice-edit transaction has to apply, or nothing of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditPlan {
    pub invoice_id: InvoiceId,
    pub item_updates: Vec<ItemUpdate>,
    pub stock_adjustments: Vec<StockAdjustment>,
    pub audits: Vec<InvoiceAudit>,
    pub total_final: Money,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

impl EditPlan {
    /// True when nothing actually changed (no updates, audits or stock
    /// motion); committing such a plan would be pure noise.
    pub fn is_noop(&self) -> bool {
        self.item_updates.is_empty()
    }
}

/// Compute the plan for a batch of edits.
///
/// Items with a proposed value equal to the current one produce no audit and
/// no update. A quantity change on a manual (untracked) line is rejected:
/// there is no variant to reconcile.
pub fn plan_edits(
    invoice: &Invoice,
    batch: &EditBatch,
    actor: &Actor,
    occurred_at: DateTime<Utc>,
) -> DomainResult<EditPlan> {
    let mut item_updates = Vec::new();
    let mut stock_adjustments = Vec::new();
    let mut audits = Vec::new();

    for edit in batch.edits() {
        let item = invoice.item(edit.item_id).ok_or(DomainError::NotFound)?;

        let new_qty = edit.qty.unwrap_or(item.qty_final);
        let new_price = edit.unit_price.unwrap_or(item.unit_price_final);
        let qty_changed = new_qty != item.qty_final;
        let price_changed = new_price != item.unit_price_final;

        if !qty_changed && !price_changed {
            continue;
        }

        if qty_changed {
            let variant_id = item.stock_ref.variant_id().ok_or_else(|| {
                DomainError::validation(format!(
                    "'{}' is a manual line without a variant; its quantity cannot be \
                     reconciled against stock",
                    item.product_name
                ))
            })?;

            // Stock delta: selling fewer units puts stock back, selling more
            // takes it (guarded at commit).
            stock_adjustments.push(StockAdjustment {
                variant_id,
                delta: item.qty_final - new_qty,
                display_name: item.variant_name.clone(),
            });
            audits.push(InvoiceAudit {
                invoice_id: invoice.id,
                item_id: item.id,
                change: AuditChange::Qty {
                    old: item.qty_final,
                    new: new_qty,
                },
                actor: actor.clone(),
                occurred_at,
            });
        }

        if price_changed {
            audits.push(InvoiceAudit {
                invoice_id: invoice.id,
                item_id: item.id,
                change: AuditChange::Price {
                    old: item.unit_price_final,
                    new: new_price,
                },
                actor: actor.clone(),
                occurred_at,
            });
        }

        item_updates.push(ItemUpdate {
            item_id: item.id,
            qty_final: new_qty,
            unit_price_final: new_price,
            line_total_final: invoice::line_total(new_price, new_qty)?,
        });
    }

    let total_final = recompute_total(invoice, &item_updates)?;

    Ok(EditPlan {
        invoice_id: invoice.id,
        item_updates,
        stock_adjustments,
        audits,
        total_final,
        actor: actor.clone(),
        occurred_at,
    })
}

/// Compute the plan that drives one line back to its original snapshot.
///
/// Symmetric to [`plan_edits`] but targeting `*_original` values. Resetting
/// an already-reset line yields a no-op plan: no audits, no stock motion.
pub fn plan_reset(
    invoice: &Invoice,
    item_id: InvoiceItemId,
    actor: &Actor,
    occurred_at: DateTime<Utc>,
) -> DomainResult<EditPlan> {
    let item = invoice.item(item_id).ok_or(DomainError::NotFound)?;

    let batch = EditBatch::try_new(vec![ItemEdit {
        item_id,
        qty: Some(item.qty_original),
        unit_price: Some(item.unit_price_original),
    }])?;

    plan_edits(invoice, &batch, actor, occurred_at)
}

fn recompute_total(invoice: &Invoice, updates: &[ItemUpdate]) -> DomainResult<Money> {
    let totals: Vec<Money> = invoice
        .items
        .iter()
        .map(|item| {
            updates
                .iter()
                .find(|u| u.item_id == item.id)
                .map(|u| u.line_total_final)
                .unwrap_or(item.line_total_final)
        })
        .collect();
    invoice::total_of(totals.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    use backshop_core::{CustomerFields, ProductId};
    use crate::invoice::{InvoiceItem, ItemStockRef};
    use crate::token::AccessToken;

    fn tracked_item(invoice_id: InvoiceId, qty: i64, price_minor: i64) -> InvoiceItem {
        let unit_price = Money::from_minor(price_minor);
        let line_total = unit_price.checked_mul_qty(qty).unwrap();
        InvoiceItem {
            id: InvoiceItemId::new(),
            invoice_id,
            stock_ref: ItemStockRef::Tracked {
                product_id: ProductId::new(),
                variant_id: VariantId::new(),
            },
            product_name: "Milk".to_string(),
            variant_name: "1 l".to_string(),
            product_image: None,
            qty_original: qty,
            qty_final: qty,
            unit_price_original: unit_price,
            unit_price_final: unit_price,
            line_total_original: line_total,
            line_total_final: line_total,
        }
    }

    fn invoice_with_items(items: Vec<InvoiceItem>) -> Invoice {
        let total = invoice::total_of(items.iter().map(|it| &it.line_total_final)).unwrap();
        Invoice {
            id: items
                .first()
                .map(|it| it.invoice_id)
                .unwrap_or_else(InvoiceId::new),
            order_id: None,
            token: AccessToken::generate(),
            is_revoked: false,
            customer: CustomerFields::default(),
            created_at: Utc::now(),
            total_amount_final: total,
            items,
        }
    }

    /// Mirror of what the store does with a committed plan.
    fn apply_plan(invoice: &mut Invoice, plan: &EditPlan) {
        for update in &plan.item_updates {
            let item = invoice
                .items
                .iter_mut()
                .find(|it| it.id == update.item_id)
                .unwrap();
            item.qty_final = update.qty_final;
            item.unit_price_final = update.unit_price_final;
            item.line_total_final = update.line_total_final;
        }
        invoice.total_amount_final = plan.total_final;
    }

    fn actor() -> Actor {
        Actor::new("admin")
    }

    #[test]
    fn negative_quantity_is_rejected_at_the_boundary() {
        let err = EditBatch::try_new(vec![ItemEdit {
            item_id: InvoiceItemId::new(),
            qty: Some(-1),
            unit_price: None,
        }])
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn duplicate_item_in_batch_is_rejected() {
        let item_id = InvoiceItemId::new();
        let edit = ItemEdit {
            item_id,
            qty: Some(1),
            unit_price: None,
        };
        let err = EditBatch::try_new(vec![edit.clone(), edit]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn quantity_decrease_restores_stock_and_audits_once() {
        let invoice_id = InvoiceId::new();
        let mut invoice = invoice_with_items(vec![tracked_item(invoice_id, 10, 500)]);
        let item = invoice.items[0].clone();

        let batch = EditBatch::try_new(vec![ItemEdit {
            item_id: item.id,
            qty: Some(6),
            unit_price: None,
        }])
        .unwrap();
        let plan = plan_edits(&invoice, &batch, &actor(), Utc::now()).unwrap();

        assert_eq!(plan.stock_adjustments.len(), 1);
        assert_eq!(plan.stock_adjustments[0].delta, 4);
        assert_eq!(plan.audits.len(), 1);
        assert_eq!(
            plan.audits[0].change,
            AuditChange::Qty { old: 10, new: 6 }
        );
        assert_eq!(plan.total_final, Money::from_minor(3000));

        apply_plan(&mut invoice, &plan);
        assert_eq!(invoice.items[0].line_total_final, Money::from_minor(3000));
        assert_eq!(invoice.total_amount_final, Money::from_minor(3000));
    }

    #[test]
    fn price_change_never_touches_stock() {
        let invoice_id = InvoiceId::new();
        let invoice = invoice_with_items(vec![tracked_item(invoice_id, 2, 450)]);
        let item = invoice.items[0].clone();

        let batch = EditBatch::try_new(vec![ItemEdit {
            item_id: item.id,
            qty: None,
            unit_price: Some(Money::from_minor(400)),
        }])
        .unwrap();
        let plan = plan_edits(&invoice, &batch, &actor(), Utc::now()).unwrap();

        assert!(plan.stock_adjustments.is_empty());
        assert_eq!(plan.audits.len(), 1);
        assert_eq!(plan.item_updates[0].line_total_final, Money::from_minor(800));
        assert_eq!(plan.total_final, Money::from_minor(800));
    }

    #[test]
    fn unchanged_values_produce_a_noop_plan() {
        let invoice_id = InvoiceId::new();
        let invoice = invoice_with_items(vec![tracked_item(invoice_id, 2, 450)]);
        let item = invoice.items[0].clone();

        let batch = EditBatch::try_new(vec![ItemEdit {
            item_id: item.id,
            qty: Some(2),
            unit_price: Some(Money::from_minor(450)),
        }])
        .unwrap();
        let plan = plan_edits(&invoice, &batch, &actor(), Utc::now()).unwrap();

        assert!(plan.is_noop());
        assert!(plan.audits.is_empty());
        assert!(plan.stock_adjustments.is_empty());
    }

    #[test]
    fn manual_line_quantity_edit_is_rejected() {
        let invoice_id = InvoiceId::new();
        let mut item = tracked_item(invoice_id, 1, 100);
        item.stock_ref = ItemStockRef::Manual;
        let item_id = item.id;
        let invoice = invoice_with_items(vec![item]);

        let batch = EditBatch::try_new(vec![ItemEdit {
            item_id,
            qty: Some(3),
            unit_price: None,
        }])
        .unwrap();
        let err = plan_edits(&invoice, &batch, &actor(), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn manual_line_price_edit_is_fine() {
        let invoice_id = InvoiceId::new();
        let mut item = tracked_item(invoice_id, 1, 100);
        item.stock_ref = ItemStockRef::Manual;
        let item_id = item.id;
        let invoice = invoice_with_items(vec![item]);

        let batch = EditBatch::try_new(vec![ItemEdit {
            item_id,
            qty: None,
            unit_price: Some(Money::from_minor(90)),
        }])
        .unwrap();
        let plan = plan_edits(&invoice, &batch, &actor(), Utc::now()).unwrap();
        assert!(plan.stock_adjustments.is_empty());
        assert_eq!(plan.item_updates.len(), 1);
    }

    #[test]
    fn reset_reverses_an_edit_and_is_then_idempotent() {
        let invoice_id = InvoiceId::new();
        let mut invoice = invoice_with_items(vec![tracked_item(invoice_id, 10, 500)]);
        let item_id = invoice.items[0].id;

        // Edit down to 6 at a discount.
        let batch = EditBatch::try_new(vec![ItemEdit {
            item_id,
            qty: Some(6),
            unit_price: Some(Money::from_minor(480)),
        }])
        .unwrap();
        let plan = plan_edits(&invoice, &batch, &actor(), Utc::now()).unwrap();
        apply_plan(&mut invoice, &plan);

        // Reset takes the 4 units back and restores the price.
        let reset = plan_reset(&invoice, item_id, &actor(), Utc::now()).unwrap();
        assert_eq!(reset.stock_adjustments.len(), 1);
        assert_eq!(reset.stock_adjustments[0].delta, -4);
        assert_eq!(reset.audits.len(), 2);
        apply_plan(&mut invoice, &reset);

        assert_eq!(invoice.items[0].qty_final, 10);
        assert_eq!(invoice.items[0].unit_price_final, Money::from_minor(500));
        assert_eq!(invoice.total_amount_final, Money::from_minor(5000));

        // Second reset: nothing left to do.
        let again = plan_reset(&invoice, item_id, &actor(), Utc::now()).unwrap();
        assert!(again.is_noop());
        assert!(again.audits.is_empty());
        assert!(again.stock_adjustments.is_empty());
    }

    #[test]
    fn unknown_item_is_not_found() {
        let invoice = invoice_with_items(vec![tracked_item(InvoiceId::new(), 1, 100)]);
        let batch = EditBatch::try_new(vec![ItemEdit {
            item_id: InvoiceItemId::new(),
            qty: Some(2),
            unit_price: None,
        }])
        .unwrap();
        let err = plan_edits(&invoice, &batch, &actor(), Utc::now()).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    proptest! {
        /// Invariant: the planned invoice total always equals the sum of the
        /// resulting line totals.
        #[test]
        fn planned_total_equals_sum_of_lines(
            qtys in prop::collection::vec(1i64..500, 1..6),
            prices in prop::collection::vec(1i64..100_000, 1..6),
            new_qty in 0i64..500,
        ) {
            let invoice_id = InvoiceId::new();
            let items: Vec<InvoiceItem> = qtys
                .iter()
                .zip(prices.iter().cycle())
                .map(|(&q, &p)| tracked_item(invoice_id, q, p))
                .collect();
            let mut invoice = invoice_with_items(items);
            let item_id = invoice.items[0].id;

            let batch = EditBatch::try_new(vec![ItemEdit {
                item_id,
                qty: Some(new_qty),
                unit_price: None,
            }]).unwrap();
            let plan = plan_edits(&invoice, &batch, &actor(), Utc::now()).unwrap();
            apply_plan(&mut invoice, &plan);

            let expected = invoice
                .items
                .iter()
                .try_fold(Money::ZERO, |acc, it| acc.checked_add(it.line_total_final))
                .unwrap();
            prop_assert_eq!(invoice.total_amount_final, expected);
        }

        /// Round-trip: +k then -k nets out to zero stock motion.
        #[test]
        fn quantity_round_trip_is_stock_neutral(base in 1i64..100, k in 1i64..50) {
            let invoice_id = InvoiceId::new();
            let mut invoice = invoice_with_items(vec![tracked_item(invoice_id, base, 250)]);
            let item_id = invoice.items[0].id;

            let up = EditBatch::try_new(vec![ItemEdit {
                item_id,
                qty: Some(base + k),
                unit_price: None,
            }]).unwrap();
            let plan_up = plan_edits(&invoice, &up, &actor(), Utc::now()).unwrap();
            apply_plan(&mut invoice, &plan_up);

            let down = EditBatch::try_new(vec![ItemEdit {
                item_id,
                qty: Some(base),
                unit_price: None,
            }]).unwrap();
            let plan_down = plan_edits(&invoice, &down, &actor(), Utc::now()).unwrap();
            apply_plan(&mut invoice, &plan_down);

            let net: i64 = plan_up
                .stock_adjustments
                .iter()
                .chain(plan_down.stock_adjustments.iter())
                .map(|a| a.delta)
                .sum();
            prop_assert_eq!(net, 0);
            prop_assert_eq!(invoice.items[0].qty_final, base);
        }
    }
}
