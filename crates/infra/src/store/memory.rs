//! In-memory store.
//!
//! Intended for tests/dev. A single `RwLock` over all tables stands in for
//! the database transaction: every `Store` method takes the write lock once,
//! so each call is atomic and stock check-then-decrement cannot interleave
//! with another caller.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use backshop_catalog::{Product, ProductDisplay, Variant};
use backshop_core::{
    InvoiceId, InvoiceItemId, OrderId, OrderItemId, ProductId, StockShortfall, VariantId,
};
use backshop_inventory::{StockAudit, StockChange, StockChangeKind};
use backshop_invoicing::{AccessToken, EditPlan, Invoice, InvoiceAudit, InvoiceItem, NewInvoice};
use backshop_orders::{NewOrder, Order, OrderItem, StatusChange};

use super::r#trait::{CheckoutReceipt, Store, StoreError};

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    variants: HashMap<VariantId, Variant>,
    orders: HashMap<OrderId, Order>,
    invoices: HashMap<InvoiceId, Invoice>,
    stock_audits: Vec<StockAudit>,
    invoice_audits: Vec<InvoiceAudit>,
    status_log: Vec<StatusChange>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

/// Check a set of reservations against current stock without mutating.
///
/// Accumulates requests per variant so duplicate lines cannot sneak past the
/// guard, and reports every shortfall at once.
fn check_reservations(
    tables: &Tables,
    reservations: &[StockChange],
) -> Result<(), StoreError> {
    let mut requested: HashMap<VariantId, i64> = HashMap::new();
    let mut shortfalls = Vec::new();

    for change in reservations {
        let variant = tables
            .variants
            .get(&change.variant_id)
            .ok_or(StoreError::NotFound("variant"))?;
        let total = requested.entry(change.variant_id).or_insert(0);
        *total += change.amount;
        if !variant.covers(*total) {
            // One shortfall per variant, reporting the full requested amount.
            shortfalls.retain(|s: &StockShortfall| s.variant_id != change.variant_id);
            shortfalls.push(StockShortfall {
                variant_id: change.variant_id,
                variant_name: variant.name.clone(),
                requested: *total,
                available: variant.stock,
            });
        }
    }

    if shortfalls.is_empty() {
        Ok(())
    } else {
        Err(StoreError::InsufficientStock(shortfalls))
    }
}

/// Apply one stock change under the table lock, appending its audit row.
fn apply_stock_change_locked(
    tables: &mut Tables,
    change: &StockChange,
) -> Result<StockAudit, StoreError> {
    let variant = tables
        .variants
        .get_mut(&change.variant_id)
        .ok_or(StoreError::NotFound("variant"))?;
    let old_stock = variant.stock;

    let new_stock = match change.kind {
        StockChangeKind::Decrease => {
            if change.amount > old_stock {
                return Err(StoreError::InsufficientStock(vec![StockShortfall {
                    variant_id: change.variant_id,
                    variant_name: variant.name.clone(),
                    requested: change.amount,
                    available: old_stock,
                }]));
            }
            old_stock - change.amount
        }
        StockChangeKind::Increase => old_stock + change.amount,
        StockChangeKind::Set => change.amount,
    };

    variant.stock = new_stock;
    let audit = StockAudit::committed(change, old_stock, new_stock);
    tables.stock_audits.push(audit.clone());
    Ok(audit)
}

fn materialize_invoice(invoice_id: InvoiceId, new: NewInvoice) -> Invoice {
    let items = new
        .items
        .into_iter()
        .map(|it| InvoiceItem {
            id: InvoiceItemId::new(),
            invoice_id,
            stock_ref: it.stock_ref,
            product_name: it.product_name,
            variant_name: it.variant_name,
            product_image: it.product_image,
            qty_original: it.qty,
            qty_final: it.qty,
            unit_price_original: it.unit_price,
            unit_price_final: it.unit_price,
            line_total_original: it.line_total,
            line_total_final: it.line_total,
        })
        .collect();

    Invoice {
        id: invoice_id,
        order_id: new.order_id,
        token: new.token,
        is_revoked: false,
        customer: new.customer,
        created_at: new.created_at,
        total_amount_final: new.total_amount_final,
        items,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.products.insert(product.id, product);
        Ok(())
    }

    async fn insert_variant(&self, variant: Variant) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.variants.insert(variant.id, variant);
        Ok(())
    }

    async fn variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StoreError> {
        let tables = self.read()?;
        Ok(tables.variants.get(&variant_id).cloned())
    }

    async fn product_display(
        &self,
        variant_id: VariantId,
    ) -> Result<Option<ProductDisplay>, StoreError> {
        let tables = self.read()?;
        let Some(variant) = tables.variants.get(&variant_id) else {
            return Ok(None);
        };
        let product = tables
            .products
            .get(&variant.product_id)
            .ok_or(StoreError::NotFound("product"))?;
        Ok(Some(ProductDisplay {
            product_id: product.id,
            product_name: product.name.clone(),
            variant_name: variant.name.clone(),
            image: product.image.clone(),
        }))
    }

    async fn apply_stock_change(&self, change: StockChange) -> Result<StockAudit, StoreError> {
        let mut tables = self.write()?;
        apply_stock_change_locked(&mut tables, &change)
    }

    async fn stock_audits(&self, variant_id: VariantId) -> Result<Vec<StockAudit>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .stock_audits
            .iter()
            .filter(|a| a.variant_id == variant_id)
            .cloned()
            .collect())
    }

    async fn commit_checkout(
        &self,
        order: NewOrder,
        invoice: NewInvoice,
        reservations: Vec<StockChange>,
    ) -> Result<CheckoutReceipt, StoreError> {
        let mut tables = self.write()?;

        // Reserve first: every shortfall reported, nothing written on failure.
        check_reservations(&tables, &reservations)?;
        for change in &reservations {
            apply_stock_change_locked(&mut tables, change)?;
        }

        let order_id = OrderId::new();
        let items = order
            .items
            .into_iter()
            .map(|it| OrderItem {
                id: OrderItemId::new(),
                order_id,
                product_id: it.product_id,
                variant_id: it.variant_id,
                product_name: it.product_name,
                variant_name: it.variant_name,
                qty: it.qty,
                unit_price: it.unit_price,
                line_total: it.line_total,
            })
            .collect();
        let order = Order {
            id: order_id,
            customer: order.customer,
            created_at: order.created_at,
            total_amount: order.total_amount,
            status: backshop_orders::OrderStatus::New,
            status_changed_at: order.created_at,
            status_note: None,
            items,
        };

        let invoice_id = InvoiceId::new();
        let mut invoice = materialize_invoice(invoice_id, invoice);
        invoice.order_id = Some(order_id);
        let token = invoice.token.clone();

        tables.orders.insert(order_id, order);
        tables.invoices.insert(invoice_id, invoice);

        Ok(CheckoutReceipt {
            order_id,
            invoice_id,
            token,
        })
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let tables = self.read()?;
        Ok(tables.orders.get(&order_id).cloned())
    }

    async fn commit_status_change(&self, change: StatusChange) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let order = tables
            .orders
            .get_mut(&change.order_id)
            .ok_or(StoreError::NotFound("order"))?;

        // Guard on the old status: a concurrent transition loses here
        // instead of silently overwriting.
        if order.status != change.from {
            return Err(StoreError::Conflict(format!(
                "order status is '{}', expected '{}'",
                order.status, change.from
            )));
        }

        order.status = change.to;
        order.status_changed_at = change.occurred_at;
        if change.note.is_some() {
            order.status_note = change.note.clone();
        }
        tables.status_log.push(change);
        Ok(())
    }

    async fn status_log(&self, order_id: OrderId) -> Result<Vec<StatusChange>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .status_log
            .iter()
            .filter(|c| c.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let tables = self.read()?;
        Ok(tables.invoices.get(&invoice_id).cloned())
    }

    async fn invoice_by_token(
        &self,
        token: &AccessToken,
    ) -> Result<Option<Invoice>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .invoices
            .values()
            .find(|inv| &inv.token == token && !inv.is_revoked)
            .cloned())
    }

    async fn revoke_invoice_access(&self, invoice_id: InvoiceId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let invoice = tables
            .invoices
            .get_mut(&invoice_id)
            .ok_or(StoreError::NotFound("invoice"))?;
        invoice.is_revoked = true;
        Ok(())
    }

    async fn commit_invoice_edit(&self, plan: EditPlan) -> Result<Invoice, StoreError> {
        let mut tables = self.write()?;

        // Validate everything the plan touches before writing anything, so a
        // failure cannot leave partial writes behind.
        {
            let invoice = tables
                .invoices
                .get(&plan.invoice_id)
                .ok_or(StoreError::NotFound("invoice"))?;
            for update in &plan.item_updates {
                if invoice.item(update.item_id).is_none() {
                    return Err(StoreError::NotFound("invoice item"));
                }
            }
        }

        // Stock next, guarded, nothing applied if any adjustment is short.
        let reservations: Vec<StockChange> = plan
            .stock_adjustments
            .iter()
            .filter(|adj| adj.delta != 0)
            .map(|adj| {
                let note = Some(format!("invoice {} edit", plan.invoice_id));
                if adj.delta < 0 {
                    StockChange::decrease(
                        adj.variant_id,
                        -adj.delta,
                        plan.actor.clone(),
                        note,
                        plan.occurred_at,
                    )
                } else {
                    StockChange::increase(
                        adj.variant_id,
                        adj.delta,
                        plan.actor.clone(),
                        note,
                        plan.occurred_at,
                    )
                }
            })
            .collect();

        check_reservations(
            &tables,
            &reservations
                .iter()
                .filter(|c| c.kind == StockChangeKind::Decrease)
                .cloned()
                .collect::<Vec<_>>(),
        )?;
        for change in &reservations {
            apply_stock_change_locked(&mut tables, change)?;
        }

        let invoice = tables
            .invoices
            .get_mut(&plan.invoice_id)
            .ok_or(StoreError::NotFound("invoice"))?;
        for update in &plan.item_updates {
            let item = invoice
                .items
                .iter_mut()
                .find(|it| it.id == update.item_id)
                .ok_or(StoreError::NotFound("invoice item"))?;
            item.qty_final = update.qty_final;
            item.unit_price_final = update.unit_price_final;
            item.line_total_final = update.line_total_final;
        }
        invoice.total_amount_final = plan.total_final;
        let committed = invoice.clone();

        tables.invoice_audits.extend(plan.audits);
        Ok(committed)
    }

    async fn invoice_audits(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<InvoiceAudit>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .invoice_audits
            .iter()
            .filter(|a| a.invoice_id == invoice_id)
            .cloned()
            .collect())
    }
}
