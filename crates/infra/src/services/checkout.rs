//! Checkout orchestration.
//!
//! Strict order inside one store transaction: reserve stock for every line
//! (failing fast with the full shortfall list), create the order, snapshot
//! the invoice, commit. The `OrderCreated` notification goes out only after
//! the commit and its failure is logged, never surfaced.

use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, warn};

use backshop_core::{Actor, CartLine, CustomerFields, DomainError, Money};
use backshop_events::{LineSummary, Notification, Notifier};
use backshop_inventory::StockChange;
use backshop_invoicing::snapshot;
use backshop_orders::{NewOrder, NewOrderItem};

use crate::services::ServiceError;
use crate::store::{CheckoutReceipt, Store};

/// What the cart/session collaborator hands over.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub lines: Vec<CartLine>,
    pub customer: CustomerFields,
}

#[derive(Debug)]
pub struct Checkout<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
}

impl<S, N> Checkout<S, N>
where
    S: Store,
    N: Notifier,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>) -> Self {
        Self { store, notifier }
    }

    /// Turn a cart into an order + invoice, atomically.
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn place_order(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutReceipt, ServiceError> {
        if request.lines.is_empty() {
            return Err(ServiceError::EmptyOrder);
        }

        let now = Utc::now();
        let actor = Actor::storefront();

        // Resolve display snapshots up front; reservation comes later, inside
        // the commit, so no stock moves for a cart that fails validation.
        let mut lines = Vec::with_capacity(request.lines.len());
        let mut order_items = Vec::with_capacity(request.lines.len());
        let mut reservations = Vec::with_capacity(request.lines.len());
        let mut total = Money::ZERO;

        for line in &request.lines {
            if line.qty <= 0 {
                return Err(ServiceError::Validation(
                    "line quantity must be positive".to_string(),
                ));
            }
            let display = self
                .store
                .product_display(line.variant_id)
                .await?
                .ok_or(ServiceError::NotFound)?;

            let line_total = line
                .unit_price
                .checked_mul_qty(line.qty)
                .ok_or_else(|| DomainError::invariant("line amount overflow"))?;
            total = total
                .checked_add(line_total)
                .ok_or_else(|| DomainError::invariant("order total overflow"))?;

            order_items.push(NewOrderItem {
                product_id: display.product_id,
                variant_id: line.variant_id,
                product_name: display.product_name.clone(),
                variant_name: display.variant_name.clone(),
                qty: line.qty,
                unit_price: line.unit_price,
                line_total,
            });
            reservations.push(StockChange::decrease(
                line.variant_id,
                line.qty,
                actor.clone(),
                Some("order checkout".to_string()),
                now,
            ));
            lines.push((line.clone(), display));
        }

        let order = NewOrder {
            customer: request.customer.clone(),
            total_amount: total,
            items: order_items,
            created_at: now,
        };
        let invoice = snapshot(None, &lines, request.customer.clone(), now)?;

        let receipt = self
            .store
            .commit_checkout(order, invoice, reservations)
            .await?;

        let notification = Notification::OrderCreated {
            order_id: receipt.order_id,
            invoice_id: receipt.invoice_id,
            customer: request.customer,
            lines: lines
                .iter()
                .map(|(line, display)| LineSummary {
                    name: format!("{}, {}", display.product_name, display.variant_name),
                    qty: line.qty,
                    unit_price: line.unit_price,
                })
                .collect(),
            total,
            occurred_at: now,
        };
        if let Err(e) = self.notifier.notify(notification) {
            warn!(order_id = %receipt.order_id, error = ?e, "order notification failed");
        }

        Ok(receipt)
    }
}
