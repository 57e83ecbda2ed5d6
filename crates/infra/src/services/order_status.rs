//! Order status transitions.

use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, warn};

use backshop_core::{Actor, OrderId};
use backshop_events::{LineSummary, Notification, Notifier};
use backshop_orders::{Order, OrderStatus, StatusChange};

use crate::services::ServiceError;
use crate::store::Store;

/// Validates and applies status transitions.
///
/// The machine itself never sends anything; it reports that a legal change
/// occurred and hands the event to the notifier after the commit.
#[derive(Debug)]
pub struct OrderStatusMachine<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
}

impl<S, N> OrderStatusMachine<S, N>
where
    S: Store,
    N: Notifier,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>) -> Self {
        Self { store, notifier }
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order, ServiceError> {
        self.store
            .order(order_id)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Move an order to `new_status`, if the table allows it.
    #[instrument(skip(self, actor, note), fields(order_id = %order_id, to = %new_status))]
    pub async fn transition(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        note: Option<String>,
        actor: Actor,
    ) -> Result<StatusChange, ServiceError> {
        let order = self.order(order_id).await?;
        let change = order.transition_to(new_status, actor, note, Utc::now())?;

        self.store.commit_status_change(change.clone()).await?;

        let notification = Notification::StatusChanged {
            order_id,
            old_status: change.from.to_string(),
            new_status: change.to.to_string(),
            note: change.note.clone(),
            lines: order
                .items
                .iter()
                .map(|item| LineSummary {
                    name: format!("{}, {}", item.product_name, item.variant_name),
                    qty: item.qty,
                    unit_price: item.unit_price,
                })
                .collect(),
            occurred_at: change.occurred_at,
        };
        if let Err(e) = self.notifier.notify(notification) {
            warn!(order_id = %order_id, error = ?e, "status notification failed");
        }

        Ok(change)
    }

    /// Status history, oldest first.
    pub async fn status_log(&self, order_id: OrderId) -> Result<Vec<StatusChange>, ServiceError> {
        Ok(self.store.status_log(order_id).await?)
    }
}
