use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backshop_core::{
    Actor, CustomerFields, DomainResult, Entity, Money, OrderId, OrderItemId, ProductId,
    VariantId,
};

use crate::status::{self, OrderStatus, StatusChange};

/// One purchased line, frozen at checkout.
///
/// Never edited after creation; corrections happen on the associated
/// invoice, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub product_name: String,
    pub variant_name: String,
    pub qty: i64,
    pub unit_price: Money,
    pub line_total: Money,
}

/// A customer purchase event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer: CustomerFields,
    pub created_at: DateTime<Utc>,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub status_changed_at: DateTime<Utc>,
    pub status_note: Option<String>,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Decide a status transition against the table. Pure: the store commits
    /// the change (guarded on the old status) and the caller notifies after.
    pub fn transition_to(
        &self,
        requested: OrderStatus,
        actor: Actor,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<StatusChange> {
        status::transition(self.id, self.status, requested, actor, note, occurred_at)
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// An order ready to be persisted (ids assigned by the store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer: CustomerFields,
    pub total_amount: Money,
    pub items: Vec<NewOrderItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub product_name: String,
    pub variant_name: String,
    pub qty: i64,
    pub unit_price: Money,
    pub line_total: Money,
}
