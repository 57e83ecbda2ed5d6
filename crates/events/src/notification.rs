use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backshop_core::{CustomerFields, InvoiceId, Money, OrderId};

/// Line digest included in outbound notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSummary {
    /// "Product, variant" display string.
    pub name: String,
    pub qty: i64,
    pub unit_price: Money,
}

/// A notification-worthy change, emitted after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    OrderCreated {
        order_id: OrderId,
        invoice_id: InvoiceId,
        customer: CustomerFields,
        lines: Vec<LineSummary>,
        total: Money,
        occurred_at: DateTime<Utc>,
    },
    StatusChanged {
        order_id: OrderId,
        old_status: String,
        new_status: String,
        note: Option<String>,
        lines: Vec<LineSummary>,
        occurred_at: DateTime<Utc>,
    },
}

impl Notification {
    /// Stable kind identifier (e.g. for routing or structured logs).
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::OrderCreated { .. } => "order.created",
            Notification::StatusChanged { .. } => "order.status_changed",
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Notification::OrderCreated { occurred_at, .. }
            | Notification::StatusChanged { occurred_at, .. } => *occurred_at,
        }
    }
}
