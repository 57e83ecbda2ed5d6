//! Order status lifecycle.
//!
//! `new -> packed -> shipped -> delivered`, with `cancelled` reachable from
//! `new` and `packed`. `delivered` and `cancelled` have no outgoing
//! transitions; a same-status request is rejected like any other illegal
//! move.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backshop_core::{Actor, DomainError, DomainResult, OrderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Packed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::New,
        OrderStatus::Packed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Packed => "packed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn allowed_next(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::New => &[OrderStatus::Packed, OrderStatus::Cancelled],
            OrderStatus::Packed => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(OrderStatus::New),
            "packed" => Ok(OrderStatus::Packed),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown order status '{other}'"
            ))),
        }
    }
}

/// A validated status change: written to the status log and handed to the
/// notification collaborator after the owning transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: Actor,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Validate a requested transition against the table.
pub fn transition(
    order_id: OrderId,
    current: OrderStatus,
    requested: OrderStatus,
    actor: Actor,
    note: Option<String>,
    occurred_at: DateTime<Utc>,
) -> DomainResult<StatusChange> {
    if !current.can_transition_to(requested) {
        return Err(DomainError::invalid_transition(current, requested));
    }
    Ok(StatusChange {
        order_id,
        from: current,
        to: requested,
        actor,
        note,
        occurred_at,
    })
}
