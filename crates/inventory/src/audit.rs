use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backshop_core::{Actor, DomainError, DomainResult, VariantId};

/// Kind of a stock ledger mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockChangeKind {
    Increase,
    Decrease,
    Set,
}

impl StockChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StockChangeKind::Increase => "increase",
            StockChangeKind::Decrease => "decrease",
            StockChangeKind::Set => "set",
        }
    }
}

impl core::fmt::Display for StockChangeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an administrative recount arrived at an absolute stock figure:
/// so many boxes of so many units, plus loose units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBreakdown {
    pub boxes: i64,
    pub units_per_box: i64,
    pub extra_units: i64,
}

impl StockBreakdown {
    pub fn total_units(self) -> i64 {
        self.boxes * self.units_per_box + self.extra_units
    }

    pub fn validate(self) -> DomainResult<()> {
        if self.boxes < 0 || self.units_per_box < 0 || self.extra_units < 0 {
            return Err(DomainError::validation(
                "stock breakdown fields must be non-negative",
            ));
        }
        Ok(())
    }
}

/// An intended stock mutation, not yet committed.
///
/// For `Increase`/`Decrease` the `amount` is the positive quantity to move;
/// for `Set` it is the absolute stock value to overwrite with. The store
/// applies the change atomically and rejects a `Decrease` that would drive
/// stock negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub variant_id: VariantId,
    pub kind: StockChangeKind,
    pub amount: i64,
    pub breakdown: Option<StockBreakdown>,
    pub actor: Actor,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl StockChange {
    pub fn decrease(
        variant_id: VariantId,
        qty: i64,
        actor: Actor,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            variant_id,
            kind: StockChangeKind::Decrease,
            amount: qty,
            breakdown: None,
            actor,
            note,
            occurred_at,
        }
    }

    pub fn increase(
        variant_id: VariantId,
        qty: i64,
        actor: Actor,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            variant_id,
            kind: StockChangeKind::Increase,
            amount: qty,
            breakdown: None,
            actor,
            note,
            occurred_at,
        }
    }

    pub fn set(
        variant_id: VariantId,
        new_stock: i64,
        breakdown: Option<StockBreakdown>,
        actor: Actor,
        note: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            variant_id,
            kind: StockChangeKind::Set,
            amount: new_stock,
            breakdown,
            actor,
            note,
            occurred_at,
        }
    }

    /// Deterministic validation done before touching the store.
    pub fn validate(&self) -> DomainResult<()> {
        match self.kind {
            StockChangeKind::Increase | StockChangeKind::Decrease => {
                if self.amount <= 0 {
                    return Err(DomainError::validation("quantity must be positive"));
                }
            }
            StockChangeKind::Set => {
                if self.amount < 0 {
                    return Err(DomainError::validation("stock cannot be set negative"));
                }
                if let Some(b) = self.breakdown {
                    b.validate()?;
                    if b.total_units() != self.amount {
                        return Err(DomainError::validation(format!(
                            "breakdown totals {} units but stock is set to {}",
                            b.total_units(),
                            self.amount
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Append-only record of one committed stock mutation.
///
/// `delta` is the signed change actually applied (`new_stock - old_stock`),
/// for `Set` included, so the rows reconcile arithmetically in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAudit {
    pub variant_id: VariantId,
    pub kind: StockChangeKind,
    pub delta: i64,
    pub old_stock: i64,
    pub new_stock: i64,
    pub breakdown: Option<StockBreakdown>,
    pub actor: Actor,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl StockAudit {
    /// Build the committed record for a change applied against `old_stock`.
    pub fn committed(change: &StockChange, old_stock: i64, new_stock: i64) -> Self {
        Self {
            variant_id: change.variant_id,
            kind: change.kind,
            delta: new_stock - old_stock,
            old_stock,
            new_stock,
            breakdown: change.breakdown,
            actor: change.actor.clone(),
            note: change.note.clone(),
            occurred_at: change.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn decrease_of_zero_is_rejected() {
        let change =
            StockChange::decrease(VariantId::new(), 0, Actor::new("admin"), None, now());
        assert!(matches!(
            change.validate(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn set_requires_breakdown_to_match_total() {
        let breakdown = StockBreakdown {
            boxes: 3,
            units_per_box: 12,
            extra_units: 4,
        };
        let good = StockChange::set(
            VariantId::new(),
            40,
            Some(breakdown),
            Actor::new("admin"),
            None,
            now(),
        );
        assert!(good.validate().is_ok());

        let bad = StockChange::set(
            VariantId::new(),
            41,
            Some(breakdown),
            Actor::new("admin"),
            None,
            now(),
        );
        assert!(matches!(bad.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn committed_audit_carries_signed_delta() {
        let change =
            StockChange::decrease(VariantId::new(), 4, Actor::new("admin"), None, now());
        let audit = StockAudit::committed(&change, 10, 6);
        assert_eq!(audit.delta, -4);
        assert_eq!(audit.old_stock, 10);
        assert_eq!(audit.new_stock, 6);
        assert_eq!(audit.kind, StockChangeKind::Decrease);
    }
}
