use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backshop_core::{Entity, Money, ProductId, VariantId};

/// A catalog product. Display-level data only; anything sellable hangs off
/// its variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub sku: Option<String>,
    /// Relative image path, e.g. "images/milk.jpeg".
    pub image: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A sellable unit: one purchasable configuration of a product (e.g. a pack
/// size) with its own price and stock count.
///
/// Invariant: `stock >= 0` at every committed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub product_id: ProductId,
    /// Display name of the configuration, e.g. "1 l" or "6-pack".
    pub name: String,
    pub unit_price: Money,
    pub stock: i64,
    pub is_active: bool,
}

impl Variant {
    pub fn covers(&self, qty: i64) -> bool {
        qty <= self.stock
    }
}

impl Entity for Variant {
    type Id = VariantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Display fields copied into invoice lines at snapshot time, so later
/// catalog edits cannot alter issued documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDisplay {
    pub product_id: ProductId,
    pub product_name: String,
    pub variant_name: String,
    pub image: Option<String>,
}
