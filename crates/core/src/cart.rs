//! Checkout input values.

use serde::{Deserialize, Serialize};

use crate::id::VariantId;
use crate::money::Money;

/// One line handed over by the cart/session collaborator at checkout.
///
/// Ephemeral: the core never persists cart lines, it only consumes them.
/// `unit_price` is the price captured when the line was added to the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub variant_id: VariantId,
    pub qty: i64,
    pub unit_price: Money,
}
