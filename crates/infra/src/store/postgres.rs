//! Postgres-backed store implementation.
//!
//! Every `Store` method runs inside one transaction. The stock
//! check-and-decrement uses a conditional update
//! (`UPDATE variants SET stock = stock - $qty WHERE id = $id AND stock >= $qty`,
//! affected rows checked) so that two concurrent reservations against the
//! same variant serialize at the row; the schema's `CHECK (stock >= 0)` is a
//! second line of defense, never the primary guard. Increments and absolute
//! sets take the row lock explicitly (`SELECT ... FOR UPDATE`) so their
//! old/new audit values are exact.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use backshop_catalog::{Product, ProductDisplay, Variant};
use backshop_core::{
    Actor, CustomerFields, InvoiceId, InvoiceItemId, Money, OrderId, OrderItemId, ProductId,
    StockShortfall, VariantId,
};
use backshop_inventory::{StockAudit, StockBreakdown, StockChange, StockChangeKind};
use backshop_invoicing::{
    AccessToken, AuditChange, EditPlan, Invoice, InvoiceAudit, InvoiceItem, ItemStockRef,
    NewInvoice,
};
use backshop_orders::{NewOrder, Order, OrderItem, OrderStatus, StatusChange};

use crate::config::StoreConfig;

use super::r#trait::{CheckoutReceipt, Store, StoreError};

/// Postgres-backed transactional store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a connection pool from configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migrate: {e}")))
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{operation}: {e}"))
}

async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

/// Attempt the guarded decrement. `Ok(Some((old, new)))` when it applied,
/// `Ok(None)` when the variant is missing or short (caller distinguishes).
async fn decrement_guarded(
    tx: &mut Transaction<'static, Postgres>,
    variant_id: VariantId,
    qty: i64,
) -> Result<Option<(i64, i64)>, StoreError> {
    let row = sqlx::query(
        r#"
        UPDATE variants
        SET stock = stock - $2
        WHERE id = $1 AND stock >= $2
        RETURNING stock
        "#,
    )
    .bind(variant_id.as_uuid())
    .bind(qty)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("decrement_stock", e))?;

    match row {
        None => Ok(None),
        Some(r) => {
            let new_stock: i64 = r
                .try_get("stock")
                .map_err(|e| map_sqlx_error("decrement_stock", e))?;
            Ok(Some((new_stock + qty, new_stock)))
        }
    }
}

/// Current name + stock of a variant, as seen by this transaction.
async fn variant_state(
    tx: &mut Transaction<'static, Postgres>,
    variant_id: VariantId,
) -> Result<Option<(String, i64)>, StoreError> {
    let row = sqlx::query("SELECT name, stock FROM variants WHERE id = $1")
        .bind(variant_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("variant_state", e))?;
    row.map(|r| -> Result<_, StoreError> {
        Ok((
            r.try_get::<String, _>("name")
                .map_err(|e| map_sqlx_error("variant_state", e))?,
            r.try_get::<i64, _>("stock")
                .map_err(|e| map_sqlx_error("variant_state", e))?,
        ))
    })
    .transpose()
}

/// Lock the variant row and return its current stock.
async fn lock_variant(
    tx: &mut Transaction<'static, Postgres>,
    variant_id: VariantId,
) -> Result<Option<i64>, StoreError> {
    let row = sqlx::query("SELECT stock FROM variants WHERE id = $1 FOR UPDATE")
        .bind(variant_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_variant", e))?;
    row.map(|r| {
        r.try_get::<i64, _>("stock")
            .map_err(|e| map_sqlx_error("lock_variant", e))
    })
    .transpose()
}

async fn set_stock_locked(
    tx: &mut Transaction<'static, Postgres>,
    variant_id: VariantId,
    new_stock: i64,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE variants SET stock = $2 WHERE id = $1")
        .bind(variant_id.as_uuid())
        .bind(new_stock)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("set_stock", e))?;
    Ok(())
}

/// Apply one stock change inside `tx`, writing its audit row.
///
/// A short decrement returns the shortfall instead of an error so batch
/// callers can keep collecting; everything else fails hard.
async fn apply_stock_change_tx(
    tx: &mut Transaction<'static, Postgres>,
    change: &StockChange,
) -> Result<Result<StockAudit, StockShortfall>, StoreError> {
    let (old_stock, new_stock) = match change.kind {
        StockChangeKind::Decrease => match decrement_guarded(tx, change.variant_id, change.amount)
            .await?
        {
            Some(pair) => pair,
            None => {
                let (name, available) = variant_state(tx, change.variant_id)
                    .await?
                    .ok_or(StoreError::NotFound("variant"))?;
                return Ok(Err(StockShortfall {
                    variant_id: change.variant_id,
                    variant_name: name,
                    requested: change.amount,
                    available,
                }));
            }
        },
        StockChangeKind::Increase => {
            let old = lock_variant(tx, change.variant_id)
                .await?
                .ok_or(StoreError::NotFound("variant"))?;
            let new = old + change.amount;
            set_stock_locked(tx, change.variant_id, new).await?;
            (old, new)
        }
        StockChangeKind::Set => {
            let old = lock_variant(tx, change.variant_id)
                .await?
                .ok_or(StoreError::NotFound("variant"))?;
            set_stock_locked(tx, change.variant_id, change.amount).await?;
            (old, change.amount)
        }
    };

    let audit = StockAudit::committed(change, old_stock, new_stock);
    insert_stock_audit(tx, &audit).await?;
    Ok(Ok(audit))
}

async fn insert_stock_audit(
    tx: &mut Transaction<'static, Postgres>,
    audit: &StockAudit,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO stock_audits (
            variant_id, change_kind, delta, old_stock, new_stock,
            boxes, units_per_box, extra_units, actor, note, occurred_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(audit.variant_id.as_uuid())
    .bind(audit.kind.as_str())
    .bind(audit.delta)
    .bind(audit.old_stock)
    .bind(audit.new_stock)
    .bind(audit.breakdown.map(|b| b.boxes))
    .bind(audit.breakdown.map(|b| b.units_per_box))
    .bind(audit.breakdown.map(|b| b.extra_units))
    .bind(audit.actor.as_str())
    .bind(audit.note.as_deref())
    .bind(audit.occurred_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_stock_audit", e))?;
    Ok(())
}

async fn insert_invoice_audit(
    tx: &mut Transaction<'static, Postgres>,
    audit: &InvoiceAudit,
) -> Result<(), StoreError> {
    let (field, old_value, new_value) = match audit.change {
        AuditChange::Qty { old, new } => ("qty", old, new),
        AuditChange::Price { old, new } => ("price", old.minor(), new.minor()),
    };
    sqlx::query(
        r#"
        INSERT INTO invoice_audits (invoice_id, item_id, field, old_value, new_value, actor, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(audit.invoice_id.as_uuid())
    .bind(audit.item_id.as_uuid())
    .bind(field)
    .bind(old_value)
    .bind(new_value)
    .bind(audit.actor.as_str())
    .bind(audit.occurred_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_invoice_audit", e))?;
    Ok(())
}

// --- row types ---

#[derive(FromRow)]
struct VariantRow {
    id: Uuid,
    product_id: Uuid,
    name: String,
    unit_price: i64,
    stock: i64,
    is_active: bool,
}

impl From<VariantRow> for Variant {
    fn from(r: VariantRow) -> Self {
        Variant {
            id: VariantId::from_uuid(r.id),
            product_id: ProductId::from_uuid(r.product_id),
            name: r.name,
            unit_price: Money::from_minor(r.unit_price),
            stock: r.stock,
            is_active: r.is_active,
        }
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    customer_name: Option<String>,
    phone: Option<String>,
    comment: Option<String>,
    created_at: DateTime<Utc>,
    total_amount: i64,
    status: String,
    status_changed_at: DateTime<Utc>,
    status_note: Option<String>,
}

#[derive(FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    variant_id: Uuid,
    product_name: String,
    variant_name: String,
    qty: i64,
    unit_price: i64,
    line_total: i64,
}

impl From<OrderItemRow> for OrderItem {
    fn from(r: OrderItemRow) -> Self {
        OrderItem {
            id: OrderItemId::from_uuid(r.id),
            order_id: OrderId::from_uuid(r.order_id),
            product_id: ProductId::from_uuid(r.product_id),
            variant_id: VariantId::from_uuid(r.variant_id),
            product_name: r.product_name,
            variant_name: r.variant_name,
            qty: r.qty,
            unit_price: Money::from_minor(r.unit_price),
            line_total: Money::from_minor(r.line_total),
        }
    }
}

fn parse_status(raw: &str) -> Result<OrderStatus, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Backend(format!("corrupt order status '{raw}'")))
}

fn order_from_rows(row: OrderRow, items: Vec<OrderItemRow>) -> Result<Order, StoreError> {
    Ok(Order {
        id: OrderId::from_uuid(row.id),
        customer: CustomerFields {
            name: row.customer_name,
            phone: row.phone,
            comment: row.comment,
        },
        created_at: row.created_at,
        total_amount: Money::from_minor(row.total_amount),
        status: parse_status(&row.status)?,
        status_changed_at: row.status_changed_at,
        status_note: row.status_note,
        items: items.into_iter().map(OrderItem::from).collect(),
    })
}

#[derive(FromRow)]
struct InvoiceRow {
    id: Uuid,
    order_id: Option<Uuid>,
    token: String,
    is_revoked: bool,
    customer_name: Option<String>,
    phone: Option<String>,
    comment: Option<String>,
    created_at: DateTime<Utc>,
    total_amount_final: i64,
}

#[derive(FromRow)]
struct InvoiceItemRow {
    id: Uuid,
    invoice_id: Uuid,
    product_id: Option<Uuid>,
    variant_id: Option<Uuid>,
    product_name: String,
    variant_name: String,
    product_image: Option<String>,
    qty_original: i64,
    qty_final: i64,
    unit_price_original: i64,
    unit_price_final: i64,
    line_total_original: i64,
    line_total_final: i64,
}

impl InvoiceItemRow {
    fn into_item(self) -> Result<InvoiceItem, StoreError> {
        let stock_ref = match (self.product_id, self.variant_id) {
            (Some(p), Some(v)) => ItemStockRef::Tracked {
                product_id: ProductId::from_uuid(p),
                variant_id: VariantId::from_uuid(v),
            },
            (None, None) => ItemStockRef::Manual,
            _ => {
                return Err(StoreError::Backend(
                    "invoice item has half of a stock reference".to_string(),
                ));
            }
        };
        Ok(InvoiceItem {
            id: InvoiceItemId::from_uuid(self.id),
            invoice_id: InvoiceId::from_uuid(self.invoice_id),
            stock_ref,
            product_name: self.product_name,
            variant_name: self.variant_name,
            product_image: self.product_image,
            qty_original: self.qty_original,
            qty_final: self.qty_final,
            unit_price_original: Money::from_minor(self.unit_price_original),
            unit_price_final: Money::from_minor(self.unit_price_final),
            line_total_original: Money::from_minor(self.line_total_original),
            line_total_final: Money::from_minor(self.line_total_final),
        })
    }
}

fn invoice_from_rows(row: InvoiceRow, items: Vec<InvoiceItemRow>) -> Result<Invoice, StoreError> {
    Ok(Invoice {
        id: InvoiceId::from_uuid(row.id),
        order_id: row.order_id.map(OrderId::from_uuid),
        token: AccessToken::from_string(row.token),
        is_revoked: row.is_revoked,
        customer: CustomerFields {
            name: row.customer_name,
            phone: row.phone,
            comment: row.comment,
        },
        created_at: row.created_at,
        total_amount_final: Money::from_minor(row.total_amount_final),
        items: items
            .into_iter()
            .map(InvoiceItemRow::into_item)
            .collect::<Result<_, _>>()?,
    })
}

#[derive(FromRow)]
struct StockAuditRow {
    variant_id: Uuid,
    change_kind: String,
    delta: i64,
    old_stock: i64,
    new_stock: i64,
    boxes: Option<i64>,
    units_per_box: Option<i64>,
    extra_units: Option<i64>,
    actor: String,
    note: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl StockAuditRow {
    fn into_audit(self) -> Result<StockAudit, StoreError> {
        let kind = match self.change_kind.as_str() {
            "increase" => StockChangeKind::Increase,
            "decrease" => StockChangeKind::Decrease,
            "set" => StockChangeKind::Set,
            other => {
                return Err(StoreError::Backend(format!(
                    "corrupt stock change kind '{other}'"
                )));
            }
        };
        let breakdown = match (self.boxes, self.units_per_box, self.extra_units) {
            (Some(boxes), Some(units_per_box), Some(extra_units)) => Some(StockBreakdown {
                boxes,
                units_per_box,
                extra_units,
            }),
            _ => None,
        };
        Ok(StockAudit {
            variant_id: VariantId::from_uuid(self.variant_id),
            kind,
            delta: self.delta,
            old_stock: self.old_stock,
            new_stock: self.new_stock,
            breakdown,
            actor: Actor::new(self.actor),
            note: self.note,
            occurred_at: self.occurred_at,
        })
    }
}

#[derive(FromRow)]
struct InvoiceAuditRow {
    invoice_id: Uuid,
    item_id: Uuid,
    field: String,
    old_value: i64,
    new_value: i64,
    actor: String,
    occurred_at: DateTime<Utc>,
}

impl InvoiceAuditRow {
    fn into_audit(self) -> Result<InvoiceAudit, StoreError> {
        let change = match self.field.as_str() {
            "qty" => AuditChange::Qty {
                old: self.old_value,
                new: self.new_value,
            },
            "price" => AuditChange::Price {
                old: Money::from_minor(self.old_value),
                new: Money::from_minor(self.new_value),
            },
            other => {
                return Err(StoreError::Backend(format!(
                    "corrupt audit field '{other}'"
                )));
            }
        };
        Ok(InvoiceAudit {
            invoice_id: InvoiceId::from_uuid(self.invoice_id),
            item_id: InvoiceItemId::from_uuid(self.item_id),
            change,
            actor: Actor::new(self.actor),
            occurred_at: self.occurred_at,
        })
    }
}

#[derive(FromRow)]
struct StatusLogRow {
    order_id: Uuid,
    old_status: String,
    new_status: String,
    actor: String,
    note: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl StatusLogRow {
    fn into_change(self) -> Result<StatusChange, StoreError> {
        Ok(StatusChange {
            order_id: OrderId::from_uuid(self.order_id),
            from: parse_status(&self.old_status)?,
            to: parse_status(&self.new_status)?,
            actor: Actor::new(self.actor),
            note: self.note,
            occurred_at: self.occurred_at,
        })
    }
}

// --- insert helpers ---

async fn insert_order_tx(
    tx: &mut Transaction<'static, Postgres>,
    order_id: OrderId,
    order: &NewOrder,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, customer_name, phone, comment, created_at,
            total_amount, status, status_changed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(order_id.as_uuid())
    .bind(order.customer.name.as_deref())
    .bind(order.customer.phone.as_deref())
    .bind(order.customer.comment.as_deref())
    .bind(order.created_at)
    .bind(order.total_amount.minor())
    .bind(OrderStatus::New.as_str())
    .bind(order.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_order", e))?;

    for (position, item) in order.items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO order_items (
                id, order_id, product_id, variant_id, product_name,
                variant_name, qty, unit_price, line_total, position
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(OrderItemId::new().as_uuid())
        .bind(order_id.as_uuid())
        .bind(item.product_id.as_uuid())
        .bind(item.variant_id.as_uuid())
        .bind(&item.product_name)
        .bind(&item.variant_name)
        .bind(item.qty)
        .bind(item.unit_price.minor())
        .bind(item.line_total.minor())
        .bind(position as i32)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order_item", e))?;
    }
    Ok(())
}

async fn insert_invoice_tx(
    tx: &mut Transaction<'static, Postgres>,
    invoice_id: InvoiceId,
    order_id: Option<OrderId>,
    invoice: &NewInvoice,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO invoices (
            id, order_id, token, is_revoked, customer_name, phone,
            comment, created_at, total_amount_final
        )
        VALUES ($1, $2, $3, FALSE, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(invoice_id.as_uuid())
    .bind(order_id.map(|id| *id.as_uuid()))
    .bind(invoice.token.as_str())
    .bind(invoice.customer.name.as_deref())
    .bind(invoice.customer.phone.as_deref())
    .bind(invoice.customer.comment.as_deref())
    .bind(invoice.created_at)
    .bind(invoice.total_amount_final.minor())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_invoice", e))?;

    for (position, item) in invoice.items.iter().enumerate() {
        let (product_id, variant_id) = match item.stock_ref {
            ItemStockRef::Tracked {
                product_id,
                variant_id,
            } => (Some(*product_id.as_uuid()), Some(*variant_id.as_uuid())),
            ItemStockRef::Manual => (None, None),
        };
        sqlx::query(
            r#"
            INSERT INTO invoice_items (
                id, invoice_id, product_id, variant_id, product_name,
                variant_name, product_image, qty_original, qty_final,
                unit_price_original, unit_price_final,
                line_total_original, line_total_final, position
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, $9, $9, $10, $10, $11)
            "#,
        )
        .bind(InvoiceItemId::new().as_uuid())
        .bind(invoice_id.as_uuid())
        .bind(product_id)
        .bind(variant_id)
        .bind(&item.product_name)
        .bind(&item.variant_name)
        .bind(item.product_image.as_deref())
        .bind(item.qty)
        .bind(item.unit_price.minor())
        .bind(item.line_total.minor())
        .bind(position as i32)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice_item", e))?;
    }
    Ok(())
}

async fn fetch_invoice(
    pool: &PgPool,
    invoice_id: InvoiceId,
) -> Result<Option<Invoice>, StoreError> {
    let row = sqlx::query("SELECT * FROM invoices WHERE id = $1")
        .bind(invoice_id.as_uuid())
        .fetch_optional(pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_invoice", e))?;
    let Some(row) = row else { return Ok(None) };
    let invoice_row =
        InvoiceRow::from_row(&row).map_err(|e| map_sqlx_error("fetch_invoice", e))?;

    let item_rows = sqlx::query("SELECT * FROM invoice_items WHERE invoice_id = $1 ORDER BY position")
        .bind(invoice_id.as_uuid())
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_invoice_items", e))?;
    let items = item_rows
        .iter()
        .map(|r| InvoiceItemRow::from_row(r).map_err(|e| map_sqlx_error("fetch_invoice_items", e)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(invoice_from_rows(invoice_row, items)?))
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, sku, image, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.sku.as_deref())
        .bind(product.image.as_deref())
        .bind(product.is_active)
        .bind(product.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    async fn insert_variant(&self, variant: Variant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO variants (id, product_id, name, unit_price, stock, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(variant.id.as_uuid())
        .bind(variant.product_id.as_uuid())
        .bind(&variant.name)
        .bind(variant.unit_price.minor())
        .bind(variant.stock)
        .bind(variant.is_active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_variant", e))?;
        Ok(())
    }

    async fn variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StoreError> {
        let row = sqlx::query("SELECT * FROM variants WHERE id = $1")
            .bind(variant_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_variant", e))?;
        row.map(|r| {
            VariantRow::from_row(&r)
                .map(Variant::from)
                .map_err(|e| map_sqlx_error("fetch_variant", e))
        })
        .transpose()
    }

    async fn product_display(
        &self,
        variant_id: VariantId,
    ) -> Result<Option<ProductDisplay>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT p.id AS product_id, p.name AS product_name, p.image, v.name AS variant_name
            FROM variants v
            JOIN products p ON p.id = v.product_id
            WHERE v.id = $1
            "#,
        )
        .bind(variant_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("product_display", e))?;

        row.map(|r| -> Result<ProductDisplay, StoreError> {
            Ok(ProductDisplay {
                product_id: ProductId::from_uuid(
                    r.try_get("product_id")
                        .map_err(|e| map_sqlx_error("product_display", e))?,
                ),
                product_name: r
                    .try_get("product_name")
                    .map_err(|e| map_sqlx_error("product_display", e))?,
                variant_name: r
                    .try_get("variant_name")
                    .map_err(|e| map_sqlx_error("product_display", e))?,
                image: r
                    .try_get("image")
                    .map_err(|e| map_sqlx_error("product_display", e))?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, change), fields(variant_id = %change.variant_id, kind = %change.kind))]
    async fn apply_stock_change(&self, change: StockChange) -> Result<StockAudit, StoreError> {
        let mut tx = self.begin().await?;
        let applied = apply_stock_change_tx(&mut tx, &change).await?;
        match applied {
            Ok(audit) => {
                commit(tx).await?;
                Ok(audit)
            }
            Err(shortfall) => {
                // Rollback happens on drop; surface the shortfall.
                Err(StoreError::InsufficientStock(vec![shortfall]))
            }
        }
    }

    async fn stock_audits(&self, variant_id: VariantId) -> Result<Vec<StockAudit>, StoreError> {
        let rows = sqlx::query("SELECT * FROM stock_audits WHERE variant_id = $1 ORDER BY id")
            .bind(variant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_stock_audits", e))?;
        rows.iter()
            .map(|r| {
                StockAuditRow::from_row(r)
                    .map_err(|e| map_sqlx_error("fetch_stock_audits", e))?
                    .into_audit()
            })
            .collect()
    }

    #[instrument(skip_all, fields(lines = reservations.len()))]
    async fn commit_checkout(
        &self,
        order: NewOrder,
        invoice: NewInvoice,
        reservations: Vec<StockChange>,
    ) -> Result<CheckoutReceipt, StoreError> {
        let mut tx = self.begin().await?;

        // Reserve every line first, collecting all shortfalls so the failure
        // names every offending line, then roll back if any came up short.
        let mut shortfalls = Vec::new();
        for change in &reservations {
            if let Err(shortfall) = apply_stock_change_tx(&mut tx, change).await? {
                shortfalls.push(shortfall);
            }
        }
        if !shortfalls.is_empty() {
            return Err(StoreError::InsufficientStock(shortfalls));
        }

        let order_id = OrderId::new();
        insert_order_tx(&mut tx, order_id, &order).await?;

        let invoice_id = InvoiceId::new();
        let token = invoice.token.clone();
        insert_invoice_tx(&mut tx, invoice_id, Some(order_id), &invoice).await?;

        commit(tx).await?;
        Ok(CheckoutReceipt {
            order_id,
            invoice_id,
            token,
        })
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_order", e))?;
        let Some(row) = row else { return Ok(None) };
        let order_row =
            OrderRow::from_row(&row).map_err(|e| map_sqlx_error("fetch_order", e))?;

        let item_rows =
            sqlx::query("SELECT * FROM order_items WHERE order_id = $1 ORDER BY position")
                .bind(order_id.as_uuid())
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("fetch_order_items", e))?;
        let items = item_rows
            .iter()
            .map(|r| OrderItemRow::from_row(r).map_err(|e| map_sqlx_error("fetch_order_items", e)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(order_from_rows(order_row, items)?))
    }

    #[instrument(skip(self, change), fields(order_id = %change.order_id, to = %change.to))]
    async fn commit_status_change(&self, change: StatusChange) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        // Guarded on the old status: a concurrent transition loses the race
        // here instead of silently overwriting.
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                status_changed_at = $3,
                status_note = COALESCE($4, status_note)
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(change.order_id.as_uuid())
        .bind(change.to.as_str())
        .bind(change.occurred_at)
        .bind(change.note.as_deref())
        .bind(change.from.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_order_status", e))?;

        if result.rows_affected() == 0 {
            let row = sqlx::query("SELECT status FROM orders WHERE id = $1")
                .bind(change.order_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("fetch_order_status", e))?;
            return match row {
                None => Err(StoreError::NotFound("order")),
                Some(r) => {
                    let current: String = r
                        .try_get("status")
                        .map_err(|e| map_sqlx_error("fetch_order_status", e))?;
                    Err(StoreError::Conflict(format!(
                        "order status is '{current}', expected '{}'",
                        change.from
                    )))
                }
            };
        }

        sqlx::query(
            r#"
            INSERT INTO order_status_log (order_id, old_status, new_status, actor, note, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(change.order_id.as_uuid())
        .bind(change.from.as_str())
        .bind(change.to.as_str())
        .bind(change.actor.as_str())
        .bind(change.note.as_deref())
        .bind(change.occurred_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_status_log", e))?;

        commit(tx).await
    }

    async fn status_log(&self, order_id: OrderId) -> Result<Vec<StatusChange>, StoreError> {
        let rows = sqlx::query("SELECT * FROM order_status_log WHERE order_id = $1 ORDER BY id")
            .bind(order_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_status_log", e))?;
        rows.iter()
            .map(|r| {
                StatusLogRow::from_row(r)
                    .map_err(|e| map_sqlx_error("fetch_status_log", e))?
                    .into_change()
            })
            .collect()
    }

    async fn invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        fetch_invoice(&self.pool, invoice_id).await
    }

    async fn invoice_by_token(
        &self,
        token: &AccessToken,
    ) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query("SELECT id FROM invoices WHERE token = $1 AND is_revoked = FALSE")
            .bind(token.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_invoice_by_token", e))?;
        match row {
            None => Ok(None),
            Some(r) => {
                let id: Uuid = r
                    .try_get("id")
                    .map_err(|e| map_sqlx_error("fetch_invoice_by_token", e))?;
                fetch_invoice(&self.pool, InvoiceId::from_uuid(id)).await
            }
        }
    }

    async fn revoke_invoice_access(&self, invoice_id: InvoiceId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE invoices SET is_revoked = TRUE WHERE id = $1")
            .bind(invoice_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("revoke_invoice", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("invoice"));
        }
        Ok(())
    }

    #[instrument(skip(self, plan), fields(invoice_id = %plan.invoice_id, updates = plan.item_updates.len()))]
    async fn commit_invoice_edit(&self, plan: EditPlan) -> Result<Invoice, StoreError> {
        let mut tx = self.begin().await?;

        // Stock first: guarded decrements collect shortfalls, restores take
        // the row lock. Any shortfall rolls the whole batch back.
        let mut shortfalls = Vec::new();
        for adjustment in &plan.stock_adjustments {
            if adjustment.delta == 0 {
                continue;
            }
            let note = Some(format!("invoice {} edit", plan.invoice_id));
            let change = if adjustment.delta < 0 {
                StockChange::decrease(
                    adjustment.variant_id,
                    -adjustment.delta,
                    plan.actor.clone(),
                    note,
                    plan.occurred_at,
                )
            } else {
                StockChange::increase(
                    adjustment.variant_id,
                    adjustment.delta,
                    plan.actor.clone(),
                    note,
                    plan.occurred_at,
                )
            };
            if let Err(shortfall) = apply_stock_change_tx(&mut tx, &change).await? {
                shortfalls.push(shortfall);
            }
        }
        if !shortfalls.is_empty() {
            return Err(StoreError::InsufficientStock(shortfalls));
        }

        for update in &plan.item_updates {
            let result = sqlx::query(
                r#"
                UPDATE invoice_items
                SET qty_final = $3, unit_price_final = $4, line_total_final = $5
                WHERE id = $1 AND invoice_id = $2
                "#,
            )
            .bind(update.item_id.as_uuid())
            .bind(plan.invoice_id.as_uuid())
            .bind(update.qty_final)
            .bind(update.unit_price_final.minor())
            .bind(update.line_total_final.minor())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_invoice_item", e))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound("invoice item"));
            }
        }

        let result = sqlx::query("UPDATE invoices SET total_amount_final = $2 WHERE id = $1")
            .bind(plan.invoice_id.as_uuid())
            .bind(plan.total_final.minor())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_invoice_total", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("invoice"));
        }

        for audit in &plan.audits {
            insert_invoice_audit(&mut tx, audit).await?;
        }

        commit(tx).await?;

        fetch_invoice(&self.pool, plan.invoice_id)
            .await?
            .ok_or(StoreError::NotFound("invoice"))
    }

    async fn invoice_audits(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<InvoiceAudit>, StoreError> {
        let rows = sqlx::query("SELECT * FROM invoice_audits WHERE invoice_id = $1 ORDER BY id")
            .bind(invoice_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_invoice_audits", e))?;
        rows.iter()
            .map(|r| {
                InvoiceAuditRow::from_row(r)
                    .map_err(|e| map_sqlx_error("fetch_invoice_audits", e))?
                    .into_audit()
            })
            .collect()
    }
}
