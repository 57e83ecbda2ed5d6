//! Integration tests for the full pipeline against the in-memory store.
//!
//! Checkout -> stock reservation -> invoice snapshot -> audited edits ->
//! status transitions, including the concurrency properties the ledger
//! guarantees.

use std::sync::Arc;

use chrono::Utc;

use backshop_catalog::{Product, Variant};
use backshop_core::{Actor, CartLine, CustomerFields, Money, ProductId, VariantId};
use backshop_events::{InMemoryNotifier, Notification};
use backshop_inventory::{StockBreakdown, StockChangeKind};
use backshop_invoicing::{EditBatch, ItemEdit};
use backshop_orders::{OrderStatus, StatusChange};

use crate::services::{
    Checkout, CheckoutRequest, InvoiceEditor, OrderStatusMachine, ServiceError, StockLedger,
};
use crate::store::{MemoryStore, Store};

struct Harness {
    store: Arc<MemoryStore>,
    notifier: Arc<InMemoryNotifier>,
    checkout: Arc<Checkout<MemoryStore, InMemoryNotifier>>,
    editor: InvoiceEditor<MemoryStore>,
    ledger: StockLedger<MemoryStore>,
    machine: OrderStatusMachine<MemoryStore, InMemoryNotifier>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(InMemoryNotifier::new());
    Harness {
        checkout: Arc::new(Checkout::new(store.clone(), notifier.clone())),
        editor: InvoiceEditor::new(store.clone()),
        ledger: StockLedger::new(store.clone()),
        machine: OrderStatusMachine::new(store.clone(), notifier.clone()),
        store,
        notifier,
    }
}

async fn seed_variant(
    store: &Arc<MemoryStore>,
    product_name: &str,
    variant_name: &str,
    stock: i64,
    price_minor: i64,
) -> VariantId {
    let product = Product {
        id: ProductId::new(),
        name: product_name.to_string(),
        sku: None,
        image: Some(format!("images/{}.jpeg", product_name.to_lowercase())),
        is_active: true,
        created_at: Utc::now(),
    };
    let variant = Variant {
        id: VariantId::new(),
        product_id: product.id,
        name: variant_name.to_string(),
        unit_price: Money::from_minor(price_minor),
        stock,
        is_active: true,
    };
    let variant_id = variant.id;
    store.insert_product(product).await.unwrap();
    store.insert_variant(variant).await.unwrap();
    variant_id
}

fn line(variant_id: VariantId, qty: i64, price_minor: i64) -> CartLine {
    CartLine {
        variant_id,
        qty,
        unit_price: Money::from_minor(price_minor),
    }
}

fn request(lines: Vec<CartLine>) -> CheckoutRequest {
    CheckoutRequest {
        lines,
        customer: CustomerFields::normalized("Alia", "+7 777 000 11 22", ""),
    }
}

fn admin() -> Actor {
    Actor::new("admin")
}

async fn stock_of(store: &Arc<MemoryStore>, variant_id: VariantId) -> i64 {
    store.variant(variant_id).await.unwrap().unwrap().stock
}

#[tokio::test]
async fn checkout_reserves_stock_and_snapshots_invoice() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 5, 450).await;

    let receipt = h
        .checkout
        .place_order(request(vec![line(milk, 2, 450)]))
        .await
        .unwrap();

    assert_eq!(stock_of(&h.store, milk).await, 3);

    let order = h.store.order(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::New);
    assert_eq!(order.total_amount, Money::from_minor(900));
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].product_name, "Milk");

    let invoice = h.editor.invoice(receipt.invoice_id).await.unwrap();
    assert_eq!(invoice.order_id, Some(receipt.order_id));
    assert_eq!(invoice.total_amount_final, Money::from_minor(900));
    assert_eq!(invoice.items[0].qty_original, 2);
    assert_eq!(invoice.items[0].qty_final, 2);
    assert_eq!(invoice.items[0].product_image.as_deref(), Some("images/milk.jpeg"));

    // The public token resolves to the same document.
    let by_token = h.editor.by_token(&receipt.token).await.unwrap();
    assert_eq!(by_token.id, invoice.id);

    // One decrease audit for the reservation.
    let audits = h.ledger.audits(milk).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].kind, StockChangeKind::Decrease);
    assert_eq!(audits[0].delta, -2);
    assert_eq!(audits[0].old_stock, 5);
    assert_eq!(audits[0].new_stock, 3);

    // Post-commit notification.
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0], Notification::OrderCreated { .. }));
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let h = harness();
    let err = h.checkout.place_order(request(vec![])).await.unwrap_err();
    assert!(matches!(err, ServiceError::EmptyOrder));
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn shortfall_report_names_every_offending_line() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 1, 450).await;
    let butter = seed_variant(&h.store, "Butter", "200 g", 2, 1200).await;

    let err = h
        .checkout
        .place_order(request(vec![line(milk, 2, 450), line(butter, 3, 1200)]))
        .await
        .unwrap_err();

    let ServiceError::InsufficientStock(shortfalls) = err else {
        panic!("expected InsufficientStock, got {err:?}");
    };
    assert_eq!(shortfalls.len(), 2);

    // Nothing moved, nothing was audited.
    assert_eq!(stock_of(&h.store, milk).await, 1);
    assert_eq!(stock_of(&h.store, butter).await, 2);
    assert!(h.ledger.audits(milk).await.unwrap().is_empty());
    assert!(h.notifier.sent().is_empty());
}

/// Scenario A: stock 5, two concurrent checkouts of 3 each; exactly one
/// succeeds and the loser sees the post-lock availability.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkouts_cannot_oversell() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 5, 450).await;

    let a = {
        let checkout = h.checkout.clone();
        tokio::spawn(async move { checkout.place_order(request(vec![line(milk, 3, 450)])).await })
    };
    let b = {
        let checkout = h.checkout.clone();
        tokio::spawn(async move { checkout.place_order(request(vec![line(milk, 3, 450)])).await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1, "exactly one of two overlapping reservations may win");
    assert_eq!(stock_of(&h.store, milk).await, 2);

    let loser = results.iter().find(|r| r.is_err()).unwrap();
    match loser {
        Err(ServiceError::InsufficientStock(shortfalls)) => {
            assert_eq!(shortfalls.len(), 1);
            assert_eq!(shortfalls[0].requested, 3);
            assert_eq!(shortfalls[0].available, 2);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
}

/// Stock never goes negative under N concurrent unit reserves: exactly
/// enough succeed to exhaust it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserves_exhaust_stock_exactly() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 10, 450).await;
    let ledger = Arc::new(StockLedger::new(h.store.clone()));

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        tasks.push(tokio::spawn(async move {
            ledger.reserve(milk, 1, Actor::new("admin"), None).await
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(stock_of(&h.store, milk).await, 0);
    // One audit per successful reserve, none for the failures.
    assert_eq!(ledger.audits(milk).await.unwrap().len(), 10);
}

/// Scenario B: qty_final 10 -> 6 restores 4 units, audits once, recomputes
/// the line.
#[tokio::test]
async fn quantity_decrease_restores_stock_and_audits() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 14, 500).await;

    let receipt = h
        .checkout
        .place_order(request(vec![line(milk, 10, 500)]))
        .await
        .unwrap();
    assert_eq!(stock_of(&h.store, milk).await, 4);

    let invoice = h.editor.invoice(receipt.invoice_id).await.unwrap();
    let item_id = invoice.items[0].id;

    let batch = EditBatch::try_new(vec![ItemEdit {
        item_id,
        qty: Some(6),
        unit_price: None,
    }])
    .unwrap();
    let edited = h
        .editor
        .apply_edits(receipt.invoice_id, &batch, &admin())
        .await
        .unwrap();

    assert_eq!(stock_of(&h.store, milk).await, 8);
    assert_eq!(edited.items[0].qty_final, 6);
    assert_eq!(edited.items[0].qty_original, 10);
    assert_eq!(edited.items[0].line_total_final, Money::from_minor(3000));
    assert_eq!(edited.total_amount_final, Money::from_minor(3000));

    let audits = h.editor.audits(receipt.invoice_id).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].change.field(), "qty");
}

/// Scenario E: a batch where the second item's increase exceeds stock
/// commits nothing at all.
#[tokio::test]
async fn edit_batch_is_atomic() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 5, 450).await;
    let butter = seed_variant(&h.store, "Butter", "200 g", 3, 1200).await;

    let receipt = h
        .checkout
        .place_order(request(vec![line(milk, 2, 450), line(butter, 3, 1200)]))
        .await
        .unwrap();
    let invoice = h.editor.invoice(receipt.invoice_id).await.unwrap();
    let before_total = invoice.total_amount_final;

    // First edit is viable on its own; the second needs 50 more units.
    let batch = EditBatch::try_new(vec![
        ItemEdit {
            item_id: invoice.items[0].id,
            qty: None,
            unit_price: Some(Money::from_minor(400)),
        },
        ItemEdit {
            item_id: invoice.items[1].id,
            qty: Some(53),
            unit_price: None,
        },
    ])
    .unwrap();

    let err = h
        .editor
        .apply_edits(receipt.invoice_id, &batch, &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));

    // No field, audit row or stock count changed.
    let after = h.editor.invoice(receipt.invoice_id).await.unwrap();
    assert_eq!(after.items[0].unit_price_final, Money::from_minor(450));
    assert_eq!(after.items[1].qty_final, 3);
    assert_eq!(after.total_amount_final, before_total);
    assert!(h.editor.audits(receipt.invoice_id).await.unwrap().is_empty());
    assert_eq!(stock_of(&h.store, milk).await, 3);
    assert_eq!(stock_of(&h.store, butter).await, 0);
}

#[tokio::test]
async fn reset_item_round_trips_and_is_idempotent() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 14, 500).await;

    let receipt = h
        .checkout
        .place_order(request(vec![line(milk, 10, 500)]))
        .await
        .unwrap();
    let invoice = h.editor.invoice(receipt.invoice_id).await.unwrap();
    let item_id = invoice.items[0].id;

    let batch = EditBatch::try_new(vec![ItemEdit {
        item_id,
        qty: Some(6),
        unit_price: Some(Money::from_minor(480)),
    }])
    .unwrap();
    h.editor
        .apply_edits(receipt.invoice_id, &batch, &admin())
        .await
        .unwrap();
    assert_eq!(stock_of(&h.store, milk).await, 8);

    // Reset drives back to the snapshot and takes the 4 units again.
    let reset = h
        .editor
        .reset_item(receipt.invoice_id, item_id, &admin())
        .await
        .unwrap();
    assert_eq!(reset.items[0].qty_final, 10);
    assert_eq!(reset.items[0].unit_price_final, Money::from_minor(500));
    assert_eq!(reset.total_amount_final, Money::from_minor(5000));
    assert_eq!(stock_of(&h.store, milk).await, 4);

    let audits_after_reset = h.editor.audits(receipt.invoice_id).await.unwrap().len();

    // Second reset: no stock motion, no new audit rows.
    let again = h
        .editor
        .reset_item(receipt.invoice_id, item_id, &admin())
        .await
        .unwrap();
    assert_eq!(again.items[0].qty_final, 10);
    assert_eq!(stock_of(&h.store, milk).await, 4);
    assert_eq!(
        h.editor.audits(receipt.invoice_id).await.unwrap().len(),
        audits_after_reset
    );
}

/// Increasing by k then decreasing by k returns stock to its pre-edit value
/// with a net qty delta of zero across the two audit rows.
#[tokio::test]
async fn quantity_edit_round_trip_is_stock_neutral() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 10, 500).await;

    let receipt = h
        .checkout
        .place_order(request(vec![line(milk, 4, 500)]))
        .await
        .unwrap();
    let invoice = h.editor.invoice(receipt.invoice_id).await.unwrap();
    let item_id = invoice.items[0].id;
    let stock_before = stock_of(&h.store, milk).await;

    for qty in [7, 4] {
        let batch = EditBatch::try_new(vec![ItemEdit {
            item_id,
            qty: Some(qty),
            unit_price: None,
        }])
        .unwrap();
        h.editor
            .apply_edits(receipt.invoice_id, &batch, &admin())
            .await
            .unwrap();
    }

    assert_eq!(stock_of(&h.store, milk).await, stock_before);

    let audits = h.editor.audits(receipt.invoice_id).await.unwrap();
    assert_eq!(audits.len(), 2);
    let net: i64 = audits
        .iter()
        .map(|a| match a.change {
            backshop_invoicing::AuditChange::Qty { old, new } => new - old,
            _ => 0,
        })
        .sum();
    assert_eq!(net, 0);
}

/// Scenarios C and D: illegal jumps rejected, legal path to a terminal
/// state sticks.
#[tokio::test]
async fn status_machine_enforces_the_table() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 5, 450).await;
    let receipt = h
        .checkout
        .place_order(request(vec![line(milk, 1, 450)]))
        .await
        .unwrap();
    let order_id = receipt.order_id;

    // C: new -> shipped is not a legal move.
    let err = h
        .machine
        .transition(order_id, OrderStatus::Shipped, None, admin())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition { .. }));
    assert_eq!(
        h.machine.order(order_id).await.unwrap().status,
        OrderStatus::New
    );

    // D: new -> packed -> cancelled, then nothing.
    h.machine
        .transition(order_id, OrderStatus::Packed, Some("picked".to_string()), admin())
        .await
        .unwrap();
    h.machine
        .transition(order_id, OrderStatus::Cancelled, None, admin())
        .await
        .unwrap();
    for next in OrderStatus::ALL {
        let err = h
            .machine
            .transition(order_id, next, None, admin())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }));
    }

    let log = h.machine.status_log(order_id).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].from, OrderStatus::New);
    assert_eq!(log[0].to, OrderStatus::Packed);
    assert_eq!(log[1].to, OrderStatus::Cancelled);

    // OrderCreated + two StatusChanged.
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 3);
    assert!(matches!(sent[1], Notification::StatusChanged { .. }));
}

/// A stale status guard loses instead of overwriting a concurrent change.
#[tokio::test]
async fn stale_status_change_conflicts() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 5, 450).await;
    let receipt = h
        .checkout
        .place_order(request(vec![line(milk, 1, 450)]))
        .await
        .unwrap();

    h.machine
        .transition(receipt.order_id, OrderStatus::Packed, None, admin())
        .await
        .unwrap();

    // A writer that still believes the order is `new`.
    let stale = StatusChange {
        order_id: receipt.order_id,
        from: OrderStatus::New,
        to: OrderStatus::Cancelled,
        actor: admin(),
        note: None,
        occurred_at: Utc::now(),
    };
    let err = h.store.commit_status_change(stale).await.unwrap_err();
    assert!(matches!(err, crate::store::StoreError::Conflict(_)));
    assert_eq!(
        h.machine.order(receipt.order_id).await.unwrap().status,
        OrderStatus::Packed
    );
}

#[tokio::test]
async fn revoked_token_is_not_viewable() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 5, 450).await;
    let receipt = h
        .checkout
        .place_order(request(vec![line(milk, 1, 450)]))
        .await
        .unwrap();

    assert!(h.editor.by_token(&receipt.token).await.is_ok());
    h.editor.revoke_access(receipt.invoice_id).await.unwrap();
    let err = h.editor.by_token(&receipt.token).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));

    // The admin view still works.
    assert!(h.editor.invoice(receipt.invoice_id).await.is_ok());
}

#[tokio::test]
async fn set_absolute_records_breakdown() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 7, 450).await;

    let breakdown = StockBreakdown {
        boxes: 3,
        units_per_box: 12,
        extra_units: 4,
    };
    let audit = h
        .ledger
        .set_absolute(milk, 40, Some(breakdown), admin(), Some("recount".to_string()))
        .await
        .unwrap();

    assert_eq!(audit.kind, StockChangeKind::Set);
    assert_eq!(audit.old_stock, 7);
    assert_eq!(audit.new_stock, 40);
    assert_eq!(audit.delta, 33);
    assert_eq!(audit.breakdown, Some(breakdown));
    assert_eq!(stock_of(&h.store, milk).await, 40);
}

#[tokio::test]
async fn failed_reserve_writes_no_audit() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 2, 450).await;

    let err = h
        .ledger
        .reserve(milk, 3, admin(), None)
        .await
        .unwrap_err();
    let ServiceError::InsufficientStock(shortfalls) = err else {
        panic!("expected InsufficientStock");
    };
    assert_eq!(shortfalls[0].requested, 3);
    assert_eq!(shortfalls[0].available, 2);

    assert_eq!(stock_of(&h.store, milk).await, 2);
    assert!(h.ledger.audits(milk).await.unwrap().is_empty());
}

#[tokio::test]
async fn adjust_by_delta_zero_is_silent() {
    let h = harness();
    let milk = seed_variant(&h.store, "Milk", "1 l", 2, 450).await;

    let audit = h
        .ledger
        .adjust_by_delta(milk, 0, admin(), None)
        .await
        .unwrap();
    assert!(audit.is_none());
    assert!(h.ledger.audits(milk).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_variant_is_not_found() {
    let h = harness();
    let err = h
        .ledger
        .reserve(VariantId::new(), 1, admin(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));
}
