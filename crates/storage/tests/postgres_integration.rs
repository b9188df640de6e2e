//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p storage --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use common::{Money, OrderStatus, PaymentStatus};
use sqlx::PgPool;
use storage::{
    EntityKind, NewOrder, NewPayment, NewProduct, NewUser, OrderItem, PaymentMethod,
    PostgresRecordStore, RecordStore, StoreError, Transaction, UserRole,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_commerce_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh store with its own pool and cleared tables.
async fn get_test_store() -> PostgresRecordStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE payments, order_items, orders, cart_items, carts, users, products, product_categories RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresRecordStore::new(pool)
}

fn widget(sku: &str, stock: i64) -> NewProduct {
    NewProduct {
        name: "Widget".to_string(),
        description: "A widget".to_string(),
        price: Money::from_cents(1999),
        stock_quantity: stock,
        sku: sku.to_string(),
        category_id: None,
    }
}

fn customer(email: &str) -> NewUser {
    NewUser {
        email: email.to_string(),
        password_hash: "hash".to_string(),
        role: UserRole::Customer,
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
    }
}

#[tokio::test]
async fn test_insert_and_read_product() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let product = tx.insert_product(widget("PG-1", 10)).await.unwrap();
    tx.commit().await.unwrap();

    let loaded = store.product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.sku, "PG-1");
    assert_eq!(loaded.price, Money::from_cents(1999));
    assert_eq!(loaded.stock_quantity, 10);

    let by_sku = store.product_by_sku("PG-1").await.unwrap().unwrap();
    assert_eq!(by_sku.id, product.id);
}

#[tokio::test]
async fn test_duplicate_sku_maps_to_duplicate() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    tx.insert_product(widget("PG-DUP", 1)).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx.insert_product(widget("PG-DUP", 1)).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Duplicate {
            entity: EntityKind::Product,
            field: "sku"
        }
    ));
}

#[tokio::test]
async fn test_stock_guard_and_not_found() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let product = tx.insert_product(widget("PG-STOCK", 3)).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let updated = tx.adjust_stock(product.id, -2).await.unwrap();
    assert_eq!(updated.stock_quantity, 1);

    let err = tx.adjust_stock(product.id, -2).await.unwrap_err();
    assert!(matches!(err, StoreError::StockGuard { .. }));
    tx.rollback().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .adjust_stock(common::ProductId::new(9999), 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::NotFound {
            entity: EntityKind::Product,
            ..
        }
    ));
}

#[tokio::test]
async fn test_concurrent_decrements_never_oversell() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let product = tx.insert_product(widget("PG-RACE", 5)).await.unwrap();
    tx.commit().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut tx = store.begin().await.unwrap();
            match tx.adjust_stock(product.id, -1).await {
                Ok(_) => {
                    tx.commit().await.unwrap();
                    true
                }
                Err(_) => false,
            }
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 5);
    let loaded = store.product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.stock_quantity, 0);
}

#[tokio::test]
async fn test_cart_upsert_merges_quantity() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let product = tx.insert_product(widget("PG-CART", 10)).await.unwrap();
    let user = tx.insert_user(customer("cart@example.com")).await.unwrap();
    let cart = tx.insert_cart(user.id).await.unwrap();
    tx.upsert_cart_item(cart.id, product.id, 2).await.unwrap();
    tx.upsert_cart_item(cart.id, product.id, 1).await.unwrap();
    tx.commit().await.unwrap();

    let items = store.cart_items(cart.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 3);

    let mut tx = store.begin().await.unwrap();
    let err = tx.insert_cart(user.id).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Duplicate {
            entity: EntityKind::Cart,
            ..
        }
    ));
}

#[tokio::test]
async fn test_order_lines_and_payment_roundtrip() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let first = tx.insert_product(widget("PG-A", 10)).await.unwrap();
    let second = tx.insert_product(widget("PG-B", 10)).await.unwrap();
    let user = tx.insert_user(customer("order@example.com")).await.unwrap();
    let items = vec![OrderItem::snapshot(&first, 2), OrderItem::snapshot(&second, 1)];
    let total = items.iter().map(OrderItem::total_price).sum();
    let order = tx
        .insert_order(NewOrder {
            user_id: user.id,
            items,
            total_amount: total,
            shipping_address: "1 Main St".to_string(),
            billing_address: "1 Main St".to_string(),
        })
        .await
        .unwrap();
    let payment = tx
        .insert_payment(NewPayment {
            order_id: order.id,
            amount: total,
            currency: "USD".to_string(),
            method: PaymentMethod::CreditCard,
        })
        .await
        .unwrap();
    tx.attach_payment(order.id, payment.id).await.unwrap();
    tx.commit().await.unwrap();

    let loaded = store.order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::Pending);
    assert_eq!(loaded.items.len(), 2);
    assert_eq!(loaded.items[0].product_id, first.id);
    assert_eq!(loaded.total_amount, Money::from_cents(5997));
    assert_eq!(loaded.payment_id, Some(payment.id));

    let by_order = store.payment_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(by_order.status, PaymentStatus::Pending);

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .insert_payment(NewPayment {
            order_id: order.id,
            amount: total,
            currency: "USD".to_string(),
            method: PaymentMethod::Paypal,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Duplicate {
            entity: EntityKind::Payment,
            ..
        }
    ));
}

#[tokio::test]
async fn test_delete_product_rejected_while_order_open() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let product = tx.insert_product(widget("PG-DEL", 10)).await.unwrap();
    let user = tx.insert_user(customer("del@example.com")).await.unwrap();
    let order = tx
        .insert_order(NewOrder {
            user_id: user.id,
            items: vec![OrderItem::snapshot(&product, 1)],
            total_amount: product.price,
            shipping_address: "1 Main St".to_string(),
            billing_address: "1 Main St".to_string(),
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx.delete_product(product.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Referenced { .. }));
    tx.rollback().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.update_order_status(order.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    let deletion = tx.delete_product(product.id).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(deletion.product.id, product.id);
    assert!(store.product(product.id).await.unwrap().is_none());
    let kept = store.order(order.id).await.unwrap().unwrap();
    assert_eq!(kept.items[0].product_name, "Widget");
}

#[tokio::test]
async fn test_delete_product_waits_for_checkout_lock() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let product = tx.insert_product(widget("PG-LOCK", 10)).await.unwrap();
    let user = tx.insert_user(customer("lock@example.com")).await.unwrap();
    tx.commit().await.unwrap();

    // A checkout holds the product row while it writes the order.
    let mut checkout = store.begin().await.unwrap();
    let locked = checkout.product(product.id).await.unwrap().unwrap();

    let deleter = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut tx = store.begin().await.unwrap();
            let result = tx.delete_product(product.id).await;
            if result.is_ok() {
                tx.commit().await.unwrap();
            }
            result
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!deleter.is_finished());

    checkout
        .insert_order(NewOrder {
            user_id: user.id,
            items: vec![OrderItem::snapshot(&locked, 1)],
            total_amount: locked.price,
            shipping_address: "1 Main St".to_string(),
            billing_address: "1 Main St".to_string(),
        })
        .await
        .unwrap();
    checkout.commit().await.unwrap();

    let err = deleter.await.unwrap().unwrap_err();
    assert!(matches!(err, StoreError::Referenced { .. }));
    assert!(store.product(product.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_missing_product_is_not_found() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .delete_product(common::ProductId::new(404))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::NotFound {
            entity: EntityKind::Product,
            ..
        }
    ));
}
