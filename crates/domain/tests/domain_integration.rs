//! Integration tests for the domain services.
//!
//! These run against the in-memory record store behind a real moka cache,
//! so every read exercises the cache-aside path.

use std::sync::Arc;

use common::{Money, ProductId, UserId};
use domain::{
    CartAggregate, CommerceError, InventoryLedger, ProductCatalog, ProductUpdate, UserDirectory,
};
use storage::{
    CacheAsideStore, CacheTtls, EntityKind, InMemoryRecordStore, MokaCache, NewProduct, NewUser,
    UserRole,
};

struct TestHarness {
    store: Arc<CacheAsideStore<InMemoryRecordStore>>,
    catalog: ProductCatalog<InMemoryRecordStore>,
    users: UserDirectory<InMemoryRecordStore>,
    carts: CartAggregate<InMemoryRecordStore>,
    inventory: InventoryLedger<InMemoryRecordStore>,
}

impl TestHarness {
    fn new() -> Self {
        let store = Arc::new(CacheAsideStore::new(
            InMemoryRecordStore::new(),
            Arc::new(MokaCache::new(1_000)),
            CacheTtls::default(),
        ));
        Self {
            catalog: ProductCatalog::new(store.clone()),
            users: UserDirectory::new(store.clone()),
            carts: CartAggregate::new(store.clone()),
            inventory: InventoryLedger::new(store.clone()),
            store,
        }
    }

    async fn product(&self, sku: &str, price_cents: i64, stock: i64) -> ProductId {
        self.catalog
            .create_product(NewProduct {
                name: format!("Product {sku}"),
                description: String::new(),
                price: Money::from_cents(price_cents),
                stock_quantity: stock,
                sku: sku.to_string(),
                category_id: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn user(&self, email: &str) -> UserId {
        self.users
            .register(NewUser {
                email: email.to_string(),
                password_hash: "$argon2id$hash".to_string(),
                role: UserRole::Customer,
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
            })
            .await
            .unwrap()
            .id
    }
}

mod cart {
    use super::*;

    #[tokio::test]
    async fn cart_is_created_lazily_once() {
        let h = TestHarness::new();
        let user = h.user("lazy@example.com").await;

        assert!(h.carts.find_cart(user).await.unwrap().is_none());
        let first = h.carts.cart_for_user(user).await.unwrap();
        let second = h.carts.cart_for_user(user).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert!(first.is_empty());
    }

    #[tokio::test]
    async fn adding_same_product_merges_lines() {
        let h = TestHarness::new();
        let user = h.user("merge@example.com").await;
        let product = h.product("MERGE", 1999, 100).await;

        h.carts.add_item(user, product, 1).await.unwrap();
        let view = h.carts.add_item(user, product, 1).await.unwrap();

        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.lines[0].quantity, 2);
        assert_eq!(view.total().unwrap(), Money::from_cents(3998));
    }

    #[tokio::test]
    async fn add_item_validates_quantity_and_stock() {
        let h = TestHarness::new();
        let user = h.user("stock@example.com").await;
        let product = h.product("SCARCE", 500, 3).await;

        assert!(matches!(
            h.carts.add_item(user, product, 0).await,
            Err(CommerceError::ValidationFailed { field: "quantity", .. })
        ));

        h.carts.add_item(user, product, 2).await.unwrap();
        // The merged quantity (2 + 2) exceeds stock.
        assert!(matches!(
            h.carts.add_item(user, product, 2).await,
            Err(CommerceError::InsufficientStock { .. })
        ));
        assert!(matches!(
            h.carts.add_item(user, ProductId::new(999), 1).await,
            Err(CommerceError::NotFound {
                entity: EntityKind::Product,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn update_item_overwrites_or_removes() {
        let h = TestHarness::new();
        let user = h.user("update@example.com").await;
        let product = h.product("UPD", 250, 10).await;

        let view = h.carts.add_item(user, product, 1).await.unwrap();
        let item_id = view.lines[0].item_id;

        let view = h.carts.update_item(view.id(), item_id, 5).await.unwrap();
        assert_eq!(view.lines[0].quantity, 5);

        assert!(matches!(
            h.carts.update_item(view.id(), item_id, 11).await,
            Err(CommerceError::InsufficientStock { .. })
        ));

        let view = h.carts.update_item(view.id(), item_id, 0).await.unwrap();
        assert!(view.is_empty());
    }

    #[tokio::test]
    async fn items_cannot_be_touched_through_another_cart() {
        let h = TestHarness::new();
        let alice = h.user("alice@example.com").await;
        let bob = h.user("bob@example.com").await;
        let product = h.product("SHARED", 100, 10).await;

        let alice_cart = h.carts.add_item(alice, product, 1).await.unwrap();
        let bob_cart = h.carts.cart_for_user(bob).await.unwrap();

        let err = h
            .carts
            .remove_item(bob_cart.id(), alice_cart.lines[0].item_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommerceError::NotFound {
                entity: EntityKind::CartItem,
                ..
            }
        ));
        assert_eq!(h.carts.cart(alice_cart.id()).await.unwrap().lines.len(), 1);
    }

    #[tokio::test]
    async fn total_follows_live_prices() {
        let h = TestHarness::new();
        let user = h.user("live@example.com").await;
        let product = h.product("LIVE", 1000, 10).await;

        let view = h.carts.add_item(user, product, 3).await.unwrap();
        assert_eq!(h.carts.get_total(view.id()).await.unwrap(), Money::from_cents(3000));

        h.catalog
            .update_product(
                product,
                ProductUpdate {
                    price: Some(Money::from_cents(1200)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(h.carts.get_total(view.id()).await.unwrap(), Money::from_cents(3600));
    }

    #[tokio::test]
    async fn overflowing_line_total_is_rejected() {
        let h = TestHarness::new();
        let user = h.user("overflow@example.com").await;
        let product = h.product("HUGE", i64::MAX / 2, 10).await;

        assert!(matches!(
            h.carts.add_item(user, product, 3).await,
            Err(CommerceError::ValidationFailed { field: "quantity", .. })
        ));
        let view = h.carts.cart_for_user(user).await.unwrap();
        assert!(view.is_empty());

        // Two units still fit; a later price rise makes the total unrepresentable.
        let view = h.carts.add_item(user, product, 2).await.unwrap();
        assert_eq!(view.total().unwrap(), Money::from_cents(i64::MAX - 1));
        h.catalog
            .update_product(
                product,
                ProductUpdate {
                    price: Some(Money::from_cents(i64::MAX)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            h.carts.get_total(view.id()).await,
            Err(CommerceError::ValidationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn clear_empties_the_cart() {
        let h = TestHarness::new();
        let user = h.user("clear@example.com").await;
        let a = h.product("A", 100, 10).await;
        let b = h.product("B", 200, 10).await;

        h.carts.add_item(user, a, 1).await.unwrap();
        let view = h.carts.add_item(user, b, 2).await.unwrap();

        assert_eq!(h.carts.clear(view.id()).await.unwrap(), 2);
        assert!(h.carts.cart(view.id()).await.unwrap().is_empty());
    }
}

mod catalog {
    use super::*;

    #[tokio::test]
    async fn categories_require_existing_parent() {
        let h = TestHarness::new();
        let root = h.catalog.create_category("Hardware", None).await.unwrap();
        let child = h
            .catalog
            .create_category("Fasteners", Some(root.id))
            .await
            .unwrap();
        assert_eq!(child.parent_id, Some(root.id));

        let err = h
            .catalog
            .create_category("Orphan", Some(common::CategoryId::new(77)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommerceError::NotFound {
                entity: EntityKind::Category,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn duplicate_sku_is_a_validation_failure() {
        let h = TestHarness::new();
        h.product("DUP", 100, 1).await;

        let err = h
            .catalog
            .create_product(NewProduct {
                name: "Other".to_string(),
                description: String::new(),
                price: Money::from_cents(100),
                stock_quantity: 1,
                sku: "DUP".to_string(),
                category_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::ValidationFailed { field: "sku", .. }));
    }

    #[tokio::test]
    async fn sku_rename_is_visible_through_the_cache() {
        let h = TestHarness::new();
        let id = h.product("OLD", 100, 1).await;
        assert_eq!(h.catalog.product_by_sku("OLD").await.unwrap().id, id);

        h.catalog
            .update_product(
                id,
                ProductUpdate {
                    sku: Some("NEW".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            h.catalog.product_by_sku("OLD").await,
            Err(CommerceError::NotFound { .. })
        ));
        assert_eq!(h.catalog.product_by_sku("NEW").await.unwrap().id, id);
    }

    #[tokio::test]
    async fn deleting_a_product_removes_it_from_carts() {
        let h = TestHarness::new();
        let user = h.user("gone@example.com").await;
        let keep = h.product("KEEP", 100, 10).await;
        let gone = h.product("GONE", 100, 10).await;

        h.carts.add_item(user, keep, 1).await.unwrap();
        let view = h.carts.add_item(user, gone, 1).await.unwrap();
        assert_eq!(view.lines.len(), 2);

        let deletion = h.catalog.delete_product(gone).await.unwrap();
        assert_eq!(deletion.affected_carts.len(), 1);

        let view = h.carts.cart(view.id()).await.unwrap();
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.lines[0].product.id, keep);
        assert!(h.catalog.product(gone).await.is_err());
    }
}

mod users {
    use super::*;

    #[tokio::test]
    async fn registration_normalises_email_and_rejects_duplicates() {
        let h = TestHarness::new();
        let id = h.user("Mixed.Case@Example.com").await;

        let profile = h.users.user_by_email("mixed.case@example.com").await.unwrap();
        assert_eq!(profile.id, id);
        assert_eq!(profile.email, "mixed.case@example.com");

        let err = h
            .users
            .register(NewUser {
                email: "MIXED.CASE@example.com".to_string(),
                password_hash: "x".to_string(),
                role: UserRole::Customer,
                first_name: "Dup".to_string(),
                last_name: "User".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::ValidationFailed { field: "email", .. }));
    }

    #[tokio::test]
    async fn credentials_include_the_hash() {
        let h = TestHarness::new();
        h.user("creds@example.com").await;

        let user = h.users.credentials("creds@example.com").await.unwrap();
        assert_eq!(user.password_hash, "$argon2id$hash");
    }
}

mod inventory {
    use super::*;

    #[tokio::test]
    async fn concurrent_decrements_never_oversell() {
        let h = Arc::new(TestHarness::new());
        let product = h.product("RACE", 100, 5).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.inventory.adjust_stock(product, -1).await.is_ok()
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 5);
        let stored = h.store.product(product).await.unwrap().unwrap();
        assert_eq!(stored.stock_quantity, 0);
    }
}
