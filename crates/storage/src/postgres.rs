use std::num::TryFromIntError;

use async_trait::async_trait;
use common::{
    CartId, CartItemId, CategoryId, Money, OrderId, OrderStatus, PaymentId, PaymentStatus,
    ProductId, StatusMachine, UserId,
};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{PgConnection, Postgres, Row};

use crate::records::{
    Cart, CartItem, EntityKind, NewCategory, NewOrder, NewPayment, NewProduct, NewUser, Order,
    OrderItem, Payment, Product, ProductCategory, ProductDeletion, User,
};
use crate::store::{RecordStore, Transaction};
use crate::{Result, StoreError};

const PRODUCT_COLUMNS: &str = "id, name, description, price_cents, stock_quantity, sku, category_id, created_at, updated_at";
const CATEGORY_COLUMNS: &str = "id, name, parent_id, created_at";
const USER_COLUMNS: &str =
    "id, email, password_hash, role, first_name, last_name, created_at";
const CART_COLUMNS: &str = "id, user_id, created_at, updated_at";
const CART_ITEM_COLUMNS: &str = "id, cart_id, product_id, quantity";
const ORDER_COLUMNS: &str = "id, user_id, total_amount_cents, status, shipping_address, billing_address, payment_id, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "id, order_id, amount_cents, currency, method, status, transaction_id, payment_date, created_at, updated_at";

/// PostgreSQL-backed record store implementation.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Creates a new PostgreSQL record store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

fn decode_id<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: TryFrom<i64, Error = TryFromIntError>,
{
    let raw: i64 = row.try_get(column)?;
    T::try_from(raw).map_err(|e| StoreError::Decode(format!("{column}={raw}: {e}")))
}

fn decode_optional_id<T>(row: &PgRow, column: &str) -> Result<Option<T>>
where
    T: TryFrom<i64, Error = TryFromIntError>,
{
    let raw: Option<i64> = row.try_get(column)?;
    raw.map(|value| {
        T::try_from(value).map_err(|e| StoreError::Decode(format!("{column}={value}: {e}")))
    })
    .transpose()
}

fn decode_quantity(row: &PgRow, column: &str) -> Result<u32> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw).map_err(|e| StoreError::Decode(format!("{column}={raw}: {e}")))
}

fn decode_parsed<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::Decode(format!("{column}: {e}")))
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: decode_id(row, "id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        stock_quantity: row.try_get("stock_quantity")?,
        sku: row.try_get("sku")?,
        category_id: decode_optional_id(row, "category_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_category(row: &PgRow) -> Result<ProductCategory> {
    Ok(ProductCategory {
        id: decode_id(row, "id")?,
        name: row.try_get("name")?,
        parent_id: decode_optional_id(row, "parent_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_user(row: &PgRow) -> Result<User> {
    Ok(User {
        id: decode_id(row, "id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role: decode_parsed(row, "role")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_cart(row: &PgRow) -> Result<Cart> {
    Ok(Cart {
        id: decode_id(row, "id")?,
        user_id: decode_id(row, "user_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_cart_item(row: &PgRow) -> Result<CartItem> {
    Ok(CartItem {
        id: decode_id(row, "id")?,
        cart_id: decode_id(row, "cart_id")?,
        product_id: decode_id(row, "product_id")?,
        quantity: decode_quantity(row, "quantity")?,
    })
}

fn row_to_order_item(row: &PgRow) -> Result<OrderItem> {
    Ok(OrderItem {
        product_id: decode_id(row, "product_id")?,
        product_name: row.try_get("product_name")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        quantity: decode_quantity(row, "quantity")?,
    })
}

/// Builds an order from its row. Items are attached by the caller.
fn row_to_order(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: decode_id(row, "id")?,
        user_id: decode_id(row, "user_id")?,
        items: Vec::new(),
        total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
        status: decode_parsed(row, "status")?,
        shipping_address: row.try_get("shipping_address")?,
        billing_address: row.try_get("billing_address")?,
        payment_id: decode_optional_id(row, "payment_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_payment(row: &PgRow) -> Result<Payment> {
    Ok(Payment {
        id: decode_id(row, "id")?,
        order_id: decode_id(row, "order_id")?,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        currency: row.try_get("currency")?,
        method: decode_parsed(row, "method")?,
        status: decode_parsed(row, "status")?,
        transaction_id: row.try_get("transaction_id")?,
        payment_date: row.try_get("payment_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Maps constraint violations onto the store's error vocabulary.
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        let constraint = db_err.constraint().unwrap_or_default().to_string();
        match db_err.kind() {
            ErrorKind::UniqueViolation => {
                let (entity, field) = match constraint.as_str() {
                    "unique_product_sku" => (EntityKind::Product, "sku"),
                    "unique_user_email" => (EntityKind::User, "email"),
                    "unique_cart_user" => (EntityKind::Cart, "user_id"),
                    "unique_cart_product" => (EntityKind::CartItem, "product_id"),
                    "unique_payment_order" => (EntityKind::Payment, "order_id"),
                    _ => return StoreError::Database(err),
                };
                return StoreError::Duplicate { entity, field };
            }
            ErrorKind::ForeignKeyViolation => {
                let entity = match constraint.as_str() {
                    "fk_categories_parent" | "fk_products_category" => EntityKind::Category,
                    "fk_carts_user" | "fk_orders_user" => EntityKind::User,
                    "fk_cart_items_cart" => EntityKind::Cart,
                    "fk_cart_items_product" => EntityKind::Product,
                    "fk_payments_order" | "fk_order_items_order" => EntityKind::Order,
                    "fk_orders_payment" => EntityKind::Payment,
                    _ => return StoreError::Database(err),
                };
                return StoreError::NotFound {
                    entity,
                    id: format!("referenced by {constraint}"),
                };
            }
            ErrorKind::CheckViolation => {
                let entity = match constraint.split('_').next() {
                    Some("products") => EntityKind::Product,
                    Some("cart") => EntityKind::CartItem,
                    Some("order") | Some("orders") => EntityKind::Order,
                    _ => return StoreError::Database(err),
                };
                return StoreError::Constraint { entity, constraint };
            }
            _ => {}
        }
    }
    StoreError::Database(err)
}

fn locking(sql: String, lock: bool) -> String {
    if lock { format!("{sql} FOR UPDATE") } else { sql }
}

async fn fetch_product(conn: &mut PgConnection, id: ProductId, lock: bool) -> Result<Option<Product>> {
    let sql = locking(
        format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"),
        lock,
    );
    let row = sqlx::query(&sql)
        .bind(id.as_i64())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(row_to_product).transpose()
}

async fn fetch_cart_for_user(
    conn: &mut PgConnection,
    user_id: UserId,
    lock: bool,
) -> Result<Option<Cart>> {
    let sql = locking(
        format!("SELECT {CART_COLUMNS} FROM carts WHERE user_id = $1"),
        lock,
    );
    let row = sqlx::query(&sql)
        .bind(user_id.as_i64())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(row_to_cart).transpose()
}

async fn fetch_cart_items(conn: &mut PgConnection, cart_id: CartId, lock: bool) -> Result<Vec<CartItem>> {
    let sql = locking(
        format!("SELECT {CART_ITEM_COLUMNS} FROM cart_items WHERE cart_id = $1 ORDER BY id"),
        lock,
    );
    let rows = sqlx::query(&sql)
        .bind(cart_id.as_i64())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(row_to_cart_item).collect()
}

/// Loads order rows and attaches their lines in position order.
async fn attach_items(conn: &mut PgConnection, rows: Vec<PgRow>) -> Result<Vec<Order>> {
    let mut orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>>>()?;
    if orders.is_empty() {
        return Ok(orders);
    }

    let ids: Vec<i64> = orders.iter().map(|o| o.id.as_i64()).collect();
    let item_rows = sqlx::query(
        r#"
        SELECT order_id, product_id, product_name, unit_price_cents, quantity
        FROM order_items
        WHERE order_id = ANY($1)
        ORDER BY order_id, position
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    for row in &item_rows {
        let order_id: OrderId = decode_id(row, "order_id")?;
        let item = row_to_order_item(row)?;
        if let Some(order) = orders.iter_mut().find(|o| o.id == order_id) {
            order.items.push(item);
        }
    }
    Ok(orders)
}

async fn fetch_order(conn: &mut PgConnection, id: OrderId, lock: bool) -> Result<Option<Order>> {
    let sql = locking(
        format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"),
        lock,
    );
    let rows = sqlx::query(&sql)
        .bind(id.as_i64())
        .fetch_all(&mut *conn)
        .await?;
    Ok(attach_items(conn, rows).await?.pop())
}

async fn fetch_payment(conn: &mut PgConnection, id: PaymentId, lock: bool) -> Result<Option<Payment>> {
    let sql = locking(
        format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"),
        lock,
    );
    let row = sqlx::query(&sql)
        .bind(id.as_i64())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(row_to_payment).transpose()
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let tx = self.pool.begin().await?;
        Ok(PostgresTransaction { tx })
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch_product(&mut conn, id, false).await
    }

    async fn product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1"
        ))
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_product).transpose()
    }

    async fn category(&self, id: CategoryId) -> Result<Option<ProductCategory>> {
        let row = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM product_categories WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_category).transpose()
    }

    async fn user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn cart(&self, id: CartId) -> Result<Option<Cart>> {
        let row = sqlx::query(&format!("SELECT {CART_COLUMNS} FROM carts WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_cart).transpose()
    }

    async fn cart_for_user(&self, user_id: UserId) -> Result<Option<Cart>> {
        let mut conn = self.pool.acquire().await?;
        fetch_cart_for_user(&mut conn, user_id, false).await
    }

    async fn cart_items(&self, cart_id: CartId) -> Result<Vec<CartItem>> {
        let mut conn = self.pool.acquire().await?;
        fetch_cart_items(&mut conn, cart_id, false).await
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id, false).await
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY id DESC"
        ))
        .bind(user_id.as_i64())
        .fetch_all(&mut *conn)
        .await?;
        attach_items(&mut conn, rows).await
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let mut conn = self.pool.acquire().await?;
        fetch_payment(&mut conn, id, false).await
    }

    async fn payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"
        ))
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_payment).transpose()
    }
}

/// Transaction over [`PostgresRecordStore`]. Rolled back by sqlx on drop.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn touch_cart(&mut self, cart_id: CartId) -> Result<()> {
        sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1")
            .bind(cart_id.as_i64())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>> {
        fetch_product(&mut self.tx, id, true).await
    }

    async fn insert_product(&mut self, product: NewProduct) -> Result<Product> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO products (name, description, price_cents, stock_quantity, sku, category_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.cents())
        .bind(product.stock_quantity)
        .bind(&product.sku)
        .bind(product.category_id.map(|id| id.as_i64()))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)?;
        row_to_product(&row)
    }

    async fn update_product(&mut self, product: &Product) -> Result<Product> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE products
            SET name = $2, description = $3, price_cents = $4, sku = $5, category_id = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(product.id.as_i64())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.cents())
        .bind(&product.sku)
        .bind(product.category_id.map(|id| id.as_i64()))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;

        match row {
            Some(row) => row_to_product(&row),
            None => Err(StoreError::not_found(EntityKind::Product, product.id)),
        }
    }

    async fn delete_product(&mut self, id: ProductId) -> Result<ProductDeletion> {
        // Checkout locks the product row before inserting order items, so
        // holding the same lock keeps the open-order check current.
        sqlx::query("SELECT 1 FROM products WHERE id = $1 FOR UPDATE")
            .bind(id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::not_found(EntityKind::Product, id))?;

        let terminal: Vec<&str> = OrderStatus::ALL
            .iter()
            .filter(|status| status.is_terminal())
            .map(|status| status.as_str())
            .collect();

        let open_order = sqlx::query(
            r#"
            SELECT o.id, o.status
            FROM orders o
            JOIN order_items i ON i.order_id = o.id
            WHERE i.product_id = $1 AND o.status <> ALL($2)
            LIMIT 1
            "#,
        )
        .bind(id.as_i64())
        .bind(&terminal)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(row) = open_order {
            let order_id: OrderId = decode_id(&row, "id")?;
            let status: String = row.try_get("status")?;
            return Err(StoreError::Referenced {
                entity: EntityKind::Product,
                id: id.to_string(),
                reason: format!("order {order_id} is {status}"),
            });
        }

        let cart_rows = sqlx::query(
            "DELETE FROM cart_items WHERE product_id = $1 RETURNING cart_id",
        )
        .bind(id.as_i64())
        .fetch_all(&mut *self.tx)
        .await?;
        let mut cart_ids = cart_rows
            .iter()
            .map(|row| row.try_get::<i64, _>("cart_id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        cart_ids.sort_unstable();
        cart_ids.dedup();

        let affected_rows = sqlx::query(&format!(
            "SELECT {CART_COLUMNS} FROM carts WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(&cart_ids)
        .fetch_all(&mut *self.tx)
        .await?;
        let affected_carts = affected_rows
            .iter()
            .map(row_to_cart)
            .collect::<Result<Vec<_>>>()?;

        let row = sqlx::query(&format!(
            "DELETE FROM products WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::Product, id))?;

        Ok(ProductDeletion {
            product: row_to_product(&row)?,
            affected_carts,
        })
    }

    async fn adjust_stock(&mut self, id: ProductId, delta: i64) -> Result<Product> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2, updated_at = NOW()
            WHERE id = $1 AND stock_quantity + $2 >= 0
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id.as_i64())
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;

        if let Some(row) = row {
            return row_to_product(&row);
        }

        // Zero rows: either the guard held or the product is gone.
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1)")
                .bind(id.as_i64())
                .fetch_one(&mut *self.tx)
                .await?;
        if exists {
            Err(StoreError::StockGuard {
                product_id: id,
                delta,
            })
        } else {
            Err(StoreError::not_found(EntityKind::Product, id))
        }
    }

    async fn insert_category(&mut self, category: NewCategory) -> Result<ProductCategory> {
        let row = sqlx::query(&format!(
            "INSERT INTO product_categories (name, parent_id) VALUES ($1, $2) RETURNING {CATEGORY_COLUMNS}"
        ))
        .bind(&category.name)
        .bind(category.parent_id.map(|id| id.as_i64()))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)?;
        row_to_category(&row)
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (email, password_hash, role, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)?;
        row_to_user(&row)
    }

    async fn cart_for_user(&mut self, user_id: UserId) -> Result<Option<Cart>> {
        fetch_cart_for_user(&mut self.tx, user_id, true).await
    }

    async fn insert_cart(&mut self, user_id: UserId) -> Result<Cart> {
        let row = sqlx::query(&format!(
            "INSERT INTO carts (user_id) VALUES ($1) RETURNING {CART_COLUMNS}"
        ))
        .bind(user_id.as_i64())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)?;
        row_to_cart(&row)
    }

    async fn cart_items(&mut self, cart_id: CartId) -> Result<Vec<CartItem>> {
        fetch_cart_items(&mut self.tx, cart_id, true).await
    }

    async fn upsert_cart_item(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO cart_items (cart_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (cart_id, product_id)
            DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
            RETURNING {CART_ITEM_COLUMNS}
            "#
        ))
        .bind(cart_id.as_i64())
        .bind(product_id.as_i64())
        .bind(i64::from(quantity))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)?;

        let item = row_to_cart_item(&row)?;
        self.touch_cart(cart_id).await?;
        Ok(item)
    }

    async fn set_cart_item_quantity(
        &mut self,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<CartItem> {
        let row = sqlx::query(&format!(
            "UPDATE cart_items SET quantity = $2 WHERE id = $1 RETURNING {CART_ITEM_COLUMNS}"
        ))
        .bind(item_id.as_i64())
        .bind(i64::from(quantity))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?
        .ok_or_else(|| StoreError::not_found(EntityKind::CartItem, item_id))?;

        let item = row_to_cart_item(&row)?;
        self.touch_cart(item.cart_id).await?;
        Ok(item)
    }

    async fn delete_cart_item(&mut self, item_id: CartItemId) -> Result<CartItem> {
        let row = sqlx::query(&format!(
            "DELETE FROM cart_items WHERE id = $1 RETURNING {CART_ITEM_COLUMNS}"
        ))
        .bind(item_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::CartItem, item_id))?;

        let item = row_to_cart_item(&row)?;
        self.touch_cart(item.cart_id).await?;
        Ok(item)
    }

    async fn clear_cart(&mut self, cart_id: CartId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id.as_i64())
            .execute(&mut *self.tx)
            .await?;
        self.touch_cart(cart_id).await?;
        Ok(result.rows_affected())
    }

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>> {
        fetch_order(&mut self.tx, id, true).await
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (user_id, total_amount_cents, status, shipping_address, billing_address)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.user_id.as_i64())
        .bind(order.total_amount.cents())
        .bind(OrderStatus::Pending.as_str())
        .bind(&order.shipping_address)
        .bind(&order.billing_address)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)?;
        let mut record = row_to_order(&row)?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, product_id, product_name, unit_price_cents, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(record.id.as_i64())
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .bind(item.product_id.as_i64())
            .bind(&item.product_name)
            .bind(item.unit_price.cents())
            .bind(i64::from(item.quantity))
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        }

        record.items = order.items;
        Ok(record)
    }

    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<Order> {
        let rows = sqlx::query(&format!(
            "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id.as_i64())
        .bind(status.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        attach_items(&mut self.tx, rows)
            .await?
            .pop()
            .ok_or_else(|| StoreError::not_found(EntityKind::Order, id))
    }

    async fn attach_payment(&mut self, order_id: OrderId, payment_id: PaymentId) -> Result<Order> {
        let rows = sqlx::query(&format!(
            "UPDATE orders SET payment_id = $2, updated_at = NOW() WHERE id = $1 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id.as_i64())
        .bind(payment_id.as_i64())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(classify)?;
        attach_items(&mut self.tx, rows)
            .await?
            .pop()
            .ok_or_else(|| StoreError::not_found(EntityKind::Order, order_id))
    }

    async fn payment(&mut self, id: PaymentId) -> Result<Option<Payment>> {
        fetch_payment(&mut self.tx, id, true).await
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payments (order_id, amount_cents, currency, method, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.order_id.as_i64())
        .bind(payment.amount.cents())
        .bind(&payment.currency)
        .bind(payment.method.as_str())
        .bind(PaymentStatus::Pending.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)?;
        row_to_payment(&row)
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<Payment> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE payments
            SET status = $2, transaction_id = $3, payment_date = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.id.as_i64())
        .bind(payment.status.as_str())
        .bind(payment.transaction_id.as_deref())
        .bind(payment.payment_date)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::Payment, payment.id))?;
        row_to_payment(&row)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
