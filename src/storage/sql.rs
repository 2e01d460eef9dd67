// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL durable store (SQLite or MySQL through the sqlx `Any` driver).
//!
//! Schema:
//! ```sql
//! CREATE TABLE users (
//!   id BIGINT PRIMARY KEY AUTO_INCREMENT,
//!   username VARCHAR(255) NOT NULL UNIQUE,
//!   email VARCHAR(255) NOT NULL UNIQUE,
//!   password_hash VARCHAR(255) NOT NULL,
//!   created_at BIGINT NOT NULL
//! )
//! CREATE TABLE stores (
//!   id BIGINT PRIMARY KEY AUTO_INCREMENT,
//!   name VARCHAR(255) NOT NULL,
//!   admin_id BIGINT NOT NULL UNIQUE,   -- one store per admin
//!   created_at BIGINT NOT NULL
//! )
//! CREATE TABLE products (
//!   id BIGINT PRIMARY KEY AUTO_INCREMENT,
//!   store_id BIGINT NOT NULL,
//!   name VARCHAR(255) NOT NULL,
//!   stock BIGINT NOT NULL,
//!   created_at BIGINT NOT NULL
//! )
//! CREATE TABLE cart_items (
//!   id BIGINT PRIMARY KEY AUTO_INCREMENT,
//!   user_id BIGINT NOT NULL,
//!   product_id BIGINT NULL,            -- nulled when the product is deleted
//!   purchase_amount BIGINT NOT NULL,
//!   is_paid BIGINT NOT NULL DEFAULT 0,
//!   is_product_deleted BIGINT NOT NULL DEFAULT 0,
//!   created_at BIGINT NOT NULL
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! - Flags are integer columns: the `Any` driver has no portable boolean.
//! - All integers are BIGINT so they decode as `i64` on both backends.
//! - MySQL text can come back as bytes, so string columns are read through
//!   [`text`], which accepts either.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use super::traits::{DurableStore, PaymentOutcome, StorageError};
use crate::model::{
    now_millis, CartItem, NewCartItem, NewProduct, NewStore, NewUser, Product, ProductUpdate,
    Store, User,
};
use crate::resilience::retry::{retry, retry_if, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const SQLITE_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS stores (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        admin_id INTEGER NOT NULL UNIQUE,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        store_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        stock INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_products_store ON products (store_id)",
    r#"CREATE TABLE IF NOT EXISTS cart_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        product_id INTEGER NULL,
        purchase_amount INTEGER NOT NULL,
        is_paid INTEGER NOT NULL DEFAULT 0,
        is_product_deleted INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_cart_items_user ON cart_items (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_cart_items_product ON cart_items (product_id)",
];

const MYSQL_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        username VARCHAR(255) NOT NULL UNIQUE,
        email VARCHAR(255) NOT NULL UNIQUE,
        password_hash VARCHAR(255) NOT NULL,
        created_at BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS stores (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        name VARCHAR(255) NOT NULL,
        admin_id BIGINT NOT NULL UNIQUE,
        created_at BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS products (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        store_id BIGINT NOT NULL,
        name VARCHAR(255) NOT NULL,
        stock BIGINT NOT NULL,
        created_at BIGINT NOT NULL,
        INDEX idx_products_store (store_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS cart_items (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        user_id BIGINT NOT NULL,
        product_id BIGINT NULL,
        purchase_amount BIGINT NOT NULL,
        is_paid BIGINT NOT NULL DEFAULT 0,
        is_product_deleted BIGINT NOT NULL DEFAULT 0,
        created_at BIGINT NOT NULL,
        INDEX idx_cart_items_user (user_id),
        INDEX idx_cart_items_product (product_id)
    )"#,
];

const CART_COLUMNS: &str =
    "id, user_id, product_id, purchase_amount, is_paid, is_product_deleted, created_at";

fn db_err(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(ref db) = e {
        let message = db.message();
        if db.is_unique_violation()
            || message.contains("UNIQUE constraint failed")
            || message.contains("Duplicate entry")
        {
            return StorageError::Conflict(message.to_string());
        }
    }
    StorageError::Backend(e.to_string())
}

/// Constraint violations are permanent; everything else gets the query retry.
/// Only idempotent statements (reads and plain updates) are retried at all.
fn retryable(e: &StorageError) -> bool {
    matches!(e, StorageError::Backend(_))
}

/// Read a string column as String (SQLite) or bytes (MySQL).
fn text(row: &AnyRow, column: &str) -> Result<String, StorageError> {
    if let Ok(s) = row.try_get::<String, _>(column) {
        return Ok(s);
    }
    let bytes: Vec<u8> = row.try_get(column).map_err(db_err)?;
    String::from_utf8(bytes)
        .map_err(|e| StorageError::Backend(format!("Column '{}' is not UTF-8: {}", column, e)))
}

fn int(row: &AnyRow, column: &str) -> Result<i64, StorageError> {
    row.try_get::<i64, _>(column).map_err(db_err)
}

fn user_from_row(row: &AnyRow) -> Result<User, StorageError> {
    Ok(User {
        id: int(row, "id")?,
        username: text(row, "username")?,
        email: text(row, "email")?,
        password_hash: text(row, "password_hash")?,
        created_at: int(row, "created_at")?,
    })
}

fn store_from_row(row: &AnyRow) -> Result<Store, StorageError> {
    Ok(Store {
        id: int(row, "id")?,
        name: text(row, "name")?,
        admin_id: int(row, "admin_id")?,
        created_at: int(row, "created_at")?,
    })
}

fn product_from_row(row: &AnyRow) -> Result<Product, StorageError> {
    Ok(Product {
        id: int(row, "id")?,
        store_id: int(row, "store_id")?,
        name: text(row, "name")?,
        stock: int(row, "stock")?,
        created_at: int(row, "created_at")?,
    })
}

fn cart_item_from_row(row: &AnyRow) -> Result<CartItem, StorageError> {
    Ok(CartItem {
        id: int(row, "id")?,
        user_id: int(row, "user_id")?,
        product_id: row.try_get::<Option<i64>, _>("product_id").map_err(db_err)?,
        purchase_amount: int(row, "purchase_amount")?,
        is_paid: int(row, "is_paid")? != 0,
        is_product_deleted: int(row, "is_product_deleted")? != 0,
        created_at: int(row, "created_at")?,
    })
}

type AnyQuery<'q> = sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>;

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStore {
    /// Create a new SQL store with startup-mode retry (fails fast if config is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    pub fn is_sqlite(&self) -> bool {
        self.is_sqlite
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Enable WAL mode for SQLite so readers don't block the writer.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements = if self.is_sqlite { SQLITE_SCHEMA } else { MYSQL_SCHEMA };

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            })
            .await?;
        }
        Ok(())
    }

    /// Append `RETURNING id` where the backend supports it.
    fn returning_id(&self, insert: &str) -> String {
        if self.is_sqlite {
            format!("{} RETURNING id", insert)
        } else {
            insert.to_string()
        }
    }

    /// Run a single INSERT and read the new row id from that same statement:
    /// `RETURNING id` on SQLite, the driver's last insert id on MySQL.
    ///
    /// Inserts are never retried. Once the statement has been sent, a
    /// repeat could duplicate the row.
    async fn insert_returning_id(&self, query: AnyQuery<'_>, table: &str) -> Result<i64, StorageError> {
        if self.is_sqlite {
            let row = query.fetch_one(&self.pool).await.map_err(db_err)?;
            int(&row, "id")
        } else {
            query
                .execute(&self.pool)
                .await
                .map_err(db_err)?
                .last_insert_id()
                .ok_or_else(|| StorageError::Backend(format!("No id returned for insert into {}", table)))
        }
    }

    async fn delete_product_tx(&self, product_id: i64) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "UPDATE cart_items SET is_product_deleted = 1, product_id = NULL WHERE product_id = ?",
        )
        .bind(product_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let deleted = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(product_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

        if deleted == 0 {
            // Nothing was flagged either: no cart item can reference a missing product
            tx.rollback().await.map_err(db_err)?;
            return Ok(false);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn delete_store_tx(&self, store_id: i64) -> Result<Option<Vec<i64>>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let exists = sqlx::query("SELECT 1 AS found FROM stores WHERE id = ?")
            .bind(store_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .is_some();
        if !exists {
            tx.rollback().await.map_err(db_err)?;
            return Ok(None);
        }

        let rows = sqlx::query("SELECT id FROM products WHERE store_id = ? ORDER BY id")
            .bind(store_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
        let product_ids = rows
            .iter()
            .map(|row| int(row, "id"))
            .collect::<Result<Vec<_>, _>>()?;

        sqlx::query(
            "UPDATE cart_items SET is_product_deleted = 1, product_id = NULL \
             WHERE product_id IN (SELECT id FROM products WHERE store_id = ?)",
        )
        .bind(store_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM products WHERE store_id = ?")
            .bind(store_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("DELETE FROM stores WHERE id = ?")
            .bind(store_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(Some(product_ids))
    }

    async fn pay_cart_item_tx(
        &self,
        user_id: i64,
        cart_item_id: i64,
    ) -> Result<PaymentOutcome, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(
            "SELECT product_id, purchase_amount, is_paid FROM cart_items WHERE id = ? AND user_id = ?",
        )
        .bind(cart_item_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(db_err)?;
            return Ok(PaymentOutcome::Missing);
        };
        let product_id: Option<i64> = row.try_get("product_id").map_err(db_err)?;
        let purchase_amount = int(&row, "purchase_amount")?;
        let is_paid = int(&row, "is_paid")? != 0;

        if is_paid {
            tx.rollback().await.map_err(db_err)?;
            return Ok(PaymentOutcome::AlreadyPaid);
        }
        let Some(product_id) = product_id else {
            tx.rollback().await.map_err(db_err)?;
            return Ok(PaymentOutcome::ProductDeleted);
        };

        // Conditional decrement: the row only matches while enough stock remains
        let decremented = sqlx::query(
            "UPDATE products SET stock = stock - ? WHERE id = ? AND stock >= ?",
        )
        .bind(purchase_amount)
        .bind(product_id)
        .bind(purchase_amount)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        if decremented == 0 {
            let available = sqlx::query("SELECT stock FROM products WHERE id = ?")
                .bind(product_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?
                .map(|row| int(&row, "stock"))
                .transpose()?;
            tx.rollback().await.map_err(db_err)?;
            return Ok(PaymentOutcome::InsufficientStock { available });
        }

        let marked = sqlx::query(
            "UPDATE cart_items SET is_paid = 1 WHERE id = ? AND user_id = ? AND is_paid = 0",
        )
        .bind(cart_item_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        if marked == 0 {
            // Lost a race with a concurrent payment of the same item
            tx.rollback().await.map_err(db_err)?;
            return Ok(PaymentOutcome::AlreadyPaid);
        }

        let remaining_stock = sqlx::query("SELECT stock FROM products WHERE id = ?")
            .bind(product_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)
            .and_then(|row| int(&row, "stock"))?;

        tx.commit().await.map_err(db_err)?;
        Ok(PaymentOutcome::Paid { product_id, purchase_amount, remaining_stock })
    }
}

#[async_trait]
impl DurableStore for SqlStore {
    async fn insert_user(&self, user: &NewUser) -> Result<User, StorageError> {
        let created_at = now_millis();

        let sql = self.returning_id(
            "INSERT INTO users (username, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        );
        let query: AnyQuery<'_> = sqlx::query(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(created_at);
        let id = self.insert_returning_id(query, "users").await?;

        Ok(User {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            created_at,
        })
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        retry_if("sql_user_by_email", &RetryConfig::query(), || async {
            sqlx::query(
                "SELECT id, username, email, password_hash, created_at FROM users WHERE email = ?",
            )
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|row| user_from_row(&row))
            .transpose()
        }, retryable)
        .await
    }

    async fn is_store_admin(&self, user_id: i64, store_id: i64) -> Result<bool, StorageError> {
        retry_if("sql_is_store_admin", &RetryConfig::query(), || async {
            let row = sqlx::query("SELECT 1 AS found FROM stores WHERE id = ? AND admin_id = ?")
                .bind(store_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            Ok(row.is_some())
        }, retryable)
        .await
    }

    async fn store_by_id(&self, store_id: i64) -> Result<Option<Store>, StorageError> {
        retry_if("sql_store_by_id", &RetryConfig::query(), || async {
            sqlx::query("SELECT id, name, admin_id, created_at FROM stores WHERE id = ?")
                .bind(store_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .map(|row| store_from_row(&row))
                .transpose()
        }, retryable)
        .await
    }

    async fn store_by_admin(&self, admin_id: i64) -> Result<Option<Store>, StorageError> {
        retry_if("sql_store_by_admin", &RetryConfig::query(), || async {
            sqlx::query("SELECT id, name, admin_id, created_at FROM stores WHERE admin_id = ?")
                .bind(admin_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .map(|row| store_from_row(&row))
                .transpose()
        }, retryable)
        .await
    }

    async fn list_stores(&self) -> Result<Vec<Store>, StorageError> {
        retry_if("sql_list_stores", &RetryConfig::query(), || async {
            let rows = sqlx::query("SELECT id, name, admin_id, created_at FROM stores ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            rows.iter().map(store_from_row).collect()
        }, retryable)
        .await
    }

    async fn insert_store(&self, store: &NewStore) -> Result<Store, StorageError> {
        let created_at = now_millis();

        let sql = self.returning_id("INSERT INTO stores (name, admin_id, created_at) VALUES (?, ?, ?)");
        let query: AnyQuery<'_> = sqlx::query(&sql).bind(&store.name).bind(store.admin_id).bind(created_at);
        let id = self.insert_returning_id(query, "stores").await?;

        Ok(Store { id, name: store.name.clone(), admin_id: store.admin_id, created_at })
    }

    async fn rename_store(&self, store_id: i64, name: &str) -> Result<bool, StorageError> {
        retry_if("sql_rename_store", &RetryConfig::query(), || async {
            let result = sqlx::query("UPDATE stores SET name = ? WHERE id = ?")
                .bind(name)
                .bind(store_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            Ok(result.rows_affected() > 0)
        }, retryable)
        .await
    }

    async fn delete_store(&self, store_id: i64) -> Result<Option<Vec<i64>>, StorageError> {
        self.delete_store_tx(store_id).await
    }

    async fn product_by_id(&self, product_id: i64) -> Result<Option<Product>, StorageError> {
        retry_if("sql_product_by_id", &RetryConfig::query(), || async {
            sqlx::query("SELECT id, store_id, name, stock, created_at FROM products WHERE id = ?")
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .map(|row| product_from_row(&row))
                .transpose()
        }, retryable)
        .await
    }

    async fn products_by_store(&self, store_id: i64) -> Result<Vec<Product>, StorageError> {
        retry_if("sql_products_by_store", &RetryConfig::query(), || async {
            let rows = sqlx::query(
                "SELECT id, store_id, name, stock, created_at FROM products WHERE store_id = ? ORDER BY id",
            )
            .bind(store_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.iter().map(product_from_row).collect()
        }, retryable)
        .await
    }

    async fn list_products(&self) -> Result<Vec<Product>, StorageError> {
        retry_if("sql_list_products", &RetryConfig::query(), || async {
            let rows =
                sqlx::query("SELECT id, store_id, name, stock, created_at FROM products ORDER BY id")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_err)?;
            rows.iter().map(product_from_row).collect()
        }, retryable)
        .await
    }

    async fn product_stock(&self, product_id: i64) -> Result<Option<i64>, StorageError> {
        retry_if("sql_product_stock", &RetryConfig::query(), || async {
            sqlx::query("SELECT stock FROM products WHERE id = ?")
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .map(|row| int(&row, "stock"))
                .transpose()
        }, retryable)
        .await
    }

    async fn insert_product(&self, product: &NewProduct) -> Result<Product, StorageError> {
        let created_at = now_millis();

        let sql = self.returning_id(
            "INSERT INTO products (store_id, name, stock, created_at) VALUES (?, ?, ?, ?)",
        );
        let query: AnyQuery<'_> = sqlx::query(&sql)
            .bind(product.store_id)
            .bind(&product.name)
            .bind(product.stock)
            .bind(created_at);
        let id = self.insert_returning_id(query, "products").await?;

        Ok(Product {
            id,
            store_id: product.store_id,
            name: product.name.clone(),
            stock: product.stock,
            created_at,
        })
    }

    async fn update_product(
        &self,
        product_id: i64,
        update: &ProductUpdate,
    ) -> Result<Option<Product>, StorageError> {
        retry_if("sql_update_product", &RetryConfig::query(), || async {
            sqlx::query("UPDATE products SET name = ?, stock = ? WHERE id = ?")
                .bind(&update.name)
                .bind(update.stock)
                .bind(product_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            Ok(())
        }, retryable)
        .await?;

        // Read back so the caller mirrors exactly what was stored
        self.product_by_id(product_id).await
    }

    async fn delete_product(&self, product_id: i64) -> Result<bool, StorageError> {
        self.delete_product_tx(product_id).await
    }

    async fn cart_item(&self, user_id: i64, cart_item_id: i64) -> Result<Option<CartItem>, StorageError> {
        let sql = format!("SELECT {} FROM cart_items WHERE id = ? AND user_id = ?", CART_COLUMNS);
        retry_if("sql_cart_item", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(cart_item_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .map(|row| cart_item_from_row(&row))
                .transpose()
        }, retryable)
        .await
    }

    async fn cart_items_by_user(&self, user_id: i64) -> Result<Vec<CartItem>, StorageError> {
        let sql = format!("SELECT {} FROM cart_items WHERE user_id = ? ORDER BY id", CART_COLUMNS);
        retry_if("sql_cart_items_by_user", &RetryConfig::query(), || async {
            let rows = sqlx::query(&sql)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            rows.iter().map(cart_item_from_row).collect()
        }, retryable)
        .await
    }

    async fn insert_cart_item(&self, item: &NewCartItem) -> Result<CartItem, StorageError> {
        let created_at = now_millis();

        let sql = self.returning_id(
            "INSERT INTO cart_items (user_id, product_id, purchase_amount, is_paid, is_product_deleted, created_at) \
             VALUES (?, ?, ?, 0, 0, ?)",
        );
        let query: AnyQuery<'_> = sqlx::query(&sql)
            .bind(item.user_id)
            .bind(item.product_id)
            .bind(item.purchase_amount)
            .bind(created_at);
        let id = self.insert_returning_id(query, "cart_items").await?;

        Ok(CartItem {
            id,
            user_id: item.user_id,
            product_id: Some(item.product_id),
            purchase_amount: item.purchase_amount,
            is_paid: false,
            is_product_deleted: false,
            created_at,
        })
    }

    async fn update_cart_amount(
        &self,
        user_id: i64,
        cart_item_id: i64,
        purchase_amount: i64,
    ) -> Result<bool, StorageError> {
        retry_if("sql_update_cart_amount", &RetryConfig::query(), || async {
            let result = sqlx::query(
                "UPDATE cart_items SET purchase_amount = ? WHERE id = ? AND user_id = ? AND is_paid = 0",
            )
            .bind(purchase_amount)
            .bind(cart_item_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(result.rows_affected() > 0)
        }, retryable)
        .await
    }

    async fn pay_cart_item(
        &self,
        user_id: i64,
        cart_item_id: i64,
    ) -> Result<PaymentOutcome, StorageError> {
        // Not retried: a commit whose acknowledgement was lost would come
        // back as AlreadyPaid.
        self.pay_cart_item_tx(user_id, cart_item_id).await
    }

    async fn delete_cart_item(&self, user_id: i64, cart_item_id: i64) -> Result<bool, StorageError> {
        retry_if("sql_delete_cart_item", &RetryConfig::query(), || async {
            let result = sqlx::query("DELETE FROM cart_items WHERE id = ? AND user_id = ?")
                .bind(cart_item_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            Ok(result.rows_affected() > 0)
        }, retryable)
        .await
    }
}
