//! SQLite-backed item catalog.

use async_trait::async_trait;
use ffm_core::catalog::Catalog;
use ffm_core::models::{Item, ItemType, NewItem, SalesClass};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};

use crate::config::Config;
use crate::db;
use crate::error::{Result, StoreError};

const ITEM_COLUMNS: &str =
    "item_id, item_name, price, freshness, sales_class, item_type, is_active";

#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new item and return its id. Names are unique.
    pub async fn add_item(&self, item: &NewItem) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO items (item_name, price, freshness, sales_class, item_type, is_active)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.item_name)
        .bind(item.price)
        .bind(item.freshness)
        .bind(item.sales_class.as_str())
        .bind(item.item_type.as_str())
        .bind(item.is_active)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrite every field of an item. Returns `false` if the id is unknown.
    pub async fn update_item(&self, item_id: i64, item: &NewItem) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET item_name = ?, price = ?, freshness = ?,
                sales_class = ?, item_type = ?, is_active = ?
            WHERE item_id = ?
            "#,
        )
        .bind(&item.item_name)
        .bind(item.price)
        .bind(item.freshness)
        .bind(item.sales_class.as_str())
        .bind(item.item_type.as_str())
        .bind(item.is_active)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove an item. Fails while facts or summaries still reference it.
    pub async fn delete_item(&self, item_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM items WHERE item_id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_item(&self, item_id: i64) -> Result<Option<Item>> {
        let sql = format!("SELECT {} FROM items WHERE item_id = ?", ITEM_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn find_item_id(&self, name: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar("SELECT item_id FROM items WHERE item_name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn find_item_name(&self, item_id: i64) -> Result<Option<String>> {
        let name = sqlx::query_scalar("SELECT item_name FROM items WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(name)
    }

    /// All item names, sorted.
    pub async fn list_item_names(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar("SELECT item_name FROM items ORDER BY item_name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    pub async fn list_items(&self) -> Result<Vec<Item>> {
        let sql = format!("SELECT {} FROM items ORDER BY item_id", ITEM_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(item_from_row).collect()
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn item_id_by_name(&self, name: &str) -> anyhow::Result<Option<i64>> {
        Ok(self.find_item_id(name).await?)
    }

    async fn item_name_by_id(&self, item_id: i64) -> anyhow::Result<Option<String>> {
        Ok(self.find_item_name(item_id).await?)
    }
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    let corrupt = |detail: String| StoreError::Corrupt {
        table: "items",
        detail,
    };

    let item_id: i64 = row.try_get("item_id")?;
    let sales_class: String = row.try_get("sales_class")?;
    let item_type: String = row.try_get("item_type")?;

    Ok(Item {
        item_id,
        item_name: row.try_get("item_name")?,
        price: row.try_get("price")?,
        freshness: row.try_get("freshness")?,
        sales_class: sales_class
            .parse::<SalesClass>()
            .map_err(|e| corrupt(format!("item {}: {}", item_id, e)))?,
        item_type: item_type
            .parse::<ItemType>()
            .map_err(|e| corrupt(format!("item {}: {}", item_id, e)))?,
        is_active: row.try_get("is_active")?,
    })
}

/// Fail with `UnregisteredItem` unless `item_id` is in the catalog.
pub(crate) async fn ensure_item(conn: &mut SqliteConnection, item_id: i64) -> Result<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT item_id FROM items WHERE item_id = ?")
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::UnregisteredItem(format!("item_id {}", item_id))),
    }
}

/// CLI entry point for `ffm item add`.
pub async fn run_item_add(config: &Config, item: &NewItem) -> anyhow::Result<()> {
    let pool = db::open(config).await?;
    let catalog = SqliteCatalog::new(pool.clone());

    if let Some(existing) = catalog.find_item_id(&item.item_name).await? {
        anyhow::bail!("Item '{}' already exists (id {})", item.item_name, existing);
    }
    let item_id = catalog.add_item(item).await?;
    println!("Added item '{}' (id {})", item.item_name, item_id);

    pool.close().await;
    Ok(())
}

/// CLI entry point for `ffm item list`.
pub async fn run_item_list(config: &Config) -> anyhow::Result<()> {
    let pool = db::open(config).await?;
    let items = SqliteCatalog::new(pool.clone()).list_items().await?;

    if items.is_empty() {
        println!("No items registered.");
    } else {
        println!(
            "{:>4}  {:<20} {:>6} {:>9}  {:<8} {:<9} {}",
            "ID", "NAME", "PRICE", "FRESHNESS", "CLASS", "TYPE", "ACTIVE"
        );
        for item in &items {
            println!(
                "{:>4}  {:<20} {:>6} {:>9}  {:<8} {:<9} {}",
                item.item_id,
                item.item_name,
                item.price,
                item.freshness
                    .map(|h| format!("{}h", h))
                    .unwrap_or_else(|| "-".to_string()),
                item.sales_class.as_str(),
                item.item_type.as_str(),
                if item.is_active { "yes" } else { "no" }
            );
        }
    }

    pool.close().await;
    Ok(())
}
