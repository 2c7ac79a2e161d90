//! Manual schema maintenance.
//!
//! Nothing here runs from the versioned migration path. These helpers exist
//! for one-off repairs of data files: column probing, additive column
//! changes, dropping a column on SQLite builds old or new, and discarding a
//! table wholesale.
//!
//! Identifiers are validated and double-quoted; column declarations are
//! passed through verbatim and must not contain `;`. Operations run inside
//! a transaction, so a failure leaves the table as it was. Dropping or
//! re-creating a table that other tables reference fails while foreign keys
//! are enforced.

use std::collections::BTreeSet;

use sqlx::sqlite::SqlitePool;
use sqlx::{Row, SqliteConnection};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::error::{Result, StoreError};

/// First SQLite release with `ALTER TABLE ... DROP COLUMN`.
pub const NATIVE_DROP_COLUMN_MIN: (u32, u32, u32) = (3, 35, 0);

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    /// 1-based position in the primary key, 0 when not part of it.
    pub pk: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropColumnStrategy {
    /// `ALTER TABLE ... DROP COLUMN`.
    Native,
    /// Create a copy without the column, move the rows, swap names.
    Rebuild,
}

pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name)
}

fn validate_decl(decl: &str) -> Result<()> {
    if decl.contains(';') {
        return Err(StoreError::Maintenance(format!(
            "column declaration must be a single clause: '{}'",
            decl
        )));
    }
    Ok(())
}

async fn table_info(conn: &mut SqliteConnection, table: &str) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query(
        r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid"#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        columns.push(ColumnInfo {
            name: row.try_get("name")?,
            decl_type: row.try_get("type")?,
            not_null: row.try_get::<i64, _>("notnull")? != 0,
            default_value: row.try_get("dflt_value")?,
            pk: row.try_get("pk")?,
        });
    }
    Ok(columns)
}

/// Column metadata in declaration order. Empty when the table does not exist.
pub async fn describe_table(pool: &SqlitePool, table: &str) -> Result<Vec<ColumnInfo>> {
    validate_identifier(table)?;
    let mut conn = pool.acquire().await?;
    table_info(&mut conn, table).await
}

/// Set of column names of `table`.
pub async fn table_columns(pool: &SqlitePool, table: &str) -> Result<BTreeSet<String>> {
    Ok(describe_table(pool, table)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect())
}

pub async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    Ok(table_columns(pool, table).await?.contains(column))
}

/// Add `column` with declaration `decl` (e.g. `"TEXT NOT NULL DEFAULT ''"`)
/// unless it already exists. Returns whether the column was added.
pub async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<bool> {
    validate_identifier(table)?;
    validate_identifier(column)?;
    validate_decl(decl)?;

    let mut tx = pool.begin().await?;
    let exists = table_info(&mut tx, table)
        .await?
        .iter()
        .any(|c| c.name == column);
    if exists {
        tx.rollback().await?;
        return Ok(false);
    }

    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote(table),
        quote(column),
        decl
    );
    sqlx::query(&sql).execute(&mut *tx).await?;
    tx.commit().await?;

    info!(table, column, "added column");
    Ok(true)
}

pub async fn sqlite_version(pool: &SqlitePool) -> Result<String> {
    let version: String = sqlx::query_scalar("SELECT sqlite_version()")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.trim().split('.').map(|p| p.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next()??;
    let patch = parts.next().unwrap_or(Some(0))?;
    Some((major, minor, patch))
}

/// Whether the linked SQLite supports native `DROP COLUMN`.
/// An unparseable version string counts as unsupported.
pub async fn sqlite_supports_drop_column(pool: &SqlitePool) -> Result<bool> {
    let version = sqlite_version(pool).await?;
    Ok(parse_version(&version)
        .map(|v| v >= NATIVE_DROP_COLUMN_MIN)
        .unwrap_or(false))
}

/// Drop `column` from `table` using the best strategy the engine supports.
/// Returns `false` when the column was not there.
pub async fn drop_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let strategy = if sqlite_supports_drop_column(pool).await? {
        DropColumnStrategy::Native
    } else {
        DropColumnStrategy::Rebuild
    };
    drop_column_with(pool, table, column, strategy).await
}

pub async fn drop_column_with(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    strategy: DropColumnStrategy,
) -> Result<bool> {
    validate_identifier(table)?;
    validate_identifier(column)?;

    let mut tx = pool.begin().await?;
    let columns = table_info(&mut tx, table).await?;
    let Some(target) = columns.iter().find(|c| c.name == column) else {
        tx.rollback().await?;
        return Ok(false);
    };
    if target.pk > 0 {
        tx.rollback().await?;
        return Err(StoreError::Maintenance(format!(
            "refusing to drop primary key column {}.{}",
            table, column
        )));
    }
    if columns.len() == 1 {
        tx.rollback().await?;
        return Err(StoreError::Maintenance(format!(
            "refusing to drop the only column of {}",
            table
        )));
    }

    match strategy {
        DropColumnStrategy::Native => {
            let sql = format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote(table),
                quote(column)
            );
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        DropColumnStrategy::Rebuild => rebuild_without(&mut tx, table, column, &columns).await?,
    }

    tx.commit().await?;
    info!(table, column, ?strategy, "dropped column");
    Ok(true)
}

/// Create-copy-swap. Keeps column types, NOT NULL, defaults, the primary
/// key (with AUTOINCREMENT) and indexes that do not cover the dropped
/// column. Other table constraints are not carried over.
async fn rebuild_without(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    columns: &[ColumnInfo],
) -> Result<()> {
    let original_sql: Option<String> =
        sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(&mut *conn)
            .await?;
    let autoincrement = original_sql
        .map(|sql| sql.to_ascii_uppercase().contains("AUTOINCREMENT"))
        .unwrap_or(false);

    let keep: Vec<&ColumnInfo> = columns.iter().filter(|c| c.name != column).collect();
    let mut pk: Vec<&ColumnInfo> = keep.iter().copied().filter(|c| c.pk > 0).collect();
    pk.sort_by_key(|c| c.pk);

    let inline_pk = pk.len() == 1 && pk[0].decl_type.eq_ignore_ascii_case("INTEGER");

    let mut defs = Vec::with_capacity(keep.len() + 1);
    for c in &keep {
        let mut def = quote(&c.name);
        if !c.decl_type.is_empty() {
            def.push(' ');
            def.push_str(&c.decl_type);
        }
        if inline_pk && c.pk > 0 {
            def.push_str(" PRIMARY KEY");
            if autoincrement {
                def.push_str(" AUTOINCREMENT");
            }
        } else {
            if c.not_null {
                def.push_str(" NOT NULL");
            }
            if let Some(default) = &c.default_value {
                def.push_str(" DEFAULT ");
                def.push_str(default);
            }
        }
        defs.push(def);
    }
    if !pk.is_empty() && !inline_pk {
        let names: Vec<String> = pk.iter().map(|c| quote(&c.name)).collect();
        defs.push(format!("PRIMARY KEY ({})", names.join(", ")));
    }

    let indexes = surviving_indexes(conn, table, column).await?;

    let staging = format!("{}__rebuild", table);
    let column_list: Vec<String> = keep.iter().map(|c| quote(&c.name)).collect();
    let column_list = column_list.join(", ");

    let statements = [
        format!("DROP TABLE IF EXISTS {}", quote(&staging)),
        format!("CREATE TABLE {} ({})", quote(&staging), defs.join(", ")),
        format!(
            "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
            quote(&staging),
            quote(table),
            cols = column_list
        ),
        format!("DROP TABLE {}", quote(table)),
        format!(
            "ALTER TABLE {} RENAME TO {}",
            quote(&staging),
            quote(table)
        ),
    ];
    for sql in statements.iter().chain(indexes.iter()) {
        sqlx::query(sql).execute(&mut *conn).await?;
    }
    Ok(())
}

/// `CREATE INDEX` statements of explicit indexes on `table` that do not use `column`.
async fn surviving_indexes(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT name, sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;

    let mut keep = Vec::new();
    for row in rows {
        let name: String = row.try_get("name")?;
        let sql: String = row.try_get("sql")?;
        let covered: Vec<Option<String>> =
            sqlx::query_scalar("SELECT name FROM pragma_index_info(?)")
                .bind(&name)
                .fetch_all(&mut *conn)
                .await?;
        if !covered.iter().flatten().any(|c| c == column) {
            keep.push(sql);
        }
    }
    Ok(keep)
}

/// Drop `table` and create it again with exactly `columns`. Existing rows are discarded.
pub async fn recreate_table(pool: &SqlitePool, table: &str, columns: &[(&str, &str)]) -> Result<()> {
    validate_identifier(table)?;
    if columns.is_empty() {
        return Err(StoreError::Maintenance(format!(
            "no columns given for {}",
            table
        )));
    }
    let mut defs = Vec::with_capacity(columns.len());
    for (name, decl) in columns {
        validate_identifier(name)?;
        validate_decl(decl)?;
        defs.push(format!("{} {}", quote(name), decl));
    }

    let mut tx = pool.begin().await?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote(table)))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("CREATE TABLE {} ({})", quote(table), defs.join(", ")))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(table, columns = columns.len(), "recreated table");
    Ok(())
}

/// CLI entry point for `ffm schema columns`.
pub async fn run_columns(config: &Config, table: &str) -> anyhow::Result<()> {
    let pool = db::open(config).await?;
    let columns = describe_table(&pool, table).await?;
    if columns.is_empty() {
        anyhow::bail!("No such table: {}", table);
    }

    println!("{:<16} {:<10} {:<8} {:<12} {}", "COLUMN", "TYPE", "NOTNULL", "DEFAULT", "PK");
    for c in &columns {
        println!(
            "{:<16} {:<10} {:<8} {:<12} {}",
            c.name,
            c.decl_type,
            if c.not_null { "yes" } else { "no" },
            c.default_value.as_deref().unwrap_or("-"),
            c.pk
        );
    }

    pool.close().await;
    Ok(())
}

/// CLI entry point for `ffm schema drop-column`.
pub async fn run_drop_column(config: &Config, table: &str, column: &str) -> anyhow::Result<()> {
    let pool = db::open(config).await?;
    if drop_column(&pool, table, column).await? {
        println!("Dropped {}.{}", table, column);
    } else {
        println!("{}.{} does not exist, nothing to do", table, column);
    }
    pool.close().await;
    Ok(())
}
