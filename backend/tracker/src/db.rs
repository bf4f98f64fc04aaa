//! SQLite-backed remote store — migrations and document queries.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::info;

use crate::errors::Result;
use crate::remote::{Collection, Filter, RemoteStore};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    // Every connection to an in-memory database sees its own database.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct SqliteRemote {
    pool: SqlitePool,
}

impl SqliteRemote {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self::new(init_pool(database_url).await?))
    }
}

// ─────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────

/// Insert or replace one document.
async fn upsert_record(
    pool: &SqlitePool,
    collection: Collection,
    id: &str,
    body: &Value,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO records (collection, id, body, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (collection, id)
        DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
        "#,
    )
    .bind(collection.as_str())
    .bind(id)
    .bind(serde_json::to_string(body)?)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

async fn delete_record(pool: &SqlitePool, collection: Collection, id: &str) -> Result<bool> {
    let rows = sqlx::query("DELETE FROM records WHERE collection = ?1 AND id = ?2")
        .bind(collection.as_str())
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows > 0)
}

async fn clear_collection(pool: &SqlitePool, collection: Collection) -> Result<u64> {
    let rows = sqlx::query("DELETE FROM records WHERE collection = ?1")
        .bind(collection.as_str())
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

async fn get_record(pool: &SqlitePool, collection: Collection, id: &str) -> Result<Option<Value>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT body FROM records WHERE collection = ?1 AND id = ?2")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(pool)
            .await?;
    row.map(|(body,)| serde_json::from_str(&body).map_err(Into::into))
        .transpose()
}

/// Fetch all documents of a collection, ordered by id, then filtered.
async fn list_records(
    pool: &SqlitePool,
    collection: Collection,
    filter: &Filter,
) -> Result<Vec<Value>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT body FROM records WHERE collection = ?1 ORDER BY id ASC")
            .bind(collection.as_str())
            .fetch_all(pool)
            .await?;

    let mut docs = Vec::with_capacity(rows.len());
    for (body,) in rows {
        let doc: Value = serde_json::from_str(&body)?;
        if filter.matches(&doc) {
            docs.push(doc);
        }
    }
    Ok(docs)
}

#[async_trait]
impl RemoteStore for SqliteRemote {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn upsert(&self, collection: Collection, id: &str, record: &Value) -> Result<()> {
        upsert_record(&self.pool, collection, id, record).await
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        get_record(&self.pool, collection, id).await
    }

    async fn list(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>> {
        list_records(&self.pool, collection, filter).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        delete_record(&self.pool, collection, id).await
    }

    async fn clear(&self, collection: Collection) -> Result<u64> {
        clear_collection(&self.pool, collection).await
    }
}
