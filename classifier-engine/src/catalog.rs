//! Postgres-backed [`DurableCatalog`]: the concrete durable store the
//! item cache fronts in production. A thin pool-config wrapper around
//! `deadpool_postgres`, speaking plain SQL against a schema owned by
//! this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use classifier_core::{env_or, Entry, StorageError};
use classifier_storage::catalog::{DurableCatalog, StoredItem};

#[derive(Debug, Clone)]
pub struct CatalogDbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub max_size: usize,
}

impl Default for CatalogDbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "classifier".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
        }
    }
}

impl CatalogDbConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("CLASSIFIER_DB_HOST").unwrap_or(defaults.host),
            port: env_or("CLASSIFIER_DB_PORT", defaults.port),
            dbname: std::env::var("CLASSIFIER_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("CLASSIFIER_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("CLASSIFIER_DB_PASSWORD").unwrap_or_default(),
            max_size: env_or("CLASSIFIER_DB_POOL_SIZE", defaults.max_size),
        }
    }

    pub fn create_pool(&self) -> Result<Pool, StorageError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::CatalogFailed {
                reason: format!("failed to create connection pool: {e}"),
            })
    }
}

/// The production [`DurableCatalog`]. Connection-pool checkout
/// serializes concurrent access, so there's no separate manual mutex
/// over the pool.
pub struct PostgresCatalog {
    pool: Pool,
}

impl PostgresCatalog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, StorageError> {
        self.pool.get().await.map_err(|e| StorageError::CatalogFailed {
            reason: format!("connection pool exhausted: {e}"),
        })
    }

    /// Creates the schema this catalog relies on, if it is not already
    /// present. Not part of the `DurableCatalog` trait itself, but
    /// needed for the zero-to-running path in tests and local
    /// development.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn().await?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                alternate_link TEXT NOT NULL,
                self_link TEXT NOT NULL,
                content TEXT NOT NULL,
                updated TIMESTAMPTZ NOT NULL,
                source_xml TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS item_tokens (
                item_id TEXT PRIMARY KEY REFERENCES entries(id) ON DELETE CASCADE,
                updated TIMESTAMPTZ NOT NULL,
                token_id INTEGER[] NOT NULL,
                frequency INTEGER[] NOT NULL
            );
            CREATE TABLE IF NOT EXISTS random_background (
                item_id TEXT PRIMARY KEY REFERENCES entries(id) ON DELETE CASCADE
            );",
        )
        .await
        .map_err(|e| StorageError::CatalogFailed {
            reason: format!("schema creation failed: {e}"),
        })
    }
}

#[async_trait]
impl DurableCatalog for PostgresCatalog {
    async fn insert_entry(&self, entry: &Entry) -> Result<bool, StorageError> {
        let conn = self.conn().await?;
        let rows = conn
            .execute(
                "INSERT INTO entries (id, title, author, alternate_link, self_link, content, updated, source_xml)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &entry.full_id,
                    &entry.title,
                    &entry.author,
                    &entry.alternate_link,
                    &entry.self_link,
                    &entry.content,
                    &entry.updated,
                    &entry.source_xml,
                ],
            )
            .await
            .map_err(|e| StorageError::CatalogFailed {
                reason: format!("insert_entry failed: {e}"),
            })?;
        Ok(rows > 0)
    }

    async fn remove_entry(&self, entry_id: &str) -> Result<(), StorageError> {
        let conn = self.conn().await?;
        let in_background: bool = conn
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM random_background WHERE item_id = $1)",
                &[&entry_id],
            )
            .await
            .map_err(|e| StorageError::CatalogFailed {
                reason: format!("remove_entry lookup failed: {e}"),
            })?
            .get(0);
        if in_background {
            return Err(StorageError::CatalogFailed {
                reason: format!("entry {entry_id} is part of the random background and cannot be removed"),
            });
        }
        conn.execute("DELETE FROM entries WHERE id = $1", &[&entry_id])
            .await
            .map_err(|e| StorageError::CatalogFailed {
                reason: format!("remove_entry failed: {e}"),
            })?;
        Ok(())
    }

    async fn save_item_tokens(
        &self,
        item_id: &str,
        updated: DateTime<Utc>,
        tokens: &[(u32, u32)],
    ) -> Result<(), StorageError> {
        let conn = self.conn().await?;
        let token_ids: Vec<i32> = tokens.iter().map(|(id, _)| *id as i32).collect();
        let frequencies: Vec<i32> = tokens.iter().map(|(_, freq)| *freq as i32).collect();
        conn.execute(
            "INSERT INTO item_tokens (item_id, updated, token_id, frequency)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (item_id) DO UPDATE SET updated = $2, token_id = $3, frequency = $4",
            &[&item_id, &updated, &token_ids, &frequencies],
        )
        .await
        .map_err(|e| StorageError::CatalogFailed {
            reason: format!("save_item_tokens failed: {e}"),
        })?;
        Ok(())
    }

    async fn fetch_item_tokens(&self, item_id: &str) -> Result<Option<StoredItem>, StorageError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT updated, token_id, frequency FROM item_tokens WHERE item_id = $1",
                &[&item_id],
            )
            .await
            .map_err(|e| StorageError::CatalogFailed {
                reason: format!("fetch_item_tokens failed: {e}"),
            })?;

        Ok(row.map(|row| {
            let updated: DateTime<Utc> = row.get(0);
            let token_ids: Vec<i32> = row.get(1);
            let frequencies: Vec<i32> = row.get(2);
            StoredItem {
                id: item_id.to_string(),
                updated,
                tokens: token_ids
                    .into_iter()
                    .zip(frequencies)
                    .map(|(id, freq)| (id as u32, freq as u32))
                    .collect(),
            }
        }))
    }

    async fn load_since(&self, since_days: i64) -> Result<Vec<StoredItem>, StorageError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT item_tokens.item_id, item_tokens.updated, item_tokens.token_id, item_tokens.frequency
                 FROM item_tokens
                 WHERE item_tokens.updated >= now() - ($1 || ' days')::interval
                 ORDER BY item_tokens.updated DESC",
                &[&since_days.to_string()],
            )
            .await
            .map_err(|e| StorageError::CatalogFailed {
                reason: format!("load_since failed: {e}"),
            })?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let id: String = row.get(0);
                let updated: DateTime<Utc> = row.get(1);
                let token_ids: Vec<i32> = row.get(2);
                let frequencies: Vec<i32> = row.get(3);
                StoredItem {
                    id,
                    updated,
                    tokens: token_ids
                        .into_iter()
                        .zip(frequencies)
                        .map(|(id, freq)| (id as u32, freq as u32))
                        .collect(),
                }
            })
            .collect())
    }

    async fn random_background_ids(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.conn().await?;
        let rows = conn
            .query("SELECT item_id FROM random_background", &[])
            .await
            .map_err(|e| StorageError::CatalogFailed {
                reason: format!("random_background_ids failed: {e}"),
            })?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}
