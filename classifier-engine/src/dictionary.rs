//! Postgres-backed [`DictionaryStore`]: persists the token string/id
//! bijection [`classifier_core::TokenDictionary`] caches in memory.
//!
//! `DictionaryStore` is a synchronous trait (it's called from the
//! synchronous atomize/globalize hot path), but the only catalog this
//! crate ships talks to Postgres over an async pool. `block_in_place`
//! bridges the two: it's only valid on the multi-threaded runtime
//! `main.rs` starts with `#[tokio::main]`, which is why this type isn't
//! offered for use from a current-thread runtime.

use classifier_core::{DictionaryStore, StorageError};
use deadpool_postgres::Pool;
use tokio::runtime::Handle;

pub struct PostgresDictionaryStore {
    pool: Pool,
}

impl PostgresDictionaryStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let conn = self.pool.get().await.map_err(|e| StorageError::CatalogFailed {
            reason: format!("connection pool exhausted: {e}"),
        })?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS token_dictionary (
                id INTEGER PRIMARY KEY,
                token TEXT NOT NULL UNIQUE
            );
            CREATE SEQUENCE IF NOT EXISTS token_dictionary_id_seq;",
        )
        .await
        .map_err(|e| StorageError::CatalogFailed {
            reason: format!("dictionary schema creation failed: {e}"),
        })
    }

    fn block_on<T>(&self, fut: impl std::future::Future<Output = T>) -> T {
        tokio::task::block_in_place(|| Handle::current().block_on(fut))
    }
}

impl DictionaryStore for PostgresDictionaryStore {
    fn lookup_id(&self, token: &str) -> Result<Option<u32>, StorageError> {
        self.block_on(async {
            let conn = self.pool.get().await.map_err(|e| StorageError::CatalogFailed {
                reason: format!("connection pool exhausted: {e}"),
            })?;
            let row = conn
                .query_opt("SELECT id FROM token_dictionary WHERE token = $1", &[&token])
                .await
                .map_err(|e| StorageError::DictionaryFailed {
                    reason: format!("lookup_id failed: {e}"),
                })?;
            Ok(row.map(|row| row.get::<_, i32>(0) as u32))
        })
    }

    fn lookup_token(&self, id: u32) -> Result<Option<String>, StorageError> {
        self.block_on(async {
            let conn = self.pool.get().await.map_err(|e| StorageError::CatalogFailed {
                reason: format!("connection pool exhausted: {e}"),
            })?;
            let row = conn
                .query_opt("SELECT token FROM token_dictionary WHERE id = $1", &[&(id as i32)])
                .await
                .map_err(|e| StorageError::DictionaryFailed {
                    reason: format!("lookup_token failed: {e}"),
                })?;
            Ok(row.map(|row| row.get(0)))
        })
    }

    fn insert(&self, token: &str, id: u32) -> Result<(), StorageError> {
        self.block_on(async {
            let conn = self.pool.get().await.map_err(|e| StorageError::CatalogFailed {
                reason: format!("connection pool exhausted: {e}"),
            })?;
            conn.execute(
                "INSERT INTO token_dictionary (id, token) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&(id as i32), &token],
            )
            .await
            .map_err(|e| StorageError::DictionaryFailed {
                reason: format!("insert failed: {e}"),
            })?;
            Ok(())
        })
    }

    fn next_id(&self) -> Result<u32, StorageError> {
        self.block_on(async {
            let conn = self.pool.get().await.map_err(|e| StorageError::CatalogFailed {
                reason: format!("connection pool exhausted: {e}"),
            })?;
            let row = conn
                .query_one("SELECT nextval('token_dictionary_id_seq')", &[])
                .await
                .map_err(|e| StorageError::DictionaryFailed {
                    reason: format!("next_id failed: {e}"),
                })?;
            Ok(row.get::<_, i64>(0) as u32)
        })
    }
}
