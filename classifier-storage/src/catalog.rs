//! The durable catalog: the external storage contract the item cache
//! fronts. Concrete implementations (Postgres, an in-memory fake for
//! tests) live outside this crate; this module only fixes the trait.

use async_trait::async_trait;
use classifier_core::{Entry, StorageError};
use chrono::{DateTime, Utc};

/// A tokenized item's id and tokens as persisted by the catalog, used
/// by [`DurableCatalog::load_since`] and [`DurableCatalog::fetch_item_tokens`].
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub id: String,
    pub updated: DateTime<Utc>,
    pub tokens: Vec<(u32, u32)>,
}

/// External storage contract the item cache relies on. Must support
/// idempotent insert-by-id for entries, delete-by-id, per-entry token
/// list storage and retrieval, a random-background id set, and a load
/// query returning items by descending update time within a trailing
/// window. Implementations are responsible for serializing concurrent
/// access the way a connection pool naturally does; the item cache
/// does not impose an additional mutex over this trait.
#[async_trait]
pub trait DurableCatalog: Send + Sync {
    /// Idempotent insert of a raw entry. Returns `true` if this was a
    /// new entry (and should be queued for feature extraction).
    async fn insert_entry(&self, entry: &Entry) -> Result<bool, StorageError>;

    /// Delete an entry and its tokens. Fails if `entry_id` is
    /// referenced by the random-background relation.
    async fn remove_entry(&self, entry_id: &str) -> Result<(), StorageError>;

    /// Persist a tokenized item's tokens, keyed by item id.
    async fn save_item_tokens(
        &self,
        item_id: &str,
        updated: DateTime<Utc>,
        tokens: &[(u32, u32)],
    ) -> Result<(), StorageError>;

    /// Fetch a single item's tokens by id, if present.
    async fn fetch_item_tokens(&self, item_id: &str) -> Result<Option<StoredItem>, StorageError>;

    /// Items with update time within the last `since_days` days,
    /// ordered by update time descending.
    async fn load_since(&self, since_days: i64) -> Result<Vec<StoredItem>, StorageError>;

    /// Item ids that make up the random background pool.
    async fn random_background_ids(&self) -> Result<Vec<String>, StorageError>;
}
