//! Shared fakes and fixtures for testing the classification service.
//!
//! Individual crates keep small local fakes where a test only needs
//! one narrow behavior (`classifier-tagger::cache`'s `NullCatalog` is
//! one example) — this crate exists for the fakes and builders that
//! are useful in more than one crate: a full in-memory
//! [`DurableCatalog`], a deterministic [`FeatureExtractor`], and
//! builders for items, entries, pools, and jobs.

pub use classifier_core::{
    Clue, ClueList, DictionaryStore, Entry, EntityIdType, EngineError, FetchError, Item,
    ItemScope, Job, JobErrorKind, JobId, JobState, PipelineError, Pool, StorageError, Tagging,
    TaggerError, TaggerState, Timestamp, Token, TokenDictionary,
};
pub use classifier_storage::{DurableCatalog, FeatureExtractor, ItemCache, ItemCacheConfig, StoredItem};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// An in-memory [`DurableCatalog`]: entries, their tokens, and the
/// random-background set all live in plain `Mutex`-guarded maps.
/// Mirrors the concurrency contract real implementations must honor
/// (a connection pool serializes access; this just uses a mutex) so
/// tests exercise the same interleavings a Postgres-backed catalog
/// would.
#[derive(Default)]
pub struct InMemoryCatalog {
    entries: Mutex<HashMap<String, Entry>>,
    items: Mutex<HashMap<String, StoredItem>>,
    background: Mutex<Vec<String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the random-background set directly, bypassing
    /// `insert_entry` + `save_item_tokens`.
    pub fn with_background(self, ids: impl IntoIterator<Item = String>) -> Self {
        *self.background.lock().unwrap() = ids.into_iter().collect();
        self
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl DurableCatalog for InMemoryCatalog {
    async fn insert_entry(&self, entry: &Entry) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock().unwrap();
        let is_new = !entries.contains_key(entry.id());
        entries.insert(entry.id().to_string(), entry.clone());
        Ok(is_new)
    }

    async fn remove_entry(&self, entry_id: &str) -> Result<(), StorageError> {
        if self.background.lock().unwrap().iter().any(|id| id == entry_id) {
            return Err(StorageError::CatalogFailed {
                reason: format!("{entry_id} is referenced by the random background"),
            });
        }
        self.entries.lock().unwrap().remove(entry_id);
        self.items.lock().unwrap().remove(entry_id);
        Ok(())
    }

    async fn save_item_tokens(
        &self,
        item_id: &str,
        updated: DateTime<Utc>,
        tokens: &[(u32, u32)],
    ) -> Result<(), StorageError> {
        self.items.lock().unwrap().insert(
            item_id.to_string(),
            StoredItem {
                id: item_id.to_string(),
                updated,
                tokens: tokens.to_vec(),
            },
        );
        Ok(())
    }

    async fn fetch_item_tokens(&self, item_id: &str) -> Result<Option<StoredItem>, StorageError> {
        Ok(self.items.lock().unwrap().get(item_id).cloned())
    }

    async fn load_since(&self, since_days: i64) -> Result<Vec<StoredItem>, StorageError> {
        let cutoff = Utc::now() - chrono::Duration::days(since_days);
        let mut items: Vec<StoredItem> = self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|item| item.updated >= cutoff)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(items)
    }

    async fn random_background_ids(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.background.lock().unwrap().clone())
    }
}

/// A [`FeatureExtractor`] that tokenizes by lowercased whitespace
/// splitting and atomizes through a [`TokenDictionary`] — deterministic
/// and network-free, for exercising the item cache without a real
/// tokenizer/dictionary pair.
pub struct WordSplitExtractor<S: DictionaryStore> {
    dictionary: TokenDictionary<S>,
}

impl<S: DictionaryStore> WordSplitExtractor<S> {
    pub fn new(dictionary: TokenDictionary<S>) -> Self {
        Self { dictionary }
    }
}

#[async_trait]
impl<S: DictionaryStore + Send + Sync> FeatureExtractor for WordSplitExtractor<S> {
    async fn extract(&self, entry: &Entry) -> Result<Item, FetchError> {
        let mut item = Item::new(entry.id(), entry.updated);
        let mut frequencies: HashMap<u32, u32> = HashMap::new();
        for word in entry.content.split_whitespace() {
            let token_id = self
                .dictionary
                .atomize(&word.to_lowercase())
                .map_err(|e| FetchError::InvalidResponse {
                    url: entry.id().to_string(),
                    reason: e.to_string(),
                })?;
            *frequencies.entry(token_id).or_insert(0) += 1;
        }
        for (token_id, frequency) in frequencies {
            item.add_token(token_id, frequency);
        }
        Ok(item)
    }
}

/// In-memory [`DictionaryStore`] for pairing with [`WordSplitExtractor`]
/// in tests that don't need Postgres.
#[derive(Default)]
pub struct InMemoryDictionaryStore {
    by_token: Mutex<HashMap<String, u32>>,
    by_id: Mutex<HashMap<u32, String>>,
    next: Mutex<u32>,
}

impl InMemoryDictionaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DictionaryStore for InMemoryDictionaryStore {
    fn lookup_id(&self, token: &str) -> Result<Option<u32>, StorageError> {
        Ok(self.by_token.lock().unwrap().get(token).copied())
    }
    fn lookup_token(&self, id: u32) -> Result<Option<String>, StorageError> {
        Ok(self.by_id.lock().unwrap().get(&id).cloned())
    }
    fn insert(&self, token: &str, id: u32) -> Result<(), StorageError> {
        self.by_token.lock().unwrap().insert(token.to_string(), id);
        self.by_id.lock().unwrap().insert(id, token.to_string());
        Ok(())
    }
    fn next_id(&self) -> Result<u32, StorageError> {
        let mut next = self.next.lock().unwrap();
        let id = *next;
        *next += 1;
        Ok(id)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for the classification domain's core types.

    use super::*;
    use proptest::prelude::*;

    /// Timestamps within a plausible feed-update range (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    pub fn arb_job_id() -> impl Strategy<Value = JobId> {
        any::<[u8; 16]>().prop_map(|bytes| JobId::new(uuid::Uuid::from_bytes(bytes)))
    }

    pub fn arb_item_scope() -> impl Strategy<Value = ItemScope> {
        prop_oneof![Just(ItemScope::All), Just(ItemScope::New)]
    }

    pub fn arb_job_state() -> impl Strategy<Value = JobState> {
        prop_oneof![
            Just(JobState::Waiting),
            Just(JobState::Training),
            Just(JobState::Classifying),
            Just(JobState::Inserting),
            Just(JobState::Complete),
            Just(JobState::Cancelled),
            Just(JobState::Error),
        ]
    }

    /// A token-id/frequency pair with frequency >= 1, the only range an
    /// item ever legally stores (`Item::add_token` of a zero-frequency
    /// token isn't something the feature extractor does).
    pub fn arb_token_frequency() -> impl Strategy<Value = (u32, u32)> {
        (0u32..500, 1u32..50)
    }

    /// An `Item` with a random, duplicate-free set of token frequencies.
    pub fn arb_item(id: String) -> impl Strategy<Value = Item> {
        (
            arb_timestamp(),
            prop::collection::hash_map(0u32..500, 1u32..50, 0..20),
        )
            .prop_map(move |(updated, tokens)| {
                let mut item = Item::new(id.clone(), updated);
                for (token_id, frequency) in tokens {
                    item.add_token(token_id, frequency);
                }
                item
            })
    }

    pub fn arb_entry() -> impl Strategy<Value = Entry> {
        (
            "[a-z]{4,10}".prop_map(|s| format!("urn:entry:{s}")),
            "[a-zA-Z0-9 ]{1,80}",
            "[a-z]{3,20}",
            "[a-z0-9 ]{0,200}",
            arb_timestamp(),
        )
            .prop_map(|(full_id, title, author, content, updated)| Entry {
                full_id: full_id.clone(),
                title,
                author,
                alternate_link: format!("http://example.com/items/{full_id}"),
                self_link: format!("http://example.com/items/{full_id}.atom"),
                content,
                updated,
                source_xml: String::new(),
            })
    }

    pub fn arb_job(tag_url: String) -> impl Strategy<Value = Job> {
        (arb_job_id(), arb_item_scope(), arb_timestamp())
            .prop_map(move |(id, scope, now)| Job::new(id, tag_url.clone(), scope, now))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for tests that don't care about randomized
    //! coverage, just a plausible entry/item/job to exercise.

    use super::*;

    /// An `Entry` with the given id and space-separated `words` as its
    /// content — pairs naturally with [`WordSplitExtractor`].
    pub fn entry(id: &str, words: &str) -> Entry {
        Entry {
            full_id: id.to_string(),
            title: format!("Entry {id}"),
            author: "tester".to_string(),
            alternate_link: format!("http://example.com/items/{id}"),
            self_link: format!("http://example.com/items/{id}.atom"),
            content: words.to_string(),
            updated: Utc::now(),
            source_xml: String::new(),
        }
    }

    /// An `Item` with the given `(token_id, frequency)` pairs.
    pub fn item(id: &str, tokens: &[(u32, u32)]) -> Item {
        let mut item = Item::new(id, Utc::now());
        for &(token_id, frequency) in tokens {
            item.add_token(token_id, frequency);
        }
        item
    }

    /// A `Pool` built from the given items' tokens.
    pub fn pool(items: &[Item]) -> Pool {
        let mut pool = Pool::new();
        for item in items {
            pool.add_item(item);
        }
        pool
    }

    /// A freshly submitted job waiting to be picked up by a worker.
    pub fn waiting_job(tag_url: &str) -> Job {
        Job::new(JobId::now_v7(), tag_url, ItemScope::New, Utc::now())
    }

    /// A job that completed successfully, with plausible timestamps at
    /// each lifecycle milestone.
    pub fn complete_job(tag_url: &str, items_classified: u64) -> Job {
        let now = Utc::now();
        let mut job = Job::new(JobId::now_v7(), tag_url, ItemScope::All, now);
        job.started_at = Some(now);
        job.trained_at = Some(now + chrono::Duration::seconds(1));
        job.classified_at = Some(now + chrono::Duration::seconds(2));
        job.completed_at = Some(now + chrono::Duration::seconds(3));
        job.items_classified = items_classified;
        job.progress = 100.0;
        job.state = JobState::Complete;
        job
    }

    /// A job that failed with the given error kind.
    pub fn failed_job(tag_url: &str, kind: JobErrorKind, message: &str) -> Job {
        let mut job = Job::new(JobId::now_v7(), tag_url, ItemScope::New, Utc::now());
        job.state = JobState::Error;
        job.error_kind = Some(kind);
        job.error_message = Some(message.to_string());
        job.completed_at = Some(Utc::now());
        job
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Small, named assertions for the invariants exercised repeatedly
    //! across the classification crates' test suites.

    use super::*;

    #[track_caller]
    pub fn assert_job_state(job: &Job, expected: JobState) {
        assert_eq!(
            job.state, expected,
            "job {} expected state {:?}, got {:?}",
            job.id, expected, job.state
        );
    }

    #[track_caller]
    pub fn assert_job_error_kind(job: &Job, expected: JobErrorKind) {
        assert_eq!(
            job.error_kind.as_ref(),
            Some(&expected),
            "job {} expected error kind {:?}, got {:?}",
            job.id,
            expected,
            job.error_kind
        );
    }

    #[track_caller]
    pub fn assert_not_visible_to_get(job: &Job) {
        assert!(
            !job.visible_to_get(),
            "job {} in state {:?} should not be visible to GET",
            job.id,
            job.state
        );
    }

    /// A pool's total must equal the sum of every merged item's total —
    /// the invariant [`Pool::add_item`]'s doc comment promises.
    #[track_caller]
    pub fn assert_pool_total_consistent(pool: &Pool, items: &[Item]) {
        let expected: u64 = items.iter().map(|item| item.total_tokens()).sum();
        assert_eq!(
            pool.total_tokens(),
            expected,
            "pool total {} does not match sum of item totals {}",
            pool.total_tokens(),
            expected
        );
    }

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &Result<T, StorageError>) {
        assert!(result.is_err(), "expected a StorageError, got {result:?}");
    }

    #[track_caller]
    pub fn assert_item_not_found<T: std::fmt::Debug>(result: &Result<T, StorageError>, id: &str) {
        match result {
            Err(StorageError::ItemNotFound(got)) => assert_eq!(got, id),
            other => panic!("expected ItemNotFound({id:?}), got {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn in_memory_catalog_insert_is_idempotent() {
        let catalog = InMemoryCatalog::new();
        let entry = fixtures::entry("urn:item:1", "hello world");
        assert!(catalog.insert_entry(&entry).await.unwrap());
        assert!(!catalog.insert_entry(&entry).await.unwrap());
        assert_eq!(catalog.entry_count(), 1);
    }

    #[tokio::test]
    async fn in_memory_catalog_refuses_to_remove_background_entry() {
        let catalog = InMemoryCatalog::new().with_background(["urn:item:1".to_string()]);
        let entry = fixtures::entry("urn:item:1", "hello world");
        catalog.insert_entry(&entry).await.unwrap();
        let result = catalog.remove_entry("urn:item:1").await;
        assertions::assert_storage_error(&result);
    }

    #[tokio::test]
    async fn in_memory_catalog_load_since_filters_and_orders() {
        let catalog = InMemoryCatalog::new();
        let old = Utc::now() - chrono::Duration::days(30);
        let recent = Utc::now();
        catalog
            .save_item_tokens("urn:item:old", old, &[(1, 1)])
            .await
            .unwrap();
        catalog
            .save_item_tokens("urn:item:new", recent, &[(1, 1)])
            .await
            .unwrap();
        let loaded = catalog.load_since(7).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "urn:item:new");
    }

    #[tokio::test]
    async fn word_split_extractor_atomizes_case_insensitively() {
        let dictionary = TokenDictionary::new(InMemoryDictionaryStore::new());
        let extractor = WordSplitExtractor::new(dictionary);
        let entry = fixtures::entry("urn:item:1", "Hello hello WORLD");
        let item = extractor.extract(&entry).await.unwrap();
        assert_eq!(item.num_distinct_tokens(), 2);
        assert_eq!(item.total_tokens(), 3);
    }

    #[test]
    fn complete_job_fixture_is_visible_and_done() {
        let job = fixtures::complete_job("http://example.com/tags/1", 42);
        assertions::assert_job_state(&job, JobState::Complete);
        assert!(job.visible_to_get());
        assert_eq!(job.items_classified, 42);
    }

    #[test]
    fn failed_job_fixture_carries_error_kind() {
        let job = fixtures::failed_job(
            "http://example.com/tags/1",
            JobErrorKind::NoSuchTag,
            "no such tag",
        );
        assertions::assert_job_state(&job, JobState::Error);
        assertions::assert_job_error_kind(&job, JobErrorKind::NoSuchTag);
    }

    #[test]
    fn pool_fixture_total_matches_items() {
        let items = vec![
            fixtures::item("a", &[(1, 5)]),
            fixtures::item("b", &[(1, 3), (2, 2)]),
        ];
        let pool = fixtures::pool(&items);
        assertions::assert_pool_total_consistent(&pool, &items);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_job_starts_waiting(job in generators::arb_job("http://example.com/tags/1".to_string())) {
            assert_eq!(job.state, JobState::Waiting);
            assert!(job.visible_to_get());
        }

        #[test]
        fn prop_generated_item_total_matches_token_sum(item in generators::arb_item("urn:item:prop".to_string())) {
            let expected: u64 = item.tokens().map(|(_, freq)| freq as u64).sum();
            assert_eq!(item.total_tokens(), expected);
        }
    }
}
