//! The in-memory item cache: a reverse-chronological sequence of
//! tokenized items backed by a [`DurableCatalog`], fed by a
//! feature-extraction queue and a cache-update queue, trimmed by a
//! purge sweep.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use classifier_core::{env_or, env_secs_or, Entry, FetchError, Item, Pool, StorageError};

use crate::catalog::DurableCatalog;
use crate::queue::TimedQueue;

/// Turns a raw [`Entry`] into a tokenized [`Item`]. Implemented outside
/// this crate by whatever talks to the tokenizer service; kept as a
/// trait here so the cache's background threads don't pull in an HTTP
/// client dependency.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn extract(&self, entry: &Entry) -> Result<Item, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ItemCacheConfig {
    /// How many days back to load items from the catalog on startup.
    pub load_items_since_days: i64,
    /// Items with fewer distinct tokens than this are persisted but
    /// never kept in memory.
    pub min_tokens: usize,
    /// How long the cache-updater waits for a batch item before
    /// flushing whatever it already collected.
    pub cache_update_wait_time: Duration,
    /// How often the purge sweep runs.
    pub purge_interval: Duration,
}

impl Default for ItemCacheConfig {
    fn default() -> Self {
        Self {
            load_items_since_days: 30,
            min_tokens: 2,
            cache_update_wait_time: Duration::from_secs(1),
            purge_interval: Duration::from_secs(3600),
        }
    }
}

impl ItemCacheConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            load_items_since_days: env_or("LOAD_ITEMS_SINCE_DAYS", defaults.load_items_since_days),
            min_tokens: env_or("MIN_TOKENS", defaults.min_tokens),
            cache_update_wait_time: env_secs_or(
                "CACHE_UPDATE_WAIT_TIME_SECS",
                defaults.cache_update_wait_time.as_secs(),
            ),
            purge_interval: env_secs_or("PURGE_INTERVAL_SECS", defaults.purge_interval.as_secs()),
        }
    }
}

struct CacheState {
    items: HashMap<String, Arc<Item>>,
    /// Most recently updated item first.
    ordered: VecDeque<Arc<Item>>,
    random_background: Pool,
}

impl CacheState {
    fn empty() -> Self {
        Self {
            items: HashMap::new(),
            ordered: VecDeque::new(),
            random_background: Pool::new(),
        }
    }

    /// Insert keeping `ordered` sorted by descending update time;
    /// items with equal timestamps go in front of existing ties.
    fn insert(&mut self, item: Arc<Item>) {
        let pos = self
            .ordered
            .iter()
            .position(|existing| existing.updated() < item.updated());
        match pos {
            Some(idx) => self.ordered.insert(idx, item.clone()),
            None => self.ordered.push_back(item.clone()),
        }
        self.items.insert(item.id().to_string(), item);
    }
}

pub struct ItemCache<C, F> {
    catalog: Arc<C>,
    extractor: Arc<F>,
    config: ItemCacheConfig,
    state: RwLock<CacheState>,
    loaded: AtomicBool,
    feature_queue: TimedQueue<Entry>,
    update_queue: TimedQueue<(String, Item)>,
    update_callback: RwLock<Option<mpsc::Sender<usize>>>,
}

impl<C, F> ItemCache<C, F>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    pub fn new(catalog: Arc<C>, extractor: Arc<F>, config: ItemCacheConfig) -> Self {
        Self {
            catalog,
            extractor,
            config,
            state: RwLock::new(CacheState::empty()),
            loaded: AtomicBool::new(false),
            feature_queue: TimedQueue::new(),
            update_queue: TimedQueue::new(),
            update_callback: RwLock::new(None),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub async fn cached_size(&self) -> usize {
        self.state.read().await.items.len()
    }

    /// Register the channel the cache-updater reports batch sizes to.
    pub async fn set_update_callback(&self, callback: mpsc::Sender<usize>) {
        *self.update_callback.write().await = Some(callback);
    }

    /// Populate the in-memory sequence, id map, and random background
    /// pool from the durable catalog. Must run to completion before any
    /// other cache operation is considered ready.
    pub async fn load(&self) -> Result<(), StorageError> {
        let stored = self.catalog.load_since(self.config.load_items_since_days).await?;
        let mut items = HashMap::with_capacity(stored.len());
        let mut ordered = VecDeque::with_capacity(stored.len());
        for record in stored {
            let mut item = Item::new(record.id.clone(), record.updated);
            for (token_id, frequency) in record.tokens {
                item.add_token(token_id, frequency);
            }
            if item.num_distinct_tokens() < self.config.min_tokens {
                continue;
            }
            let item = Arc::new(item);
            items.insert(item.id().to_string(), item.clone());
            // load_since is contracted to return items already ordered
            // by descending update time.
            ordered.push_back(item);
        }

        let mut random_background = Pool::new();
        for background_id in self.catalog.random_background_ids().await? {
            if let Some(item) = items.get(&background_id) {
                random_background.add_item(item);
            }
        }

        let mut state = self.state.write().await;
        state.items = items;
        state.ordered = ordered;
        state.random_background = random_background;
        drop(state);

        self.loaded.store(true, Ordering::Release);
        info!(count = self.cached_size().await, "item cache loaded");
        Ok(())
    }

    /// Fetch an item, checking memory first and falling back to the
    /// catalog. The catalog round-trip result is never cached back into
    /// memory — only the cache-updater thread populates `ordered`.
    pub async fn fetch(&self, item_id: &str) -> Result<Option<Arc<Item>>, StorageError> {
        if let Some(item) = self.state.read().await.items.get(item_id) {
            return Ok(Some(item.clone()));
        }
        match self.catalog.fetch_item_tokens(item_id).await? {
            Some(record) if !record.tokens.is_empty() => {
                let mut item = Item::new(record.id, record.updated);
                for (token_id, frequency) in record.tokens {
                    item.add_token(token_id, frequency);
                }
                Ok(Some(Arc::new(item)))
            }
            _ => Ok(None),
        }
    }

    pub async fn random_background(&self) -> Pool {
        self.state.read().await.random_background.clone()
    }

    /// Items strictly newer than `since`, most recent first.
    pub async fn items_since(&self, since: DateTime<Utc>) -> Vec<Arc<Item>> {
        let state = self.state.read().await;
        state
            .ordered
            .iter()
            .take_while(|item| item.updated() > since)
            .cloned()
            .collect()
    }

    /// All cached items, optionally resuming just after `after_item_id`
    /// (used to continue a "new items" classification scope across
    /// runs without re-walking items already seen).
    pub async fn iter_from(&self, after_item_id: Option<&str>) -> Vec<Arc<Item>> {
        let state = self.state.read().await;
        let Some(after) = after_item_id else {
            return state.ordered.iter().cloned().collect();
        };
        match state.ordered.iter().position(|item| item.id() == after) {
            Some(idx) => state.ordered.iter().skip(idx + 1).cloned().collect(),
            None => state.ordered.iter().cloned().collect(),
        }
    }

    /// Record a new entry. New entries are queued for feature
    /// extraction; re-delivery of a known entry id is a no-op.
    pub async fn add_entry(&self, entry: Entry) -> Result<(), StorageError> {
        let is_new = self.catalog.insert_entry(&entry).await?;
        if is_new {
            self.feature_queue.enqueue(entry).await;
        }
        Ok(())
    }

    pub async fn remove_entry(&self, entry_id: &str) -> Result<(), StorageError> {
        self.catalog.remove_entry(entry_id).await?;
        let mut state = self.state.write().await;
        if let Some(item) = state.items.remove(entry_id) {
            state.ordered.retain(|existing| !Arc::ptr_eq(existing, &item));
        }
        Ok(())
    }

    /// Drain the feature-extraction queue forever, handing tokenized
    /// items to the cache-update queue. Stops when `shutdown` reports
    /// `true`.
    pub fn spawn_feature_extraction_thread(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    entry = cache.feature_queue.dequeue_timeout(Duration::from_secs(1)) => {
                        let Some(entry) = entry else { continue };
                        let entry_id = entry.id().to_string();
                        match cache.extractor.extract(&entry).await {
                            Ok(item) => cache.update_queue.enqueue((entry_id, item)).await,
                            Err(err) => warn!(%err, entry_id, "feature extraction failed, dropping entry"),
                        }
                    }
                }
            }
        })
    }

    /// Drain the cache-update queue in batches of up to 200 items,
    /// persisting each item's tokens and, if it clears `min_tokens`,
    /// inserting it into the in-memory sequence. Reports the number of
    /// items added to memory (not merely persisted) via the registered
    /// update callback once per batch.
    pub fn spawn_cache_updater_thread(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        const MAX_BATCH: usize = 200;
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    first = cache.update_queue.dequeue_timeout(cache.config.cache_update_wait_time) => {
                        let Some(first) = first else { continue };
                        let mut added = 0usize;
                        if cache.apply_update(first).await {
                            added += 1;
                        }
                        while added < MAX_BATCH {
                            match cache.update_queue.dequeue_timeout(cache.config.cache_update_wait_time).await {
                                Some(job) => {
                                    if cache.apply_update(job).await {
                                        added += 1;
                                    }
                                }
                                None => break,
                            }
                        }
                        if added > 0 {
                            if let Some(callback) = cache.update_callback.read().await.as_ref() {
                                let _ = callback.send(added).await;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Persist one tokenized item and insert it into memory if it
    /// clears `min_tokens`. Returns whether it was added to memory.
    async fn apply_update(&self, (entry_id, item): (String, Item)) -> bool {
        let tokens: Vec<(u32, u32)> = item.tokens().collect();
        if let Err(err) = self
            .catalog
            .save_item_tokens(item.id(), item.updated(), &tokens)
            .await
        {
            error!(%err, entry_id, "failed to persist item tokens");
            return false;
        }
        if item.num_distinct_tokens() < self.config.min_tokens {
            return false;
        }
        self.state.write().await.insert(Arc::new(item));
        true
    }

    /// Periodically truncate the in-memory sequence at the first item
    /// whose update time falls at or before the current purge time.
    /// Purged items remain in the durable catalog; only the in-memory
    /// copy is dropped.
    pub fn spawn_purge_thread(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache.config.purge_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        cache.purge_once(Utc::now()).await;
                    }
                }
            }
        })
    }

    async fn purge_once(&self, now: DateTime<Utc>) {
        let purge_time = purge_time_for(now);
        let mut state = self.state.write().await;
        let Some(idx) = state.ordered.iter().position(|item| item.updated() <= purge_time) else {
            return;
        };
        let purged = state.ordered.split_off(idx);
        for item in &purged {
            state.items.remove(item.id());
        }
        if !purged.is_empty() {
            info!(count = purged.len(), %purge_time, "purged stale items from memory");
        }
    }
}

/// Decrements the month and day-of-month of `now` by one each, letting
/// the result normalize across month/year boundaries the way calendar
/// arithmetic on broken-down time fields does. This reproduces an
/// intentionally quirky purge horizon: most days it is "a month and a
/// day ago", but crossing a month boundary it collapses to "a month
/// ago, minus one more day of whatever the previous month's length is".
fn purge_time_for(now: DateTime<Utc>) -> DateTime<Utc> {
    let mut year = now.year();
    let mut month0 = now.month() as i32 - 1; // 0-indexed
    let mut day = now.day() as i32;

    month0 -= 1;
    day -= 1;

    if month0 < 0 {
        month0 += 12;
        year -= 1;
    }

    while day <= 0 {
        month0 -= 1;
        if month0 < 0 {
            month0 = 11;
            year -= 1;
        }
        day += days_in_month(year, month0 + 1);
    }

    let date = NaiveDate::from_ymd_opt(year, (month0 + 1) as u32, day as u32)
        .expect("normalized purge date must be valid");
    Utc.from_utc_datetime(&NaiveDateTime::new(date, now.time()))
}

/// Number of days in `month` (1-indexed) of `year`.
fn days_in_month(year: i32, month: i32) -> i32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month as u32, 1).unwrap();
    let first_of_this = NaiveDate::from_ymd_opt(year, month as u32, 1).unwrap();
    (first_of_next - first_of_this).num_days() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex as StdMutex;

    struct FakeCatalog {
        entries: StdMutex<HashMap<String, Entry>>,
        items: StdMutex<HashMap<String, crate::catalog::StoredItem>>,
        background: Vec<String>,
    }

    impl FakeCatalog {
        fn new(background: Vec<String>) -> Self {
            Self {
                entries: StdMutex::new(HashMap::new()),
                items: StdMutex::new(HashMap::new()),
                background,
            }
        }
    }

    #[async_trait]
    impl DurableCatalog for FakeCatalog {
        async fn insert_entry(&self, entry: &Entry) -> Result<bool, StorageError> {
            let mut entries = self.entries.lock().unwrap();
            let is_new = !entries.contains_key(entry.id());
            entries.insert(entry.id().to_string(), entry.clone());
            Ok(is_new)
        }

        async fn remove_entry(&self, entry_id: &str) -> Result<(), StorageError> {
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
                crate::catalog::StoredItem {
                    id: item_id.to_string(),
                    updated,
                    tokens: tokens.to_vec(),
                },
            );
            Ok(())
        }

        async fn fetch_item_tokens(
            &self,
            item_id: &str,
        ) -> Result<Option<crate::catalog::StoredItem>, StorageError> {
            Ok(self.items.lock().unwrap().get(item_id).cloned())
        }

        async fn load_since(&self, _since_days: i64) -> Result<Vec<crate::catalog::StoredItem>, StorageError> {
            let mut items: Vec<_> = self.items.lock().unwrap().values().cloned().collect();
            items.sort_by(|a, b| b.updated.cmp(&a.updated));
            Ok(items)
        }

        async fn random_background_ids(&self) -> Result<Vec<String>, StorageError> {
            Ok(self.background.clone())
        }
    }

    struct IdentityExtractor;

    #[async_trait]
    impl FeatureExtractor for IdentityExtractor {
        async fn extract(&self, entry: &Entry) -> Result<Item, FetchError> {
            let mut item = Item::new(entry.id(), entry.updated);
            item.add_token(1, entry.content.len() as u32 + 1);
            Ok(item)
        }
    }

    fn entry(id: &str, updated: DateTime<Utc>) -> Entry {
        Entry {
            full_id: id.to_string(),
            title: "t".into(),
            author: "a".into(),
            alternate_link: String::new(),
            self_link: String::new(),
            content: "hello world".into(),
            updated,
            source_xml: String::new(),
        }
    }

    #[tokio::test]
    async fn load_populates_ordered_sequence_and_background() {
        let catalog = Arc::new(FakeCatalog::new(vec!["a".into()]));
        catalog
            .save_item_tokens("a", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(), &[(1, 3), (2, 1)])
            .await
            .unwrap();
        catalog
            .save_item_tokens("b", Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap(), &[(1, 1), (2, 1)])
            .await
            .unwrap();
        let cache = ItemCache::new(catalog, Arc::new(IdentityExtractor), ItemCacheConfig::default());
        cache.load().await.unwrap();
        assert!(cache.is_loaded());
        assert_eq!(cache.cached_size().await, 2);
        let ids: Vec<String> = cache.iter_from(None).await.iter().map(|i| i.id().to_string()).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn load_skips_items_below_min_tokens() {
        let catalog = Arc::new(FakeCatalog::new(vec![]));
        catalog
            .save_item_tokens("sparse", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(), &[(1, 1)])
            .await
            .unwrap();
        let cache = ItemCache::new(catalog, Arc::new(IdentityExtractor), ItemCacheConfig::default());
        cache.load().await.unwrap();
        assert_eq!(cache.cached_size().await, 0);
    }

    #[tokio::test]
    async fn fetch_falls_back_to_catalog_when_not_cached() {
        let catalog = Arc::new(FakeCatalog::new(vec![]));
        catalog
            .save_item_tokens("x", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(), &[(1, 1), (2, 1)])
            .await
            .unwrap();
        let cache = ItemCache::new(catalog, Arc::new(IdentityExtractor), ItemCacheConfig::default());
        let fetched = cache.fetch("x").await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn add_entry_queues_new_entries_only_once() {
        let catalog = Arc::new(FakeCatalog::new(vec![]));
        let cache = Arc::new(ItemCache::new(catalog, Arc::new(IdentityExtractor), ItemCacheConfig::default()));
        cache.add_entry(entry("e1", Utc::now())).await.unwrap();
        cache.add_entry(entry("e1", Utc::now())).await.unwrap();
        assert_eq!(cache.feature_queue.len().await, 1);
    }

    #[tokio::test]
    async fn feature_extraction_and_cache_update_threads_land_an_item_in_memory() {
        let catalog = Arc::new(FakeCatalog::new(vec![]));
        let cache = Arc::new(ItemCache::new(catalog, Arc::new(IdentityExtractor), ItemCacheConfig::default()));
        let (tx, mut rx) = mpsc::channel(4);
        cache.set_update_callback(tx).await;

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let extraction = cache.spawn_feature_extraction_thread(shutdown_rx.clone());
        let updater = cache.spawn_cache_updater_thread(shutdown_rx.clone());

        cache.add_entry(entry("e1", Utc::now())).await.unwrap();
        let added = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("update callback should fire")
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(cache.cached_size().await, 1);

        extraction.abort();
        updater.abort();
    }

    #[test]
    fn purge_time_mid_month_is_one_month_and_one_day_back() {
        let now = Utc.with_ymd_and_hms(2026, 8, 15, 12, 0, 0).unwrap();
        let purge = purge_time_for(now);
        assert_eq!(purge.date_naive(), NaiveDate::from_ymd_opt(2026, 7, 14).unwrap());
    }

    #[test]
    fn purge_time_on_the_first_of_the_month_rolls_back_two_months() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let purge = purge_time_for(now);
        assert_eq!(purge.date_naive(), NaiveDate::from_ymd_opt(2026, 6, 30).unwrap());
    }

    #[test]
    fn purge_time_crosses_year_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let purge = purge_time_for(now);
        assert_eq!(purge.date_naive(), NaiveDate::from_ymd_opt(2025, 11, 30).unwrap());
    }
}
