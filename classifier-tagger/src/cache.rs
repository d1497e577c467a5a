//! Checkout-style coordinator for per-tag [`Tagger`]s: dedupes
//! concurrent work on the same tag, fetches training documents with
//! conditional GET, advances taggers toward `Precomputed`, and tracks
//! the tag index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classifier_core::{FetchError, TaggerError};
use classifier_fetch::{ConditionalFetch, TagDocumentClient, TagIndexClient};
use classifier_storage::{DurableCatalog, FeatureExtractor, ItemCache};
use tokio::sync::Mutex;
use tracing::warn;

use crate::tagger::Tagger;

/// A tag training document fetcher, independent of the HTTP client
/// that implements it — lets [`TaggerCache`] be exercised with a fake
/// in tests, mirroring how `classifier-storage::ItemCache` abstracts
/// over its [`FeatureExtractor`].
#[async_trait]
pub trait TagDocumentFetcher: Send + Sync {
    async fn fetch(&self, tag_url: &str) -> Result<ConditionalFetch, FetchError>;
    async fn fetch_if_modified_since(
        &self,
        tag_url: &str,
        since: DateTime<Utc>,
    ) -> Result<ConditionalFetch, FetchError>;
}

#[async_trait]
impl TagDocumentFetcher for TagDocumentClient {
    async fn fetch(&self, tag_url: &str) -> Result<ConditionalFetch, FetchError> {
        TagDocumentClient::fetch(self, tag_url).await
    }
    async fn fetch_if_modified_since(
        &self,
        tag_url: &str,
        since: DateTime<Utc>,
    ) -> Result<ConditionalFetch, FetchError> {
        TagDocumentClient::fetch_if_modified_since(self, tag_url, since).await
    }
}

/// The tag index feed fetcher, abstracted the same way as
/// [`TagDocumentFetcher`].
#[async_trait]
pub trait TagIndexFetcher: Send + Sync {
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<ConditionalFetch, FetchError>;
}

#[async_trait]
impl TagIndexFetcher for TagIndexClient {
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<ConditionalFetch, FetchError> {
        TagIndexClient::fetch(self, since).await
    }
}

/// Outcome of [`TaggerCache::get_tagger`].
pub enum TaggerLookup {
    /// The tagger is trained, precomputed, and checked out to the
    /// caller. Must be returned via [`TaggerCache::release_tagger`].
    Ready(CheckedOutTagger),
    /// Training is blocked on items the feature extractor has not
    /// tokenized yet. The checkout has already been released; retry
    /// later.
    Pending,
    NotFound,
    CheckedOut,
    Error(TaggerError),
}

/// A [`Tagger`] on loan from the cache. Dropping this without calling
/// [`TaggerCache::release_tagger`] leaks the checkout — the tag url
/// stays marked checked-out forever, matching the "must release when
/// done" contract rather than silently reclaiming on drop.
pub struct CheckedOutTagger {
    pub tag_url: String,
    pub tagger: Tagger,
}

struct CacheState {
    checked_out: HashSet<String>,
    resident: HashMap<String, Tagger>,
    failed: HashSet<String>,
    tag_index: Vec<String>,
    tag_index_updated: Option<DateTime<Utc>>,
}

pub struct TaggerCache<C, F, T = TagDocumentClient, I = TagIndexClient> {
    item_cache: Arc<ItemCache<C, F>>,
    tag_client: T,
    index_client: I,
    state: Mutex<CacheState>,
}

impl<C, F, T, I> TaggerCache<C, F, T, I>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
    T: TagDocumentFetcher,
    I: TagIndexFetcher,
{
    pub fn new(item_cache: Arc<ItemCache<C, F>>, tag_client: T, index_client: I) -> Self {
        Self {
            item_cache,
            tag_client,
            index_client,
            state: Mutex::new(CacheState {
                checked_out: HashSet::new(),
                resident: HashMap::new(),
                failed: HashSet::new(),
                tag_index: Vec::new(),
                tag_index_updated: None,
            }),
        }
    }

    /// Checks out the tagger for `tag_url`, fetching and advancing it
    /// toward `Precomputed` as needed. See [`TaggerLookup`] for the
    /// possible outcomes.
    pub async fn get_tagger(&self, tag_url: &str) -> TaggerLookup {
        let existing = {
            let mut state = self.state.lock().await;
            if state.checked_out.contains(tag_url) {
                return TaggerLookup::CheckedOut;
            }
            state.checked_out.insert(tag_url.to_string());
            state.resident.remove(tag_url)
        };

        let fetch_result = match &existing {
            Some(resident) => self.tag_client.fetch_if_modified_since(tag_url, resident.identity.updated).await,
            None => self.tag_client.fetch(tag_url).await,
        };

        let mut tagger = match fetch_result {
            Ok(ConditionalFetch::NotModified) => match existing {
                Some(resident) => resident,
                // A 304 with no prior resident copy is a malformed
                // upstream response; surface it rather than panic.
                None => {
                    self.release_checkout(tag_url).await;
                    return TaggerLookup::Error(TaggerError::NotFound(tag_url.to_string()));
                }
            },
            Ok(ConditionalFetch::NotFound) => {
                self.release_checkout(tag_url).await;
                return TaggerLookup::NotFound;
            }
            Ok(ConditionalFetch::Fetched { body, .. }) => {
                match Tagger::build(&body, tag_url, &self.item_cache).await {
                    Ok(tagger) => tagger,
                    Err(err) => {
                        self.release_checkout(tag_url).await;
                        return TaggerLookup::Error(err);
                    }
                }
            }
            Err(err) => {
                self.release_checkout(tag_url).await;
                return TaggerLookup::Error(TaggerError::Fetch(err));
            }
        };

        if let Err(err) = self.advance(&mut tagger).await {
            self.release_checkout(tag_url).await;
            return TaggerLookup::Error(err);
        }

        if tagger.has_missing_items() {
            self.state.lock().await.resident.insert(tag_url.to_string(), tagger);
            self.release_checkout(tag_url).await;
            return TaggerLookup::Pending;
        }

        TaggerLookup::Ready(CheckedOutTagger {
            tag_url: tag_url.to_string(),
            tagger,
        })
    }

    /// Advances `tagger` one step per the usual `Loaded -> Trained ->
    /// Precomputed` path; retrains in place if it is already `Trained`
    /// but still has missing items, so a later catch-up by the feature
    /// extractor is eventually observed.
    async fn advance(&self, tagger: &mut Tagger) -> Result<(), TaggerError> {
        use classifier_core::TaggerState::*;
        match tagger.state() {
            Loaded => tagger.train(&self.item_cache).await?,
            Trained if tagger.has_missing_items() => tagger.retrain(&self.item_cache).await?,
            _ => {}
        }
        if tagger.state() == Trained && !tagger.has_missing_items() {
            let background = self.item_cache.random_background().await;
            tagger.precompute(&background)?;
        }
        Ok(())
    }

    /// Returns a checked-out tagger to the resident map and clears its
    /// checkout. Does not free the tagger.
    pub async fn release_tagger(&self, checked_out: CheckedOutTagger) {
        let mut state = self.state.lock().await;
        state.resident.insert(checked_out.tag_url.clone(), checked_out.tagger);
        state.checked_out.remove(&checked_out.tag_url);
    }

    async fn release_checkout(&self, tag_url: &str) {
        self.state.lock().await.checked_out.remove(tag_url);
    }

    /// Refreshes the tag index via conditional GET, returning the
    /// current list of tag training URLs (cached, on failure, if any).
    pub async fn fetch_tags(&self) -> Result<Vec<String>, TaggerError> {
        let since = self.state.lock().await.tag_index_updated;
        match self.index_client.fetch(since).await {
            Ok(ConditionalFetch::NotModified) => Ok(self.state.lock().await.tag_index.clone()),
            Ok(ConditionalFetch::NotFound) => Err(TaggerError::NotFound("tag index".to_string())),
            Ok(ConditionalFetch::Fetched { body, updated }) => {
                let feed = crate::atom::parse_feed(&body).map_err(|reason| {
                    TaggerError::Fetch(FetchError::InvalidResponse {
                        url: "tag index".to_string(),
                        reason,
                    })
                })?;
                let urls = crate::atom::training_urls(&feed);
                let mut state = self.state.lock().await;
                state.tag_index = urls.clone();
                state.tag_index_updated = updated.or(Some(Utc::now()));
                Ok(urls)
            }
            Err(err) => {
                let state = self.state.lock().await;
                if state.tag_index.is_empty() {
                    Err(TaggerError::Fetch(err))
                } else {
                    Ok(state.tag_index.clone())
                }
            }
        }
    }

    pub async fn is_failed(&self, tag_url: &str) -> bool {
        self.state.lock().await.failed.contains(tag_url)
    }
}

impl<C, F, T, I> TaggerCache<C, F, T, I>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
    T: TagDocumentFetcher + 'static,
    I: TagIndexFetcher + 'static,
{
    /// Spawns a detached task that calls `get_tagger` for `tag_url` and
    /// records a failure (any non-`Ready`, non-`Pending` outcome) so
    /// future callers can see it in the failed set. Used to warm the
    /// cache without blocking the request path; a tagger obtained this
    /// way is released immediately since nothing here wants it.
    pub fn fetch_tagger_in_background(self: &Arc<Self>, tag_url: String) {
        let cache = self.clone();
        tokio::spawn(async move {
            match cache.get_tagger(&tag_url).await {
                TaggerLookup::Ready(checked_out) => {
                    cache.release_tagger(checked_out).await;
                    cache.state.lock().await.failed.remove(&tag_url);
                }
                TaggerLookup::Pending => {}
                outcome => {
                    if let TaggerLookup::Error(err) = &outcome {
                        warn!(tag_url, %err, "background tagger fetch failed");
                    }
                    cache.state.lock().await.failed.insert(tag_url);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use classifier_core::{Entry, FetchError as CoreFetchError, Item};
    use classifier_storage::{ItemCacheConfig, StoredItem};
    use std::sync::Mutex as StdMutex;

    struct NullCatalog;

    #[async_trait]
    impl DurableCatalog for NullCatalog {
        async fn insert_entry(&self, _entry: &Entry) -> Result<bool, classifier_core::StorageError> {
            Ok(true)
        }
        async fn remove_entry(&self, _entry_id: &str) -> Result<(), classifier_core::StorageError> {
            Ok(())
        }
        async fn save_item_tokens(
            &self,
            _item_id: &str,
            _updated: DateTime<Utc>,
            _tokens: &[(u32, u32)],
        ) -> Result<(), classifier_core::StorageError> {
            Ok(())
        }
        async fn fetch_item_tokens(&self, _item_id: &str) -> Result<Option<StoredItem>, classifier_core::StorageError> {
            Ok(None)
        }
        async fn load_since(&self, _since_days: i64) -> Result<Vec<StoredItem>, classifier_core::StorageError> {
            Ok(Vec::new())
        }
        async fn random_background_ids(&self) -> Result<Vec<String>, classifier_core::StorageError> {
            Ok(Vec::new())
        }
    }

    struct NullExtractor;

    #[async_trait]
    impl FeatureExtractor for NullExtractor {
        async fn extract(&self, entry: &Entry) -> Result<Item, CoreFetchError> {
            Ok(Item::new(entry.id(), entry.updated))
        }
    }

    fn item_cache() -> Arc<ItemCache<NullCatalog, NullExtractor>> {
        Arc::new(ItemCache::new(Arc::new(NullCatalog), Arc::new(NullExtractor), ItemCacheConfig::default()))
    }

    const NO_EXAMPLES_TAG: &str = r#"<?xml version="1.0"?>
    <feed xmlns="http://www.w3.org/2005/Atom" xmlns:classifier="http://peerworks.org/classifier">
      <id>urn:tag:empty</id>
      <link rel="http://peerworks.org/classifier/edit" href="http://example.com/tags/empty/items.atom"/>
      <category term="empty" scheme="urn:scheme"/>
      <updated>2026-07-01T00:00:00Z</updated>
      <classifier:classified>2026-06-01T00:00:00Z</classifier:classified>
    </feed>"#;

    /// Returns `body` on first call, `NotModified` forever after —
    /// models an upstream document that never changes.
    struct StaticTagFetcher {
        body: String,
        calls: StdMutex<u32>,
    }

    #[async_trait]
    impl TagDocumentFetcher for StaticTagFetcher {
        async fn fetch(&self, _tag_url: &str) -> Result<ConditionalFetch, FetchError> {
            *self.calls.lock().unwrap() += 1;
            Ok(ConditionalFetch::Fetched { body: self.body.clone(), updated: None })
        }
        async fn fetch_if_modified_since(&self, _tag_url: &str, _since: DateTime<Utc>) -> Result<ConditionalFetch, FetchError> {
            *self.calls.lock().unwrap() += 1;
            Ok(ConditionalFetch::NotModified)
        }
    }

    struct NotFoundTagFetcher;

    #[async_trait]
    impl TagDocumentFetcher for NotFoundTagFetcher {
        async fn fetch(&self, _tag_url: &str) -> Result<ConditionalFetch, FetchError> {
            Ok(ConditionalFetch::NotFound)
        }
        async fn fetch_if_modified_since(&self, _tag_url: &str, _since: DateTime<Utc>) -> Result<ConditionalFetch, FetchError> {
            Ok(ConditionalFetch::NotFound)
        }
    }

    struct NullIndexFetcher;

    #[async_trait]
    impl TagIndexFetcher for NullIndexFetcher {
        async fn fetch(&self, _since: Option<DateTime<Utc>>) -> Result<ConditionalFetch, FetchError> {
            Ok(ConditionalFetch::NotFound)
        }
    }

    fn cache_with(
        fetcher: StaticTagFetcher,
    ) -> TaggerCache<NullCatalog, NullExtractor, StaticTagFetcher, NullIndexFetcher> {
        TaggerCache::new(item_cache(), fetcher, NullIndexFetcher)
    }

    #[tokio::test]
    async fn get_tagger_with_no_examples_precomputes_immediately() {
        let cache = cache_with(StaticTagFetcher { body: NO_EXAMPLES_TAG.to_string(), calls: StdMutex::new(0) });
        match cache.get_tagger("http://example.com/tags/empty.atom").await {
            TaggerLookup::Ready(checked_out) => {
                assert_eq!(checked_out.tagger.state(), classifier_core::TaggerState::Precomputed);
                cache.release_tagger(checked_out).await;
            }
            _ => panic!("expected Ready"),
        }
    }

    #[tokio::test]
    async fn second_checkout_while_held_is_rejected() {
        let cache = cache_with(StaticTagFetcher { body: NO_EXAMPLES_TAG.to_string(), calls: StdMutex::new(0) });
        let first = cache.get_tagger("http://example.com/tags/empty.atom").await;
        assert!(matches!(first, TaggerLookup::Ready(_)));
        match cache.get_tagger("http://example.com/tags/empty.atom").await {
            TaggerLookup::CheckedOut => {}
            _ => panic!("expected CheckedOut"),
        }
    }

    #[tokio::test]
    async fn released_tagger_is_refetched_conditionally_next_time() {
        let fetcher = StaticTagFetcher { body: NO_EXAMPLES_TAG.to_string(), calls: StdMutex::new(0) };
        let cache = cache_with(fetcher);
        let first = cache.get_tagger("http://example.com/tags/empty.atom").await;
        let TaggerLookup::Ready(checked_out) = first else { panic!("expected Ready") };
        cache.release_tagger(checked_out).await;

        let second = cache.get_tagger("http://example.com/tags/empty.atom").await;
        assert!(matches!(second, TaggerLookup::Ready(_)));
        assert_eq!(*cache.tag_client.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn not_found_upstream_releases_checkout_and_reports_not_found() {
        let cache = TaggerCache::new(item_cache(), NotFoundTagFetcher, NullIndexFetcher);
        assert!(matches!(cache.get_tagger("http://example.com/tags/missing.atom").await, TaggerLookup::NotFound));
        // Checkout was released, so a second attempt is not CheckedOut.
        assert!(matches!(cache.get_tagger("http://example.com/tags/missing.atom").await, TaggerLookup::NotFound));
    }

    #[tokio::test]
    async fn background_fetch_of_missing_tag_records_failure() {
        let cache = Arc::new(TaggerCache::new(item_cache(), NotFoundTagFetcher, NullIndexFetcher));
        cache.fetch_tagger_in_background("http://example.com/tags/missing.atom".to_string());
        for _ in 0..50 {
            if cache.is_failed("http://example.com/tags/missing.atom").await {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("background fetch never recorded a failure");
    }
}
