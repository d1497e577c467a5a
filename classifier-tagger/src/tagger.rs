//! The per-tag classifier state machine: `Loaded -> Trained ->
//! Precomputed`, built from a tag training document and advanced by
//! calls from the Tagger Cache.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use classifier_core::{ClueList, Entry, Item, Pool, TaggerError, TaggerState};
use classifier_storage::{DurableCatalog, FeatureExtractor, ItemCache};

use crate::atom::{self, Feed, NEGATIVE_EXAMPLE_REL, RESULT_EDIT_REL};

/// A tag's identity as parsed from its training document, independent
/// of lifecycle state.
#[derive(Debug, Clone)]
pub struct TaggerIdentity {
    pub tag_id: String,
    pub training_url: String,
    pub result_upload_url: String,
    pub category_term: String,
    pub category_scheme: String,
    pub updated: DateTime<Utc>,
    pub last_classified: DateTime<Utc>,
    pub bias: f64,
}

/// The classifier entity itself. Construction and state transitions
/// mirror [`TaggerState`]: `Loaded` holds examples only, `Trained`
/// additionally holds pools, `Precomputed` holds a clue list with the
/// pools released.
pub struct Tagger {
    pub identity: TaggerIdentity,
    pub positive_examples: Vec<String>,
    pub negative_examples: Vec<String>,
    state: TaggerState,
    positive_pool: Option<Pool>,
    negative_pool: Option<Pool>,
    clues: Option<ClueList>,
    missing_items: usize,
    /// Kept for inspection only; never re-parsed after [`Tagger::build`].
    pub source_atom: String,
}

impl Tagger {
    pub fn state(&self) -> TaggerState {
        self.state
    }

    pub fn has_missing_items(&self) -> bool {
        self.missing_items > 0
    }

    pub fn clues(&self) -> Option<&ClueList> {
        self.clues.as_ref()
    }

    /// Parses a tag training document and, for every example id absent
    /// from the item cache, adds a stub [`Entry`] built from the
    /// example's inline atom so it will be tokenized asynchronously.
    pub async fn build<C, F>(
        atom_source: &str,
        fetched_url: &str,
        item_cache: &ItemCache<C, F>,
    ) -> Result<Tagger, TaggerError>
    where
        C: DurableCatalog + 'static,
        F: FeatureExtractor + 'static,
    {
        let feed = atom::parse_feed(atom_source)
            .map_err(|reason| TaggerError::Fetch(classifier_core::FetchError::InvalidResponse {
                url: fetched_url.to_string(),
                reason,
            }))?;

        let identity = identity_from_feed(&feed, fetched_url);
        let (positive_examples, negative_examples) = partition_examples(&feed);

        for entry in &feed.entries {
            if item_cache.fetch(&entry.id).await.map_err(TaggerError::from_storage)?.is_some() {
                continue;
            }
            item_cache
                .add_entry(entry_from_feed_entry(entry))
                .await
                .map_err(TaggerError::from_storage)?;
        }

        Ok(Tagger {
            identity,
            positive_examples,
            negative_examples,
            state: TaggerState::Loaded,
            positive_pool: None,
            negative_pool: None,
            clues: None,
            missing_items: 0,
            source_atom: atom_source.to_string(),
        })
    }

    /// Builds positive/negative pools from whichever examples the item
    /// cache currently has tokenized; missing items are silently
    /// skipped and counted via [`Tagger::has_missing_items`].
    pub async fn train<C, F>(&mut self, item_cache: &ItemCache<C, F>) -> Result<(), TaggerError>
    where
        C: DurableCatalog + 'static,
        F: FeatureExtractor + 'static,
    {
        if !self.state.can_advance_to(TaggerState::Trained) {
            return Err(TaggerError::SequenceError {
                tag: self.identity.tag_id.clone(),
                from: self.state,
                attempted: "train",
            });
        }

        let mut missing = 0usize;
        let positive = train_pool(item_cache, &self.positive_examples, &mut missing).await?;
        let negative = train_pool(item_cache, &self.negative_examples, &mut missing).await?;

        self.positive_pool = Some(positive);
        self.negative_pool = Some(negative);
        self.missing_items = missing;
        self.state = TaggerState::Trained;
        Ok(())
    }

    /// Re-runs pool construction for a tagger stuck in `Trained` with
    /// missing items, without advancing its state — the feature
    /// extractor may have caught up on some of them since the last
    /// attempt. Only legal while [`Tagger::has_missing_items`] is true.
    pub async fn retrain<C, F>(&mut self, item_cache: &ItemCache<C, F>) -> Result<(), TaggerError>
    where
        C: DurableCatalog + 'static,
        F: FeatureExtractor + 'static,
    {
        if self.state != TaggerState::Trained || !self.has_missing_items() {
            return Err(TaggerError::SequenceError {
                tag: self.identity.tag_id.clone(),
                from: self.state,
                attempted: "retrain",
            });
        }
        let mut missing = 0usize;
        let positive = train_pool(item_cache, &self.positive_examples, &mut missing).await?;
        let negative = train_pool(item_cache, &self.negative_examples, &mut missing).await?;
        self.positive_pool = Some(positive);
        self.negative_pool = Some(negative);
        self.missing_items = missing;
        Ok(())
    }

    /// Builds the clue list from the trained pools and the supplied
    /// random background, then releases the pools. Callers (the Tagger
    /// Cache) are responsible for not calling this while
    /// [`Tagger::has_missing_items`] is true.
    pub fn precompute(&mut self, random_background: &Pool) -> Result<(), TaggerError> {
        if !self.state.can_advance_to(TaggerState::Precomputed) {
            return Err(TaggerError::SequenceError {
                tag: self.identity.tag_id.clone(),
                from: self.state,
                attempted: "precompute",
            });
        }
        let positive = self.positive_pool.take().ok_or_else(|| TaggerError::SequenceError {
            tag: self.identity.tag_id.clone(),
            from: self.state,
            attempted: "precompute",
        })?;
        let negative = self.negative_pool.take().ok_or_else(|| TaggerError::SequenceError {
            tag: self.identity.tag_id.clone(),
            from: self.state,
            attempted: "precompute",
        })?;

        self.clues = Some(classifier_pipeline::precompute(
            &positive,
            &negative,
            random_background,
            self.identity.bias,
        ));
        self.state = TaggerState::Precomputed;
        Ok(())
    }

    /// Scores `item` against the precomputed clue list. `0.5` (the
    /// unknown-word prior) if the tagger has not reached `Precomputed`.
    pub fn classify(&self, item: &Item) -> f64 {
        match &self.clues {
            Some(clues) => classifier_pipeline::classify(clues, item),
            None => classifier_pipeline::UNKNOWN_WORD_PROB,
        }
    }

    /// Builds the atom feed body for a batch of taggings, ready to hand
    /// to a result uploader.
    pub fn build_taggings_feed(&self, taggings: &[(String, f64)]) -> String {
        atom::build_taggings_feed(
            &self.identity.tag_id,
            &self.identity.category_term,
            &self.identity.category_scheme,
            Utc::now(),
            taggings,
        )
    }
}

async fn train_pool<C, F>(
    item_cache: &ItemCache<C, F>,
    example_ids: &[String],
    missing: &mut usize,
) -> Result<Pool, TaggerError>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    let mut pool = Pool::new();
    for id in example_ids {
        match item_cache.fetch(id).await.map_err(TaggerError::from_storage)? {
            Some(item) => pool.add_item(&item),
            None => *missing += 1,
        }
    }
    Ok(pool)
}

fn identity_from_feed(feed: &Feed, fetched_url: &str) -> TaggerIdentity {
    let category = feed.category.clone().unwrap_or_default();
    TaggerIdentity {
        tag_id: feed.id.clone(),
        training_url: fetched_url.to_string(),
        result_upload_url: feed.links.iter().find(|l| l.rel == RESULT_EDIT_REL).map(|l| l.href.clone()).unwrap_or_default(),
        category_term: category.term,
        category_scheme: category.scheme,
        updated: feed.updated.unwrap_or_else(Utc::now),
        last_classified: feed.classified.unwrap_or_else(Utc::now),
        bias: feed.bias.unwrap_or(1.0),
    }
}

fn partition_examples(feed: &Feed) -> (Vec<String>, Vec<String>) {
    let mut positive = Vec::new();
    let mut negative = Vec::new();
    for entry in &feed.entries {
        if entry.has_link_rel(NEGATIVE_EXAMPLE_REL) {
            negative.push(entry.id.clone());
        } else if entry.category.is_some() {
            positive.push(entry.id.clone());
        }
    }
    (positive, negative)
}

fn entry_from_feed_entry(feed_entry: &atom::FeedEntry) -> Entry {
    Entry {
        full_id: feed_entry.id.clone(),
        title: feed_entry.title.clone(),
        author: feed_entry.author.clone(),
        alternate_link: feed_entry.link_href("alternate").unwrap_or_default().to_string(),
        self_link: feed_entry.link_href("self").unwrap_or_default().to_string(),
        content: feed_entry.content.clone(),
        updated: feed_entry.updated.unwrap_or_else(Utc::now),
        source_xml: feed_entry.raw_xml.clone(),
    }
}

/// Convenience conversion: storage errors surfaced while walking
/// examples become tagger errors without a dedicated `From` impl,
/// since `TaggerError` only derives `From<FetchError>`.
trait FromStorage {
    fn from_storage(err: classifier_core::StorageError) -> Self;
}

impl FromStorage for TaggerError {
    fn from_storage(err: classifier_core::StorageError) -> Self {
        TaggerError::Fetch(classifier_core::FetchError::InvalidResponse {
            url: String::new(),
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use classifier_core::FetchError;

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
        async fn fetch_item_tokens(
            &self,
            _item_id: &str,
        ) -> Result<Option<classifier_storage::StoredItem>, classifier_core::StorageError> {
            Ok(None)
        }
        async fn load_since(
            &self,
            _since_days: i64,
        ) -> Result<Vec<classifier_storage::StoredItem>, classifier_core::StorageError> {
            Ok(Vec::new())
        }
        async fn random_background_ids(&self) -> Result<Vec<String>, classifier_core::StorageError> {
            Ok(Vec::new())
        }
    }

    struct NullExtractor;

    #[async_trait]
    impl FeatureExtractor for NullExtractor {
        async fn extract(&self, entry: &Entry) -> Result<Item, FetchError> {
            Ok(Item::new(entry.id(), entry.updated))
        }
    }

    const SAMPLE: &str = r##"<?xml version="1.0"?>
    <feed xmlns="http://www.w3.org/2005/Atom" xmlns:classifier="http://peerworks.org/classifier">
      <id>urn:tag:1</id>
      <link rel="http://peerworks.org/classifier/edit" href="http://example.com/tags/1/items.atom"/>
      <category term="sports" scheme="urn:scheme"/>
      <updated>2026-07-01T00:00:00Z</updated>
      <classifier:classified>2026-06-01T00:00:00Z</classifier:classified>
      <entry>
        <id>urn:item:1</id>
        <title>Positive item</title>
        <content>hello world</content>
        <category term="sports" scheme="urn:scheme"/>
      </entry>
      <entry>
        <id>urn:item:2</id>
        <title>Negative item</title>
        <content>goodbye</content>
        <link rel="http://peerworks.org/classifier/negative-example" href="#"/>
      </entry>
    </feed>"##;

    fn cache() -> ItemCache<NullCatalog, NullExtractor> {
        ItemCache::new(
            Arc::new(NullCatalog),
            Arc::new(NullExtractor),
            classifier_storage::ItemCacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn build_partitions_positive_and_negative_examples() {
        let cache = cache();
        let tagger = Tagger::build(SAMPLE, "http://example.com/tags/1.atom", &cache).await.unwrap();
        assert_eq!(tagger.positive_examples, vec!["urn:item:1".to_string()]);
        assert_eq!(tagger.negative_examples, vec!["urn:item:2".to_string()]);
        assert_eq!(tagger.state(), TaggerState::Loaded);
        assert_eq!(tagger.identity.training_url, "http://example.com/tags/1.atom");
        assert_eq!(tagger.identity.result_upload_url, "http://example.com/tags/1/items.atom");
    }

    #[tokio::test]
    async fn train_counts_missing_items() {
        let cache = cache();
        let mut tagger = Tagger::build(SAMPLE, "http://example.com/tags/1.atom", &cache).await.unwrap();
        tagger.train(&cache).await.unwrap();
        assert_eq!(tagger.state(), TaggerState::Trained);
        assert!(tagger.has_missing_items());
    }

    #[tokio::test]
    async fn precompute_before_train_is_sequence_error() {
        let cache = cache();
        let mut tagger = Tagger::build(SAMPLE, "http://example.com/tags/1.atom", &cache).await.unwrap();
        let err = tagger.precompute(&Pool::new()).unwrap_err();
        assert!(matches!(err, TaggerError::SequenceError { .. }));
    }

    #[tokio::test]
    async fn classify_before_precompute_returns_unknown_prior() {
        let cache = cache();
        let tagger = Tagger::build(SAMPLE, "http://example.com/tags/1.atom", &cache).await.unwrap();
        let item = Item::new("urn:item:x", Utc::now());
        assert_eq!(tagger.classify(&item), classifier_pipeline::UNKNOWN_WORD_PROB);
    }
}
