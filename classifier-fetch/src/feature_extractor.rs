//! HTTP-backed implementation of [`classifier_storage::FeatureExtractor`]:
//! tokenizes an entry's atom XML via [`TokenizerClient`] and atomizes
//! the resulting tokens through a shared [`TokenDictionary`].

use async_trait::async_trait;

use classifier_core::{DictionaryStore, Entry, FetchError, Item, TokenDictionary};
use classifier_storage::FeatureExtractor;

use crate::tokenizer::TokenizerClient;

pub struct HttpFeatureExtractor<S: DictionaryStore> {
    tokenizer: TokenizerClient,
    dictionary: TokenDictionary<S>,
}

impl<S: DictionaryStore> HttpFeatureExtractor<S> {
    pub fn new(tokenizer: TokenizerClient, dictionary: TokenDictionary<S>) -> Self {
        Self { tokenizer, dictionary }
    }
}

#[async_trait]
impl<S: DictionaryStore> FeatureExtractor for HttpFeatureExtractor<S> {
    async fn extract(&self, entry: &Entry) -> Result<Item, FetchError> {
        let features = self.tokenizer.tokenize(&entry.source_xml).await?;

        let mut item = Item::new(entry.id().to_string(), entry.updated);
        for feature in features {
            let id = self.dictionary.atomize(&feature.token).map_err(|e| FetchError::InvalidResponse {
                url: entry.id().to_string(),
                reason: e.to_string(),
            })?;
            item.add_token(id, feature.frequency);
        }

        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryStore {
        by_token: Mutex<HashMap<String, u32>>,
        by_id: Mutex<HashMap<u32, String>>,
        next: Mutex<u32>,
    }

    impl DictionaryStore for InMemoryStore {
        fn lookup_id(&self, token: &str) -> Result<Option<u32>, classifier_core::StorageError> {
            Ok(self.by_token.lock().unwrap().get(token).copied())
        }
        fn lookup_token(&self, id: u32) -> Result<Option<String>, classifier_core::StorageError> {
            Ok(self.by_id.lock().unwrap().get(&id).cloned())
        }
        fn insert(&self, token: &str, id: u32) -> Result<(), classifier_core::StorageError> {
            self.by_token.lock().unwrap().insert(token.to_string(), id);
            self.by_id.lock().unwrap().insert(id, token.to_string());
            Ok(())
        }
        fn next_id(&self) -> Result<u32, classifier_core::StorageError> {
            let mut next = self.next.lock().unwrap();
            let id = *next;
            *next += 1;
            Ok(id)
        }
    }

    #[test]
    fn dictionary_reuses_ids_across_extractions() {
        let dict = TokenDictionary::new(InMemoryStore::default());
        let a = dict.atomize("hello").unwrap();
        let b = dict.atomize("hello").unwrap();
        assert_eq!(a, b);
    }
}
