//! Token dictionary: bidirectional atomization between token strings and ids.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// A single token occurrence: its dictionary id and a frequency count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub id: u32,
    pub frequency: u32,
}

/// Backing store for the token dictionary. Implementations persist the
/// string/id bijection; ids are never reused or renumbered.
pub trait DictionaryStore: Send + Sync {
    /// Look up an existing id for `token`, if one has been persisted.
    fn lookup_id(&self, token: &str) -> Result<Option<u32>, crate::StorageError>;

    /// Look up the string for an existing `id`.
    fn lookup_token(&self, id: u32) -> Result<Option<String>, crate::StorageError>;

    /// Persist a brand-new (token, id) pair. Called only after a
    /// `lookup_id` miss, so implementations may assume `token` is absent.
    fn insert(&self, token: &str, id: u32) -> Result<(), crate::StorageError>;

    /// The next id to allocate (monotonically increasing across restarts).
    fn next_id(&self) -> Result<u32, crate::StorageError>;
}

/// In-process read-through cache in front of a [`DictionaryStore`].
///
/// Hot tokens are served from the in-memory bimap without a store round
/// trip; the store remains the single source of truth, so two processes
/// sharing a store still observe a consistent id space.
pub struct TokenDictionary<S: DictionaryStore> {
    store: S,
    by_token: RwLock<HashMap<String, u32>>,
    by_id: RwLock<HashMap<u32, String>>,
    /// Serializes the lookup-miss -> next_id -> insert path for brand-new
    /// tokens, so two callers racing on the same unseen token can't both
    /// mint and persist an id for it.
    allocation_lock: Mutex<()>,
}

impl<S: DictionaryStore> TokenDictionary<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            by_token: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            allocation_lock: Mutex::new(()),
        }
    }

    /// Return the existing id for `token`, allocating and persisting a
    /// new one if absent. Thread-safe under concurrent callers: reads
    /// never block each other, and the new-token allocation path is
    /// serialized by `allocation_lock` so two callers racing on the
    /// same unseen token can't both call `next_id`/`insert` for it.
    pub fn atomize(&self, token: &str) -> Result<u32, crate::StorageError> {
        if let Some(id) = self.by_token.read().expect("lock poisoned").get(token) {
            return Ok(*id);
        }

        let _allocation = self.allocation_lock.lock().expect("lock poisoned");
        // Re-check: another caller may have resolved this token while we
        // were waiting for the allocation lock.
        if let Some(id) = self.by_token.read().expect("lock poisoned").get(token) {
            return Ok(*id);
        }
        if let Some(id) = self.store.lookup_id(token)? {
            self.cache(token, id);
            return Ok(id);
        }
        let id = self.store.next_id()?;
        self.store.insert(token, id)?;
        self.cache(token, id);
        Ok(id)
    }

    /// Return the original string for `id`, or `None` if no such id
    /// exists.
    pub fn globalize(&self, id: u32) -> Result<Option<String>, crate::StorageError> {
        if let Some(token) = self.by_id.read().expect("lock poisoned").get(&id) {
            return Ok(Some(token.clone()));
        }
        match self.store.lookup_token(id)? {
            Some(token) => {
                self.cache(&token, id);
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    fn cache(&self, token: &str, id: u32) {
        self.by_token
            .write()
            .expect("lock poisoned")
            .insert(token.to_string(), id);
        self.by_id
            .write()
            .expect("lock poisoned")
            .insert(id, token.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryStore {
        by_token: Mutex<HashMap<String, u32>>,
        by_id: Mutex<HashMap<u32, String>>,
        next: Mutex<u32>,
    }

    impl DictionaryStore for InMemoryStore {
        fn lookup_id(&self, token: &str) -> Result<Option<u32>, crate::StorageError> {
            Ok(self.by_token.lock().unwrap().get(token).copied())
        }
        fn lookup_token(&self, id: u32) -> Result<Option<String>, crate::StorageError> {
            Ok(self.by_id.lock().unwrap().get(&id).cloned())
        }
        fn insert(&self, token: &str, id: u32) -> Result<(), crate::StorageError> {
            self.by_token
                .lock()
                .unwrap()
                .insert(token.to_string(), id);
            self.by_id.lock().unwrap().insert(id, token.to_string());
            Ok(())
        }
        fn next_id(&self) -> Result<u32, crate::StorageError> {
            let mut next = self.next.lock().unwrap();
            let id = *next;
            *next += 1;
            Ok(id)
        }
    }

    #[test]
    fn atomize_is_idempotent() {
        let dict = TokenDictionary::new(InMemoryStore::default());
        let a = dict.atomize("hello").unwrap();
        let b = dict.atomize("hello").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn globalize_roundtrips_every_atomized_string() {
        let dict = TokenDictionary::new(InMemoryStore::default());
        for s in ["alpha", "beta", "gamma"] {
            let id = dict.atomize(s).unwrap();
            assert_eq!(dict.globalize(id).unwrap().as_deref(), Some(s));
        }
    }

    #[test]
    fn globalize_of_unknown_id_is_absent() {
        let dict = TokenDictionary::new(InMemoryStore::default());
        assert_eq!(dict.globalize(9999).unwrap(), None);
    }

    #[test]
    fn ids_are_never_reused() {
        let dict = TokenDictionary::new(InMemoryStore::default());
        let a = dict.atomize("x").unwrap();
        let b = dict.atomize("y").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn concurrent_atomize_of_a_brand_new_token_converges_on_one_id() {
        use std::sync::Arc;
        use std::thread;

        let dict = Arc::new(TokenDictionary::new(InMemoryStore::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dict = dict.clone();
                thread::spawn(move || dict.atomize("shared").unwrap())
            })
            .collect();

        let ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let first = ids[0];
        assert!(ids.iter().all(|&id| id == first));
    }
}
