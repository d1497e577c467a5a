//! A tokenized item: an id, an update timestamp, and a token-id to
//! frequency mapping.

use crate::Timestamp;
use std::collections::BTreeMap;

/// A tokenized representation of an entry, suitable for classification.
///
/// Items are effectively immutable after construction: `add_token` is
/// only valid during the build phase, and callers never re-add the same
/// token id (doing so is a caller bug, not a recoverable error — see
/// [`Item::add_token`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    id: String,
    updated: Timestamp,
    tokens: BTreeMap<u32, u32>,
    total: u64,
}

impl Item {
    pub fn new(id: impl Into<String>, updated: Timestamp) -> Self {
        Self {
            id: id.into(),
            updated,
            tokens: BTreeMap::new(),
            total: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn updated(&self) -> Timestamp {
        self.updated
    }

    /// Record `frequency` occurrences of `token_id`. Callers never
    /// re-add the same token id; doing so would silently overwrite the
    /// earlier frequency and desynchronize `total`, so this asserts in
    /// debug builds.
    pub fn add_token(&mut self, token_id: u32, frequency: u32) {
        debug_assert!(
            !self.tokens.contains_key(&token_id),
            "token {token_id} added twice to item {}",
            self.id
        );
        self.tokens.insert(token_id, frequency);
        self.total += frequency as u64;
    }

    /// Frequency of `token_id` within this item, or 0 if absent.
    pub fn token_frequency(&self, token_id: u32) -> u32 {
        self.tokens.get(&token_id).copied().unwrap_or(0)
    }

    /// Sum of all token frequencies. Invariant: total = Σ frequencies.
    pub fn total_tokens(&self) -> u64 {
        self.total
    }

    /// Number of distinct token ids, used by the `min_tokens` cache
    /// invariant and by clue-selection's discriminator cap.
    pub fn num_distinct_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Tokens in ascending token-id order.
    pub fn tokens(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.tokens.iter().map(|(&id, &freq)| (id, freq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn total_equals_sum_of_frequencies() {
        let mut item = Item::new("urn:item:1", Utc::now());
        item.add_token(1, 5);
        item.add_token(2, 3);
        assert_eq!(item.total_tokens(), 8);
    }

    #[test]
    fn token_frequency_absent_is_zero() {
        let item = Item::new("urn:item:1", Utc::now());
        assert_eq!(item.token_frequency(42), 0);
    }

    #[test]
    fn tokens_iterate_in_ascending_id_order() {
        let mut item = Item::new("urn:item:1", Utc::now());
        item.add_token(5, 1);
        item.add_token(1, 1);
        item.add_token(3, 1);
        let ids: Vec<u32> = item.tokens().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn num_distinct_tokens_counts_ids_not_frequency() {
        let mut item = Item::new("urn:item:1", Utc::now());
        item.add_token(1, 100);
        item.add_token(2, 1);
        assert_eq!(item.num_distinct_tokens(), 2);
    }
}
