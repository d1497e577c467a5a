//! Pool: a union of item token-frequency maps with a running total.

use crate::Item;
use std::collections::HashMap;

/// A merged token-frequency mapping over one or more items.
///
/// Invariant: `pool.total_tokens() == Σ item.total_tokens()` for every
/// item ever added; a token's pool frequency is the sum of that token's
/// frequency across all added items. Pools are additive-only within
/// their lifetime — there is no `remove_item`.
#[derive(Debug, Clone, Default)]
pub struct Pool {
    tokens: HashMap<u32, u64>,
    total: u64,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `item`'s tokens into the pool.
    pub fn add_item(&mut self, item: &Item) {
        for (id, freq) in item.tokens() {
            *self.tokens.entry(id).or_insert(0) += freq as u64;
        }
        self.total += item.total_tokens();
    }

    /// Frequency of `token_id` across every item added, or 0 if absent.
    pub fn token_frequency(&self, token_id: u32) -> u64 {
        self.tokens.get(&token_id).copied().unwrap_or(0)
    }

    pub fn total_tokens(&self) -> u64 {
        self.total
    }

    /// Cardinality of distinct token ids ever merged in.
    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Tokens in ascending token-id order, mirroring the original
    /// cursor-based `next_token` contract via a plain iterator — Rust's
    /// ownership model makes an explicit cursor parameter unnecessary.
    pub fn tokens(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        let mut entries: Vec<_> = self.tokens.iter().map(|(&id, &freq)| (id, freq)).collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries.into_iter()
    }
}
