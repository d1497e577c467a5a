//! Durable catalog contract and in-memory item cache for the
//! classification service.
//!
//! This crate owns the boundary between "a raw entry arrived" and "a
//! tokenized item is available for training and classification": the
//! [`catalog::DurableCatalog`] trait fixes what an external store must
//! support, and [`item_cache::ItemCache`] is the in-memory structure
//! fronting it — a reverse-chronological item sequence, an id map, a
//! random background pool, and the background threads that keep them
//! in sync with the catalog.

pub mod catalog;
pub mod item_cache;
pub mod queue;

pub use catalog::{DurableCatalog, StoredItem};
pub use item_cache::{FeatureExtractor, ItemCache, ItemCacheConfig};
pub use queue::TimedQueue;
