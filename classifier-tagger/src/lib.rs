//! Per-tag classifier state machine and the checkout-style coordinator
//! that fetches, trains, precomputes, and hands taggers out to the
//! classification engine's workers.

pub mod atom;
pub mod cache;
pub mod tagger;

pub use cache::{CheckedOutTagger, TagDocumentFetcher, TagIndexFetcher, TaggerCache, TaggerLookup};
pub use tagger::{Tagger, TaggerIdentity};
