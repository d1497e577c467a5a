//! HTTP collaborators for the classification service: the tokenizer,
//! tag index and tag training document fetchers, the signed result
//! uploader, and an HTTP-backed feature extractor wiring the tokenizer
//! into the item cache.

pub mod circuit_breaker;
pub mod feature_extractor;
pub mod signing;
pub mod tags;
pub mod tokenizer;
pub mod uploader;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use feature_extractor::HttpFeatureExtractor;
pub use signing::{rfc1123_now, sign, Credentials, SignableRequest};
pub use tags::{ConditionalFetch, TagDocumentClient, TagIndexClient};
pub use tokenizer::{RawFeature, TokenizerClient};
pub use uploader::{ResultUploader, UploadMode};
