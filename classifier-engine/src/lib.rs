//! Classification Engine: job queue, worker pool, and HTTP control
//! surface. Wires together the item cache, the tagger cache, and the
//! HMAC-signed upload client into a long-running service that accepts
//! classification job requests and drives them to completion.

pub mod catalog;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod xml;

pub use catalog::{CatalogDbConfig, PostgresCatalog};
pub use config::{EngineConfig, EngineCredentials};
pub use dictionary::PostgresDictionaryStore;
pub use error::{EngineHttpError, EngineHttpResult};
pub use state::EngineState;
