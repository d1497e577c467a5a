//! Top-level engine configuration: worker pool size, job-retry
//! timeouts, the signed-upload credentials, and the HTTP bind surface.

use std::net::IpAddr;
use std::time::Duration;

use classifier_core::{env_or, env_secs_or};
use secrecy::SecretString;

/// Credentials used to HMAC-sign result-upload requests. Tag-document
/// and tag-index GETs are unsigned.
#[derive(Clone)]
pub struct EngineCredentials {
    pub access_id: String,
    pub secret_key: SecretString,
}

impl std::fmt::Debug for EngineCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCredentials")
            .field("access_id", &self.access_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl EngineCredentials {
    pub fn from_env() -> Self {
        Self {
            access_id: std::env::var("CLASSIFIER_ACCESS_ID").unwrap_or_default(),
            secret_key: SecretString::from(
                std::env::var("CLASSIFIER_SECRET_KEY").unwrap_or_default(),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of classification worker tasks draining the job queue.
    pub worker_threads: usize,
    /// Taggings below this strength are not uploaded.
    pub positive_threshold: f64,
    /// How long a job may sit `CheckedOut` or pending missing items
    /// before it is turned into an `Error(MissingItemTimeout)` job.
    pub missing_item_timeout: Duration,
    /// Delay before requeuing a `CheckedOut` or pending job.
    pub requeue_delay: Duration,
    /// URL of the tag index feed.
    pub tag_index_url: String,
    /// Base URL of the tokenizer service the feature extractor posts to.
    pub tokenizer_url: String,
    /// HTTP bind port for the control surface.
    pub http_port: u16,
    /// If set, only this source IP may reach the control surface.
    pub allowed_ip: Option<IpAddr>,
    /// Path performance/operational logging is written to (absolutized
    /// at startup by the caller).
    pub performance_log: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            positive_threshold: 0.66,
            missing_item_timeout: Duration::from_secs(3600),
            requeue_delay: Duration::from_secs(5),
            tag_index_url: String::new(),
            tokenizer_url: String::new(),
            http_port: 8888,
            allowed_ip: None,
            performance_log: None,
        }
    }
}

impl EngineConfig {
    /// Recognized environment variables: `CLASSIFIER_WORKER_THREADS`,
    /// `CLASSIFIER_POSITIVE_THRESHOLD`, `CLASSIFIER_MISSING_ITEM_TIMEOUT_SECS`,
    /// `CLASSIFIER_REQUEUE_DELAY_SECS`, `CLASSIFIER_TAG_INDEX_URL`,
    /// `CLASSIFIER_TOKENIZER_URL`, `CLASSIFIER_HTTP_PORT`,
    /// `CLASSIFIER_ALLOWED_IP`, `CLASSIFIER_PERFORMANCE_LOG`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let allowed_ip = std::env::var("CLASSIFIER_ALLOWED_IP")
            .ok()
            .and_then(|s| s.parse().ok());

        Self {
            worker_threads: env_or("CLASSIFIER_WORKER_THREADS", defaults.worker_threads),
            positive_threshold: env_or(
                "CLASSIFIER_POSITIVE_THRESHOLD",
                defaults.positive_threshold,
            ),
            missing_item_timeout: env_secs_or(
                "CLASSIFIER_MISSING_ITEM_TIMEOUT_SECS",
                defaults.missing_item_timeout.as_secs(),
            ),
            requeue_delay: env_secs_or(
                "CLASSIFIER_REQUEUE_DELAY_SECS",
                defaults.requeue_delay.as_secs(),
            ),
            tag_index_url: std::env::var("CLASSIFIER_TAG_INDEX_URL").unwrap_or_default(),
            tokenizer_url: std::env::var("CLASSIFIER_TOKENIZER_URL").unwrap_or_default(),
            http_port: env_or("CLASSIFIER_HTTP_PORT", defaults.http_port),
            allowed_ip,
            performance_log: std::env::var("CLASSIFIER_PERFORMANCE_LOG").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.missing_item_timeout, Duration::from_secs(3600));
        assert!(config.allowed_ip.is_none());
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("CLASSIFIER_WORKER_THREADS");
        let config = EngineConfig::from_env();
        assert_eq!(config.worker_threads, 4);
    }

    #[test]
    fn from_env_parses_allowed_ip() {
        std::env::set_var("CLASSIFIER_ALLOWED_IP", "127.0.0.1");
        let config = EngineConfig::from_env();
        assert_eq!(config.allowed_ip, Some("127.0.0.1".parse().unwrap()));
        std::env::remove_var("CLASSIFIER_ALLOWED_IP");
    }
}
