//! Shared configuration helpers.
//!
//! Every crate that reads its own settings from the environment
//! (`classifier-storage::ItemCacheConfig`, `classifier-tagger::TaggerCacheConfig`,
//! `classifier-engine::EngineConfig`, ...) follows the same
//! `env::var(...).ok().and_then(|s| s.parse().ok()).unwrap_or(default)`
//! idiom; this module centralizes that one line so it isn't repeated
//! verbatim in every `from_env` constructor.

use std::str::FromStr;

/// Parse an environment variable, falling back to `default` if it is
/// unset or fails to parse as `T`.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Parse an environment variable into a `Duration` expressed in whole
/// seconds, falling back to `default_secs` if unset or invalid.
pub fn env_secs_or(key: &str, default_secs: u64) -> std::time::Duration {
    std::time::Duration::from_secs(env_or(key, default_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_when_unset() {
        std::env::remove_var("CLASSIFIER_TEST_ENV_OR_MISSING");
        assert_eq!(env_or("CLASSIFIER_TEST_ENV_OR_MISSING", 42u32), 42);
    }

    #[test]
    fn env_or_parses_when_set() {
        std::env::set_var("CLASSIFIER_TEST_ENV_OR_PRESENT", "7");
        assert_eq!(env_or("CLASSIFIER_TEST_ENV_OR_PRESENT", 42u32), 7);
        std::env::remove_var("CLASSIFIER_TEST_ENV_OR_PRESENT");
    }

    #[test]
    fn env_or_falls_back_on_parse_failure() {
        std::env::set_var("CLASSIFIER_TEST_ENV_OR_BAD", "not-a-number");
        assert_eq!(env_or("CLASSIFIER_TEST_ENV_OR_BAD", 9u32), 9);
        std::env::remove_var("CLASSIFIER_TEST_ENV_OR_BAD");
    }
}
