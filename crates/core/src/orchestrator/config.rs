//! Importer configuration.

use serde::{Deserialize, Serialize};

/// Limits applied to every import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImporterConfig {
    /// Upper bound for a single index or chapter fetch (seconds).
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// How many times a timed-out fetch is retried before the run fails.
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    /// Pause between retries (milliseconds).
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Wall-clock limit for one run segment (seconds).
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// How long shutdown waits for running imports to reach a checkpoint (seconds).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_fetch_timeout() -> u64 {
    120
}

fn default_fetch_retries() -> u32 {
    2
}

fn default_retry_backoff() -> u64 {
    2000
}

fn default_run_timeout() -> u64 {
    6 * 60 * 60
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            fetch_retries: default_fetch_retries(),
            retry_backoff_ms: default_retry_backoff(),
            run_timeout_secs: default_run_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ImporterConfig::default();
        assert_eq!(config.fetch_timeout_secs, 120);
        assert_eq!(config.fetch_retries, 2);
        assert_eq!(config.retry_backoff_ms, 2000);
        assert_eq!(config.run_timeout_secs, 21600);
        assert_eq!(config.shutdown_grace_secs, 10);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ImporterConfig = toml::from_str("fetch_retries = 5").unwrap();
        assert_eq!(config.fetch_retries, 5);
        assert_eq!(config.fetch_timeout_secs, 120);
    }
}
