use super::{types::Config, AuthMethod, ConfigError};

/// Reject configurations the service cannot run with.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
    {
        return invalid("auth.api_key is required when auth.method = \"api_key\"");
    }

    if config.database.path.as_os_str().is_empty() {
        return invalid("database.path cannot be empty");
    }

    if config.fetcher.request_timeout_secs == 0 {
        return invalid("fetcher.request_timeout_secs must be positive");
    }

    let importer = &config.importer;
    if importer.fetch_timeout_secs == 0 || importer.run_timeout_secs == 0 {
        return invalid("importer timeouts must be positive");
    }

    let scheduler = &config.scheduler;
    if scheduler.daily_vote_multiplier < 1 {
        return invalid("scheduler.daily_vote_multiplier must be at least 1");
    }
    if scheduler.voting_winner_interval_secs == 0 {
        return invalid("scheduler.voting_winner_interval_secs must be positive");
    }
    if scheduler.recipients_page_size == 0 {
        return invalid("scheduler.recipients_page_size must be positive");
    }

    Ok(())
}
