use crate::config::types::{
    Config, EngineConfig, PersistenceConfig, PolitenessConfig, RetryConfig, SeedConfig,
    UserAgentConfig,
};
use crate::url::parse_crawl_url;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_politeness_config(&config.politeness)?;
    validate_retry_config(&config.retry)?;
    validate_persistence_config(&config.persistence)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_seeds(&config.seeds, config.crawl.https_only)?;
    Ok(())
}

/// Validates engine configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.pool_size < 1 || config.pool_size > 256 {
        return Err(ConfigError::Validation(format!(
            "pool_size must be between 1 and 256, got {}",
            config.pool_size
        )));
    }

    if config.max_in_flight < 1 {
        return Err(ConfigError::Validation(format!(
            "max_in_flight must be >= 1, got {}",
            config.max_in_flight
        )));
    }

    if config.max_idle_wait_ms < 1 {
        return Err(ConfigError::Validation(
            "max_idle_wait_ms must be >= 1ms".to_string(),
        ));
    }

    Ok(())
}

/// Validates politeness configuration
fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    if config.default_max_concurrent == Some(0) {
        return Err(ConfigError::Validation(
            "default_max_concurrent must be >= 1 when set".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for lane in &config.lanes {
        if lane.name.is_empty() {
            return Err(ConfigError::Validation(
                "politeness lane name cannot be empty".to_string(),
            ));
        }

        if !seen.insert(lane.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "politeness lane '{}' is configured twice",
                lane.name
            )));
        }

        if lane.max_concurrent == Some(0) {
            return Err(ConfigError::Validation(format!(
                "max_concurrent for lane '{}' must be >= 1 when set",
                lane.name
            )));
        }
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base_delay_ms ({}) cannot exceed max_delay_ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    Ok(())
}

/// Validates persistence configuration
fn validate_persistence_config(config: &PersistenceConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.checkpoint_every < 1 {
        return Err(ConfigError::Validation(format!(
            "checkpoint_every must be >= 1, got {}",
            config.checkpoint_every
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates seed entries
fn validate_seeds(seeds: &[SeedConfig], https_only: bool) -> Result<(), ConfigError> {
    if seeds.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[seed]] entry is required".to_string(),
        ));
    }

    for seed in seeds {
        let url = parse_crawl_url(&seed.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed.url, e)))?;

        if https_only && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use HTTPS scheme",
                seed.url
            )));
        }

        if seed.hint.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' has an empty hint",
                seed.url
            )));
        }
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
