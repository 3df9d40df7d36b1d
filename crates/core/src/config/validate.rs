use super::{types::Config, ConfigError};

/// Validate configuration values serde cannot reject on its own.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.scheduler.max_concurrency == 0 {
        return invalid("scheduler.max_concurrency must be at least 1");
    }
    if config.scheduler.timeout_secs == 0 {
        return invalid("scheduler.timeout_secs cannot be 0");
    }
    if config.retry.max_attempts == 0 {
        return invalid("retry.max_attempts must be at least 1");
    }
    if !config.retry.backoff_multiplier.is_finite() || config.retry.backoff_multiplier < 1.0 {
        return invalid("retry.backoff_multiplier must be >= 1.0");
    }
    if !(1..=4).contains(&config.chain.max_hops) {
        return invalid("chain.max_hops must be between 1 and 4");
    }
    if config.chain.hubs.iter().any(|h| h.as_str().is_empty()) {
        return invalid("chain.hubs cannot contain empty format names");
    }
    if config.cache.ttl_secs == 0 {
        return invalid("cache.ttl_secs cannot be 0");
    }
    if config.lock.lease_secs < 3 {
        return invalid("lock.lease_secs must be at least 3");
    }
    if config.limits.max_input_bytes == 0 {
        return invalid("limits.max_input_bytes cannot be 0");
    }
    for spec in &config.adapters.extra {
        if spec.name.trim().is_empty() {
            return invalid("adapters.extra entries need a name");
        }
        if spec.pairs.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "adapter '{}' declares no conversion pairs",
                spec.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = Config::default();
        config.scheduler.max_concurrency = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_retry_bounds() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_hop_range() {
        let mut config = Config::default();
        config.chain.max_hops = 5;
        assert!(validate_config(&config).is_err());
        config.chain.max_hops = 4;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_short_lease_fails() {
        let mut config = Config::default();
        config.lock.lease_secs = 1;
        assert!(validate_config(&config).is_err());
    }
}
