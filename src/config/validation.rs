use crate::config::types::{
    Config, HistoryConfig, OutputConfig, PoolConfig, ProxyConfig, SchedulerConfig, SpiderEntry,
    UserAgentConfig,
};
use crate::storage::OutputKind;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_history_config(&config.history)?;
    validate_pool_config(&config.pool)?;
    validate_output_config(&config.output)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_proxy_config(&config.proxy)?;
    validate_spiders(&config.spiders)?;
    Ok(())
}

/// Validates global scheduling configuration
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.thread_num < 1 || config.thread_num > 1000 {
        return Err(ConfigError::Validation(format!(
            "thread_num must be between 1 and 1000, got {}",
            config.thread_num
        )));
    }
    Ok(())
}

/// Checks that the selected backend has somewhere to write
fn validate_history_config(config: &HistoryConfig) -> Result<(), ConfigError> {
    let (setting, value) = match config.output {
        OutputKind::File => ("history-dir", &config.history_dir),
        OutputKind::Sqlite => ("database-path", &config.database_path),
        OutputKind::Sled => ("sled-path", &config.sled_path),
    };

    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => {}
        _ => {
            return Err(ConfigError::MissingBackend {
                output: config.output.to_string(),
                setting: setting.to_string(),
            })
        }
    }

    if config.flush_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "flush_interval_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_pool_config(config: &PoolConfig) -> Result<(), ConfigError> {
    if config.max_crawlers < 1 {
        return Err(ConfigError::Validation(format!(
            "max_crawlers must be >= 1, got {}",
            config.max_crawlers
        )));
    }
    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.dir.is_empty() {
        return Err(ConfigError::Validation("output dir cannot be empty".to_string()));
    }

    if config.docker_cap < 1 {
        return Err(ConfigError::Validation(format!(
            "docker_cap must be >= 1, got {}",
            config.docker_cap
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

    Ok(())
}

fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    for proxy in &config.proxies {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }
    Ok(())
}

/// Validates spider entries
fn validate_spiders(spiders: &[SpiderEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for entry in spiders {
        validate_spider_name(&entry.name)?;

        if !seen.insert((entry.name.as_str(), entry.keyin.as_str())) {
            return Err(ConfigError::Validation(format!(
                "Spider '{}' with keyin '{}' is configured twice",
                entry.name, entry.keyin
            )));
        }

        if entry.seeds.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Spider '{}' must have at least one seed URL",
                entry.name
            )));
        }

        for seed in &entry.seeds {
            validate_seed_url(seed)?;
        }
    }

    Ok(())
}

/// Spider names end up in table and file names
fn validate_spider_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "Spider name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "Spider name '{}' must contain only alphanumeric characters, '-' and '_'",
            name
        )));
    }

    Ok(())
}

fn validate_seed_url(seed: &str) -> Result<(), ConfigError> {
    let url = Url::parse(seed)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "Seed URL '{}' must use http or https",
            seed
        )));
    }

    Ok(())
}
