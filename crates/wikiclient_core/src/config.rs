use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WikiError};

pub const DEFAULT_API_PATH: &str = "/api.php";
pub const DEFAULT_USER_AGENT: &str = "wikiclient/0.1";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;
pub const DEFAULT_RATE_CAPACITY: u32 = 5;
pub const DEFAULT_RATE_REFILL_PER_SECOND: f64 = 1.0;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// On-disk configuration. Every key is optional; see [`WikiConfig::resolve`].
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct WikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub events: EventsSection,
    #[serde(default)]
    pub cache: CacheSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub host: Option<String>,
    pub api_path: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct HttpSection {
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub rate_capacity: Option<u32>,
    pub rate_refill_per_second: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct EventsSection {
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CacheSection {
    pub size: Option<usize>,
}

/// Fully resolved client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub host: String,
    pub api_path: String,
    /// Sent as `User-Agent` when present.
    pub user_agent: Option<String>,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub rate_capacity: u32,
    pub rate_refill_per_second: f64,
    pub poll_interval_ms: u64,
    pub cache_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_path: DEFAULT_API_PATH.to_string(),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            rate_capacity: DEFAULT_RATE_CAPACITY,
            rate_refill_per_second: DEFAULT_RATE_REFILL_PER_SECOND,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl ClientOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(WikiError::InvalidConfig(
                "wiki host is required (set WIKI_HOST or [wiki].host)".to_string(),
            ));
        }
        Url::parse(&self.host).map_err(|error| WikiError::InvalidUrl {
            url: self.host.clone(),
            reason: error.to_string(),
        })?;
        if self.rate_capacity == 0 {
            return Err(WikiError::InvalidConfig(
                "rate_capacity must be at least 1".to_string(),
            ));
        }
        // A non-positive refill rate would block every caller forever once the
        // bucket drains.
        if !(self.rate_refill_per_second.is_finite() && self.rate_refill_per_second > 0.0) {
            return Err(WikiError::InvalidConfig(format!(
                "rate_refill_per_second must be a positive number, got {}",
                self.rate_refill_per_second
            )));
        }
        if self.cache_size == 0 {
            return Err(WikiError::InvalidConfig(
                "cache size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl WikiConfig {
    /// Resolve settings from the process environment: env > config > default.
    pub fn resolve(&self) -> Result<ClientOptions> {
        self.resolve_with(|key| env::var(key).ok())
    }

    pub fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<ClientOptions> {
        let defaults = ClientOptions::default();
        let host = env_string(&lookup, "WIKI_HOST")
            .or_else(|| self.wiki.host.clone())
            .unwrap_or_default();
        let api_path = env_string(&lookup, "WIKI_API_PATH")
            .or_else(|| self.wiki.api_path.clone())
            .unwrap_or(defaults.api_path);
        let user_agent = env_string(&lookup, "WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .or(defaults.user_agent);

        let options = ClientOptions {
            host,
            api_path,
            user_agent,
            max_retries: env_parsed(&lookup, "WIKI_HTTP_RETRIES")?
                .or(self.http.max_retries)
                .unwrap_or(defaults.max_retries),
            timeout_ms: env_parsed(&lookup, "WIKI_HTTP_TIMEOUT_MS")?
                .or(self.http.timeout_ms)
                .unwrap_or(defaults.timeout_ms),
            retry_delay_ms: env_parsed(&lookup, "WIKI_HTTP_RETRY_DELAY_MS")?
                .or(self.http.retry_delay_ms)
                .unwrap_or(defaults.retry_delay_ms),
            rate_capacity: env_parsed(&lookup, "WIKI_RATE_CAPACITY")?
                .or(self.http.rate_capacity)
                .unwrap_or(defaults.rate_capacity),
            rate_refill_per_second: env_parsed(&lookup, "WIKI_RATE_REFILL_PER_SECOND")?
                .or(self.http.rate_refill_per_second)
                .unwrap_or(defaults.rate_refill_per_second),
            poll_interval_ms: env_parsed(&lookup, "WIKI_POLL_INTERVAL_MS")?
                .or(self.events.poll_interval_ms)
                .unwrap_or(defaults.poll_interval_ms),
            cache_size: env_parsed(&lookup, "WIKI_CACHE_SIZE")?
                .or(self.cache.size)
                .unwrap_or(defaults.cache_size),
        };
        options.validate()?;
        Ok(options)
    }
}

/// Read a TOML config file. A missing file yields an all-default config.
pub fn load_config(config_path: &Path) -> Result<WikiConfig> {
    if !config_path.exists() {
        return Ok(WikiConfig::default());
    }
    let content = fs::read_to_string(config_path).map_err(|source| WikiError::Io {
        context: format!("failed to read {}", config_path.display()),
        source,
    })?;
    toml::from_str(&content).map_err(|error| {
        WikiError::InvalidConfig(format!(
            "failed to parse {}: {error}",
            config_path.display()
        ))
    })
}

fn env_string(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match env_string(lookup, key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| WikiError::InvalidConfig(format!("{key} has an invalid value: {value}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, WikiConfig::default());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
host = "https://community.fandom.com"
api_path = "/w/api.php"
user_agent = "test-agent/1.0"

[http]
max_retries = 1
rate_capacity = 2
rate_refill_per_second = 0.5

[events]
poll_interval_ms = 1000

[cache]
size = 10
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        let options = config.resolve_with(no_env).expect("resolve");
        assert_eq!(options.host, "https://community.fandom.com");
        assert_eq!(options.api_path, "/w/api.php");
        assert_eq!(options.user_agent.as_deref(), Some("test-agent/1.0"));
        assert_eq!(options.max_retries, 1);
        assert_eq!(options.rate_capacity, 2);
        assert_eq!(options.rate_refill_per_second, 0.5);
        assert_eq!(options.poll_interval_ms, 1000);
        assert_eq!(options.cache_size, 10);
        assert_eq!(options.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki\nhost = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn env_overrides_config_values() {
        let config = WikiConfig {
            wiki: WikiSection {
                host: Some("https://a.example".to_string()),
                ..WikiSection::default()
            },
            http: HttpSection {
                max_retries: Some(5),
                ..HttpSection::default()
            },
            ..WikiConfig::default()
        };
        let env = BTreeMap::from([
            ("WIKI_HOST", "https://b.example"),
            ("WIKI_HTTP_RETRIES", "0"),
        ]);
        let options = config
            .resolve_with(|key| env.get(key).map(|value| value.to_string()))
            .expect("resolve");
        assert_eq!(options.host, "https://b.example");
        assert_eq!(options.max_retries, 0);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = WikiConfig {
            wiki: WikiSection {
                host: Some("https://a.example".to_string()),
                ..WikiSection::default()
            },
            ..WikiConfig::default()
        };
        let options = config.resolve_with(no_env).expect("resolve");
        assert_eq!(options.api_path, "/api.php");
        assert_eq!(options.user_agent.as_deref(), Some(DEFAULT_USER_AGENT));
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.rate_capacity, 5);
        assert_eq!(options.rate_refill_per_second, 1.0);
        assert_eq!(options.poll_interval_ms, 5000);
        assert_eq!(options.cache_size, 100);
    }

    #[test]
    fn missing_host_is_rejected() {
        let error = WikiConfig::default()
            .resolve_with(no_env)
            .expect_err("must fail");
        assert!(error.to_string().contains("wiki host is required"));
    }

    #[test]
    fn non_positive_refill_is_rejected() {
        let options = ClientOptions {
            rate_refill_per_second: 0.0,
            ..ClientOptions::new("https://a.example")
        };
        assert!(matches!(
            options.validate(),
            Err(WikiError::InvalidConfig(_))
        ));
    }

    #[test]
    fn malformed_env_number_is_rejected() {
        let config = WikiConfig::default();
        let error = config
            .resolve_with(|key| (key == "WIKI_HTTP_RETRIES").then(|| "many".to_string()))
            .expect_err("must fail");
        assert!(error.to_string().contains("WIKI_HTTP_RETRIES"));
    }
}
