//! Tracker configuration
//!
//! Settings are resolved in three layers: built-in defaults, `TOKMETER_*`
//! environment variables, then explicit overrides (CLI flags or the `with_*`
//! builder methods).

use crate::error::{Result, TokmeterError};
use crate::types::{Currency, SessionId, UserId};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Default token budget used by session summaries
pub const DEFAULT_SESSION_BUDGET_TOKENS: u64 = 200_000;

/// Default age after which the cached exchange rate is refreshed
pub const DEFAULT_EXCHANGE_RATE_EXPIRY_HOURS: u64 = 24;

/// Default endpoint for USD-based exchange rates
pub const DEFAULT_EXCHANGE_RATE_URL: &str = "https://open.er-api.com/v6/latest/USD";

const DATA_DIR_NAME: &str = ".tokmeter";
const DATA_FILE_NAME: &str = "usage-data.json";
const EXCHANGE_RATE_FILE_NAME: &str = "exchange-rate.json";

/// Configuration shared by the tracker, the MCP server and the CLI
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// User that usage is attributed to when a call does not name one
    pub user_id: UserId,
    /// Session used for the current-session summary
    pub session_id: SessionId,
    /// Currency recorded costs are converted into
    pub currency: Currency,
    /// Whether usage is written through to `data_file`
    pub persist: bool,
    /// Location of the usage snapshot
    pub data_file: PathBuf,
    /// Location of the cached exchange rate
    pub exchange_rate_file: PathBuf,
    /// Endpoint returning USD-based rates
    pub exchange_rate_url: String,
    /// Cached rates older than this are refreshed
    pub exchange_rate_expiry_hours: u64,
    /// Optional endpoint notified after every recorded usage
    pub webhook_url: Option<String>,
    /// Token budget for session summaries
    pub session_budget_tokens: u64,
    /// Tracking sessions older than this are swept; `None` keeps them forever
    pub session_ttl: Option<Duration>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            user_id: UserId::default(),
            session_id: SessionId::generate(),
            currency: Currency::Usd,
            persist: true,
            data_file: data_dir.join(DATA_FILE_NAME),
            exchange_rate_file: data_dir.join(EXCHANGE_RATE_FILE_NAME),
            exchange_rate_url: DEFAULT_EXCHANGE_RATE_URL.to_string(),
            exchange_rate_expiry_hours: DEFAULT_EXCHANGE_RATE_EXPIRY_HOURS,
            webhook_url: None,
            session_budget_tokens: DEFAULT_SESSION_BUDGET_TOKENS,
            session_ttl: None,
        }
    }
}

impl TrackerConfig {
    /// Build a configuration from defaults overlaid with `TOKMETER_*` variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(user) = env_var("TOKMETER_USER_ID") {
            config.user_id = UserId::new(user);
        }
        if let Some(session) = env_var("TOKMETER_SESSION_ID") {
            config.session_id = SessionId::new(session);
        }
        if let Some(currency) = env_var("TOKMETER_CURRENCY") {
            config.currency = Currency::from_str(&currency).map_err(TokmeterError::Config)?;
        }
        if let Some(path) = env_var("TOKMETER_DATA_FILE") {
            config.data_file = PathBuf::from(path);
        }
        if let Some(path) = env_var("TOKMETER_EXCHANGE_RATE_FILE") {
            config.exchange_rate_file = PathBuf::from(path);
        }
        if let Some(url) = env_var("TOKMETER_EXCHANGE_RATE_URL") {
            config.exchange_rate_url = url;
        }
        if let Some(hours) = env_var("TOKMETER_EXCHANGE_RATE_EXPIRY_HOURS") {
            config.exchange_rate_expiry_hours = parse_number("TOKMETER_EXCHANGE_RATE_EXPIRY_HOURS", &hours)?;
        }
        if let Some(url) = env_var("TOKMETER_WEBHOOK_URL") {
            config.webhook_url = Some(url);
        }
        if let Some(budget) = env_var("TOKMETER_SESSION_BUDGET") {
            config.session_budget_tokens = parse_number("TOKMETER_SESSION_BUDGET", &budget)?;
        }
        if let Some(ttl) = env_var("TOKMETER_SESSION_TTL_SECS") {
            let secs = parse_number("TOKMETER_SESSION_TTL_SECS", &ttl)?;
            config.session_ttl = Some(Duration::from_secs(secs));
        }
        if let Some(flag) = env_var("TOKMETER_NO_PERSIST") {
            config.persist = !matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        debug!("Resolved tracker configuration: {:?}", config);
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.user_id.as_str().trim().is_empty() {
            return Err(TokmeterError::Config("user id must not be empty".into()));
        }
        if self.exchange_rate_expiry_hours == 0 {
            return Err(TokmeterError::Config(
                "exchange rate expiry must be at least one hour".into(),
            ));
        }
        if let Some(url) = &self.webhook_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(TokmeterError::Config(format!(
                "webhook url must be http(s): {url}"
            )));
        }
        Ok(())
    }

    /// Exchange-rate cache expiry as a duration
    pub fn exchange_rate_expiry(&self) -> chrono::Duration {
        chrono::Duration::hours(self.exchange_rate_expiry_hours as i64)
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = UserId::new(user_id);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = SessionId::new(session_id);
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    /// Store usage in `path`, enabling persistence
    pub fn with_data_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_file = path.into();
        self.persist = true;
        self
    }

    pub fn with_exchange_rate_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.exchange_rate_file = path.into();
        self
    }

    pub fn with_exchange_rate_url(mut self, url: impl Into<String>) -> Self {
        self.exchange_rate_url = url.into();
        self
    }

    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn with_session_budget(mut self, tokens: u64) -> Self {
        self.session_budget_tokens = tokens;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = Some(ttl);
        self
    }

    /// Keep all usage in memory only
    pub fn in_memory(mut self) -> Self {
        self.persist = false;
        self
    }
}

/// Directory holding the usage snapshot and the exchange-rate cache
///
/// `~/.tokmeter`, or `./.tokmeter` when no home directory can be determined.
pub fn default_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(DATA_DIR_NAME),
        None => {
            debug!("Could not determine home directory, using working directory");
            PathBuf::from(DATA_DIR_NAME)
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| TokmeterError::Config(format!("{key} must be a non-negative integer, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TokmeterEnv;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.user_id.as_str(), "default");
        assert_eq!(config.currency, Currency::Usd);
        assert!(config.persist);
        assert!(config.data_file.ends_with(".tokmeter/usage-data.json"));
        assert_eq!(config.exchange_rate_expiry_hours, 24);
        assert_eq!(config.session_budget_tokens, DEFAULT_SESSION_BUDGET_TOKENS);
        assert!(config.session_ttl.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_overrides() {
        let mut guard = TokmeterEnv::clean();
        guard.set("TOKMETER_USER_ID", "alice");
        guard.set("TOKMETER_CURRENCY", "krw");
        guard.set("TOKMETER_SESSION_BUDGET", "5000");
        guard.set("TOKMETER_SESSION_TTL_SECS", "600");
        guard.set("TOKMETER_NO_PERSIST", "true");
        guard.set("TOKMETER_DATA_FILE", "/tmp/tokmeter-test/usage.json");

        let config = TrackerConfig::from_env().unwrap();
        assert_eq!(config.user_id.as_str(), "alice");
        assert_eq!(config.currency, Currency::Krw);
        assert_eq!(config.session_budget_tokens, 5000);
        assert_eq!(config.session_ttl, Some(Duration::from_secs(600)));
        assert!(!config.persist);
        assert_eq!(config.data_file, PathBuf::from("/tmp/tokmeter-test/usage.json"));
    }

    #[test]
    fn test_from_env_without_variables_matches_defaults() {
        let _guard = TokmeterEnv::clean();
        let config = TrackerConfig::from_env().unwrap();
        let defaults = TrackerConfig::default();
        assert_eq!(config.user_id, defaults.user_id);
        assert_eq!(config.currency, defaults.currency);
        assert_eq!(config.persist, defaults.persist);
        assert_eq!(config.data_file, defaults.data_file);
        assert_eq!(config.webhook_url, None);
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        let mut guard = TokmeterEnv::clean();
        guard.set("TOKMETER_CURRENCY", "EUR");
        assert!(matches!(
            TrackerConfig::from_env(),
            Err(TokmeterError::Config(_))
        ));

        guard.set("TOKMETER_CURRENCY", "USD");
        guard.set("TOKMETER_SESSION_BUDGET", "lots");
        assert!(TrackerConfig::from_env().is_err());
    }

    #[test]
    fn test_validate_webhook_scheme() {
        let config = TrackerConfig::default().with_webhook_url("ftp://example.com/hook");
        assert!(config.validate().is_err());

        let config = TrackerConfig::default().with_webhook_url("https://example.com/hook");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = TrackerConfig::default()
            .in_memory()
            .with_user_id("bob")
            .with_session_id("s-1")
            .with_currency(Currency::Krw)
            .with_session_budget(10);
        assert!(!config.persist);
        assert_eq!(config.user_id.as_str(), "bob");
        assert_eq!(config.session_id.as_str(), "s-1");
        assert_eq!(config.session_budget_tokens, 10);

        let config = config.with_data_file("/tmp/x.json");
        assert!(config.persist);
    }
}
