//! USD exchange rate with an on-disk cache
//!
//! Costs are always computed in USD and converted at record time when the
//! tracker is configured for another currency. The USD to KRW rate is fetched
//! from a public endpoint, cached in a small JSON file, and refreshed once the
//! cache is older than the configured expiry. Fetch failures never surface to
//! metering: the last cached rate, or a built-in default, is used instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokmeter_core::config::TrackerConfig;
use tokmeter_core::error::{Result, TokmeterError};
use tokmeter_core::Currency;
use tracing::{debug, info, warn};

/// USD to KRW rate used when nothing has ever been fetched
pub const DEFAULT_USD_KRW_RATE: f64 = 1350.0;

/// `source` value for the built-in default
pub const DEFAULT_SOURCE: &str = "default";

/// Minutes to wait after a failed refresh before querying the endpoint again
const FAILED_REFRESH_BACKOFF_MINUTES: i64 = 15;

/// A cached exchange rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    /// KRW per USD
    pub rate: f64,
    pub last_updated: DateTime<Utc>,
    /// Where the rate came from: the endpoint URL or `default`
    pub source: String,
}

impl ExchangeRate {
    /// The built-in default, stamped with `now`
    pub fn default_rate(now: DateTime<Utc>) -> Self {
        Self {
            rate: DEFAULT_USD_KRW_RATE,
            last_updated: now,
            source: DEFAULT_SOURCE.to_string(),
        }
    }

    /// Whether this rate is older than `expiry` at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, expiry: chrono::Duration) -> bool {
        now - self.last_updated >= expiry
    }

    /// Convert a USD amount into `currency`
    pub fn convert(&self, usd: f64, currency: Currency) -> f64 {
        match currency {
            Currency::Usd => usd,
            Currency::Krw => usd * self.rate,
        }
    }
}

/// Fetches and caches the USD exchange rate
pub struct ExchangeRateProvider {
    /// In-memory copy of the last known rate
    cache: Arc<RwLock<Option<ExchangeRate>>>,
    /// No refresh is attempted before this instant after a failure
    retry_after: Arc<RwLock<Option<DateTime<Utc>>>>,
    cache_file: PathBuf,
    url: String,
    expiry: chrono::Duration,
    client: reqwest::Client,
}

impl ExchangeRateProvider {
    pub fn new(cache_file: impl Into<PathBuf>, url: impl Into<String>, expiry: chrono::Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(None)),
            retry_after: Arc::new(RwLock::new(None)),
            cache_file: cache_file.into(),
            url: url.into(),
            expiry,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(
            config.exchange_rate_file.clone(),
            config.exchange_rate_url.clone(),
            config.exchange_rate_expiry(),
        )
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Best rate available without network access
    ///
    /// Returns the cached file's rate regardless of age, or the default.
    pub fn current(&self) -> ExchangeRate {
        load_cache_file(&self.cache_file).unwrap_or_else(|| ExchangeRate::default_rate(Utc::now()))
    }

    /// Rate to convert with, refreshing first if the cache is stale
    ///
    /// Never fails. A failed refresh falls back to the stale cached rate when
    /// one exists, otherwise to the built-in default. After a failure the
    /// fallback is served from memory for a while before the endpoint is
    /// queried again.
    pub async fn get_rate(&self) -> ExchangeRate {
        let now = Utc::now();

        {
            let cache = self.cache.read().await;
            if let Some(rate) = cache.as_ref() {
                if !rate.is_stale(now, self.expiry) {
                    return rate.clone();
                }
                let retry_after = *self.retry_after.read().await;
                if retry_after.is_some_and(|after| now < after) {
                    debug!("Exchange rate refresh backing off, using {}", rate.rate);
                    return rate.clone();
                }
            }
        }

        let cached = load_cache_file(&self.cache_file);
        if let Some(rate) = &cached
            && !rate.is_stale(now, self.expiry)
        {
            debug!("Using cached exchange rate {} from {}", rate.rate, rate.source);
            *self.cache.write().await = Some(rate.clone());
            return rate.clone();
        }

        match self.refresh().await {
            Ok(rate) => rate,
            Err(e) => {
                let fallback = cached.unwrap_or_else(|| ExchangeRate::default_rate(now));
                warn!(
                    "Failed to refresh exchange rate: {}, using {} ({})",
                    e, fallback.rate, fallback.source
                );
                *self.cache.write().await = Some(fallback.clone());
                *self.retry_after.write().await =
                    Some(now + chrono::Duration::minutes(FAILED_REFRESH_BACKOFF_MINUTES));
                fallback
            }
        }
    }

    /// Fetch a fresh rate and write it to the cache file
    pub async fn refresh(&self) -> Result<ExchangeRate> {
        let rate = self.fetch_rate().await?;
        let exchange_rate = ExchangeRate {
            rate,
            last_updated: Utc::now(),
            source: self.url.clone(),
        };

        if let Err(e) = save_cache_file(&self.cache_file, &exchange_rate) {
            warn!(
                "Failed to write exchange rate cache {}: {}",
                self.cache_file.display(),
                e
            );
        }
        info!("Fetched USD/KRW exchange rate {}", rate);

        *self.cache.write().await = Some(exchange_rate.clone());
        *self.retry_after.write().await = None;
        Ok(exchange_rate)
    }

    async fn fetch_rate(&self) -> Result<f64> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        parse_krw_rate(&body)
    }
}

/// Read `rates.KRW` from a USD-based rates document
fn parse_krw_rate(body: &Value) -> Result<f64> {
    body.get("rates")
        .and_then(|rates| rates.get(Currency::Krw.code()))
        .and_then(Value::as_f64)
        .filter(|rate| rate.is_finite() && *rate > 0.0)
        .ok_or_else(|| TokmeterError::ExchangeRate("response has no positive rates.KRW".into()))
}

fn load_cache_file(path: &Path) -> Option<ExchangeRate> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read exchange rate cache {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(rate) => Some(rate),
        Err(e) => {
            warn!("Ignoring corrupt exchange rate cache {}: {}", path.display(), e);
            None
        }
    }
}

fn save_cache_file(path: &Path, rate: &ExchangeRate) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(rate)?)?;
    Ok(())
}
