//! Usage tracker facade
//!
//! [`UsageTracker`] ties the pieces together: it opens and closes tracking
//! sessions, prices and records usage, writes state through to storage,
//! notifies the webhook and answers summary queries. All mutation goes
//! through `&mut self`; concurrent callers share a [`SharedTracker`].
//!
//! # Example
//!
//! ```
//! use tokmeter::tracker::UsageTracker;
//! use tokmeter_core::{PartialUsage, Provider, TrackerConfig};
//!
//! # fn main() -> tokmeter_core::Result<()> {
//! let mut tracker = UsageTracker::new(TrackerConfig::default().in_memory())?;
//!
//! let id = tracker.start_tracking(None, None);
//! // ... call the provider ...
//! let record = tracker.end_tracking(
//!     &id,
//!     PartialUsage::new(100, 50)
//!         .with_provider(Provider::Anthropic)
//!         .with_model("claude-3-haiku-20240307"),
//! )?;
//! assert_eq!(record.total_tokens, 150);
//! # Ok(())
//! # }
//! ```

use crate::aggregation::UsageAggregator;
use crate::session::{CostPolicy, SessionManager};
use crate::storage::UsageStorage;
use crate::webhook::WebhookNotifier;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokmeter_core::aggregation_types::{ModelCostComparison, SessionSummary, Totals, UserAggregate};
use tokmeter_core::error::Result;
use tokmeter_core::{
    Currency, PartialUsage, Provider, SessionId, TrackerConfig, TrackingId, UsageRecord, UserId,
};
use tokmeter_pricing::{COMPARISON_MODELS, CostCalculator, ExchangeRate, ExchangeRateProvider};
use tracing::{debug, info, warn};

/// Tracker shared across async tasks
///
/// Never hold the lock across a provider call.
pub type SharedTracker = Arc<Mutex<UsageTracker>>;

pub struct UsageTracker {
    config: TrackerConfig,
    aggregator: UsageAggregator,
    sessions: SessionManager,
    storage: UsageStorage,
    calculator: CostCalculator,
    exchange_rates: Arc<ExchangeRateProvider>,
    exchange_rate: ExchangeRate,
    webhook: Option<WebhookNotifier>,
}

impl UsageTracker {
    /// Build a tracker and load persisted usage
    ///
    /// The exchange rate starts from the cache file (or the default) without
    /// network access; call [`refresh_exchange_rate`] to update it.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;

        let storage = if config.persist {
            UsageStorage::new(&config.data_file)
        } else {
            UsageStorage::in_memory()
        };

        let aggregator = match storage.load() {
            Some(snapshot) => UsageAggregator::from_parts(snapshot.history, snapshot.totals),
            None => UsageAggregator::new(),
        };

        let exchange_rates = Arc::new(ExchangeRateProvider::from_config(&config));
        let exchange_rate = if config.currency == Currency::Usd {
            ExchangeRate::default_rate(chrono::Utc::now())
        } else {
            exchange_rates.current()
        };

        info!(
            "Tracker ready: user {}, currency {}, {} records loaded",
            config.user_id,
            config.currency,
            aggregator.record_count()
        );

        Ok(Self {
            sessions: SessionManager::new(config.session_ttl),
            webhook: config.webhook_url.as_deref().map(WebhookNotifier::new),
            calculator: CostCalculator::new(),
            config,
            aggregator,
            storage,
            exchange_rates,
            exchange_rate,
        })
    }

    /// Wrap in an `Arc<Mutex<_>>` for use across tasks
    pub fn into_shared(self) -> SharedTracker {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &UsageAggregator {
        &self.aggregator
    }

    /// Open a tracking session
    ///
    /// `user_id` defaults to the configured user. `session_id` is only
    /// attached when given.
    pub fn start_tracking(
        &mut self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
    ) -> TrackingId {
        let user_id = user_id.unwrap_or_else(|| self.config.user_id.clone());
        self.sessions.start(user_id, session_id)
    }

    /// Close a tracking session and record its usage
    ///
    /// # Errors
    ///
    /// [`TokmeterError::UnknownSession`](tokmeter_core::TokmeterError::UnknownSession)
    /// when `id` was never issued or has already been ended.
    pub fn end_tracking(&mut self, id: &TrackingId, usage: PartialUsage) -> Result<UsageRecord> {
        let policy = self.cost_policy();
        let record = self.sessions.end(id, usage, &policy)?;
        self.record(record.clone());
        Ok(record)
    }

    /// Record usage that was not bracketed by a tracking session
    pub fn track(
        &mut self,
        user_id: Option<UserId>,
        session_id: Option<SessionId>,
        usage: PartialUsage,
    ) -> Result<UsageRecord> {
        let id = self.start_tracking(user_id, session_id);
        self.end_tracking(&id, usage)
    }

    fn cost_policy(&self) -> CostPolicy {
        CostPolicy {
            calculator: self.calculator,
            currency: self.config.currency,
            usd_rate: self.exchange_rate.rate,
        }
    }

    fn record(&mut self, record: UsageRecord) {
        let user_total = self.aggregator.record(record.clone()).clone();
        self.persist();

        if let Some(webhook) = &self.webhook {
            webhook.notify(&record, Some(&user_total));
        }
    }

    fn persist(&self) {
        if !self
            .storage
            .save(self.aggregator.history_map(), self.aggregator.totals_map())
        {
            warn!("Usage kept in memory only; the next successful save will include it");
        }
    }

    /// Running total for a user (the configured user by default)
    pub fn user_summary(&self, user_id: Option<&UserId>) -> Option<&UserAggregate> {
        self.aggregator
            .user_total(user_id.unwrap_or(&self.config.user_id))
    }

    /// Every user's total plus grand totals
    pub fn all_users_summary(&self) -> (Vec<UserAggregate>, Totals) {
        let users = self.aggregator.all_totals();
        let totals = Totals::from_aggregates(&users);
        (users, totals)
    }

    /// Usage of the configured session against the configured budget
    pub fn session_summary(&self) -> SessionSummary {
        self.session_summary_for(&self.config.user_id, &self.config.session_id)
    }

    pub fn session_summary_for(&self, user_id: &UserId, session_id: &SessionId) -> SessionSummary {
        let usage = self.aggregator.session_usage(user_id, session_id);
        SessionSummary::new(
            user_id.clone(),
            session_id.clone(),
            usage.as_ref(),
            self.config.session_budget_tokens,
            self.config.currency,
        )
    }

    /// The last `limit` records for a user, oldest first
    pub fn usage_history(&self, user_id: Option<&UserId>, limit: Option<usize>) -> &[UsageRecord] {
        self.aggregator
            .history(user_id.unwrap_or(&self.config.user_id), limit)
    }

    /// Rank models by the USD cost of the same request
    ///
    /// An empty `models` list uses the built-in comparison set.
    pub fn compare_models(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        models: &[(Provider, &str)],
    ) -> Vec<ModelCostComparison> {
        let models = if models.is_empty() {
            COMPARISON_MODELS
        } else {
            models
        };
        self.calculator
            .compare_models(input_tokens, output_tokens, models)
    }

    /// Delete a user's history and total, then persist
    pub fn clear_user_data(&mut self, user_id: &UserId) -> bool {
        let cleared = self.aggregator.clear(user_id);
        if cleared {
            info!("Cleared usage data for {}", user_id);
            self.persist();
        }
        cleared
    }

    /// Exchange rate applied to new records
    pub fn exchange_rate(&self) -> &ExchangeRate {
        &self.exchange_rate
    }

    pub fn set_exchange_rate(&mut self, rate: ExchangeRate) {
        debug!("Exchange rate set to {} ({})", rate.rate, rate.source);
        self.exchange_rate = rate;
    }

    pub fn exchange_rate_provider(&self) -> Arc<ExchangeRateProvider> {
        Arc::clone(&self.exchange_rates)
    }

    /// Drop abandoned tracking sessions
    pub fn sweep_expired_sessions(&mut self) -> usize {
        self.sessions.sweep_expired()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }
}

/// Refresh the exchange rate without holding the tracker lock over the fetch
///
/// With `force` the endpoint is queried even when the cache is fresh; a
/// failed forced refresh falls back like an unforced one.
pub async fn refresh_exchange_rate(tracker: &SharedTracker, force: bool) -> ExchangeRate {
    let provider = tracker.lock().await.exchange_rate_provider();

    let rate = if force {
        match provider.refresh().await {
            Ok(rate) => rate,
            Err(e) => {
                warn!("Forced exchange rate refresh failed: {}", e);
                provider.get_rate().await
            }
        }
    } else {
        provider.get_rate().await
    };

    tracker.lock().await.set_exchange_rate(rate.clone());
    rate
}
