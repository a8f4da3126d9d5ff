//! Usage webhook
//!
//! When a webhook URL is configured, every recorded usage is POSTed as
//! `{"event": "usage.recorded", "record": ..., "userTotal": ...}`. Delivery
//! is fire-and-forget on the current tokio runtime; failures are logged and
//! dropped.

use serde::Serialize;
use std::time::Duration;
use tokmeter_core::UsageRecord;
use tokmeter_core::aggregation_types::UserAggregate;
use tracing::{debug, warn};

/// Event name sent with every notification
pub const USAGE_RECORDED_EVENT: &str = "usage.recorded";

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of a webhook POST
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: &'static str,
    pub record: UsageRecord,
    pub user_total: Option<UserAggregate>,
}

/// Posts usage events to a configured URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build webhook client ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send the event in the background
    ///
    /// Outside a tokio runtime the event is skipped.
    pub fn notify(&self, record: &UsageRecord, user_total: Option<&UserAggregate>) {
        let payload = WebhookPayload {
            event: USAGE_RECORDED_EVENT,
            record: record.clone(),
            user_total: user_total.cloned(),
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, skipping webhook to {}", self.url);
            return;
        };

        let notifier = self.clone();
        handle.spawn(async move {
            notifier.send(&payload).await;
        });
    }

    /// Send the event and wait for the response; returns whether it was accepted
    pub async fn send(&self, payload: &WebhookPayload) -> bool {
        let result = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => {
                debug!("Delivered {} webhook to {}", payload.event, self.url);
                true
            }
            Err(e) => {
                warn!("Webhook delivery to {} failed: {}", self.url, e);
                false
            }
        }
    }
}
