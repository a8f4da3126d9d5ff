//! Tracked provider calls
//!
//! A [`TrackedClient`] wraps calls to one provider's API: it opens a tracking
//! session, forwards the request to a caller-supplied function that performs
//! the real HTTP or SDK call, reads usage out of the response with the
//! provider's adapter and records it. The response, or the upstream error,
//! is handed back unchanged.
//!
//! Failed calls are recorded too, with whatever usage was observed and
//! `error: true` in the metadata, before the original error is returned.
//!
//! A stream returned by [`TrackedClient::call_stream`] records its usage when
//! the upstream stream ends or fails. A stream dropped before that leaves its
//! tracking session open until the session TTL sweeps it.

use crate::tracker::SharedTracker;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use std::fmt::Display;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokmeter_core::error::TokmeterError;
use tokmeter_core::provider::ProviderAdapter;
use tokmeter_core::{Metadata, PartialUsage, Provider, SessionId, TokenUsage, TrackingId, UserId};
use tokmeter_provider_anthropic::AnthropicAdapter;
use tokmeter_provider_gemini::GeminiAdapter;
use tokmeter_provider_openai::OpenAiAdapter;
use tracing::{debug, warn};

/// Kind of client being wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    OpenAi,
    Anthropic,
    Gemini,
}

impl ClientKind {
    pub fn provider(&self) -> Provider {
        match self {
            Self::OpenAi => Provider::OpenAi,
            Self::Anthropic => Provider::Anthropic,
            Self::Gemini => Provider::Gemini,
        }
    }

    /// Usage adapter for this kind of client
    pub fn adapter(&self) -> Arc<dyn ProviderAdapter> {
        match self {
            Self::OpenAi => Arc::new(OpenAiAdapter::new()),
            Self::Anthropic => Arc::new(AnthropicAdapter::new()),
            Self::Gemini => Arc::new(GeminiAdapter::new()),
        }
    }
}

impl From<Provider> for ClientKind {
    fn from(provider: Provider) -> Self {
        match provider {
            Provider::OpenAi => Self::OpenAi,
            Provider::Anthropic => Self::Anthropic,
            Provider::Gemini => Self::Gemini,
        }
    }
}

impl FromStr for ClientKind {
    type Err = TokmeterError;

    /// Accepts provider names and the usual SDK client class names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "azureopenai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" | "google" | "googlegenerativeai" | "generativemodel" => Ok(Self::Gemini),
            _ => Err(TokmeterError::UnsupportedClient(s.to_string())),
        }
    }
}

/// Meters calls made through one provider client
#[derive(Clone)]
pub struct TrackedClient {
    kind: ClientKind,
    adapter: Arc<dyn ProviderAdapter>,
    tracker: SharedTracker,
    user_id: Option<UserId>,
    session_id: Option<SessionId>,
}

/// What a finished call observed
struct Outcome {
    model: Option<String>,
    usage: TokenUsage,
    streaming: bool,
    estimated: bool,
    error: Option<String>,
}

impl TrackedClient {
    pub fn new(kind: ClientKind, tracker: SharedTracker) -> Self {
        Self {
            kind,
            adapter: kind.adapter(),
            tracker,
            user_id: None,
            session_id: None,
        }
    }

    /// Wrap a client identified by name
    ///
    /// # Errors
    ///
    /// [`TokmeterError::UnsupportedClient`] for names that are not OpenAI,
    /// Anthropic or Gemini clients.
    pub fn for_client(name: &str, tracker: SharedTracker) -> Result<Self, TokmeterError> {
        Ok(Self::new(name.parse()?, tracker))
    }

    /// Attribute usage to a specific user instead of the configured one
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(UserId::new(user_id));
        self
    }

    /// Tag records with a caller session
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(SessionId::new(session_id));
        self
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    async fn start(&self) -> TrackingId {
        self.tracker
            .lock()
            .await
            .start_tracking(self.user_id.clone(), self.session_id.clone())
    }

    async fn finish(&self, id: &TrackingId, outcome: Outcome) {
        let mut metadata = Metadata::new();
        metadata.insert("client".into(), json!(self.kind.provider()));
        metadata.insert("streaming".into(), json!(outcome.streaming));
        if outcome.estimated {
            metadata.insert("estimated".into(), json!(true));
        }
        if let Some(message) = outcome.error {
            metadata.insert("error".into(), json!(true));
            metadata.insert("error_message".into(), json!(message));
        }

        let mut usage = PartialUsage::from_usage(outcome.usage).with_provider(self.kind.provider());
        usage.metadata = metadata;
        if let Some(model) = outcome.model {
            usage = usage.with_model(model);
        }

        if let Err(e) = self.tracker.lock().await.end_tracking(id, usage) {
            warn!("Failed to record tracked call {}: {}", id, e);
        }
    }

    /// Perform a non-streaming call
    ///
    /// `send` receives the request and performs the actual API call.
    pub async fn call<F, Fut, E>(&self, request: Value, send: F) -> Result<Value, E>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        let model = self.adapter.extract_model(&request);
        let prompt_estimate = self.adapter.approximate_prompt_tokens(&request);
        let id = self.start().await;

        match send(request).await {
            Ok(response) => {
                let model = model.or_else(|| self.adapter.extract_model(&response));
                let (usage, estimated) = match self.adapter.extract_usage(&response) {
                    Some(usage) => (usage, false),
                    None => {
                        debug!("No usage in {} response, estimating", self.kind.provider());
                        (TokenUsage::new(prompt_estimate, 0), true)
                    }
                };
                self.finish(
                    &id,
                    Outcome {
                        model,
                        usage,
                        streaming: false,
                        estimated,
                        error: None,
                    },
                )
                .await;
                Ok(response)
            }
            Err(e) => {
                self.finish(
                    &id,
                    Outcome {
                        model,
                        usage: TokenUsage::default(),
                        streaming: false,
                        estimated: false,
                        error: Some(e.to_string()),
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    /// Perform a streaming call
    ///
    /// `open` receives the request and returns the provider's chunk stream.
    /// Chunks are passed through unchanged while usage is accumulated.
    pub fn call_stream<F, Fut, S, E>(
        &self,
        request: Value,
        open: F,
    ) -> impl Stream<Item = Result<Value, E>>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<S, E>>,
        S: Stream<Item = Result<Value, E>>,
        E: Display,
    {
        async_stream::stream! {
            let model = self.adapter.extract_model(&request);
            let prompt_estimate = self.adapter.approximate_prompt_tokens(&request);
            let id = self.start().await;
            let mut accumulator = self.adapter.stream_accumulator();

            let upstream = match open(request).await {
                Ok(upstream) => upstream,
                Err(e) => {
                    self.finish(&id, Outcome {
                        model,
                        usage: TokenUsage::default(),
                        streaming: true,
                        estimated: false,
                        error: Some(e.to_string()),
                    }).await;
                    yield Err(e);
                    return;
                }
            };
            tokio::pin!(upstream);

            let mut failure = None;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(chunk) => {
                        accumulator.observe(&chunk);
                        yield Ok(chunk);
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            let mut usage = accumulator.usage();
            let estimated = !accumulator.is_exact();
            if estimated && usage.input_tokens == 0 {
                usage.input_tokens = prompt_estimate;
            }

            self.finish(&id, Outcome {
                model,
                usage,
                streaming: true,
                estimated,
                error: failure.as_ref().map(|e| e.to_string()),
            }).await;

            if let Some(e) = failure {
                yield Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::UsageTracker;
    use tokmeter_core::TrackerConfig;

    fn shared() -> SharedTracker {
        UsageTracker::new(TrackerConfig::default().in_memory().with_user_id("alice"))
            .unwrap()
            .into_shared()
    }

    #[test]
    fn test_client_kind_parsing() {
        assert_eq!("OpenAI".parse::<ClientKind>().unwrap(), ClientKind::OpenAi);
        assert_eq!("Anthropic".parse::<ClientKind>().unwrap(), ClientKind::Anthropic);
        assert_eq!(
            "GoogleGenerativeAI".parse::<ClientKind>().unwrap(),
            ClientKind::Gemini
        );
        assert!(matches!(
            "MistralClient".parse::<ClientKind>(),
            Err(TokmeterError::UnsupportedClient(name)) if name == "MistralClient"
        ));
    }

    #[tokio::test]
    async fn test_for_client_rejects_unknown() {
        assert!(TrackedClient::for_client("Cohere", shared()).is_err());
        assert!(TrackedClient::for_client("openai", shared()).is_ok());
    }

    #[tokio::test]
    async fn test_call_records_usage() {
        let tracker = shared();
        let client = TrackedClient::new(ClientKind::Anthropic, tracker.clone());

        let response = client
            .call(json!({"model": "claude-3-haiku-20240307"}), |_| async {
                Ok::<_, String>(json!({"usage": {"input_tokens": 100, "output_tokens": 50}}))
            })
            .await
            .unwrap();
        assert_eq!(response["usage"]["input_tokens"], 100);

        let guard = tracker.lock().await;
        let history = guard.usage_history(None, None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].provider, Provider::Anthropic);
        assert_eq!(history[0].model.as_str(), "claude-3-haiku-20240307");
        assert_eq!(history[0].total_tokens, 150);
        assert_eq!(guard.open_sessions(), 0);
    }
}
