use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::balancer::{ClockJitterSelector, KeySelector, rotation_order};
use crate::credentials::KeySource;
use crate::dispatch::{DispatchResult, Dispatcher, RetryPolicy};
use crate::error::GatewayError;
use crate::response::GatewayResponse;
use crate::upstream::Upstream;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Parsed `{prompt, model}` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptEnvelope {
    pub prompt: String,
    pub model: String,
}

impl PromptEnvelope {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Result<Self, GatewayError> {
        let prompt = prompt.into();
        let model = model.into();
        if prompt.is_empty() {
            return Err(GatewayError::PromptRequired);
        }
        if !is_valid_model(&model) {
            return Err(GatewayError::InvalidModel);
        }
        Ok(Self { prompt, model })
    }

    /// An empty body is treated as `{}`. A missing, null or empty `model` falls back
    /// to `default_model`.
    pub fn parse(body: &[u8], default_model: &str) -> Result<Self, GatewayError> {
        let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Default::default())
        } else {
            serde_json::from_slice(body).map_err(|_| GatewayError::InvalidJson)?
        };

        let prompt = value
            .get("prompt")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .ok_or(GatewayError::PromptRequired)?;

        let model = match value.get("model") {
            None | Some(Value::Null) => default_model,
            Some(Value::String(m)) if m.is_empty() => default_model,
            Some(Value::String(m)) => m.as_str(),
            Some(_) => return Err(GatewayError::InvalidModel),
        };

        Self::new(prompt, model)
    }
}

/// Model ids are spliced into the upstream URL path.
fn is_valid_model(model: &str) -> bool {
    !model.is_empty()
        && model
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub default_model: String,
    pub retry: RetryPolicy,
    /// Deadline for one whole inbound request, retries and backoff included.
    pub request_timeout: Option<Duration>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            retry: RetryPolicy::default(),
            request_timeout: None,
        }
    }
}

/// Deployment-independent request handler. Holds no per-request state: the key pool
/// is loaded fresh from `keys` for every request.
#[derive(Clone)]
pub struct Gateway {
    keys: Arc<dyn KeySource>,
    selector: Arc<dyn KeySelector>,
    upstream: Arc<dyn Upstream>,
    settings: Arc<GatewaySettings>,
}

impl Gateway {
    pub fn new(
        keys: Arc<dyn KeySource>,
        upstream: Arc<dyn Upstream>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            keys,
            selector: Arc::new(ClockJitterSelector),
            upstream,
            settings: Arc::new(settings),
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn KeySelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Same gateway, different key source. Cheap: everything else is shared.
    pub fn with_keys(&self, keys: Arc<dyn KeySource>) -> Self {
        Self {
            keys,
            ..self.clone()
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub async fn handle(&self, method: &Method, body: &[u8]) -> GatewayResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", %request_id, %method);
        async move {
            let response = match self.route(method, body).await {
                Ok(resp) => resp,
                Err(err) => {
                    if err.status_code().is_server_error() {
                        warn!(error = %err, "request failed");
                    } else {
                        info!(error = %err, "request rejected");
                    }
                    GatewayResponse::from(err)
                }
            };
            info!(status = response.status.as_u16(), "request finished");
            response
        }
        .instrument(span)
        .await
    }

    async fn route(&self, method: &Method, body: &[u8]) -> Result<GatewayResponse, GatewayError> {
        if method == Method::OPTIONS {
            return Ok(GatewayResponse::preflight());
        }
        if method != Method::POST {
            return Err(GatewayError::MethodNotAllowed);
        }
        let envelope = PromptEnvelope::parse(body, &self.settings.default_model)?;
        let guarded = AssertUnwindSafe(self.complete(&envelope)).catch_unwind();
        let outcome = match self.settings.request_timeout {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .map_err(|_| GatewayError::Timeout)?,
            None => guarded.await,
        };
        let body = outcome.map_err(|panic| GatewayError::Internal(panic_message(panic)))??;
        Ok(GatewayResponse::passthrough(body))
    }

    /// Pool → rotation → dispatch for an already-validated envelope.
    pub async fn complete(&self, envelope: &PromptEnvelope) -> Result<Value, GatewayError> {
        let pool = self.keys.load();
        if pool.is_empty() {
            return Err(GatewayError::NoKeys);
        }
        let n = pool.len();
        let start = self.selector.start_index(n);
        let order = rotation_order(start, n);
        info!(keys = n, start, model = %envelope.model, "dispatching");

        let report = Dispatcher::new(self.upstream.as_ref(), &self.settings.retry)
            .dispatch(&pool, &order, &envelope.model, &envelope.prompt)
            .await;
        match report.result {
            DispatchResult::Success(body) => Ok(body),
            DispatchResult::Exhausted { last_error } => Err(GatewayError::Exhausted { last_error }),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "internal error".to_string()
    }
}
