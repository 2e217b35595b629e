use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Last failure seen by the dispatcher, reported back to the caller on exhaustion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamFailure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamFailure {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

/// Error raised by an `Upstream` implementation when no HTTP status could be read,
/// or the 2xx body could not be decoded.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Request(String),
    #[error("invalid upstream JSON: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("Prompt is required")]
    PromptRequired,
    #[error("Invalid JSON body")]
    InvalidJson,
    #[error("Invalid request body")]
    InvalidBody,
    #[error("Invalid model")]
    InvalidModel,
    #[error("No API keys configured")]
    NoKeys,
    #[error("All API keys exhausted")]
    Exhausted { last_error: Option<UpstreamFailure> },
    #[error("Request timed out")]
    Timeout,
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::PromptRequired
            | GatewayError::InvalidJson
            | GatewayError::InvalidBody
            | GatewayError::InvalidModel => StatusCode::BAD_REQUEST,
            GatewayError::NoKeys | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Exhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// JSON payload sent to the caller. Only exhaustion carries `lastError`.
    pub fn body(&self) -> serde_json::Value {
        match self {
            GatewayError::Exhausted { last_error } => serde_json::json!({
                "error": self.to_string(),
                "lastError": last_error,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn exhausted_body_omits_status_for_transport_failures() {
        let err = GatewayError::Exhausted {
            last_error: Some(UpstreamFailure::transport("connection reset")),
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            err.body(),
            serde_json::json!({
                "error": "All API keys exhausted",
                "lastError": { "message": "connection reset" },
            })
        );
    }

    #[test]
    fn exhausted_body_keeps_null_last_error() {
        let err = GatewayError::Exhausted { last_error: None };
        assert_eq!(
            err.body(),
            serde_json::json!({ "error": "All API keys exhausted", "lastError": null })
        );
    }

    #[test]
    fn client_errors_map_to_400() {
        for err in [
            GatewayError::PromptRequired,
            GatewayError::InvalidJson,
            GatewayError::InvalidModel,
        ] {
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(
            GatewayError::PromptRequired.body(),
            serde_json::json!({ "error": "Prompt is required" })
        );
    }

    #[test]
    fn internal_error_carries_message() {
        let err = GatewayError::Internal("boom".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body(), serde_json::json!({ "error": "boom" }));
    }
}
