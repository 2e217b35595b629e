use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::Value;

use crate::error::GatewayError;

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "POST, OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type";

/// The three CORS headers every gateway response carries, whatever its status.
pub fn cors_headers() -> [(HeaderName, HeaderValue); 3] {
    [
        (
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static(ALLOW_ORIGIN),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ),
    ]
}

pub fn apply_cors(headers: &mut HeaderMap) {
    for (name, value) in cors_headers() {
        headers.insert(name, value);
    }
}

/// Transport-neutral response produced by the gateway core. Adapters only marshal it.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl GatewayResponse {
    pub fn preflight() -> Self {
        Self {
            status: StatusCode::OK,
            body: None,
        }
    }

    /// Upstream success body, untouched.
    pub fn passthrough(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: Some(body),
        }
    }

    pub fn error(err: &GatewayError) -> Self {
        Self {
            status: err.status_code(),
            body: Some(err.body()),
        }
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers);
        if self.body.is_some() {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        headers
    }

    pub fn body_bytes(&self) -> Bytes {
        match &self.body {
            // Serializing a `Value` only fails for non-string map keys, which `Value` cannot hold.
            Some(v) => Bytes::from(serde_json::to_vec(v).unwrap_or_default()),
            None => Bytes::new(),
        }
    }

    /// Marshals into any `http` response whose body can be built from bytes.
    pub fn into_http<B: From<Bytes>>(self) -> Response<B> {
        let mut out = Response::new(B::from(self.body_bytes()));
        *out.status_mut() = self.status;
        *out.headers_mut() = self.headers();
        out
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response<Body> {
        self.into_http()
    }
}

impl From<GatewayError> for GatewayResponse {
    fn from(err: GatewayError) -> Self {
        GatewayResponse::error(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn preflight_has_cors_and_no_content_type() {
        let resp = GatewayResponse::preflight();
        let headers = resp.headers();
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(
            headers.get("access-control-allow-methods").unwrap(),
            "POST, OPTIONS"
        );
        assert_eq!(
            headers.get("access-control-allow-headers").unwrap(),
            "Content-Type"
        );
        assert!(headers.get("content-type").is_none());
        assert!(resp.body_bytes().is_empty());
    }

    #[test]
    fn error_response_is_json_with_cors() {
        let resp = GatewayResponse::from(GatewayError::NoKeys);
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        let headers = resp.headers();
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        let body: Value = serde_json::from_slice(&resp.body_bytes()).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "No API keys configured" }));
    }

    #[test]
    fn into_http_keeps_status_headers_and_body() {
        let resp: Response<Bytes> =
            GatewayResponse::passthrough(serde_json::json!({ "ok": true })).into_http();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(&resp.body()[..], br#"{"ok":true}"#);
    }

    #[test]
    fn passthrough_keeps_upstream_key_order() {
        let upstream = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"吉"}]},"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":9,"promptTokenCount":4},"modelVersion":"gemini-2.5-flash"}"#;
        let value: Value = serde_json::from_str(upstream).unwrap();
        let resp = GatewayResponse::passthrough(value);
        assert_eq!(&resp.body_bytes()[..], upstream.as_bytes());
    }
}
