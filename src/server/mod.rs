use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response};
use tracing::warn;

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::response::GatewayResponse;


const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

async fn handle_gateway(gateway: Gateway, req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            warn!(path = parts.uri.path(), "failed to read request body: {}", e);
            return GatewayResponse::from(GatewayError::InvalidBody).into_http();
        }
    };
    gateway.handle(&parts.method, &body).await.into_http()
}

/// Every path and method lands on the gateway, so even unknown routes answer with
/// CORS headers instead of a bare 404.
pub fn router(gateway: Gateway) -> Router {
    Router::new().fallback(move |req: Request<Body>| handle_gateway(gateway.clone(), req))
}
