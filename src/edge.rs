//! Edge-style entry point: the runtime hands over a fully buffered request plus
//! the secrets bound to this invocation, and expects a buffered response back.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{Request, Response};

use crate::credentials::BindingKeySource;
use crate::gateway::Gateway;

#[derive(Clone)]
pub struct EdgeHandler {
    gateway: Gateway,
    key_prefix: String,
    key_slots: usize,
}

impl EdgeHandler {
    pub fn new(gateway: Gateway, key_prefix: impl Into<String>, key_slots: usize) -> Self {
        Self {
            gateway,
            key_prefix: key_prefix.into(),
            key_slots,
        }
    }

    pub async fn fetch(
        &self,
        req: Request<Bytes>,
        bindings: &HashMap<String, String>,
    ) -> Response<Bytes> {
        let keys = BindingKeySource::new(bindings, &self.key_prefix, self.key_slots);
        let gateway = self.gateway.with_keys(Arc::new(keys));
        let (parts, body) = req.into_parts();
        gateway.handle(&parts.method, &body).await.into_http()
    }
}
