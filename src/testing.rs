use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::upstream::{Upstream, UpstreamReply};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedCall {
    pub key: String,
    pub model: String,
    pub prompt: String,
}

type Responder = dyn Fn(&str, usize) -> Result<UpstreamReply, TransportError> + Send + Sync;

/// Fake upstream driven by `(key, nth call for that key) -> reply`.
pub(crate) struct ScriptedUpstream {
    responder: Box<Responder>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedUpstream {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, usize) -> Result<UpstreamReply, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn keys_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.key).collect()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn generate(
        &self,
        key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<UpstreamReply, TransportError> {
        let nth = {
            let mut calls = self.calls.lock().unwrap();
            let nth = calls.iter().filter(|c| c.key == key).count();
            calls.push(RecordedCall {
                key: key.to_string(),
                model: model.to_string(),
                prompt: prompt.to_string(),
            });
            nth
        };
        (self.responder)(key, nth)
    }
}
