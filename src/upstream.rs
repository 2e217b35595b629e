use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::error::TransportError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Outcome of an upstream call that produced an HTTP status.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamReply {
    /// 2xx with a JSON body.
    Success(Value),
    /// Any non-2xx status with the raw response text.
    Failure { status: u16, body: String },
}

/// The generative-language API as seen by the dispatcher. One call, one key.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn generate(
        &self,
        key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<UpstreamReply, TransportError>;
}

pub fn generate_content_body(prompt: &str) -> Value {
    serde_json::json!({ "contents": [{ "parts": [{ "text": prompt }] }] })
}

/// `candidates[0].content.parts[0].text`
pub fn extract_text(response: &Value) -> Option<&str> {
    response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
}

/// Model names from a `models` listing. Unless `all`, only models that support
/// `generateContent` are kept.
pub fn generation_models(listing: &Value, all: bool) -> Vec<String> {
    let Some(models) = listing.get("models").and_then(|m| m.as_array()) else {
        return Vec::new();
    };
    models
        .iter()
        .filter(|m| {
            all || m
                .get("supportedGenerationMethods")
                .and_then(|v| v.as_array())
                .is_some_and(|methods| methods.iter().any(|x| x == "generateContent"))
        })
        .filter_map(|m| m.get("name").and_then(|n| n.as_str()).map(str::to_string))
        .collect()
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self::with_client(builder.build()?, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str, key: &str) -> Result<Url, TransportError> {
        let raw = format!("{}/v1beta/{}", self.base_url, path);
        let mut url =
            Url::parse(&raw).map_err(|e| TransportError::Request(format!("{raw}: {e}")))?;
        url.query_pairs_mut().append_pair("key", key);
        Ok(url)
    }

    pub fn generate_url(&self, model: &str, key: &str) -> Result<Url, TransportError> {
        self.url(&format!("models/{model}:generateContent"), key)
    }

    async fn read_reply(resp: reqwest::Response) -> Result<UpstreamReply, TransportError> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.json::<Value>().await?;
            return Ok(UpstreamReply::Success(body));
        }
        let body = resp.text().await.unwrap_or_default();
        Ok(UpstreamReply::Failure {
            status: status.as_u16(),
            body,
        })
    }

    /// `GET /v1beta/models` with the given key.
    pub async fn list_models(&self, key: &str) -> Result<UpstreamReply, TransportError> {
        let url = self.url("models", key)?;
        let resp = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;
        Self::read_reply(resp).await
    }
}

#[async_trait]
impl Upstream for GeminiClient {
    async fn generate(
        &self,
        key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<UpstreamReply, TransportError> {
        let url = self.generate_url(model, key)?;
        let resp = self
            .client
            .post(url)
            .json(&generate_content_body(prompt))
            .send()
            .await?;
        Self::read_reply(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn generate_url_puts_model_in_path_and_key_in_query() {
        let client = GeminiClient::with_client(Client::new(), "https://example.test/");
        let url = client.generate_url("gemini-2.5-flash", "k&1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent?key=k%261"
        );
    }

    #[test]
    fn request_body_wraps_prompt_as_single_part() {
        assert_eq!(
            generate_content_body("你好"),
            serde_json::json!({ "contents": [{ "parts": [{ "text": "你好" }] }] })
        );
    }

    #[test]
    fn extract_text_reads_first_candidate_part() {
        let body = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "乾为天" }, { "text": "x" }] } }]
        });
        assert_eq!(extract_text(&body), Some("乾为天"));
        assert_eq!(extract_text(&serde_json::json!({ "candidates": [] })), None);
        assert_eq!(
            extract_text(&serde_json::json!({ "candidates": [{ "content": {} }] })),
            None
        );
    }

    #[test]
    fn generation_models_filters_by_supported_method() {
        let listing = serde_json::json!({
            "models": [
                { "name": "models/gemini-2.5-flash", "supportedGenerationMethods": ["generateContent", "countTokens"] },
                { "name": "models/text-embedding-004", "supportedGenerationMethods": ["embedContent"] },
                { "name": "models/no-methods" },
            ]
        });
        assert_eq!(
            generation_models(&listing, false),
            vec!["models/gemini-2.5-flash".to_string()]
        );
        assert_eq!(generation_models(&listing, true).len(), 3);
        assert!(generation_models(&serde_json::json!({ "error": {} }), false).is_empty());
    }
}
