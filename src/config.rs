use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;

use crate::credentials::{EnvKeySource, redact_key};
use crate::dispatch::RetryPolicy;
use crate::gateway::{DEFAULT_MODEL, Gateway, GatewaySettings};
use crate::upstream::{DEFAULT_BASE_URL, GeminiClient};

pub const HOME_ENV: &str = "TIANJI_GATEWAY_HOME";
pub const LISTEN_ENV: &str = "TIANJI_GATEWAY_LISTEN";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8787";
pub const MAX_ATTEMPTS_PER_KEY: u32 = 8;

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_env_prefix() -> String {
    "GEMINI_KEY_".to_string()
}

fn default_slots() -> usize {
    7
}

fn default_max_attempts() -> u32 {
    3
}

fn default_one_second() -> Duration {
    Duration::from_secs(1)
}

mod duration_text {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
    }
}

mod optional_duration_text {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => super::duration_text::serialize(d, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let text = Option::<String>::deserialize(d)?;
        match text.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(t) => humantime::parse_duration(t)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Slot `i` is read from `{env_prefix}{i}` for `i` in `1..=slots`.
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
    #[serde(default = "default_slots")]
    pub slots: usize,
    /// Appended after the environment slots.
    pub inline: Vec<String>,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            env_prefix: default_env_prefix(),
            slots: default_slots(),
            inline: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_key: u32,
    #[serde(default = "default_one_second", with = "duration_text")]
    pub rate_limit_backoff: Duration,
    #[serde(default = "default_one_second", with = "duration_text")]
    pub transport_cooldown: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_key: default_max_attempts(),
            rate_limit_backoff: default_one_second(),
            transport_cooldown: default_one_second(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Whole inbound request, retries and backoff included.
    #[serde(
        with = "optional_duration_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub request: Option<Duration>,
    /// Each upstream call.
    #[serde(
        with = "optional_duration_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub upstream: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_base_url")]
    pub upstream_base_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    pub keys: KeysConfig,
    pub retry: RetryConfig,
    pub timeouts: TimeoutsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            upstream_base_url: default_base_url(),
            default_model: default_model(),
            keys: KeysConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts_per_key: self.retry.max_attempts_per_key,
            rate_limit_backoff: self.retry.rate_limit_backoff,
            transport_cooldown: self.retry.transport_cooldown,
        }
    }

    pub fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            default_model: self.default_model.clone(),
            retry: self.retry_policy(),
            request_timeout: self.timeouts.request,
        }
    }

    pub fn key_source(&self) -> EnvKeySource {
        EnvKeySource::new(
            self.keys.env_prefix.clone(),
            self.keys.slots,
            self.keys.inline.clone(),
        )
    }

    pub fn upstream_client(&self) -> Result<GeminiClient> {
        GeminiClient::new(&self.upstream_base_url, self.timeouts.upstream)
            .context("failed to build upstream HTTP client")
    }

    pub fn build_gateway(&self) -> Result<Gateway> {
        Ok(Gateway::new(
            Arc::new(self.key_source()),
            Arc::new(self.upstream_client()?),
            self.settings(),
        ))
    }

    /// Copy safe to print: inline keys are redacted.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        cfg.keys.inline = cfg.keys.inline.iter().map(|k| redact_key(k)).collect();
        cfg
    }

    /// `--listen` beats `TIANJI_GATEWAY_LISTEN`, which beats the config file.
    pub fn resolve_listen(&self, cli: Option<&str>) -> Result<SocketAddr> {
        let from_env = env::var(LISTEN_ENV).ok();
        let raw = pick_listen(cli, from_env.as_deref(), &self.listen);
        raw.parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address {raw:?}"))
    }
}

fn pick_listen<'a>(cli: Option<&'a str>, env: Option<&'a str>, file: &'a str) -> &'a str {
    [cli, env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(file.trim())
}

fn normalize_config(cfg: &mut GatewayConfig) {
    let attempts = cfg.retry.max_attempts_per_key;
    let clamped = attempts.clamp(1, MAX_ATTEMPTS_PER_KEY);
    if clamped != attempts {
        warn!(
            "retry.max_attempts_per_key = {} out of range, using {}",
            attempts, clamped
        );
        cfg.retry.max_attempts_per_key = clamped;
    }
    cfg.upstream_base_url = cfg.upstream_base_url.trim().trim_end_matches('/').to_string();
    if cfg.upstream_base_url.is_empty() {
        cfg.upstream_base_url = default_base_url();
    }
    if cfg.default_model.trim().is_empty() {
        cfg.default_model = default_model();
    }
    cfg.keys.inline.retain(|k| !k.trim().is_empty());
}

pub fn parse_config(text: &str) -> Result<GatewayConfig> {
    let mut cfg = toml::from_str::<GatewayConfig>(text)?;
    normalize_config(&mut cfg);
    Ok(cfg)
}

pub fn home_dir() -> PathBuf {
    if let Ok(dir) = env::var(HOME_ENV) {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    #[cfg(test)]
    {
        static TEST_HOME: std::sync::OnceLock<PathBuf> = std::sync::OnceLock::new();
        TEST_HOME
            .get_or_init(|| {
                let mut dir = std::env::temp_dir();
                let unique = format!(
                    "tianji-gateway-test-{}-{}",
                    std::process::id(),
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_nanos())
                        .unwrap_or(0)
                );
                dir.push(unique);
                dir.push(".tianji-gateway");
                let _ = std::fs::create_dir_all(&dir);
                dir
            })
            .clone()
    }

    #[cfg(not(test))]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tianji-gateway")
    }
}

pub fn config_file_path() -> PathBuf {
    home_dir().join("config.toml")
}

/// An explicit path must exist; the default location falls back to built-in defaults.
pub async fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (config_file_path(), false),
    };
    if !path.exists() {
        if explicit {
            anyhow::bail!("config file {:?} does not exist", path);
        }
        let mut cfg = GatewayConfig::default();
        normalize_config(&mut cfg);
        return Ok(cfg);
    }
    let text = fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {:?}", path))?;
    parse_config(&text).with_context(|| format!("failed to parse {:?}", path))
}

const CONFIG_TOML_TEMPLATE: &str = r#"# tianji-gateway configuration
#
# Keys are never stored here by default: the gateway reads GEMINI_KEY_1..GEMINI_KEY_7
# from the environment on every request.

listen = "127.0.0.1:8787"
upstream_base_url = "https://generativelanguage.googleapis.com"
default_model = "gemini-2.5-flash"

[keys]
env_prefix = "GEMINI_KEY_"
slots = 7
# Extra keys appended after the environment slots.
inline = []

[retry]
# Attempts per key while the upstream answers 429 (1..=8).
max_attempts_per_key = 3
# Wait before retry r is rate_limit_backoff * 2^(r+1): 2s, 4s, ...
rate_limit_backoff = "1s"
# Pause after a network failure before moving to the next key.
transport_cooldown = "1s"

[timeouts]
# Deadline for one whole inbound request (answers 504 when exceeded).
# request = "60s"
# Deadline for each upstream call.
# upstream = "30s"
"#;

pub async fn init_config_toml(force: bool) -> Result<PathBuf> {
    let dir = home_dir();
    fs::create_dir_all(&dir).await?;
    let path = config_file_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config.toml already exists at {:?}; use --force to overwrite",
            path
        );
    }

    let tmp_path = dir.join("config.toml.tmp");
    fs::write(&tmp_path, CONFIG_TOML_TEMPLATE.as_bytes()).await?;
    fs::rename(&tmp_path, &path).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg, GatewayConfig::default());
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
        assert_eq!(cfg.settings().default_model, "gemini-2.5-flash");
        assert_eq!(cfg.settings().request_timeout, None);
    }

    #[test]
    fn template_matches_defaults() {
        assert_eq!(parse_config(CONFIG_TOML_TEMPLATE).unwrap(), GatewayConfig::default());
    }

    #[test]
    fn parses_durations_and_partial_tables() {
        let cfg = parse_config(
            r#"
listen = "0.0.0.0:9000"
upstream_base_url = "http://127.0.0.1:1234/"

[keys]
slots = 3
inline = ["extra", "  "]

[retry]
rate_limit_backoff = "250ms"

[timeouts]
request = "1m 30s"
"#,
        )
        .unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:9000");
        assert_eq!(cfg.upstream_base_url, "http://127.0.0.1:1234");
        assert_eq!(cfg.keys.env_prefix, "GEMINI_KEY_");
        assert_eq!(cfg.keys.slots, 3);
        assert_eq!(cfg.keys.inline, vec!["extra"]);
        assert_eq!(cfg.retry.max_attempts_per_key, 3);
        assert_eq!(cfg.retry.rate_limit_backoff, Duration::from_millis(250));
        assert_eq!(cfg.retry.transport_cooldown, Duration::from_secs(1));
        assert_eq!(cfg.timeouts.request, Some(Duration::from_secs(90)));
        assert_eq!(cfg.timeouts.upstream, None);
    }

    #[test]
    fn attempts_are_clamped() {
        let cfg = parse_config("[retry]\nmax_attempts_per_key = 0\n").unwrap();
        assert_eq!(cfg.retry.max_attempts_per_key, 1);
        let cfg = parse_config("[retry]\nmax_attempts_per_key = 50\n").unwrap();
        assert_eq!(cfg.retry.max_attempts_per_key, MAX_ATTEMPTS_PER_KEY);
    }

    #[test]
    fn bad_duration_is_an_error() {
        assert!(parse_config("[retry]\nrate_limit_backoff = \"soon\"\n").is_err());
    }

    #[test]
    fn listen_precedence_is_cli_then_env_then_file() {
        assert_eq!(
            pick_listen(Some("1.1.1.1:1"), Some("2.2.2.2:2"), "3.3.3.3:3"),
            "1.1.1.1:1"
        );
        assert_eq!(pick_listen(None, Some("2.2.2.2:2"), "3.3.3.3:3"), "2.2.2.2:2");
        assert_eq!(pick_listen(Some(" "), None, "3.3.3.3:3"), "3.3.3.3:3");
    }

    #[test]
    fn redacted_hides_inline_keys_and_round_trips_as_toml() {
        let mut cfg = GatewayConfig::default();
        cfg.keys.inline = vec!["AIzaSyFAKEFAKEFAKEFAKEFAKE0wF0".to_string()];
        cfg.timeouts.request = Some(Duration::from_secs(45));
        let shown = toml::to_string_pretty(&cfg.redacted()).unwrap();
        assert!(!shown.contains("FAKEFAKE"), "{shown}");
        assert!(shown.contains("AIza…wF0"), "{shown}");
        assert!(shown.contains("request = \"45s\""), "{shown}");
        assert!(!shown.contains("upstream ="), "{shown}");
    }

    #[tokio::test]
    async fn init_writes_template_and_refuses_to_overwrite() {
        let path = init_config_toml(true).await.unwrap();
        assert_eq!(path, config_file_path());
        let err = init_config_toml(false).await.unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err}");

        let cfg = load_config(None).await.unwrap();
        assert_eq!(cfg, GatewayConfig::default());
    }

    #[tokio::test]
    async fn explicit_missing_path_is_an_error() {
        let missing = home_dir().join("nope").join("config.toml");
        assert!(load_config(Some(&missing)).await.is_err());
    }
}
