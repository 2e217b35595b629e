use tianji_gateway::balancer::{ClockJitterSelector, KeySelector, rotation_order};
use tianji_gateway::config::GatewayConfig;
use tianji_gateway::credentials::{KeySource, redact_key};
use tianji_gateway::upstream::{UpstreamReply, generation_models};

use crate::{CliError, CliResult};

/// Lists models with the first key that the upstream accepts, in the same rotation
/// order the gateway would use.
pub async fn handle_models_cmd(cfg: &GatewayConfig, all: bool) -> CliResult<()> {
    let pool = cfg.key_source().load();
    if pool.is_empty() {
        return Err(CliError::Config("No API keys configured".to_string()));
    }
    let client = cfg.upstream_client()?;
    let start = ClockJitterSelector.start_index(pool.len());

    let mut last_error = String::new();
    for index in rotation_order(start, pool.len()) {
        let Some(key) = pool.get(index) else {
            continue;
        };
        match client.list_models(key).await {
            Ok(UpstreamReply::Success(listing)) => {
                let names = generation_models(&listing, all);
                if names.is_empty() {
                    println!("(no models returned)");
                }
                for name in names {
                    println!("{}", name.trim_start_matches("models/"));
                }
                return Ok(());
            }
            Ok(UpstreamReply::Failure { status, body }) => {
                tracing::warn!(key = %redact_key(key), status, "model listing rejected");
                last_error = format!("HTTP {status}: {}", body.trim());
            }
            Err(err) => {
                tracing::warn!(key = %redact_key(key), "model listing failed: {}", err);
                last_error = err.to_string();
            }
        }
    }
    Err(CliError::Upstream(format!(
        "all {} keys failed; last error: {}",
        pool.len(),
        last_error
    )))
}
