use tianji_gateway::config::GatewayConfig;
use tianji_gateway::error::GatewayError;
use tianji_gateway::gateway::PromptEnvelope;
use tianji_gateway::upstream::extract_text;

use crate::{CliError, CliResult};

pub async fn handle_ask_cmd(
    cfg: &GatewayConfig,
    prompt: String,
    model: Option<String>,
) -> CliResult<()> {
    let model = model.unwrap_or_else(|| cfg.default_model.clone());
    let envelope =
        PromptEnvelope::new(prompt, model).map_err(|e| CliError::Other(e.to_string()))?;
    let gateway = cfg.build_gateway()?;

    let body = gateway.complete(&envelope).await.map_err(|e| {
        if matches!(e, GatewayError::NoKeys) {
            CliError::Config(e.to_string())
        } else {
            CliError::Upstream(e.body().to_string())
        }
    })?;

    match extract_text(&body) {
        Some(text) => {
            println!("{text}");
            Ok(())
        }
        None => Err(CliError::Upstream(format!(
            "Invalid response shape from upstream: {body}"
        ))),
    }
}
