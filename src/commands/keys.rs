use owo_colors::OwoColorize;

use tianji_gateway::config::GatewayConfig;
use tianji_gateway::credentials::{KeySource, redact_key};

pub fn handle_keys_cmd(cfg: &GatewayConfig) {
    let source = cfg.key_source();

    println!("Environment slots:");
    for (name, value) in source.inspect() {
        match value {
            Some(v) => println!("  {:<16} {}", name, redact_key(v.trim()).green()),
            None => println!("  {:<16} {}", name, "(unset)".dimmed()),
        }
    }

    if !cfg.keys.inline.is_empty() {
        println!("Inline keys (config.toml):");
        for key in &cfg.keys.inline {
            println!("  {}", redact_key(key.trim()).green());
        }
    }

    let pool = source.load();
    if pool.is_empty() {
        println!("{}", "No usable keys: the gateway will answer 500 to every prompt.".yellow());
    } else {
        println!("Usable keys after de-duplication: {}", pool.len());
    }
}
