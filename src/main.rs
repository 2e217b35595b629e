mod commands;

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use tianji_gateway::config::{GatewayConfig, load_config};
use tianji_gateway::credentials::KeySource;
use tianji_gateway::server;

#[derive(Parser, Debug)]
#[command(name = "tianji-gateway")]
#[command(about = "Key-rotating gateway for the Gemini generative-language API", long_about = None)]
struct Cli {
    /// Path to config.toml (default: $TIANJI_GATEWAY_HOME/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Write logs to `<dir>/gateway.log` instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    /// Problems reading or interpreting config.toml / key slots
    #[error("Config error: {0}")]
    Config(String),
    /// The upstream API could not satisfy the request with any key
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        CliError::Other(format!("{e:#}"))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP gateway (default)
    Serve {
        /// Listen address, e.g. 127.0.0.1:8787 (overrides config and TIANJI_GATEWAY_LISTEN)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Manage config.toml
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
    /// Show which key slots are set (values redacted)
    Keys,
    /// List upstream models that support generateContent
    Models {
        /// Include models that do not support generateContent
        #[arg(long)]
        all: bool,
    },
    /// Send one prompt through the gateway core and print the answer text
    Ask {
        prompt: String,
        /// Model id (default: config default_model)
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a commented config.toml template
    Init {
        /// Overwrite an existing config.toml
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration (inline keys redacted)
    Show,
}

#[tokio::main]
async fn main() {
    if let Err(err) = real_main().await {
        eprintln!("{}", err.to_string().red());
        std::process::exit(1);
    }
}

async fn real_main() -> CliResult<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(&cli);
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Command::Serve { listen: None }) {
        Command::Config { cmd } => {
            commands::config::handle_config_cmd(cmd, config_path).await?;
        }
        Command::Keys => {
            let cfg = load_cli_config(config_path).await?;
            commands::keys::handle_keys_cmd(&cfg);
        }
        Command::Models { all } => {
            let cfg = load_cli_config(config_path).await?;
            commands::models::handle_models_cmd(&cfg, all).await?;
        }
        Command::Ask { prompt, model } => {
            let cfg = load_cli_config(config_path).await?;
            commands::ask::handle_ask_cmd(&cfg, prompt, model).await?;
        }
        Command::Serve { listen } => {
            let cfg = load_cli_config(config_path).await?;
            run_server(&cfg, listen.as_deref())
                .await
                .map_err(|e| CliError::Other(format!("{e:#}")))?;
        }
    }

    Ok(())
}

async fn load_cli_config(path: Option<&std::path::Path>) -> CliResult<GatewayConfig> {
    load_config(path)
        .await
        .map_err(|e| CliError::Config(format!("{e:#}")))
}

fn init_tracing(cli: &Cli) -> Option<WorkerGuard> {
    // Default to info logs unless the user sets RUST_LOG.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_dir) = &cli.log_dir {
        let _ = std::fs::create_dir_all(log_dir);
        let file_appender = tracing_appender::rolling::never(log_dir, "gateway.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_writer(non_blocking)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        None
    }
}

async fn run_server(cfg: &GatewayConfig, listen: Option<&str>) -> anyhow::Result<()> {
    let addr = cfg.resolve_listen(listen)?;
    let gateway = cfg.build_gateway()?;

    let slots = cfg.key_source().load().len();
    if slots == 0 {
        tracing::warn!(
            "no API keys found in {}1..={} or config; every prompt will answer 500",
            cfg.keys.env_prefix,
            cfg.keys.slots
        );
    }

    let app = server::router(gateway);
    let listener = bind_local_listener_or_explain(addr).await?;
    tracing::info!(
        keys = slots,
        upstream = %cfg.upstream_base_url,
        "tianji-gateway listening on http://{}",
        addr
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await?;
    tracing::info!("gateway stopped");
    Ok(())
}

async fn bind_local_listener_or_explain(addr: SocketAddr) -> anyhow::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr).await.map_err(|err| {
        let help = listener_bind_help(addr, &err);
        anyhow::Error::new(err).context(help)
    })
}

fn listener_bind_help(addr: SocketAddr, err: &std::io::Error) -> String {
    let port = addr.port();
    let example = format!(
        "tianji-gateway serve --listen {}:{}",
        addr.ip(),
        port.saturating_add(1)
    );
    match err.kind() {
        ErrorKind::AddrInUse => format!(
            "cannot listen on http://{addr}: port {port} is already in use.\n- stop the other process or pick another port, e.g. `{example}`"
        ),
        ErrorKind::PermissionDenied => format!(
            "cannot listen on http://{addr}: permission denied for port {port}.\n- use a port above 1024, e.g. `{example}`"
        ),
        _ => format!("cannot listen on http://{addr}"),
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {},
                    _ = sigterm.recv() => {},
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
