mod config_commands;
mod sessions_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    wagate_config::WagateConfig,
    wagate_whatsapp::{BridgeConnector, WaConnector},
};

#[derive(Parser)]
#[command(name = "wagate", about = "wagate: multi-tenant WhatsApp Web HTTP gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (wagate.toml / .yaml / .json). Discovered when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Session management.
    Sessions {
        #[command(subcommand)]
        action: sessions_commands::SessionAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// The bridge serves every session unless the native backend is enabled,
/// in which case it keeps the legacy ones.
fn build_connector(config: &WagateConfig) -> Arc<dyn WaConnector> {
    let bridge: Arc<dyn WaConnector> = Arc::new(BridgeConnector::new(&config.bridge));
    #[cfg(feature = "native")]
    if config.native.enabled {
        info!("multi-file sessions served in-process");
        let native = Arc::new(wagate_whatsapp::NativeConnector::new(
            config.sessions.resolved_dir(),
        ));
        return Arc::new(wagate_whatsapp::ModeRouter::new(native, bridge));
    }
    #[cfg(not(feature = "native"))]
    if config.native.enabled {
        tracing::warn!("native backend requested but not compiled in, using the bridge");
    }
    bridge
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let mut config = wagate_config::discover_and_load(cli.config.as_deref())?;

    match cli.command {
        Commands::Gateway { bind, port } => {
            info!(version = env!("CARGO_PKG_VERSION"), "wagate starting");
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let connector = build_connector(&config);
            wagate_gateway::server::start_gateway(config, connector).await
        },
        Commands::Sessions { action } => {
            sessions_commands::handle_sessions(action, &config).await
        },
        Commands::Config { action } => config_commands::handle_config(action, &config),
    }
}
