use {
    clap::{Parser, Subcommand},
    std::path::PathBuf,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tidechat", about = "Tidechat — multi-tenant messaging orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file path (overrides the default search locations).
    #[arg(long, global = true, env = "TIDECHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for broker, tenant databases, and media scratch.
    #[arg(long, global = true, env = "TIDECHAT_DATA_DIR", default_value = "./tidechat-data")]
    data_dir: PathBuf,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Serve,
    /// Print the effective configuration and exit.
    Config,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<tidechat_config::TidechatConfig> {
    let mut config = match &cli.config {
        Some(path) => tidechat_config::load_config(path)?,
        None => tidechat_config::discover_and_load(),
    };
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    info!(version = env!("CARGO_PKG_VERSION"), "tidechat starting");

    let state = tidechat_gateway::build_state(
        config,
        cli.data_dir.clone(),
        tidechat_gateway::allow_all(),
    )
    .await?;
    tidechat_gateway::start_queues(&state).await?;

    let commands = tidechat_gateway::command_registry();
    tidechat_gateway::start_server(state, commands, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
    })
    .await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        None | Some(Commands::Serve) => serve(&cli).await,
        Some(Commands::Config) => {
            let config = load_config(&cli)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
    }
}
