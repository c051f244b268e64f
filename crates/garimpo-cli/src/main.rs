mod ask;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use garimpo_config::ConfigLoader;
use garimpo_gateway::GatewayServer;
use garimpo_security::RedactingWriter;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "garimpo", version, about = "Conversational movie recommendations")]
struct Cli {
    /// Path to config.yml (defaults to ~/.garimpo/config.yml)
    #[arg(long, global = true, env = "GARIMPO_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Ask a single question and stream the answer to stdout
    Ask {
        message: String,
        /// User id the conversation and preferences belong to
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Write a commented default config file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_format);

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new()?,
    };

    match cli.command {
        Command::Serve { host, port } => {
            let mut config = loader.load()?;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            let server = GatewayServer::new(config).context("failed to start gateway")?;
            server.run().await?;
        }
        Command::Ask { message, user } => {
            let config = loader.load()?;
            ask::run(config, &user, &message).await?;
        }
        Command::InitConfig => {
            let path = loader.write_default()?;
            info!("wrote default config");
            println!("Created {}", path.display());
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr());
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
