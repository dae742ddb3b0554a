use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use cubelink::config::Config;
use cubelink::audio::cpal_capture_factory;
use cubelink::facade::{Facade, SysinfoStats};
use cubelink::server::FacadeServer;
use cubelink::voice::{CommandBackend, VoiceBackend};
use cubelink::{logging, Connection, Cube, ModuleClient};

/// Bridges user programs to the cube daemon.
#[derive(Debug, Parser)]
#[command(name = "cubelink-facade", version)]
struct Cli {
    /// TOML configuration file; defaults apply when it is missing.
    #[arg(long, env = "CUBELINK_CONFIG", default_value = "cubelink.toml")]
    config: PathBuf,

    /// Unix socket of the daemon.
    #[arg(long)]
    daemon_socket: Option<PathBuf>,

    /// Daemon TCP address, e.g. `localhost:2020`. Takes precedence over the socket.
    #[arg(long)]
    daemon_tcp: Option<String>,

    /// Socket the façade listens on.
    #[arg(long)]
    facade_socket: Option<PathBuf>,

    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if let Some(path) = cli.daemon_socket {
        config.daemon.socket_path = path;
    }
    if let Some(address) = cli.daemon_tcp {
        config.daemon.tcp_address = Some(address);
    }
    if let Some(path) = cli.facade_socket {
        config.facade.socket_path = path;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    logging::init(&config.logging.level, &config.logging.format);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "cubelink façade starting"
    );

    let transport = config.daemon.transport();
    let connection = match &config.daemon.tcp_address {
        Some(address) => Connection::connect_tcp(address.as_str(), &transport).await,
        None => Connection::connect_unix(&config.daemon.socket_path, &transport).await,
    }
    .context("cannot reach the daemon")?;

    let client = ModuleClient::new(Arc::new(connection)).with_timeout(config.daemon.request_timeout());
    let mut builder = Facade::builder(Cube::new(client))
        .speaker(config.speaker.clone())
        .microphone(config.microphone.clone())
        .system_stats(Arc::new(SysinfoStats::new()));
    if config.voice.engines_configured() {
        let engines = config.voice.clone();
        builder = builder.spoken_voice(config.voice.clone(), move |acknowledger| {
            Arc::new(CommandBackend::new(&engines, cpal_capture_factory(), acknowledger))
                as Arc<dyn VoiceBackend>
        });
    } else {
        tracing::info!("no voice engine commands configured, voice recognition is off");
    }
    let facade = builder.build();

    let server = FacadeServer::bind(&config.facade.socket_path, facade, config.facade.workers)?;
    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("cubelink façade stopped");
    Ok(())
}
