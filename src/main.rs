use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dhcrelay::{RelayConfig, RelayContext, Result};

#[derive(Parser)]
#[command(name = "dhcrelay")]
#[command(author, version, about = "DHCP relay agent with option 82 and UDP forwarding", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "dhcrelay.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    ShowConfig,
    CheckConfig,
    Dump {
        /// Only list servers on this UDP port.
        #[arg(short, long)]
        port: Option<u16>,

        /// Only list this interface.
        #[arg(short, long)]
        interface: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = RelayConfig::load_or_create(&cli.config)?;
            info!("Starting DHCP relay with config: {:?}", cli.config);
            run(cli.config, config).await
        }
        Commands::ShowConfig => {
            let config = RelayConfig::load_or_create(&cli.config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::CheckConfig => {
            let config = RelayConfig::load(&cli.config)?;
            println!(
                "{}: OK ({} interface(s))",
                cli.config.display(),
                config.interfaces.len()
            );
            Ok(())
        }
        Commands::Dump { port, interface } => {
            let config = RelayConfig::load(&cli.config)?;
            let (context, _) = RelayContext::from_config(&config).await;

            println!("IPv4 servers");
            print!("{}", context.ipv4().lock().await.dump(interface.as_deref(), port));
            println!("IPv6 servers");
            print!("{}", context.ipv6().lock().await.dump(interface.as_deref(), port));
            Ok(())
        }
    }
}

#[cfg(target_os = "linux")]
async fn run(path: PathBuf, config: RelayConfig) -> Result<()> {
    use std::sync::Arc;

    use dhcrelay::{Error, LogSink, RelayServer, StatsSync};
    use tokio::signal::unix::{SignalKind, signal};
    use tokio::sync::watch;
    use tracing::{error, warn};

    let (context, _) = RelayContext::from_config(&config).await;
    let context = Arc::new(context);

    let (interval, interval_updates) = watch::channel(config.stats_interval());
    let stats = StatsSync::new(Arc::clone(context.stats()), LogSink, interval_updates).spawn();

    let server = Arc::new(RelayServer::new(Arc::clone(&context))?);
    server.sync_ports(&config).await?;

    let mut relay = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });
    let mut hangup = signal(SignalKind::hangup())?;

    let result = loop {
        tokio::select! {
            result = &mut relay => {
                break match result {
                    Ok(result) => result,
                    Err(join_error) => Err(Error::Socket(format!("Relay loop failed: {}", join_error))),
                };
            }
            _ = hangup.recv() => {
                info!("Received SIGHUP, reloading {:?}", path);
                match RelayConfig::load(&path) {
                    Ok(config) => {
                        context.apply_config(&config).await;
                        if let Err(error) = server.sync_ports(&config).await {
                            warn!("Failed to update relay sockets: {}", error);
                        }
                        interval.send_replace(config.stats_interval());
                    }
                    Err(error) => error!("Keeping current configuration, reload failed: {}", error),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, stopping relay...");
                break Ok(());
            }
        }
    };

    server.shutdown().await;
    relay.abort();
    stats.abort();
    result
}

#[cfg(not(target_os = "linux"))]
async fn run(_path: PathBuf, _config: RelayConfig) -> Result<()> {
    Err(dhcrelay::Error::Socket(
        "the relay sockets are only implemented for Linux".to_string(),
    ))
}
