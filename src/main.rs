//! API gateway binary.
//!
//! ```text
//! api-gateway --config gateway.toml     serve, hot-reloading the file
//! api-gateway --config gateway.toml --check
//!                                       validate and list the routes
//! api-gateway --list-kinds              print predicate and filter names
//! ```

use std::path::PathBuf;

use api_gateway::config::watcher::ConfigWatcher;
use api_gateway::config::{load_config, GatewayConfig};
use api_gateway::filter::factory::filter_names;
use api_gateway::lifecycle::{Shutdown, SignalEvent, Signals};
use api_gateway::observability::{logging, metrics};
use api_gateway::routing::predicates::predicate_names;
use api_gateway::HttpServer;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(about = "Route-matching HTTP API gateway", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration, print the routes and exit.
    #[arg(long)]
    check: bool,

    /// Print the supported predicate and filter names and exit.
    #[arg(long)]
    list_kinds: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.list_kinds {
        println!("predicates: {}", predicate_names().collect::<Vec<_>>().join(", "));
        println!("filters:    {}", filter_names().collect::<Vec<_>>().join(", "));
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    if cli.check {
        for route in &config.routes {
            println!("{:>6}  {}  -> {}", route.order, route.id, route.uri);
        }
        println!("configuration ok ({} routes)", config.routes.len());
        return Ok(());
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        default_filters = config.default_filters.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (update_tx, config_updates) = mpsc::unbounded_channel();
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut file_updates) = ConfigWatcher::new(path);
            let forward = update_tx.clone();
            tokio::spawn(async move {
                while let Some(config) = file_updates.recv().await {
                    if forward.send(config).is_err() {
                        break;
                    }
                }
            });
            Some(watcher.run()?)
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let mut signals = Signals::install()?;
    let signal_shutdown = shutdown.clone();
    let reload_path = cli.config.clone();
    tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(SignalEvent::Shutdown) => {
                    signal_shutdown.trigger();
                    break;
                }
                Ok(SignalEvent::Reload) => {
                    let Some(path) = &reload_path else { continue };
                    match load_config(path) {
                        Ok(config) => {
                            let _ = update_tx.send(config);
                        }
                        Err(e) => tracing::error!(error = %e, "Reload failed, keeping current configuration"),
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Signal handling failed");
                    signal_shutdown.trigger();
                    break;
                }
            }
        }
    });

    let server = HttpServer::new(config);
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
