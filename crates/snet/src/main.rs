//! Snet
//!
//! Runs the plugin messaging host and the virtual address engine, and offers
//! one-shot conversion and type listing from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use snet::{Dispatcher, SnetConfig, TransformStage, VirtualEngine, load_addresses};
use snet_mq::{HostEvent, ModuleLoader, PluginHost, StaticModuleLoader};
use snet_types::{AddressDetails, DataType, Value, convert};

/// Snet data-acquisition middleware
#[derive(Parser, Debug)]
#[command(name = "snet")]
#[command(about = "Snet data-acquisition middleware", long_about = None)]
struct Cli {
    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the plugin host and virtual address engine
    Run {
        /// Path to snet.toml
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Don't start the file watchers
        #[arg(long)]
        no_watch: bool,
    },

    /// Convert one value and print the outcome
    Convert {
        /// Data type tag, e.g. Int32 or Double[]
        data_type: String,

        /// Raw value
        value: String,
    },

    /// List compiled-in backend types
    Types,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, no_watch } => run(config.as_deref(), no_watch).await,
        Command::Convert { data_type, value } => convert_once(&data_type, &value),
        Command::Types => list_types(),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("snet=info,snet_mq=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run
// ─────────────────────────────────────────────────────────────────────────────

async fn run(config_path: Option<&Path>, no_watch: bool) -> Result<()> {
    let mut config = SnetConfig::load(config_path)?;
    if no_watch {
        config.host.watch = false;
    }

    info!("Starting snet v{}", env!("CARGO_PKG_VERSION"));

    let host = PluginHost::new(config.host.clone(), StaticModuleLoader::with_builtin());
    let events = tokio::spawn(log_host_events(host.subscribe()));
    host.start().await;

    let engine = Arc::new(VirtualEngine::new());
    let transforms = Arc::new(TransformStage::new(config.scripts_dir.clone()));
    let dispatcher =
        Arc::new(Dispatcher::new(transforms, Arc::clone(&engine)).with_host(Arc::clone(&host)));

    let addresses = match &config.addresses {
        Some(path) => {
            info!("Loading addresses from: {}", path.display());
            load_addresses(path)?
        }
        None => Vec::new(),
    };

    let mut virtual_addresses = Vec::new();
    for details in addresses.into_iter().filter(|a| a.is_virtual) {
        match engine.register(&details).await {
            Ok(_) => virtual_addresses.push(details),
            Err(e) => warn!(address = %details.name, "Skipping virtual address: {}", e),
        }
    }
    info!("{} virtual addresses registered", virtual_addresses.len());

    let token = CancellationToken::new();
    let poller = tokio::spawn(poll_virtual(
        dispatcher,
        virtual_addresses,
        config.engine.poll_interval(),
        token.clone(),
    ));

    let types = host.types();
    if types.is_empty() {
        info!("No backend types registered yet");
    } else {
        info!("Backend types: {}", types.join(", "));
    }

    shutdown_signal().await;

    token.cancel();
    if let Err(e) = poller.await {
        error!("Poll loop panicked: {:?}", e);
    }
    engine.dispose().await;
    host.shutdown().await;
    events.abort();

    info!("Snet shutdown complete");
    Ok(())
}

/// Sample every virtual address on a fixed interval and push it through dispatch
async fn poll_virtual(
    dispatcher: Arc<Dispatcher>,
    addresses: Vec<AddressDetails>,
    period: Duration,
    token: CancellationToken,
) {
    if addresses.is_empty() {
        return;
    }
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick.tick() => {
                for details in &addresses {
                    if let Some(value) = dispatcher.read_virtual(details).await {
                        debug!(
                            address = %value.address,
                            value = %value.result,
                            quality = ?value.quality,
                            "Virtual address sampled"
                        );
                    }
                }
            }
        }
    }
}

async fn log_host_events(mut rx: broadcast::Receiver<HostEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let detail = serde_json::to_string(&event).unwrap_or_default();
                match &event {
                    HostEvent::ModuleFailed { .. }
                    | HostEvent::ConfigFailed { .. }
                    | HostEvent::OpenFailed { .. }
                    | HostEvent::UnknownTargets { .. }
                    | HostEvent::WatcherError { .. } => {
                        warn!(event = event.name(), "{}", detail)
                    }
                    HostEvent::Produced { result, .. } if !result.success => {
                        warn!(event = event.name(), "{}", detail)
                    }
                    _ => debug!(event = event.name(), "{}", detail),
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Host event log lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One-shot commands
// ─────────────────────────────────────────────────────────────────────────────

fn convert_once(tag: &str, raw: &str) -> Result<()> {
    let data_type: DataType = tag.parse()?;
    let converted = convert(data_type, &Value::from(raw));
    let line = serde_json::json!({
        "type": data_type.to_string(),
        "quality": converted.quality,
        "code": converted.quality.code(),
        "value": converted.value.to_json(),
        "message": converted.message,
    });
    println!("{}", line);
    Ok(())
}

fn list_types() -> Result<()> {
    let loader = StaticModuleLoader::with_builtin();
    for module in loader.available() {
        for export in loader.load(Path::new(&module))? {
            if export.is_hostable() {
                println!("{}\t{}", module, export.name);
            }
        }
    }
    Ok(())
}
