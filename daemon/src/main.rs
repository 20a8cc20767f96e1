use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info, LevelFilter};
use tokio::sync::watch;

use clearhouse_common::task::spawn_task;
use clearhouse_daemon::{
    auth::start_auth_cleaner,
    chain::{client::HttpChainClient, ingest::EventIngestor, worker::ActionWorker},
    config::{NodeConfig, VERSION},
    core::broker::Broker,
    rpc::RpcServer,
};

#[derive(Parser)]
#[command(name = "clearhoused", version = VERSION, about = "Clearhouse clearing node")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: String,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init_logging(level: LevelFilter) -> anyhow::Result<()> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] [{}] {}",
                chrono_free_timestamp(),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("actix_server", LevelFilter::Warn)
        .level_for("actix_http", LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()
        .context("logger already initialized")
}

// RFC3339-ish timestamp without pulling a date-time crate into the hot
// logging path.
fn chrono_free_timestamp() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level)?;
    info!("clearhouse daemon {} starting", VERSION);

    let config = NodeConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config))?;
    let broker = Broker::new(&config).context("initializing broker")?;
    info!("Broker address: {}", broker.address());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut chain_tasks = Vec::new();

    for chain in config.chains.clone() {
        let client = Arc::new(HttpChainClient::new(
            chain.rpc_url.clone(),
            chain.submitter_url.clone(),
        ));

        let ingestor = EventIngestor::new(broker.clone(), chain.clone(), client.clone());
        chain_tasks.push(spawn_task("event-listener", {
            let shutdown = shutdown_rx.clone();
            async move { ingestor.run(shutdown).await }
        }));

        let worker = ActionWorker::new(broker.clone(), chain.id, client);
        chain_tasks.push(spawn_task("action-worker", {
            let shutdown = shutdown_rx.clone();
            async move { worker.run(shutdown).await }
        }));
        info!("Chain {} ({}) wired", chain.id, chain.name);
    }

    start_auth_cleaner(broker.clone(), shutdown_rx.clone());

    let server = RpcServer::start(broker.clone(), &config.bind_address).await?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutdown requested");

    if shutdown_tx.send(true).is_err() {
        error!("No tasks were listening for shutdown");
    }
    server.stop().await;
    for task in chain_tasks {
        let _ = task.await;
    }
    info!("Bye");
    Ok(())
}
