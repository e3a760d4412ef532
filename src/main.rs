//! container-dns daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;

mod config;
mod dispatch;
mod dns_server;
mod error;
mod resolver;
mod runtime;
mod state;
mod types;

use config::Config;
use dispatch::run_dispatch_loop;
use dns_server::run_dns_server;
use resolver::Resolver;
use runtime::{ContainerRuntime, DockerRuntime};
use state::{AddressTable, StateTracker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = Config::load()?;
    info!("Starting container-dns with config: {:?}", cfg);

    let runtime = Arc::new(DockerRuntime::connect().await?);

    // Subscribe before listing so nothing between the two is missed.
    let source = runtime.subscribe();
    let (networks, containers) = runtime.snapshot().await?;

    let table = AddressTable::new();
    let tracker = StateTracker::new(table.clone(), runtime.clone());
    tracker.load_snapshot(networks, containers).await;
    info!(
        "Tracking {} networks with {} endpoints",
        table.network_count().await,
        table.endpoint_count().await
    );

    // DNS Server
    let resolver = Resolver::new(table, &cfg.zone);
    let dns_bind = cfg.dns_bind;
    let mut dns_handle = tokio::spawn(async move { run_dns_server(dns_bind, resolver).await });

    let result = tokio::select! {
        result = run_dispatch_loop(tracker, source, cfg.status_interval()) => {
            result.map_err(|e| e.context("event dispatch stopped"))
        }
        result = &mut dns_handle => match result {
            Ok(Ok(())) => Err(anyhow::anyhow!("DNS server exited")),
            Ok(Err(e)) => Err(e.context("DNS server failed")),
            Err(e) => Err(anyhow::anyhow!("DNS server task failed: {}", e)),
        },
        res = signal::ctrl_c() => {
            match res {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
            Ok(())
        }
    };

    dns_handle.abort();
    if let Err(ref e) = result {
        error!("{:#}", e);
    }
    info!("Shutdown complete.");
    result
}
