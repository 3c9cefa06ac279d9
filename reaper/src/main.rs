use std::sync::Arc;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use clap::Parser;
use owo_colors::OwoColorize;

mod args;
mod error;
mod hub;
mod k8s;
mod namespaces;
mod ranger;
mod reaper;
mod server;
mod status;
mod types;
mod uptime;

use args::Specification;
use k8s::{ClusterApi, K8sCluster};

#[tokio::main]
async fn main() -> Result<()> {
    podreaper_common::init();
    tracing_subscriber::fmt::init();

    let spec = Specification::parse();
    let zone: Tz = spec
        .zone_id
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid ZONE_ID {:?}: {e}", spec.zone_id))?;
    tracing::info!(zone = %zone, ignored = ?spec.ignored_namespaces, "starting podreaper");

    let cluster = K8sCluster::connect(spec.in_cluster)
        .await
        .context("unable to build cluster client")?;
    match cluster.server_version().await {
        Ok(version) => tracing::info!(%version, "connected to cluster"),
        Err(err) => tracing::warn!(error = %err, "cluster version check failed"),
    }

    let (hub, status_rx, trigger_rx) = hub::channels(Arc::new(cluster), zone, spec.clone());
    tokio::spawn(status::run(hub.clone(), status_rx));
    tokio::spawn(namespaces::run(hub.clone(), trigger_rx));
    tokio::spawn(ranger::run(hub.clone()));
    tokio::spawn(reaper::run(hub.clone()));

    println!("{}", "podreaper is watching".green());
    server::run(hub, &spec).await
}
