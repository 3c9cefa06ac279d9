//! Namespace discovery and refresh. The discovery loop both finds new
//! namespaces and consumes the per-ticker trigger channel, so the ticker
//! registry is only ever touched from one task.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;
use crate::hub::Hub;
use crate::k8s::{ClusterApi, QuotaSnapshot};
use crate::types::{DOWN_QUOTA_NAME, GIB, NsState, QUOTA_NAME};
use crate::uptime;

pub async fn run(hub: Hub, mut trigger: mpsc::Receiver<String>) {
    // name -> one-shot stop signal for that namespace's ticker
    let mut tickers: HashMap<String, oneshot::Sender<()>> = HashMap::new();
    let mut sweep = tokio::time::interval(hub.spec.namespaces_tick);

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                check_namespaces(&mut tickers, &hub).await;
            }

            Some(ns) = trigger.recv() => {
                if let Err(err) = refresh(&ns, &hub).await {
                    if hub.cluster.exists(&ns).await {
                        tracing::warn!(namespace = %ns, error = %err, "unable to refresh namespace");
                    } else {
                        if let Some(stop) = tickers.remove(&ns) {
                            let _ = stop.send(());
                        }
                        hub.remove(&ns).await;
                        tracing::info!(namespace = %ns, "namespace gone, no longer updating");
                    }
                }
            }
        }
    }
}

/// Start tickers for namespaces we haven't seen before.
async fn check_namespaces(tickers: &mut HashMap<String, oneshot::Sender<()>>, hub: &Hub) {
    let namespaces = match hub.cluster.list_namespaces().await {
        Ok(namespaces) => namespaces,
        Err(err) => {
            tracing::warn!(error = %err, "unable to retrieve namespaces");
            return;
        }
    };
    for ns in namespaces {
        if hub.ignored.contains(&ns) || tickers.contains_key(&ns) {
            continue;
        }
        tracing::info!(namespace = %ns, "created ticker");
        let stop = spawn_ticker(ns.clone(), hub.spec.namespace_tick, hub.trigger_sender());
        tickers.insert(ns, stop);
    }
}

/// Periodic refresh trigger for one namespace. Runs until discovery fires
/// the stop signal (or drops it), or the trigger channel closes.
fn spawn_ticker(
    name: String,
    period: Duration,
    trigger: mpsc::Sender<String>,
) -> oneshot::Sender<()> {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        // first trigger waits a full period
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = &mut stop_rx => return,
                _ = tick.tick() => {
                    if trigger.send(name.clone()).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
    stop_tx
}

/// One refresh pass: check the namespace is active, reconcile its memory
/// quota, then publish the derived state.
pub(crate) async fn refresh(name: &str, hub: &Hub) -> Result<(), Error> {
    let phase = hub.cluster.phase_of(name).await?;
    if phase != "Active" {
        return Err(Error::NotActive {
            name: name.to_string(),
            phase,
        });
    }

    let cfg = hub.config_for(name).await;
    let quota = ensure_quota(name, cfg.limit, hub.cluster.as_ref()).await?;

    let now = Utc::now().with_timezone(&hub.zone);
    let last_scheduled = uptime::last_scheduled(cfg.auto_start_hour, &now);
    let started = cfg.last_started.max(last_scheduled);
    let seconds = uptime::remaining_seconds(started, now.timestamp());

    hub.update_state(NsState {
        name: name.to_string(),
        has_down_quota: hub.cluster.has_quota(name, DOWN_QUOTA_NAME).await,
        mem_used: quota.used_bytes / GIB,
        remaining: uptime::format_remaining(seconds),
        last_scheduled,
    })
    .await;
    Ok(())
}

/// Make sure the namespace quota exists and matches the configured limit.
async fn ensure_quota(
    ns: &str,
    limit_gib: i64,
    cluster: &dyn ClusterApi,
) -> Result<QuotaSnapshot, Error> {
    let hard_bytes = limit_gib * GIB;
    match cluster.get_quota(ns, QUOTA_NAME).await? {
        Some(quota) => {
            if quota.hard_bytes != hard_bytes {
                cluster.set_quota(ns, QUOTA_NAME, hard_bytes).await?;
            }
            Ok(QuotaSnapshot {
                hard_bytes,
                used_bytes: quota.used_bytes,
            })
        }
        None => {
            tracing::info!(namespace = %ns, "creating default quota");
            cluster.set_quota(ns, QUOTA_NAME, hard_bytes).await?;
            Ok(QuotaSnapshot {
                hard_bytes,
                used_bytes: 0,
            })
        }
    }
}
