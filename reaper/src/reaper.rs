//! The loop that actually brings namespaces up and down. Works from the
//! status loop's snapshots but re-checks cluster truth before every write,
//! so a stale snapshot costs at most one no-op call.

use std::collections::HashMap;

use chrono::Utc;

use crate::hub::Hub;
use crate::types::{DOWN_QUOTA_NAME, NsConfig, WINDOW_HOURS};
use crate::uptime;

pub async fn run(hub: Hub) {
    // first evaluation waits a full period
    let period = hub.spec.reaper_tick;
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tick.tick().await;
        reap(&hub).await;
    }
}

pub(crate) async fn reap(hub: &Hub) {
    let configs: HashMap<String, NsConfig> = hub
        .configs()
        .await
        .into_iter()
        .map(|cfg| (cfg.name.clone(), cfg))
        .collect();
    let now = Utc::now().timestamp();

    for state in hub.states().await {
        let ns = &state.name;
        let last_started = configs.get(ns).map(|cfg| cfg.last_started).unwrap_or(0);
        let started = state.last_scheduled.max(last_started);
        let should_run = uptime::hours_between(started, now) < WINDOW_HOURS;

        // change up/down state
        if state.has_down_quota && should_run {
            bring_up(ns, hub).await;
        }
        if !state.has_down_quota && !should_run {
            bring_down(ns, hub).await;
        }

        // kill any pods still running outside the window
        if !should_run {
            if let Err(err) = hub.cluster.delete_pods(ns).await {
                tracing::warn!(namespace = %ns, error = %err, "unable to delete pods");
            }
        }
    }
}

async fn bring_up(ns: &str, hub: &Hub) {
    if hub.cluster.has_quota(ns, DOWN_QUOTA_NAME).await {
        match hub.cluster.delete_quota(ns, DOWN_QUOTA_NAME).await {
            Ok(()) => tracing::info!(namespace = %ns, "bringing up"),
            Err(err) => tracing::warn!(namespace = %ns, error = %err, "unable to bring up"),
        }
    }
}

async fn bring_down(ns: &str, hub: &Hub) {
    if !hub.cluster.has_quota(ns, DOWN_QUOTA_NAME).await {
        match hub.cluster.set_quota(ns, DOWN_QUOTA_NAME, 0).await {
            Ok(()) => tracing::info!(namespace = %ns, "bringing down"),
            Err(err) => tracing::warn!(namespace = %ns, error = %err, "unable to bring down"),
        }
    }
}
