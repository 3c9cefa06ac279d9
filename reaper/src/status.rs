//! Single owner of the config map, the state map, and the clock string.
//! Everything the rest of the system knows about a namespace flows through
//! this loop's select; no locks anywhere.

use std::collections::HashMap;

use chrono::Utc;
use chrono_tz::Tz;

use crate::hub::{Hub, StatusChannels};
use crate::types::{CLOCK_FORMAT, NsConfig, NsState, NsStatus, Status};

pub async fn run(hub: Hub, mut rx: StatusChannels) {
    let mut configs: HashMap<String, NsConfig> = HashMap::new();
    match hub.cluster.get_settings().await {
        Ok(loaded) => {
            for cfg in loaded {
                configs.insert(cfg.name.clone(), cfg);
            }
        }
        Err(err) => tracing::warn!(error = %err, "unable to load configs from cluster"),
    }

    let mut states: HashMap<String, NsState> = HashMap::new();
    let mut clock = clock_now(&hub.zone);
    let mut dirty = false;
    let start = tokio::time::Instant::now();
    let mut clock_tick = tokio::time::interval_at(start + hub.spec.clock_tick, hub.spec.clock_tick);
    let mut config_tick = tokio::time::interval_at(start + hub.spec.config_tick, hub.spec.config_tick);

    loop {
        tokio::select! {
            // mutations drain before snapshots are served, so a snapshot
            // always reflects every update accepted before it was requested
            biased;

            Some(state) = rx.update_ns_state.recv() => {
                states.insert(state.name.clone(), state);
            }

            Some(cfg) = rx.update_ns_config.recv() => {
                configs.insert(cfg.name.clone(), cfg);
                dirty = true;
            }

            // drop namespaces that are no longer tracked
            Some(ns) = rx.rm_ns_status.recv() => {
                configs.remove(&ns);
                states.remove(&ns);
            }

            // send the current status to a client
            Some(reply) = rx.get_status.recv() => {
                let _ = reply.send(render(&configs, &states, &clock, Utc::now().timestamp()));
            }

            Some(reply) = rx.get_configs.recv() => {
                let _ = reply.send(configs.values().cloned().collect());
            }

            Some(reply) = rx.get_states.recv() => {
                let _ = reply.send(states.values().cloned().collect());
            }

            // keep the clock displayed in the UI fresh
            _ = clock_tick.tick() => {
                let now = clock_now(&hub.zone);
                if now != clock {
                    clock = now;
                }
            }

            // persist configs when something changed
            _ = config_tick.tick() => {
                if dirty {
                    let all: Vec<NsConfig> = configs.values().cloned().collect();
                    match hub.cluster.save_settings(&all).await {
                        Ok(()) => {
                            dirty = false;
                            tracing::info!("configs saved");
                        }
                        Err(err) => tracing::warn!(error = %err, "unable to save configs"),
                    }
                }
            }
        }
    }
}

fn clock_now(zone: &Tz) -> String {
    Utc::now().with_timezone(zone).format(CLOCK_FORMAT).to_string()
}

/// Render the status document. Iterates the states: a namespace with only a
/// config row is not shown until a refresh has materialized it.
fn render(
    configs: &HashMap<String, NsConfig>,
    states: &HashMap<String, NsState>,
    clock: &str,
    now: i64,
) -> String {
    let mut names: Vec<&String> = states.keys().collect();
    names.sort();

    let namespaces = names
        .into_iter()
        .map(|name| {
            let state = &states[name];
            let cfg = configs
                .get(name)
                .cloned()
                .unwrap_or_else(|| NsConfig::default_for(name));
            NsStatus {
                name: name.clone(),
                has_down_quota: state.has_down_quota,
                can_extend: now - cfg.last_started > 60 * 60,
                mem_used: state.mem_used,
                mem_limit: cfg.limit,
                auto_start_hour: cfg.auto_start_hour,
                remaining: state.remaining.clone(),
            }
        })
        .collect();

    let status = Status {
        clock: clock.to_string(),
        namespaces,
    };
    serde_json::to_string(&status).unwrap_or_else(|_| String::from("{}"))
}
