//! The hub every loop hangs off: the cluster handle, the configured zone
//! and ignore list, and the sending halves of the channels. Each map has a
//! single owning task; everyone else goes through these senders.

use std::collections::HashSet;
use std::sync::Arc;

use chrono_tz::Tz;
use tokio::sync::{mpsc, oneshot};

use crate::args::Specification;
use crate::k8s::ClusterApi;
use crate::types::{NsConfig, NsState};

#[derive(Clone)]
pub struct Hub {
    pub cluster: Arc<dyn ClusterApi>,
    pub zone: Tz,
    pub ignored: HashSet<String>,
    pub spec: Specification,

    trigger_ns: mpsc::Sender<String>,
    update_ns_state: mpsc::Sender<NsState>,
    update_ns_config: mpsc::Sender<NsConfig>,
    rm_ns_status: mpsc::Sender<String>,
    get_status: mpsc::Sender<oneshot::Sender<String>>,
    get_configs: mpsc::Sender<oneshot::Sender<Vec<NsConfig>>>,
    get_states: mpsc::Sender<oneshot::Sender<Vec<NsState>>>,
}

/// Receiving halves owned by the status loop.
pub struct StatusChannels {
    pub update_ns_state: mpsc::Receiver<NsState>,
    pub update_ns_config: mpsc::Receiver<NsConfig>,
    pub rm_ns_status: mpsc::Receiver<String>,
    pub get_status: mpsc::Receiver<oneshot::Sender<String>>,
    pub get_configs: mpsc::Receiver<oneshot::Sender<Vec<NsConfig>>>,
    pub get_states: mpsc::Receiver<oneshot::Sender<Vec<NsState>>>,
}

/// Build the hub and hand the receivers to their owners: the status-loop
/// bundle, and the refresh trigger consumed by the discovery loop.
pub fn channels(
    cluster: Arc<dyn ClusterApi>,
    zone: Tz,
    spec: Specification,
) -> (Hub, StatusChannels, mpsc::Receiver<String>) {
    let (trigger_ns, trigger_rx) = mpsc::channel(1);
    let (update_ns_state, update_ns_state_rx) = mpsc::channel(1);
    let (update_ns_config, update_ns_config_rx) = mpsc::channel(1);
    let (rm_ns_status, rm_ns_status_rx) = mpsc::channel(1);
    let (get_status, get_status_rx) = mpsc::channel(1);
    let (get_configs, get_configs_rx) = mpsc::channel(1);
    let (get_states, get_states_rx) = mpsc::channel(1);
    let ignored = spec.ignored_namespaces.iter().cloned().collect();
    (
        Hub {
            cluster,
            zone,
            ignored,
            spec,
            trigger_ns,
            update_ns_state,
            update_ns_config,
            rm_ns_status,
            get_status,
            get_configs,
            get_states,
        },
        StatusChannels {
            update_ns_state: update_ns_state_rx,
            update_ns_config: update_ns_config_rx,
            rm_ns_status: rm_ns_status_rx,
            get_status: get_status_rx,
            get_configs: get_configs_rx,
            get_states: get_states_rx,
        },
        trigger_rx,
    )
}

impl Hub {
    /// The rendered status document.
    pub async fn status(&self) -> String {
        let (tx, rx) = oneshot::channel();
        if self.get_status.send(tx).await.is_err() {
            return String::from("{}");
        }
        rx.await.unwrap_or_else(|_| String::from("{}"))
    }

    /// Snapshot of all namespace configs.
    pub async fn configs(&self) -> Vec<NsConfig> {
        let (tx, rx) = oneshot::channel();
        if self.get_configs.send(tx).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Snapshot of all namespace states.
    pub async fn states(&self) -> Vec<NsState> {
        let (tx, rx) = oneshot::channel();
        if self.get_states.send(tx).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// The config for one namespace, synthesizing the default row when the
    /// namespace has never been configured.
    pub async fn config_for(&self, name: &str) -> NsConfig {
        self.configs()
            .await
            .into_iter()
            .find(|cfg| cfg.name == name)
            .unwrap_or_else(|| NsConfig::default_for(name))
    }

    pub async fn update_config(&self, cfg: NsConfig) {
        let _ = self.update_ns_config.send(cfg).await;
    }

    pub async fn update_state(&self, state: NsState) {
        let _ = self.update_ns_state.send(state).await;
    }

    /// Drop both the config and state rows for a namespace.
    pub async fn remove(&self, name: &str) {
        let _ = self.rm_ns_status.send(name.to_string()).await;
    }

    /// Sender cloned into each per-namespace ticker.
    pub fn trigger_sender(&self) -> mpsc::Sender<String> {
        self.trigger_ns.clone()
    }
}
