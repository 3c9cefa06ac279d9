use serde::{Deserialize, Serialize};

/// Hours in the uptime window.
pub const WINDOW_HOURS: i64 = 8;

/// Memory quota in GiB assigned to namespaces with no stored config.
pub const DEFAULT_LIMIT_GIB: i64 = 10;

pub const GIB: i64 = 1024 * 1024 * 1024;

pub const QUOTA_NAME: &str = "reaper-quota";
pub const DOWN_QUOTA_NAME: &str = "reaper-down-quota";
pub const LIMIT_RANGE_NAME: &str = "reaper-limit";
pub const POD_REQUEST: &str = "512Mi";
pub const POD_LIMIT: &str = "512Mi";

/// ConfigMap holding the persisted namespace configs, and where it lives.
pub const CONFIG_MAP_NAME: &str = "podreaper-goconfig";
pub const CONFIG_NAMESPACE: &str = "podreaper";
pub const CONFIG_KEY: &str = "config";

/// Field manager for server-side apply.
pub const MANAGER: &str = "podreaper";

/// Clock string shown in the UI, e.g. "14:05 UTC".
pub const CLOCK_FORMAT: &str = "%H:%M %Z";

/// Per-namespace settings configured via the UI, persisted in the cluster.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NsConfig {
    pub name: String,
    #[serde(default)]
    pub auto_start_hour: Option<u32>,
    pub last_started: i64,
    pub limit: i64,
}

impl NsConfig {
    /// Row synthesized for namespaces that have never been configured.
    pub fn default_for(name: &str) -> Self {
        NsConfig {
            name: name.to_string(),
            auto_start_hour: None,
            last_started: 0,
            limit: DEFAULT_LIMIT_GIB,
        }
    }
}

/// Namespace data derived from the cluster on each refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct NsState {
    pub name: String,
    pub has_down_quota: bool,
    pub mem_used: i64,
    pub remaining: String,
    pub last_scheduled: i64,
}

/// Namespace data required by the UI.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NsStatus {
    pub name: String,
    pub has_down_quota: bool,
    pub can_extend: bool,
    pub mem_used: i64,
    pub mem_limit: i64,
    pub auto_start_hour: Option<u32>,
    pub remaining: String,
}

/// The document served to the UI.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Status {
    pub clock: String,
    pub namespaces: Vec<NsStatus>,
}

// POST requests from the UI.

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub namespace: String,
    #[serde(default)]
    pub start_hour: Option<u32>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LimitRequest {
    pub namespace: String,
    pub limit: i64,
}
