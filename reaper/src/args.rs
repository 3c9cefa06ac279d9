use std::time::Duration;

use clap::Parser;

/// Runtime configuration. Every knob is an environment variable first and a
/// flag second, so the container spec stays a plain env list.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Specification {
    /// Namespaces that are never managed
    #[arg(
        long,
        env = "IGNORED_NAMESPACES",
        value_delimiter = ',',
        default_value = "kube-system,kube-public,kube-node-lease,podreaper,docker"
    )]
    pub ignored_namespaces: Vec<String>,

    /// Time zone for the auto-start hour and the UI clock
    #[arg(long, env = "ZONE_ID", default_value = "UTC")]
    pub zone_id: String,

    #[arg(long, env = "CORS_ENABLED", default_value_t = false, action = clap::ArgAction::Set)]
    pub cors_enabled: bool,

    #[arg(
        long,
        env = "CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000"
    )]
    pub cors_origins: Vec<String>,

    /// Use the in-cluster service account instead of the local kubeconfig
    #[arg(long, env = "IN_CLUSTER", default_value_t = false, action = clap::ArgAction::Set)]
    pub in_cluster: bool,

    /// Directory of UI assets to serve at /; empty disables
    #[arg(long, env = "STATIC_FILES", default_value = "")]
    pub static_files: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Tick cadences. These bound staleness; none of them need to line up.
    #[arg(long, env = "NAMESPACE_TICK", value_parser = tick, default_value = "11s")]
    pub namespace_tick: Duration,

    #[arg(long, env = "NAMESPACES_TICK", value_parser = tick, default_value = "17s")]
    pub namespaces_tick: Duration,

    #[arg(long, env = "RANGER_TICK", value_parser = tick, default_value = "41s")]
    pub ranger_tick: Duration,

    #[arg(long, env = "CLOCK_TICK", value_parser = tick, default_value = "13s")]
    pub clock_tick: Duration,

    #[arg(long, env = "CONFIG_TICK", value_parser = tick, default_value = "17s")]
    pub config_tick: Duration,

    #[arg(long, env = "REAPER_TICK", value_parser = tick, default_value = "29s")]
    pub reaper_tick: Duration,
}

fn tick(arg: &str) -> Result<Duration, String> {
    parse_duration::parse(arg).map_err(|e| e.to_string())
}
