//! Makes sure every tracked namespace carries a default container limit
//! range, so pods without explicit requests still get bounded.

use crate::hub::Hub;

pub async fn run(hub: Hub) {
    // first sweep waits a full period
    let period = hub.spec.ranger_tick;
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tick.tick().await;
        for state in hub.states().await {
            if let Err(err) = hub.cluster.ensure_limit_range(&state.name).await {
                tracing::warn!(namespace = %state.name, error = %err, "unable to ensure limit range");
            }
        }
    }
}
