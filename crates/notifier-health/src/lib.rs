//! `GET /healthz` and `GET /metrics` over the runner's shared counters.
//! Disabled entirely when `health.port == 0` — callers should simply not
//! call [`serve`] in that case rather than binding port 0.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use notifier_core::RunnerMetrics;
use std::net::SocketAddr;
use std::sync::Arc;

async fn healthz(State(metrics): State<Arc<RunnerMetrics>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "live": metrics.is_live() }))
}

async fn metrics_handler(State(metrics): State<Arc<RunnerMetrics>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "eventsConsumed": metrics.events_consumed(),
        "eventsProcessed": metrics.events_processed(),
        "notificationsProduced": metrics.notifications_produced(),
        "duplicatesSkipped": metrics.duplicates_skipped(),
    }))
}

/// Binds `0.0.0.0:<port>` and serves until the process exits. Intended
/// to be spawned as its own task; errors are returned to the caller
/// rather than panicking the process.
pub async fn serve(port: u16, metrics: Arc<RunnerMetrics>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "health surface listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_reports_liveness_flag() {
        let metrics = Arc::new(RunnerMetrics::new());
        let response = healthz(State(metrics.clone())).await;
        assert_eq!(response.0["live"], true);

        metrics.set_live(false);
        let response = healthz(State(metrics)).await;
        assert_eq!(response.0["live"], false);
    }

    #[tokio::test]
    async fn metrics_reports_all_four_counters() {
        let metrics = Arc::new(RunnerMetrics::new());
        metrics.add_events_consumed(3);
        metrics.inc_events_processed();
        metrics.inc_notifications_produced();
        metrics.inc_duplicates_skipped();

        let response = metrics_handler(State(metrics)).await;
        assert_eq!(response.0["eventsConsumed"], 3);
        assert_eq!(response.0["eventsProcessed"], 1);
        assert_eq!(response.0["notificationsProduced"], 1);
        assert_eq!(response.0["duplicatesSkipped"], 1);
    }
}
