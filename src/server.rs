use std::future::Future;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    health::{self, Health},
    metrics::{MetricsTranslator, TEXT_CONTENT_TYPE},
    store::SnapshotStore,
    types::Snapshot,
};

#[derive(Clone, Debug)]
pub struct AppState {
    pub store: SnapshotStore,
    pub metrics: MetricsTranslator,
    pub health: Health,
}

impl AppState {
    pub fn new(store: SnapshotStore, health: Health) -> Self {
        Self {
            metrics: MetricsTranslator::new(store.clone()),
            store,
            health,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/healthz", get(get_health))
        .route("/api/snapshot", get(get_snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the exporter until `shutdown` resolves.
pub async fn serve(
    listen: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn get_metrics(State(app): State<AppState>) -> Response {
    let body = app.metrics.render();
    ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response()
}

async fn get_health(State(app): State<AppState>) -> Response {
    match app.health.check() {
        health::Status::Healthy => (StatusCode::OK, "ok").into_response(),
        health::Status::Stale(age) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!(
                "last scan is {}s old (max {}s)",
                age.as_secs(),
                app.health.max_age().as_secs()
            ),
        )
            .into_response(),
        health::Status::NoSnapshot => {
            (StatusCode::SERVICE_UNAVAILABLE, "no scan completed yet").into_response()
        }
    }
}

#[derive(Serialize)]
struct SnapshotView<'a> {
    #[serde(with = "time::serde::rfc3339")]
    published_at: OffsetDateTime,
    age_seconds: f64,
    snapshot: &'a Snapshot,
}

async fn get_snapshot(State(app): State<AppState>) -> Response {
    match app.store.current() {
        Some(published) => {
            let view = SnapshotView {
                published_at: published.published_at,
                age_seconds: published.age().as_secs_f64(),
                snapshot: &published.snapshot,
            };
            (StatusCode::OK, Json(view)).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
