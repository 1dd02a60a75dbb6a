//! HTTP server for pawsweepd

use crate::capture::CaptureGate;
use crate::coordinator::CoordinatorHandle;
use crate::inference::InferenceGate;
use crate::live::LiveBus;
use crate::presence::TestSignalHandle;
use crate::{routes, ws};
use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub coordinator: CoordinatorHandle,
    pub capture: Arc<CaptureGate>,
    pub inference: Arc<InferenceGate>,
    pub bus: LiveBus,
    /// Present only when presence comes from the bench signal
    pub test_signal: Option<TestSignalHandle>,
}

impl AppState {
    pub fn new(
        coordinator: CoordinatorHandle,
        capture: Arc<CaptureGate>,
        inference: Arc<InferenceGate>,
        bus: LiveBus,
        test_signal: Option<TestSignalHandle>,
    ) -> Self {
        Self {
            coordinator,
            capture,
            inference,
            bus,
            test_signal,
        }
    }
}

/// Build the full router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::status_routes())
        .merge(routes::cleaning_routes())
        .merge(routes::capture_routes())
        .merge(routes::config_routes())
        .merge(ws::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Run the HTTP server until `shutdown` resolves.
pub async fn run(
    state: AppState,
    bind: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = app(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    info!("  Listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
