//! Router assembly and the listener loop.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post, put};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::ServerError;
use crate::auth::require_bearer;
use crate::handlers;
use crate::state::AppState;
use crate::stream;

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Prefix for URLs handed to clients, e.g. behind a reverse proxy.
    /// Empty yields relative URLs.
    #[serde(default)]
    pub public_base_url: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: String::new(),
        }
    }
}

/// Builds the full API router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/transfer", post(handlers::start_transfer))
        .route("/transfer/check-conflicts", post(handlers::check_conflicts))
        .route(
            "/transfer/{job_id}",
            get(handlers::job_files).delete(handlers::cancel_job),
        )
        .route("/transfer/{job_id}/cleanup", post(handlers::cleanup_job))
        .route("/import/huggingface", post(handlers::import_huggingface))
        .route("/auth/sse-ticket", post(handlers::issue_ticket))
        .route("/locations", get(handlers::list_locations))
        .route("/locations/{location_id}/objects", get(handlers::list_objects))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.auth),
            require_bearer,
        ));

    let ticketed = Router::new()
        .route("/transfer/{job_id}/events", get(stream::progress_events))
        .route(
            "/upload/{location_id}/{*key}",
            put(stream::upload).layer(DefaultBodyLimit::disable()),
        );

    api.merge(ticketed)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API until the state's shutdown token fires, then drains open
/// requests. Progress streams end on the same token.
pub async fn serve(config: &ServerConfig, state: AppState) -> Result<(), ServerError> {
    let listener = TcpListener::bind(&config.bind)
        .await
        .map_err(|source| ServerError::Bind {
            address: config.bind.clone(),
            source,
        })?;
    info!(addr = %listener.local_addr()?, "API listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("API stopped");
    Ok(())
}
