//! Local HTTP endpoints for exercising the network adapters.

use axum::Router;
use tokio::net::TcpListener;

/// Binds an ephemeral port, builds the app from its base URL and serves it
/// in the background. Returns the base URL, e.g. `http://127.0.0.1:41234`.
pub async fn spawn(build: impl FnOnce(String) -> Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = build(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}
