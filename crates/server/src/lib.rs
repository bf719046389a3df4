//! HTTP surface for the transfer engine.
//!
//! JSON endpoints sit behind a bearer-token gate. The progress stream and
//! upload endpoints cannot carry headers from a browser, so each request
//! presents a one-time ticket minted by `POST /auth/sse-ticket`.

mod auth;
mod error;
mod extract;
mod handlers;
mod routes;
mod state;
mod stream;

pub use auth::BearerAuth;
pub use error::ApiError;
pub use routes::{ServerConfig, router, serve};
pub use state::AppState;

/// Errors that stop the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
