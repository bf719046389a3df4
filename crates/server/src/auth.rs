//! Bearer-token gate for the JSON API.
//!
//! Stream and upload URLs are not behind this gate; they carry a one-time
//! ticket instead.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ApiError;

/// Accepted bearer tokens. An empty set lets every request through.
#[derive(Debug, Default)]
pub struct BearerAuth {
    tokens: Vec<String>,
}

impl BearerAuth {
    pub fn new(tokens: Vec<String>) -> Self {
        let tokens: Vec<String> = tokens.into_iter().filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            warn!("no API tokens configured, authentication is disabled");
        }
        Self { tokens }
    }

    pub fn is_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Compares against every configured token in constant time.
    pub fn accepts(&self, token: &str) -> bool {
        self.tokens
            .iter()
            .fold(0u8, |hit, t| hit | t.as_bytes().ct_eq(token.as_bytes()).unwrap_u8())
            == 1
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

pub async fn require_bearer(State(auth): State<Arc<BearerAuth>>, request: Request, next: Next) -> Response {
    if !auth.is_enabled() {
        return next.run(request).await;
    }
    match bearer_token(&request) {
        Some(token) if auth.accepts(token) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "rejected bearer token");
            ApiError::Unauthorized("invalid bearer token").into_response()
        }
        None => ApiError::Unauthorized("missing bearer token").into_response(),
    }
}
