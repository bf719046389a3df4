//! Extractors that reject with [`ApiError`] instead of plain text.

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// `Json<T>` whose rejection is a JSON error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// `?ticket=` on stream and upload URLs.
#[derive(Debug, Default, Deserialize)]
pub struct TicketQuery {
    pub ticket: Option<String>,
}

/// `?prefix=` on object listings.
#[derive(Debug, Default, Deserialize)]
pub struct PrefixQuery {
    #[serde(default)]
    pub prefix: String,
}
