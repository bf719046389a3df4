//! API error type and its HTTP mapping.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use stevedore_protocol::ErrorResponse;
use stevedore_storage::StorageError;
use stevedore_ticket::TicketError;
use stevedore_transfer::{PlanningError, TransferError};
use tracing::{debug, error};

/// Errors returned by request handlers. Every variant renders as a JSON
/// [`ErrorResponse`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid ticket: {0}")]
    Ticket(#[from] TicketError),

    #[error("unknown location: {0}")]
    LocationNotFound(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<PlanningError> for ApiError {
    fn from(e: PlanningError) -> Self {
        Self::Transfer(e.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

fn storage_status(e: &StorageError) -> StatusCode {
    match e {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::InvalidKey(_) | StorageError::Unsupported(_) => StatusCode::BAD_REQUEST,
        StorageError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Transfer(e) => match e {
                TransferError::Planning(p) => match p {
                    PlanningError::UnknownLocation(_) => StatusCode::NOT_FOUND,
                    PlanningError::Unavailable(_) => StatusCode::CONFLICT,
                    PlanningError::Listing { source, .. } | PlanningError::Probe { source, .. } => {
                        match storage_status(source) {
                            StatusCode::NOT_FOUND => StatusCode::NOT_FOUND,
                            _ => StatusCode::BAD_GATEWAY,
                        }
                    }
                    _ => StatusCode::BAD_REQUEST,
                },
                TransferError::JobNotFound(_) => StatusCode::NOT_FOUND,
                TransferError::JobActive(_) => StatusCode::CONFLICT,
                TransferError::DuplicateJob(_) => StatusCode::INTERNAL_SERVER_ERROR,
                TransferError::Storage(e) => storage_status(e),
            },
            Self::Storage(e) => storage_status(e),
            Self::Ticket(_) | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::LocationNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
        });
        (status, body).into_response()
    }
}
