//! JSON handlers behind the bearer gate.

use axum::Json;
use axum::extract::{Path, Query, State};
use stevedore_protocol::{
    CancelResponse, CheckConflictsRequest, CheckConflictsResponse, CleanupResponse,
    HuggingFaceImportRequest, JobFilesResponse, LocationInfo, ObjectInfo, ResourceType, TicketRequest,
    TicketResponse, TransferRequest, TransferStarted,
};
use stevedore_storage::validate_key;
use tracing::info;

use crate::error::ApiError;
use crate::extract::{ApiJson, PrefixQuery};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

pub async fn start_transfer(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<TransferRequest>,
) -> Result<Json<TransferStarted>, ApiError> {
    let started = state.transfers.start_transfer(request).await?;
    info!(job_id = %started.job_id, "transfer accepted");
    Ok(Json(started))
}

pub async fn check_conflicts(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CheckConflictsRequest>,
) -> Result<Json<CheckConflictsResponse>, ApiError> {
    Ok(Json(state.transfers.check_conflicts(request).await?))
}

pub async fn import_huggingface(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<HuggingFaceImportRequest>,
) -> Result<Json<TransferStarted>, ApiError> {
    let repo_id = request.repo_id.clone();
    let started = state.transfers.import_huggingface(request).await?;
    info!(job_id = %started.job_id, repo = %repo_id, "import accepted");
    Ok(Json(started))
}

pub async fn job_files(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobFilesResponse>, ApiError> {
    Ok(Json(state.transfers.files(&job_id)?))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    Ok(Json(state.transfers.cancel(&job_id)?))
}

pub async fn cleanup_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CleanupResponse>, ApiError> {
    Ok(Json(state.transfers.cleanup(&job_id).await?))
}

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

/// Mints a ticket for an existing job, or for an upload target inside a
/// configured location.
pub async fn issue_ticket(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<TicketRequest>,
) -> Result<Json<TicketResponse>, ApiError> {
    match request.resource_type {
        ResourceType::Transfer => {
            if !state.transfers.job_exists(&request.resource) {
                return Err(stevedore_transfer::TransferError::JobNotFound(request.resource).into());
            }
        }
        ResourceType::Upload => {
            let (location_id, key) = request.resource.split_once('/').ok_or_else(|| {
                ApiError::InvalidRequest("upload resource must be <locationId>/<key>".into())
            })?;
            if state.transfers.locations().get(location_id).is_none() {
                return Err(ApiError::LocationNotFound(location_id.to_string()));
            }
            validate_key(key)?;
        }
    }
    Ok(Json(state.tickets.issue(&request.resource, request.resource_type)))
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

pub async fn list_locations(State(state): State<AppState>) -> Json<Vec<LocationInfo>> {
    Json(state.transfers.locations().describe().await)
}

pub async fn list_objects(
    State(state): State<AppState>,
    Path(location_id): Path<String>,
    Query(query): Query<PrefixQuery>,
) -> Result<Json<Vec<ObjectInfo>>, ApiError> {
    let location = state
        .transfers
        .locations()
        .get(&location_id)
        .ok_or(ApiError::LocationNotFound(location_id))?;
    let entries = location.adapter.list(&query.prefix).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| ObjectInfo {
                key: e.key,
                size: e.size,
                is_dir_marker: e.is_dir_marker,
            })
            .collect(),
    ))
}
