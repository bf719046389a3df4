//! Ticket-gated endpoints: the progress stream and streaming uploads.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use stevedore_protocol::{ProgressEvent, ResourceType, UploadResponse};
use stevedore_storage::{ByteStream, StorageError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::extract::TicketQuery;
use crate::state::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

fn redeem(
    state: &AppState,
    query: TicketQuery,
    resource_type: ResourceType,
    resource: &str,
) -> Result<(), ApiError> {
    let ticket = query.ticket.ok_or(ApiError::Unauthorized("missing ticket"))?;
    state.tickets.redeem_for(&ticket, resource_type, resource)?;
    Ok(())
}

/// `GET /transfer/{job_id}/events?ticket=`: server-sent progress events,
/// starting from the job's current state.
pub async fn progress_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<TicketQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    redeem(&state, query, ResourceType::Transfer, &job_id)?;
    let events = state.transfers.subscribe(&job_id)?;
    debug!(job_id = %job_id, "progress stream opened");

    let stream = sse_events(events, state.shutdown.clone());
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

/// Frames progress events for SSE. The stream ends at the job's terminal
/// event or when `shutdown` fires, whichever comes first.
fn sse_events(
    events: impl Stream<Item = ProgressEvent> + Send + 'static,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    events
        .take_until(shutdown.cancelled_owned())
        .filter_map(|event| async move {
            match Event::default().event("progress").json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    debug!(error = %e, "dropping unserializable event");
                    None
                }
            }
        })
}

/// `PUT /upload/{location_id}/{*key}?ticket=`: streams the request body
/// into the location.
pub async fn upload(
    State(state): State<AppState>,
    Path((location_id, key)): Path<(String, String)>,
    Query(query): Query<TicketQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, ApiError> {
    redeem(&state, query, ResourceType::Upload, &format!("{location_id}/{key}"))?;
    let location = state
        .transfers
        .locations()
        .get(&location_id)
        .ok_or_else(|| ApiError::LocationNotFound(location_id.clone()))?;

    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let stream: ByteStream = Box::pin(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(|e| StorageError::Aborted(e.to_string()))),
    );

    let bytes_written = location.adapter.stream_write(&key, stream, size).await?;
    info!(location = %location_id, key = %key, bytes = bytes_written, "upload stored");
    Ok(Json(UploadResponse { key, bytes_written }))
}
