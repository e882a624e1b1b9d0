//! Route handlers. Each one parses its inputs, calls the engine, and shapes
//! the JSON reply; the engine owns every decision.

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::engine::{ProbeOutcome, UploadOutcome};
use crate::hash::ContentHash;
use crate::model::Checkpoint;
use crate::progress::JobStatus;
use crate::results::{Occurrence, ResultSet};
use crate::session::SessionId;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub session_id: Option<String>,
    #[serde(default)]
    pub force_fresh: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

/// POST /upload response: the decision plus the session that owns any job.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub outcome: UploadOutcome,
}

#[derive(Debug, Serialize)]
pub struct JobStartedResponse {
    pub job_id: Uuid,
    pub hash: ContentHash,
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub cancel_requested: bool,
}

#[derive(Debug, Serialize)]
pub struct PagesResponse {
    pub hash: ContentHash,
    pub pages: usize,
    pub images: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FindResponse {
    pub hash: ContentHash,
    pub find_number: String,
    pub occurrences: Vec<Occurrence>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

fn parse_hash(raw: &str) -> ApiResult<ContentHash> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("not a content hash: {raw}")))
}

fn parse_job_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("not a job id: {raw}")))
}

/// The caller's session, or a fresh one when the client did not send any.
fn session_or_new(raw: Option<String>) -> ApiResult<SessionId> {
    match raw {
        Some(id) => Ok(SessionId::new(id)?),
        None => Ok(SessionId::generate()),
    }
}

/// POST /upload
pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let session = session_or_new(query.session_id)?;
    let outcome = state
        .engine
        .upload(&body, &session, query.force_fresh)
        .await?;
    let status = match outcome {
        UploadOutcome::Started { .. } => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((
        status,
        Json(UploadResponse {
            session_id: session,
            outcome,
        }),
    ))
}

/// POST /probe
pub async fn probe(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<ProbeOutcome>> {
    Ok(Json(state.engine.probe(&body).await?))
}

/// POST /resume
pub async fn resume(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let session = session_or_new(query.session_id)?;
    let job_id = state.engine.resume(&body, &session).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobStartedResponse {
            job_id,
            hash: ContentHash::compute(&body),
            session_id: session,
        }),
    ))
}

/// GET /jobs/{job_id}
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(state.engine.status(job_id)?))
}

/// POST|GET /jobs/{job_id}/cancel
///
/// Fire-and-forget: always 202, whether or not a running job was signalled.
/// A session id that is sent but malformed owns nothing, so it cancels nothing.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> impl IntoResponse {
    let requester = query.session_id.map(SessionId::new).transpose();
    let cancel_requested = match (Uuid::parse_str(&job_id), requester) {
        (Ok(id), Ok(requester)) => state.engine.cancel(id, requester.as_ref()),
        _ => false,
    };
    (
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id,
            cancel_requested,
        }),
    )
}

/// GET /progress/{hash}
///
/// Partial results of an unfinished run, page by page as they complete.
pub async fn progress(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<Checkpoint>> {
    let hash = parse_hash(&hash)?;
    state
        .engine
        .progress(&hash)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no saved progress for {hash}")))
}

/// DELETE /progress/{hash}
pub async fn clear_progress(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<StatusCode> {
    let hash = parse_hash(&hash)?;
    state.engine.clear_progress(&hash).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /drawings/{hash}
pub async fn drawing(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let hash = parse_hash(&hash)?;
    let pdf = state.engine.drawing(&hash).await?;
    Ok(([(header::CONTENT_TYPE, "application/pdf")], pdf))
}

/// GET /results/{hash}
pub async fn results(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<ResultSet>> {
    let hash = parse_hash(&hash)?;
    Ok(Json(state.engine.results(&hash).await?))
}

/// GET /results/{hash}/pages
pub async fn page_list(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<PagesResponse>> {
    let hash = parse_hash(&hash)?;
    let images = state.engine.page_images(&hash).await?;
    if images.is_empty() {
        return Err(ApiError::NotFound(format!("no rendered pages for {hash}")));
    }
    Ok(Json(PagesResponse {
        pages: images.len(),
        images,
        hash,
    }))
}

/// GET /results/{hash}/pages/{page}
pub async fn page_image(
    State(state): State<AppState>,
    Path((hash, page)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let hash = parse_hash(&hash)?;
    let page: usize = page
        .trim_end_matches(".jpg")
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("not a page number: {page}")))?;
    let jpeg = state.engine.page_image(&hash, page).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg))
}

/// GET /results/{hash}/find/{find_number}
pub async fn find(
    State(state): State<AppState>,
    Path((hash, find_number)): Path<(String, String)>,
) -> ApiResult<Json<FindResponse>> {
    let hash = parse_hash(&hash)?;
    let occurrences = state.engine.find(&hash, &find_number).await?;
    Ok(Json(FindResponse {
        hash,
        find_number,
        occurrences,
    }))
}

/// GET /sessions/{session_id}
pub async fn session_job(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    let session = SessionId::new(session_id)?;
    state
        .engine
        .session_status(&session)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no job for session {session}")))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
