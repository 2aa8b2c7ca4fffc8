//! Deployment job routes: schedule, list, inspect and cancel.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Utc};
use pkgdeploy_core::{ControlError, JobId, JobSnapshot, NodeId, PackageId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::ApiError;
use crate::requester::Requester;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(schedule_job))
        .route("/{id}", get(get_job).patch(reschedule_job).delete(cancel_job))
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub package_id: u32,
    pub node_id: u32,
    /// Run immediately when absent.
    pub execution_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub execution_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub rcc: u32,
    pub job: JobSnapshot,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub rcc: u32,
    pub jobs: Vec<JobSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub rcc: u32,
}

// ============================================================================
// Handlers
// ============================================================================

async fn schedule_job(
    State(state): State<AppState>,
    Requester(user): Requester,
    Json(req): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let job = state
        .scheduler
        .schedule_job(
            PackageId(req.package_id),
            NodeId(req.node_id),
            user,
            req.execution_time,
        )
        .await?;

    info!(job_id = %job.id, %user, "Deployment scheduled via API");
    Ok((StatusCode::CREATED, Json(JobResponse { rcc: 0, job })))
}

async fn list_jobs(
    State(state): State<AppState>,
    Requester(user): Requester,
) -> Json<JobListResponse> {
    Json(JobListResponse {
        rcc: 0,
        jobs: state.scheduler.list_jobs(user),
    })
}

async fn get_job(
    State(state): State<AppState>,
    Requester(user): Requester,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.scheduler.get_job(parse_job_id(&id)?, user)?;
    Ok(Json(JobResponse { rcc: 0, job }))
}

async fn reschedule_job(
    State(state): State<AppState>,
    Requester(user): Requester,
    Path(id): Path<String>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .scheduler
        .reschedule_job(parse_job_id(&id)?, user, req.execution_time)
        .await?;
    Ok(Json(JobResponse { rcc: 0, job }))
}

async fn cancel_job(
    State(state): State<AppState>,
    Requester(user): Requester,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    state.scheduler.cancel_job(parse_job_id(&id)?, user).await?;
    Ok(Json(CancelResponse { rcc: 0 }))
}

fn parse_job_id(id: &str) -> Result<JobId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::Control(ControlError::InvalidJobId))
}
