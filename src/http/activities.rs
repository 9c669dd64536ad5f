use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use super::{proof_response, AppState};
use crate::activity::ActivityType;
use crate::context::RequestContext;
use crate::error::{PortalError, PortalResult};
use crate::export::{render, Download, DownloadFormat};
use crate::filters::StudentFilter;
use crate::models::StudentProfile;
use crate::query::{query_from_params, run_export, run_page, ActivityPage, Pagination};
use crate::records::download_proof;

pub async fn list_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<HashMap<String, String>>,
) -> PortalResult<Json<ActivityPage>> {
    ctx.require_staff()?;
    let query = query_from_params(state.store.as_ref(), &params).await?;
    let pagination = Pagination::from_params(&params)?;
    Ok(Json(run_page(state.store.as_ref(), &query, pagination).await?))
}

pub async fn download_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<HashMap<String, String>>,
) -> PortalResult<Download> {
    ctx.require_staff()?;
    let format = DownloadFormat::parse(params.get("format").map(String::as_str))?;
    let query = query_from_params(state.store.as_ref(), &params).await?;
    let set = run_export(state.store.as_ref(), &query).await?;
    render(&set, format)
}

pub async fn proof_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Query(params): Query<HashMap<String, String>>,
) -> PortalResult<Response> {
    let activity_type: ActivityType = params
        .get("activity_type")
        .ok_or_else(|| PortalError::validation("activity_type is required"))?
        .parse()?;
    let proof = download_proof(state.store.as_ref(), &ctx, activity_type, id).await?;
    Ok(proof_response(proof))
}

#[derive(Serialize)]
pub struct StudentList {
    students: Vec<StudentProfile>,
}

pub async fn students_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<HashMap<String, String>>,
) -> PortalResult<Json<StudentList>> {
    ctx.require_staff()?;
    let filter = StudentFilter::from_params(&params)?;
    let students = state
        .store
        .list_students(&filter)
        .await?
        .into_iter()
        .map(StudentProfile::from)
        .collect();
    Ok(Json(StudentList { students }))
}
