use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{multipart_error, AppState};
use crate::batches::{
    batch_key_from_params, batch_students, comparison_date, summarize_batches, BatchStudent,
};
use crate::context::RequestContext;
use crate::error::{PortalError, PortalResult};
use crate::models::{normalize_email, BatchKey, BatchSummary};
use crate::roster::{import_batches, import_students, parse_batches, parse_students};

#[derive(Serialize)]
pub struct BatchList {
    date: NaiveDate,
    batches: Vec<BatchSummary>,
}

pub async fn batches_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<HashMap<String, String>>,
) -> PortalResult<Json<BatchList>> {
    ctx.require_staff()?;
    let date = comparison_date(params.get("date").map(String::as_str))?;
    let batches = summarize_batches(state.store.as_ref(), date).await?;
    Ok(Json(BatchList { date, batches }))
}

#[derive(Serialize)]
pub struct BatchMembers {
    batch: BatchKey,
    date: NaiveDate,
    students: Vec<BatchStudent>,
}

pub async fn batch_students_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<HashMap<String, String>>,
) -> PortalResult<Json<BatchMembers>> {
    ctx.require_staff()?;
    let batch = batch_key_from_params(&params)?;
    let date = comparison_date(params.get("date").map(String::as_str))?;
    let students = batch_students(state.store.as_ref(), &batch, date).await?;
    Ok(Json(BatchMembers {
        batch,
        date,
        students,
    }))
}

pub async fn delete_batch_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(batch): Json<BatchKey>,
) -> PortalResult<Json<Value>> {
    ctx.require_staff()?;
    let removed = state
        .store
        .delete_batch(&batch)
        .await?
        .ok_or_else(|| PortalError::not_found(format!("batch {batch}")))?;
    info!(%batch, removed_students = removed, "batch deleted");
    Ok(Json(json!({ "deleted": batch, "removed_students": removed })))
}

#[derive(Deserialize)]
pub struct DeleteStudent {
    email_id: String,
}

pub async fn delete_student_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(body): Json<DeleteStudent>,
) -> PortalResult<Json<Value>> {
    ctx.require_staff()?;
    let email_id = normalize_email(&body.email_id);
    if !state.store.delete_student(&email_id).await? {
        return Err(PortalError::not_found(format!("student {email_id}")));
    }
    info!(%email_id, "student deleted");
    Ok(Json(json!({ "deleted": email_id })))
}

/// The bytes of the `file` part.
async fn read_file_part(mut multipart: Multipart) -> PortalResult<Vec<u8>> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            return Ok(field.bytes().await.map_err(multipart_error)?.to_vec());
        }
    }
    Err(PortalError::validation("multipart field `file` is required"))
}

pub async fn upload_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(kind): Path<String>,
    multipart: Multipart,
) -> PortalResult<Json<Value>> {
    ctx.require_staff()?;
    let bytes = read_file_part(multipart).await?;
    let invalid = |e: anyhow::Error| PortalError::validation(format!("{e:#}"));

    let imported = match kind.as_str() {
        "students" => {
            let students = parse_students(bytes.as_slice()).map_err(invalid)?;
            import_students(state.store.as_ref(), students).await?
        }
        "batches" => {
            let batches = parse_batches(bytes.as_slice()).map_err(invalid)?;
            import_batches(state.store.as_ref(), batches).await?
        }
        other => {
            return Err(PortalError::validation(format!(
                "unknown upload kind: {other:?}, expected students or batches"
            )))
        }
    };
    Ok(Json(json!({ "kind": kind, "imported": imported })))
}
