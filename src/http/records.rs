use std::collections::HashMap;

use axum::{
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::{multipart_error, proof_response, AppState};
use crate::activity::ActivityType;
use crate::context::RequestContext;
use crate::error::{PortalError, PortalResult};
use crate::models::{ActivityRecord, ProofFile, StudentProfile, StudentUpdate};
use crate::records::{
    create_record, delete_record, download_proof, list_records, update_record, RecordForm,
    SplitRecords,
};

const PROOF_FIELD: &str = "proof";

async fn read_proof(field: Field<'_>) -> PortalResult<Option<ProofFile>> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().map(str::to_string);
    let data = field.bytes().await.map_err(multipart_error)?;
    if file_name.trim().is_empty() && data.is_empty() {
        return Ok(None);
    }
    Ok(Some(ProofFile::new(file_name, content_type, data.to_vec())))
}

/// Text parts become fields; `email_id` names the owner; the `proof` part is the file.
async fn read_form(mut multipart: Multipart) -> PortalResult<RecordForm> {
    let mut form = RecordForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "" => continue,
            PROOF_FIELD => form.proof = read_proof(field).await?,
            "email_id" => {
                let value = field.text().await.map_err(multipart_error)?;
                form.email_id = Some(value);
            }
            _ => {
                let value = field.text().await.map_err(multipart_error)?;
                form.fields.insert(name, Value::String(value));
            }
        }
    }
    Ok(form)
}

pub async fn upload_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(activity_type): Path<String>,
    multipart: Multipart,
) -> PortalResult<(StatusCode, Json<ActivityRecord>)> {
    let activity_type: ActivityType = activity_type.parse()?;
    let form = read_form(multipart).await?;
    let record = create_record(state.store.as_ref(), &ctx, activity_type, form).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn update_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((activity_type, id)): Path<(String, Uuid)>,
    multipart: Multipart,
) -> PortalResult<Json<ActivityRecord>> {
    let activity_type: ActivityType = activity_type.parse()?;
    let form = read_form(multipart).await?;
    let record = update_record(state.store.as_ref(), &ctx, activity_type, id, form).await?;
    Ok(Json(record))
}

pub async fn download_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((activity_type, id)): Path<(String, Uuid)>,
) -> PortalResult<Response> {
    let activity_type: ActivityType = activity_type.parse()?;
    let proof = download_proof(state.store.as_ref(), &ctx, activity_type, id).await?;
    Ok(proof_response(proof))
}

pub async fn list_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(activity_type): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> PortalResult<Json<SplitRecords>> {
    let activity_type: ActivityType = activity_type.parse()?;
    let owner = params.get("email_id").map(String::as_str);
    Ok(Json(
        list_records(state.store.as_ref(), &ctx, activity_type, owner).await?,
    ))
}

pub async fn delete_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((activity_type, id)): Path<(String, Uuid)>,
) -> PortalResult<Json<Value>> {
    let activity_type: ActivityType = activity_type.parse()?;
    delete_record(state.store.as_ref(), &ctx, activity_type, id).await?;
    Ok(Json(json!({ "deleted": id })))
}

pub async fn profile_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<HashMap<String, String>>,
) -> PortalResult<Json<StudentProfile>> {
    let owner = ctx.owner_for(params.get("email_id").map(String::as_str))?;
    let student = state
        .store
        .get_student(&owner)
        .await?
        .ok_or_else(|| PortalError::not_found(format!("student {owner}")))?;
    Ok(Json(student.into()))
}

pub async fn update_profile_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<HashMap<String, String>>,
    Json(update): Json<StudentUpdate>,
) -> PortalResult<Json<StudentProfile>> {
    let owner = ctx.owner_for(params.get("email_id").map(String::as_str))?;
    let mut student = state
        .store
        .get_student(&owner)
        .await?
        .ok_or_else(|| PortalError::not_found(format!("student {owner}")))?;
    update.apply(&mut student)?;
    state.store.upsert_student(&student).await?;
    info!(owner = %student.email_id, "student profile updated");
    Ok(Json(student.into()))
}
