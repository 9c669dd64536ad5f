use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::contact::{list_messages, submit_message, update_status, NewMessage, StatusOutcome};
use crate::context::RequestContext;
use crate::error::PortalResult;
use crate::models::{ContactMessage, ContactStatus};

pub async fn submit_handler(
    State(state): State<AppState>,
    Json(input): Json<NewMessage>,
) -> PortalResult<(StatusCode, Json<ContactMessage>)> {
    let message = submit_message(state.store.as_ref(), input).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> PortalResult<Json<Vec<ContactMessage>>> {
    Ok(Json(list_messages(state.store.as_ref(), &ctx).await?))
}

#[derive(Deserialize)]
pub struct StatusBody {
    status: String,
}

pub async fn status_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> PortalResult<Json<StatusOutcome>> {
    let status: ContactStatus = body.status.parse()?;
    Ok(Json(update_status(state.store.as_ref(), &ctx, id, status).await?))
}
