//! HTTP surface. Handlers parse requests, build the caller's
//! [`RequestContext`](crate::context::RequestContext) and delegate to the
//! service modules; they hold no logic of their own.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit},
    http::{header, HeaderName, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::context::{EMAIL_HEADER, ROLE_HEADER};
use crate::error::PortalError;
use crate::export::Download;
use crate::models::ProofFile;
use crate::store::PortalStore;

mod activities;
mod admin;
mod contact;
mod records;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PortalStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn PortalStore>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(ROLE_HEADER),
            HeaderName::from_static(EMAIL_HEADER),
        ])
        .expose_headers([header::CONTENT_DISPOSITION])
        .max_age(Duration::from_secs(60 * 60));

    let upload_limit = state.config.upload_limit_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .route("/activities", get(activities::list_handler))
        .route("/activities/download", get(activities::download_handler))
        .route("/activities/proof/:id", get(activities::proof_handler))
        .route("/students", get(activities::students_handler))
        .route("/student/upload/:activity_type", post(records::upload_handler))
        .route("/student/update/:activity_type/:id", put(records::update_handler))
        .route("/student/download/:activity_type/:id", get(records::download_handler))
        .route("/student/records/:activity_type", get(records::list_handler))
        .route("/student/records/:activity_type/:id", delete(records::delete_handler))
        .route(
            "/student/profile",
            get(records::profile_handler).put(records::update_profile_handler),
        )
        .route("/contact-us/message", post(contact::submit_handler))
        .route("/contact-us/messages", get(contact::list_handler))
        .route("/contact-us/message/:id/status", put(contact::status_handler))
        .route("/admin/batches", get(admin::batches_handler))
        .route("/admin/batch-students", get(admin::batch_students_handler))
        .route("/admin/delete-batch", delete(admin::delete_batch_handler))
        .route("/admin/delete-student", delete(admin::delete_student_handler))
        .route("/admin/upload/:kind", post(admin::upload_handler))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Keeps a header-safe ASCII file name.
fn disposition_name(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned.to_string()
    }
}

fn file_response(content_type: &str, file_name: &str, body: Vec<u8>) -> Response {
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        disposition_name(file_name)
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

impl IntoResponse for Download {
    fn into_response(self) -> Response {
        file_response(self.content_type, &self.file_name, self.body)
    }
}

fn multipart_error(err: MultipartError) -> PortalError {
    PortalError::validation(format!("invalid multipart body: {err}"))
}

fn proof_response(proof: ProofFile) -> Response {
    file_response(&proof.meta.content_type, &proof.meta.file_name, proof.data)
}

pub async fn serve(config: Config, store: Arc<dyn PortalStore>) -> anyhow::Result<()> {
    let address = format!("0.0.0.0:{}", config.port);
    let app = router(AppState::new(store, config));

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_names_are_header_safe() {
        assert_eq!(disposition_name("report \"final\".pdf"), "report _final_.pdf");
        assert_eq!(disposition_name("résumé.pdf"), "r_sum_.pdf");
        assert_eq!(disposition_name("   "), "download");
    }
}
