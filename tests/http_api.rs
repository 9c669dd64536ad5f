use std::io::{Cursor, Read};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use student_activity_portal::config::Config;
use student_activity_portal::context::{EMAIL_HEADER, ROLE_HEADER};
use student_activity_portal::http::{router, AppState};
use student_activity_portal::models::Student;
use student_activity_portal::store::{MemoryStore, PortalStore};

const BOUNDARY: &str = "portal-test-boundary";

async fn app_with_students(students: &[(&str, &str)]) -> Router {
    let store = MemoryStore::new();
    for (email, department) in students {
        let student = Student {
            department: department.to_string(),
            batch_no: 2023,
            class_division: "A".to_string(),
            ..Student::new(*email)
        };
        store.upsert_student(&student).await.unwrap();
    }
    router(AppState::new(Arc::new(store), Config::default()))
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"proof\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn student_request(method: Method, uri: &str, email: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(ROLE_HEADER, "student")
        .header(EMAIL_HEADER, email)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(body)
        .unwrap()
}

fn staff_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(ROLE_HEADER, "faculty")
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn upload_list_and_download_proof_round_trip() {
    let app = app_with_students(&[("asha@college.edu", "INFT")]).await;
    let proof_bytes: Vec<u8> = (0u8..=255).collect();

    let body = multipart_body(
        &[("title", "Patent pending"), ("application_date", "2024-01-15")],
        Some(("claim.bin", "application/octet-stream", &proof_bytes)),
    );
    let (status, created) = send_json(
        &app,
        student_request(Method::POST, "/student/upload/patent", "asha@college.edu", Body::from(body)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, listed) = send_json(
        &app,
        student_request(Method::GET, "/student/records/Patent", "asha@college.edu", Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["complete"][0]["proof"]["fileName"], "claim.bin");
    assert_eq!(listed["incomplete"].as_array().unwrap().len(), 0);

    let (status, downloaded) = send(
        &app,
        student_request(
            Method::GET,
            &format!("/student/download/patent/{id}"),
            "asha@college.edu",
            Body::empty(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(downloaded, proof_bytes);

    let (status, _) = send(
        &app,
        student_request(
            Method::GET,
            &format!("/student/download/patent/{id}"),
            "someone@college.edu",
            Body::empty(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn department_scoped_internship_is_pending() {
    let app = app_with_students(&[("studenta@college.edu", "INFT"), ("studentb@college.edu", "CMPN")]).await;

    for email in ["studenta@college.edu", "studentb@college.edu"] {
        let body = multipart_body(&[("company_name", "Acme"), ("start_date", "2024-06-01")], None);
        let (status, _) = send(
            &app,
            student_request(Method::POST, "/student/upload/internship", email, Body::from(body)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, page) = send_json(
        &app,
        staff_get("/activities?activity_type=Internship&department=INFT&status="),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["total_completed"], 0);
    assert_eq!(page["total_pending"], 1);
    assert_eq!(page["total_unique_students"], 1);
    assert_eq!(page["activities"][0]["email_id"], "studenta@college.edu");
    assert_eq!(page["activities"][0]["status"], "Pending");
}

#[tokio::test]
async fn staff_routes_reject_students_and_anonymous_callers() {
    let app = app_with_students(&[]).await;
    let (status, _) = send(
        &app,
        Request::builder().uri("/activities").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        student_request(Method::GET, "/activities", "a@college.edu", Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn empty_scope_csv_export_is_header_only() {
    let app = app_with_students(&[("asha@college.edu", "INFT")]).await;
    let (status, body) = send(
        &app,
        staff_get("/activities/download?activity_type=Workshop&department=MECH"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        String::from_utf8(body).unwrap(),
        "Student Email,Activity Type,Title,Status,Date\n"
    );
}

#[tokio::test]
async fn all_export_workbook_has_eleven_sheets() {
    let app = app_with_students(&[]).await;
    let response = app
        .clone()
        .oneshot(staff_get("/activities/download?activity_type=All&format=xlsx"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("activities.xlsx"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut workbook = String::new();
    archive
        .by_name("xl/workbook.xml")
        .unwrap()
        .read_to_string(&mut workbook)
        .unwrap();
    assert_eq!(workbook.matches("<sheet ").count(), 11);

    let (status, map) = send_json(&app, staff_get("/activities/download?activity_type=All")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(map.as_object().unwrap().len(), 11);
}

#[tokio::test]
async fn resolved_contact_message_disappears() {
    let app = app_with_students(&[]).await;
    let submit = Request::builder()
        .method(Method::POST)
        .uri("/contact-us/message")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"name":"Asha","email":"asha@college.edu","type":"report","subject":"Broken link","message":"The export button 404s."}"#,
        ))
        .unwrap();
    let (status, created) = send_json(&app, submit).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "new");
    let id = created["id"].as_str().unwrap().to_string();

    let resolve = Request::builder()
        .method(Method::PUT)
        .uri(format!("/contact-us/message/{id}/status"))
        .header(ROLE_HEADER, "admin")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"status":"resolved"}"#))
        .unwrap();
    let (status, outcome) = send_json(&app, resolve).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "deleted");

    let (status, inbox) = send_json(&app, staff_get("/contact-us/messages")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(inbox.as_array().unwrap().is_empty());
}
