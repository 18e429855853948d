//! Integration tests for ResourceApi using wiremock.
//!
//! These tests verify the CRUD-to-REST mapping against a mock HTTP server.

use std::sync::Arc;

use emis_auth::MemoryCredentialStore;
use emis_core::ApiError;
use emis_services::catalog::{CALENDARS, EVENTS, STUDENTS};
use emis_services::{ApiClient, EntityApi, Filters, MultipartUpload, ResourceApi, RetryConfig};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api(server: &MockServer, descriptor: emis_services::ResourceDescriptor) -> ResourceApi {
    let client = ApiClient::new(
        &server.uri(),
        Arc::new(MemoryCredentialStore::with_token("test-token")),
    )
    .unwrap()
    .with_retry(RetryConfig::none());
    ResourceApi::new(client, descriptor)
}

fn calendar(id: u64, name: &str) -> serde_json::Value {
    serde_json::json!({ "id": id, "name": name, "is_active": true })
}

#[tokio::test]
async fn test_get_all_with_filters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendar/calendars/"))
        .and(query_param("academic_year", "2025"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            calendar(1, "Term 1"),
            calendar(2, "Term 2"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let mut filters = Filters::new();
    filters.insert("academic_year".into(), "2025".into());

    let list = api(&server, CALENDARS).get_all(&filters).await.unwrap();
    assert_eq!(list.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_get_by_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendar/calendars/1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(calendar(1, "Term 1")))
        .mount(&server)
        .await;

    let item = api(&server, CALENDARS).get_by_id("1").await.unwrap();
    assert_eq!(item["name"], "Term 1");
}

#[tokio::test]
async fn test_get_by_id_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/students/students/missing/"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(serde_json::json!({"detail": "Not found."})),
        )
        .mount(&server)
        .await;

    let err = api(&server, STUDENTS).get_by_id("missing").await.unwrap_err();
    assert_eq!(
        err,
        ApiError::NotFound {
            message: Some("Not found.".into())
        }
    );
}

#[tokio::test]
async fn test_create_posts_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/calendar/events/"))
        .and(body_json(serde_json::json!({"title": "Sports day"})))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::json!({"ukid": "ev-1", "title": "Sports day"})),
        )
        .mount(&server)
        .await;

    let created = api(&server, EVENTS)
        .create(&serde_json::json!({"title": "Sports day"}))
        .await
        .unwrap();
    assert_eq!(created["ukid"], "ev-1");
}

#[tokio::test]
async fn test_update_patches_item() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/calendar/events/ev-1/"))
        .and(body_json(serde_json::json!({"title": "Sports week"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"ukid": "ev-1", "title": "Sports week"})),
        )
        .mount(&server)
        .await;

    let updated = api(&server, EVENTS)
        .update("ev-1", &serde_json::json!({"title": "Sports week"}))
        .await
        .unwrap();
    assert_eq!(updated["title"], "Sports week");
}

#[tokio::test]
async fn test_delete_item() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/calendar/calendars/2/"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let result = api(&server, CALENDARS).delete("2").await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_sub_action() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/calendar/events/ev-1/publish/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"published": true})))
        .mount(&server)
        .await;

    let result = api(&server, EVENTS)
        .action(Some("ev-1"), "publish", &serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(result["published"], true);
}

#[tokio::test]
async fn test_import_upload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/students/students/import/"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"created": 3})))
        .mount(&server)
        .await;

    let upload = MultipartUpload::file("file", "students.csv", b"name\nA\nB\nC\n".to_vec())
        .with_mime_type("text/csv");
    let result = api(&server, STUDENTS).import(upload).await.unwrap();
    assert_eq!(result["created"], 3);
}

#[tokio::test]
async fn test_import_with_bad_mime_type_is_not_sent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let upload = MultipartUpload::file("file", "students.csv", b"name\nA\n".to_vec())
        .with_mime_type("csv");
    let err = api(&server, STUDENTS).import(upload).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation { status: 400, .. }));
}

#[tokio::test]
async fn test_errors_propagate_unchanged() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/calendar/calendars/"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({"name": ["calendar with this name already exists."]})),
        )
        .mount(&server)
        .await;

    let err = api(&server, CALENDARS)
        .create(&serde_json::json!({"name": "Term 1"}))
        .await
        .unwrap_err();

    assert_eq!(
        err.server_message(),
        Some("name: calendar with this name already exists.")
    );
}
