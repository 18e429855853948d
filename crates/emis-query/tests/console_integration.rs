//! Integration tests for Console over a wiremock backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use emis_auth::{CredentialStore, FileCredentialStore, MemoryCredentialStore, TokenSet};
use emis_core::{ApiError, Config};
use emis_query::{
    ChannelNotifier, Console, LogNotifier, MutationState, Notification, NotificationKind,
    QueryCache,
};
use emis_services::{ApiClient, BatchOutcome, Filters, LoginRequest, MultipartUpload, RetryConfig};

fn console(
    server: &MockServer,
    credentials: MemoryCredentialStore,
) -> (Console, mpsc::UnboundedReceiver<Notification>) {
    let client = ApiClient::new(&server.uri(), Arc::new(credentials))
        .unwrap()
        .with_retry(RetryConfig::none());
    let (notifier, rx) = ChannelNotifier::new();
    (
        Console::new(client, Arc::new(QueryCache::new()), Arc::new(notifier)),
        rx,
    )
}

fn signed_in(server: &MockServer) -> (Console, mpsc::UnboundedReceiver<Notification>) {
    console(server, MemoryCredentialStore::with_token("test-token"))
}

#[tokio::test]
async fn test_update_validation_error_surfaces_server_message() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendar/events/"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 4, "title": "Sports day" }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendar/events/4/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 4, "title": "Sports day" })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/calendar/events/4/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "detail": "invalid field" })))
        .expect(1)
        .mount(&server)
        .await;

    let (console, mut rx) = signed_in(&server);
    let events = console.events();
    let list = events.list(&Filters::new()).await.unwrap();
    let detail = events.detail("4").await.unwrap();

    let outcome = events.update("4", &json!({ "start_date": "not-a-date" })).await;
    assert_eq!(outcome.state, MutationState::SettledError);
    assert!(matches!(
        outcome.error(),
        Some(ApiError::Validation { status: 400, .. })
    ));

    let notification = rx.try_recv().unwrap();
    assert_eq!(notification.kind, NotificationKind::Error);
    assert!(notification.message.contains("invalid field"));

    // Nothing in the cache moved
    let cache = console.cache();
    assert_eq!(cache.len(), 2);
    assert!(Arc::ptr_eq(&cache.fresh(&events.list_key(&Filters::new())).unwrap(), &list));
    assert!(Arc::ptr_eq(
        &cache.fresh(&events.detail_key("4")).unwrap(),
        detail.value().unwrap()
    ));
}

#[tokio::test]
async fn test_unauthenticated_read_never_reaches_server() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let (console, _rx) = console(&server, MemoryCredentialStore::new());
    let err = console.calendars().list(&Filters::new()).await.unwrap_err();

    assert!(err.source.requires_login());
    assert!(!err.is_retryable());
    assert!(console.cache().is_empty());
}

#[tokio::test]
async fn test_delete_through_http_rolls_back_on_404() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendar/categories/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 2,
            "results": [{ "ukid": "c-1" }, { "ukid": "c-2" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/calendar/categories/c-2/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (console, mut rx) = signed_in(&server);
    let categories = console.categories();
    let before = categories.list(&Filters::new()).await.unwrap();

    let outcome = categories.delete("c-2").await;
    assert_eq!(outcome.state, MutationState::SettledError);

    let after = console
        .cache()
        .fresh(&categories.list_key(&Filters::new()))
        .unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(
        rx.try_recv().unwrap().message,
        "Failed to delete category. The requested record was not found."
    );
}

#[tokio::test]
async fn test_bulk_results_timeout_is_distinct() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/exams/results/bulk-process/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "processed": 10 }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = ApiClient::new(
        &server.uri(),
        Arc::new(MemoryCredentialStore::with_token("test-token")),
    )
    .unwrap()
    .with_batch_timeout(Duration::from_millis(100));
    let (notifier, mut rx) = ChannelNotifier::new();
    let console = Console::new(client, Arc::new(QueryCache::new()), Arc::new(notifier));

    let upload = MultipartUpload::file("file", "results.xlsx", b"PK".to_vec());
    let err = console.run_bulk_results(upload).await.unwrap_err();

    assert_eq!(err, ApiError::Timeout);
    let notification = rx.try_recv().unwrap();
    assert_eq!(notification.kind, NotificationKind::Error);
    assert!(notification.message.starts_with("Failed to process bulk results."));
}

#[tokio::test]
async fn test_bulk_results_json_outcome() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/exams/results/bulk-process/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "processed": 10 })))
        .mount(&server)
        .await;

    let (console, mut rx) = signed_in(&server);
    let upload = MultipartUpload::file("file", "results.csv", b"a,b".to_vec());
    let outcome = console.run_bulk_results(upload).await.unwrap();

    assert_eq!(outcome, BatchOutcome::Json(json!({ "processed": 10 })));
    assert_eq!(
        rx.try_recv().unwrap(),
        Notification::success("Bulk results processed successfully")
    );
}

#[tokio::test]
async fn test_login_and_logout_clear_cache() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login/"))
        .and(body_json(json!({ "username": "registrar", "password": "secret" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": "fresh-token" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendar/calendars/"))
        .and(header("Authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (console, _rx) = console(&server, MemoryCredentialStore::new());
    assert!(!console.is_signed_in());

    console
        .login(&LoginRequest {
            username: "registrar".into(),
            password: "secret".into(),
        })
        .await
        .unwrap();
    assert!(console.is_signed_in());

    console.calendars().list(&Filters::new()).await.unwrap();
    assert_eq!(console.cache().len(), 1);

    // Backend logout failure is tolerated
    console.logout().await.unwrap();
    assert!(!console.is_signed_in());
    assert!(console.cache().is_empty());
}

#[tokio::test]
async fn test_import_marks_lists_stale() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/students/students/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/students/students/import/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "created": 3 })))
        .mount(&server)
        .await;

    let (console, mut rx) = signed_in(&server);
    let students = console.resource("students").unwrap();
    students.list(&Filters::new()).await.unwrap();

    let upload = MultipartUpload::file("file", "students.csv", b"name\nA\nB\nC".to_vec());
    let created = console.import("students", upload).await.unwrap();

    assert_eq!(created, json!({ "created": 3 }));
    assert!(console.cache().fresh(&students.list_key(&Filters::new())).is_none());
    assert_eq!(
        rx.try_recv().unwrap(),
        Notification::success("Student import completed")
    );
}

#[tokio::test]
async fn test_from_config_uses_configured_credential_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendar/calendars/"))
        .and(header("Authorization", "Bearer stored-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.config_dir = dir.path().to_path_buf();
    config.api.base_url = server.uri();
    config.auth.credential_service = "registrar".into();

    let console = Console::from_config(&config, Arc::new(LogNotifier)).unwrap();
    assert!(!console.is_signed_in());

    FileCredentialStore::for_service(dir.path(), "registrar")
        .store(&TokenSet {
            access_token: "stored-token".into(),
            refresh_token: None,
            expires_at: None,
        })
        .unwrap();
    assert!(dir.path().join("tokens").join("registrar.json").exists());

    assert!(console.is_signed_in());
    console.calendars().list(&Filters::new()).await.unwrap();
}

#[tokio::test]
async fn test_typed_accessors_and_lookup_share_coordinators() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/calendar/events/4/"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;

    let (console, _rx) = signed_in(&server);
    let (outcome, ()) = tokio::join!(console.events().delete("4"), async {
        let by_namespace = console.resource("events").unwrap();
        while !by_namespace.is_mutating() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    assert!(outcome.is_success());
    assert!(!console.resource("events").unwrap().is_mutating());
    assert!(console.resource("students").is_some());
    assert!(console.resource("unknown").is_none());
    assert!(console.api("unknown").is_none());
}
