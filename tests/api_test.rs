#![cfg(feature = "web")]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use exambank::app::{AppState, router};
use exambank::config::SyncConfig;
use exambank::model::Question;
use exambank::store::QuestionStore;
use exambank::sync::{FIELD_SEPARATOR, ROW_SEPARATOR};
use mockito::Server;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app_with(questions: Vec<Question>, sync: SyncConfig) -> Router {
    let mut store = QuestionStore::in_memory();
    for q in questions {
        store.add(q).unwrap();
    }
    router(AppState::new(store, sync))
}

fn seeded() -> Router {
    let mut q1 = Question::new("Q1", "DSE");
    q1.year = Some(2020);
    q1.question_type = "MC".into();
    q1.curriculum_classification = vec!["A 基本經濟概念".into()];
    let mut q2 = Question::new("Q2", "DSE");
    q2.year = Some(2022);
    q2.question_type = "MC".into();
    q2.curriculum_classification = vec!["C 市場與價格".into()];
    let mut q3 = Question::new("Q3", "CE");
    q3.year = Some(2001);
    app_with(vec![q1, q2, q3], SyncConfig::default())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn list_filters_and_pages() {
    let app = seeded();
    let (status, body) = send(&app, get("/api/questions?exam=DSE&sort=year&pageSize=1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalItems"], 2);
    assert_eq!(body["totalPages"], 2);
    assert_eq!(body["items"][0]["id"], "Q2");
}

#[tokio::test]
async fn unknown_sort_is_a_bad_request() {
    let app = seeded();
    let (status, body) = send(&app, get("/api/questions?sort=colour")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn query_applies_tri_state_filters() {
    let app = seeded();
    let request = with_json(
        "POST",
        "/api/questions/query",
        json!({
            "filter": {"curriculum": {"A 基本經濟概念": "excluded"}},
            "sort": "id",
            "pageSize": -1
        }),
    );
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["Q2", "Q3"]);
    assert_eq!(body["pageSize"], -1);
}

#[tokio::test]
async fn query_accepts_a_bare_range_selection() {
    let mut low = Question::new("LOW", "DSE");
    low.correct_percentage = Some(10.0);
    let mut mid = Question::new("MID", "DSE");
    mid.correct_percentage = Some(55.0);
    let unknown = Question::new("UNKNOWN", "DSE");
    let app = app_with(vec![low, mid, unknown], SyncConfig::default());

    let request = with_json(
        "POST",
        "/api/questions/query",
        json!({"filter": {"correctPercentage": {"min": 50, "max": 60}}}),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalItems"], 1);
    assert_eq!(body["items"][0]["id"], "MID");
}

#[tokio::test]
async fn create_get_update_delete() {
    let app = seeded();

    let draft = json!({
        "id": "Q9",
        "examination": "DSE",
        "year": 2020,
        "concepts": ["elasticity, tax"],
    });
    let (status, body) = send(&app, with_json("POST", "/api/questions", draft.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["question"]["concepts"], json!(["elasticity", "tax"]));

    let (status, _) = send(&app, with_json("POST", "/api/questions", draft)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, get("/api/questions/Q9")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["graphType"], "-");
    let added = body["dateAdded"].clone();

    let update = json!({"examination": "DSE", "year": 2021, "answer": "B"});
    let (status, body) = send(&app, with_json("PUT", "/api/questions/Q9", update)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["year"], 2021);
    assert_eq!(body["dateAdded"], added);

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/questions/Q9")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, body) = send(&app, get("/api/questions/Q9")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn create_without_examination_is_rejected() {
    let app = seeded();
    let (status, _) = send(
        &app,
        with_json("POST", "/api/questions", json!({"id": "Q9", "examination": "-"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn clear_then_list_is_empty() {
    let app = seeded();
    let clear = Request::builder()
        .method("POST")
        .uri("/api/clear")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, clear).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (_, body) = send(&app, get("/api/questions")).await;
    assert_eq!(body["totalItems"], 0);
}

#[tokio::test]
async fn export_import_round_trip() {
    let source = seeded();
    let response = source.clone().oneshot(get("/api/export")).await.unwrap();
    assert!(
        response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment; filename=\"econ-questions-")
    );
    let exported = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    let target = app_with(vec![Question::new("OLD", "DSE")], SyncConfig::default());
    let import = Request::builder()
        .method("POST")
        .uri("/api/import")
        .body(Body::from(exported))
        .unwrap();
    let (status, body) = send(&target, import).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imported"], 3);

    let (_, body) = send(&target, get("/api/questions/OLD")).await;
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn stats_and_comments() {
    let app = seeded();
    let uri = format!("/api/metadata/topics/{}", urlencoding::encode("A 基本經濟概念"));
    let put = with_json("PUT", &uri, json!({"comment": "core"}));
    let (status, _) = send(&app, put).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get("/api/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["years"], json!([2022, 2020, 2001]));
    assert_eq!(body["topics"][0]["name"], "A 基本經濟概念");
    assert_eq!(body["topics"][0]["comment"], "core");
    assert_eq!(body["topics"][0]["mc"], 1);

    let (status, body) = send(&app, get("/api/metadata/topics")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["comment"], "core");

    let (status, _) = send(&app, get("/api/metadata/chapters")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sync_without_url_is_a_bad_request() {
    let app = seeded();
    let request = Request::builder()
        .method("POST")
        .uri("/api/sync")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sync_replaces_questions() {
    let mut server = Server::new_async().await;
    let body = [
        ["Exam", "Unique ID", "Year"].join(FIELD_SEPARATOR.to_string().as_str()),
        ["DSE", "S1", "2024"].join(FIELD_SEPARATOR.to_string().as_str()),
    ]
    .join(ROW_SEPARATOR.to_string().as_str());
    let _mock = server
        .mock("GET", "/exec")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let sync = SyncConfig {
        url: Some(format!("{}/exec", server.url())),
        ..SyncConfig::default()
    };
    let app = app_with(vec![Question::new("OLD", "DSE")], sync);

    let request = Request::builder()
        .method("POST")
        .uri("/api/sync")
        .body(Body::empty())
        .unwrap();
    let (_, before) = send(&app, get("/api/sync")).await;
    assert_eq!(before["lastSyncTime"], Value::Null);

    let (status, report) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["applied"], true);
    assert_eq!(report["imported"], 1);

    let (status, after) = send(&app, get("/api/sync")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["lastSyncTime"], report["lastSyncTime"]);
    assert_eq!(after["questions"], 1);

    let (_, body) = send(&app, get("/api/questions")).await;
    assert_eq!(body["totalItems"], 1);
    assert_eq!(body["items"][0]["id"], "S1");
}

#[tokio::test]
async fn remote_error_maps_to_bad_gateway() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/exec")
        .with_status(200)
        .with_body("Error: quota exceeded")
        .create_async()
        .await;

    let sync = SyncConfig {
        url: Some(format!("{}/exec", server.url())),
        ..SyncConfig::default()
    };
    let app = app_with(vec![Question::new("KEEP", "DSE")], sync);
    let request = Request::builder()
        .method("POST")
        .uri("/api/sync")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["message"].as_str().unwrap().contains("quota exceeded"));

    let (status, _) = send(&app, get("/api/questions/KEEP")).await;
    assert_eq!(status, StatusCode::OK);
}
