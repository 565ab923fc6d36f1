use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::config::{AppConfig, SyncConfig};
use crate::error::{StoreError, SyncError};
use crate::filter::FilterSpec;
use crate::model::{Question, QuestionDraft};
use crate::stats::Statistics;
use crate::store::{MetadataEntry, MetadataKind, QuestionStore};
use crate::sync::{SheetSync, SyncReport};
use crate::view::{self, Page, PageSize, SortKey};

/// Shared server state. The store lock is held for the whole of a mutation,
/// including the clear-and-refill of a sync.
pub struct AppState {
    store: Mutex<QuestionStore>,
    sync: SyncConfig,
}

impl AppState {
    pub fn new(store: QuestionStore, sync: SyncConfig) -> Arc<Self> {
        Arc::new(AppState {
            store: Mutex::new(store),
            sync,
        })
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: Option<String>,
}

/// Handler failure rendered as `{status: "error", message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = StatusResponse {
            status: "error".to_string(),
            message: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::DuplicateKey(_) => StatusCode::CONFLICT,
            StoreError::InvalidRecord(_) | StoreError::Json(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            StoreError::Unavailable { .. } | StoreError::Io(_) | StoreError::Encode(_) => {
                error!("store failure: {err}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Store(inner) => inner.into(),
            SyncError::FetchFailed(_) | SyncError::Remote(_) => {
                ApiError::new(StatusCode::BAD_GATEWAY, err.to_string())
            }
            SyncError::EmptyPayload | SyncError::SchemaInvalid { .. } => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ListQuery {
    search: Option<String>,
    exam: Option<String>,
    year: Option<i32>,
    qtype: Option<String>,
    sort: Option<String>,
    page: Option<usize>,
    page_size: Option<i64>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct QueryRequest {
    filter: FilterSpec,
    sort: SortKey,
    page: Option<usize>,
    page_size: PageSize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedResponse {
    status: String,
    question: Question,
    /// Id of an existing question with the same examination, year, section
    /// and number.
    possible_duplicate_of: Option<String>,
}

#[derive(Serialize)]
struct DeleteResponse {
    status: String,
    deleted: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SyncQuery {
    url: Option<String>,
    username: Option<String>,
}

#[derive(Serialize)]
struct ImportResponse {
    status: String,
    imported: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncStatus {
    url: Option<String>,
    last_sync_time: Option<String>,
    questions: usize,
}

#[derive(Deserialize)]
struct CommentUpdate {
    comment: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/questions", get(list_questions).post(create_question))
        .route("/api/questions/query", post(query_questions))
        .route(
            "/api/questions/:id",
            get(get_question).put(update_question).delete(delete_question),
        )
        .route("/api/sync", get(sync_status).post(sync_questions))
        .route("/api/clear", post(clear_questions))
        .route("/api/export", get(export_questions))
        .route("/api/import", post(import_questions))
        .route("/api/stats", get(statistics))
        .route("/api/metadata/:kind", get(list_comments))
        .route("/api/metadata/:kind/:name", put(set_comment))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = QuestionStore::open(&config.database)?;
    let state = AppState::new(store, config.sync.clone());
    let app = router(state);

    let listener = TcpListener::bind(&config.bind).await?;
    info!("listening on http://{}", config.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

fn ok() -> StatusResponse {
    StatusResponse {
        status: "ok".to_string(),
        message: None,
    }
}

fn page_of(
    records: Vec<Question>,
    sort: SortKey,
    page: Option<usize>,
    size: PageSize,
) -> Page<Question> {
    view::paginate(view::sort(records, sort), page.unwrap_or(1), size)
}

async fn list_questions(
    Query(params): Query<ListQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Page<Question>>> {
    let sort = match params.sort.as_deref() {
        Some(name) => SortKey::parse(name).ok_or_else(|| {
            ApiError::new(StatusCode::BAD_REQUEST, format!("unknown sort `{name}`"))
        })?,
        None => SortKey::default(),
    };
    let spec = FilterSpec {
        search: params.search,
        examination: params.exam,
        year: params.year,
        question_type: params.qtype,
        ..FilterSpec::default()
    };
    let size = params
        .page_size
        .map(PageSize::from_wire)
        .unwrap_or_default();

    let store = state.store.lock().await;
    let records = store.get_all(Some(&spec));
    Ok(Json(page_of(records, sort, params.page, size)))
}

async fn query_questions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Json<Page<Question>> {
    let store = state.store.lock().await;
    let records = store.get_all(Some(&request.filter));
    Json(page_of(records, request.sort, request.page, request.page_size))
}

async fn create_question(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<QuestionDraft>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    let mut question = draft.into_question();
    question.touch();

    let mut store = state.store.lock().await;
    let possible_duplicate_of = store.find_duplicate(&question).map(|q| q.id.clone());
    if let Some(other) = &possible_duplicate_of {
        warn!("question {} looks like a duplicate of {}", question.id, other);
    }
    store.add(question.clone())?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            status: "ok".to_string(),
            question,
            possible_duplicate_of,
        }),
    ))
}

async fn get_question(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Question>> {
    let store = state.store.lock().await;
    store
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no question with id `{id}`")))
}

async fn update_question(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(draft): Json<QuestionDraft>,
) -> ApiResult<Json<Question>> {
    let mut store = state.store.lock().await;
    let updated = store.update(&id, draft)?;
    Ok(Json(updated))
}

async fn delete_question(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DeleteResponse>> {
    let mut store = state.store.lock().await;
    let deleted = store.delete(&id)?;
    Ok(Json(DeleteResponse {
        status: "ok".to_string(),
        deleted,
    }))
}

async fn sync_questions(
    Query(params): Query<SyncQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<SyncReport>> {
    let mut config = state.sync.clone();
    if let Some(url) = params.url {
        config.url = Some(url);
    }
    if let Some(username) = params.username {
        config.username = Some(username);
    }
    if config.url.as_deref().is_none_or(|u| u.trim().is_empty()) {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "no sheet URL configured"));
    }

    let mut sheet_sync = SheetSync::from_config(&config)?;
    let sheet = sheet_sync.fetch().await?;

    let mut store = state.store.lock().await;
    let report = sheet_sync.apply(&mut store, sheet)?;
    Ok(Json(report))
}

async fn sync_status(State(state): State<Arc<AppState>>) -> Json<SyncStatus> {
    let store = state.store.lock().await;
    Json(SyncStatus {
        url: state.sync.url.clone(),
        last_sync_time: store.last_sync().map(str::to_string),
        questions: store.len(),
    })
}

async fn clear_questions(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatusResponse>> {
    let mut store = state.store.lock().await;
    store.clear()?;
    Ok(Json(ok()))
}

async fn export_questions(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let store = state.store.lock().await;
    let body = store.export_json()?;
    let filename = format!("econ-questions-{}.json", Utc::now().format("%Y-%m-%d"));

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}

async fn import_questions(
    State(state): State<Arc<AppState>>,
    body: String,
) -> ApiResult<Json<ImportResponse>> {
    let mut store = state.store.lock().await;
    let imported = store.import_json(&body)?;
    Ok(Json(ImportResponse {
        status: "ok".to_string(),
        imported,
    }))
}

async fn statistics(State(state): State<Arc<AppState>>) -> Json<Statistics> {
    let store = state.store.lock().await;
    Json(Statistics::collect(&store))
}

fn metadata_kind(kind: &str) -> ApiResult<MetadataKind> {
    MetadataKind::parse(kind)
        .ok_or_else(|| ApiError::not_found(format!("unknown metadata kind `{kind}`")))
}

async fn list_comments(
    Path(kind): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<MetadataEntry>>> {
    let kind = metadata_kind(&kind)?;
    let store = state.store.lock().await;
    Ok(Json(store.comments(kind)))
}

async fn set_comment(
    Path((kind, name)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(update): Json<CommentUpdate>,
) -> ApiResult<Json<StatusResponse>> {
    let kind = metadata_kind(&kind)?;
    let mut store = state.store.lock().await;
    store.set_comment(kind, &name, &update.comment)?;
    Ok(Json(ok()))
}
