use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};

use crate::handlers::analysis::{DEFAULT_AUDIO_TYPE, DEFAULT_IMAGE_TYPE};
use crate::handlers::{guess_media_type, AnalysisHandler, HandlerError};
use crate::models::{AnalysisResponse, ChatReply, ChatRequest, FoodLog, History};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_USER: &str = "demo_user";

pub struct AppState {
    pub handler: Arc<AnalysisHandler>,
}

pub fn create_router(handler: Arc<AnalysisHandler>) -> Router {
    let state = Arc::new(AppState { handler });

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/analyze", post(analyze_handler))
        .route("/history/:user_id", get(history_handler))
        .route("/logs/:id", get(food_log_handler))
        .route("/chat", post(chat_handler))
        .route("/voice", post(voice_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Handler(HandlerError),
}

impl From<HandlerError> for ApiError {
    fn from(e: HandlerError) -> Self {
        ApiError::Handler(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Handler(e) => {
                let status = match e {
                    HandlerError::Inference(_) => StatusCode::BAD_GATEWAY,
                    HandlerError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                    HandlerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                log::error!("❌ Request failed: {}", e);
                (status, e.to_string())
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeParams {
    user_id: Option<String>,
}

/// File part of a multipart upload plus the optional `prompt` field.
struct Upload {
    bytes: Vec<u8>,
    media_type: String,
    prompt: String,
}

async fn read_upload(mut multipart: Multipart, default_type: &str) -> Result<Upload, ApiError> {
    let mut file: Option<(Vec<u8>, String)> = None;
    let mut prompt = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let declared = field
                    .content_type()
                    .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
                    .map(str::to_string);
                let media_type = match declared {
                    Some(ct) => ct,
                    None => guess_media_type(field.file_name().unwrap_or(""), default_type).to_string(),
                };
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
                file = Some((bytes.to_vec(), media_type));
            }
            Some("prompt") => {
                prompt = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read prompt: {}", e)))?;
            }
            other => log::debug!("Ignoring multipart field {:?}", other),
        }
    }

    let (bytes, media_type) = file.ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }

    Ok(Upload {
        bytes,
        media_type,
        prompt,
    })
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "online",
        "message": "Food Vision Backend is Running",
    }))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnalyzeParams>,
    multipart: Multipart,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let upload = read_upload(multipart, DEFAULT_IMAGE_TYPE).await?;
    let user_id = params.user_id.unwrap_or_else(|| DEFAULT_USER.to_string());

    let response = state
        .handler
        .analyze_upload(&user_id, &upload.bytes, &upload.media_type)
        .await?;
    Ok(Json(response))
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<History>, ApiError> {
    Ok(Json(state.handler.history(&user_id).await?))
}

async fn food_log_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<FoodLog>, ApiError> {
    state
        .handler
        .food_log(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Food log not found".to_string()))
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message is empty".to_string()));
    }
    Ok(Json(state.handler.chat(&request.message).await?))
}

async fn voice_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ChatReply>, ApiError> {
    let upload = read_upload(multipart, DEFAULT_AUDIO_TYPE).await?;
    let reply = state
        .handler
        .voice(&upload.bytes, &upload.media_type, &upload.prompt)
        .await?;
    Ok(Json(reply))
}
