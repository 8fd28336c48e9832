use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json, Path, Query};
use companion_entity::companion_message;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::OpenApi;

use crate::api::error::{ApiError, ErrorBody};
use crate::companion::{CompanionService, Mood, SubmitReply, SubmitRequest};

const SUBMIT_FAILED: &str = "Something went wrong.";
const FETCH_FAILED: &str = "Failed to fetch session messages";

#[derive(OpenApi)]
#[openapi(
    paths(submit_turn, fetch_session, fetch_session_by_path, probe_mood, health),
    components(schemas(ErrorBody, Mood)),
    tags((name = "companion", description = "AI 陪伴聊天"))
)]
pub struct ApiDoc;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SessionQuery {
    /// 会话 ID
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct MoodProbeRequest {
    pub text: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MoodProbeResponse {
    pub text: String,
    pub mood: Mood,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

fn json_body(payload: Result<Json<serde_json::Value>, JsonRejection>) -> Result<serde_json::Value, ApiError> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        debug!("请求体解析失败: {}", rejection.body_text());
        ApiError::InvalidRequest("Invalid JSON body.".to_string())
    })
}

/// 发送一轮对话并获取回复
#[utoipa::path(
    post,
    path = "/api/companion",
    tag = "companion",
    request_body = SubmitRequest,
    responses(
        (status = 200, body = SubmitReply),
        (status = 400, body = ErrorBody),
        (status = 500, body = ErrorBody),
    )
)]
pub async fn submit_turn(
    Extension(service): Extension<Arc<CompanionService>>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<SubmitReply>, ApiError> {
    let request = SubmitRequest::from_json(&json_body(payload)?);
    service
        .submit_turn(request)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_companion(e, SUBMIT_FAILED))
}

/// 获取会话的完整对话，按创建时间升序
#[utoipa::path(
    get,
    path = "/api/companion",
    tag = "companion",
    params(SessionQuery),
    responses(
        (status = 200, body = Vec<companion_message::Model>),
        (status = 400, body = ErrorBody),
        (status = 500, body = ErrorBody),
    )
)]
pub async fn fetch_session(
    Extension(service): Extension<Arc<CompanionService>>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<companion_message::Model>>, ApiError> {
    service
        .fetch_session(query.session_id.as_deref())
        .await
        .map(Json)
        .map_err(|e| ApiError::from_companion(e, FETCH_FAILED))
}

/// 同 [`fetch_session`]，会话 ID 放在路径中
#[utoipa::path(
    get,
    path = "/api/companion/session/{session_id}",
    tag = "companion",
    params(("session_id" = String, Path, description = "会话 ID")),
    responses(
        (status = 200, body = Vec<companion_message::Model>),
        (status = 500, body = ErrorBody),
    )
)]
pub async fn fetch_session_by_path(
    Extension(service): Extension<Arc<CompanionService>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<companion_message::Model>>, ApiError> {
    service
        .fetch_session(Some(&session_id))
        .await
        .map(Json)
        .map_err(|e| ApiError::from_companion(e, FETCH_FAILED))
}

/// 只做情绪分类，不写入任何记录
#[utoipa::path(
    post,
    path = "/api/companion/mood",
    tag = "companion",
    request_body = MoodProbeRequest,
    responses(
        (status = 200, body = MoodProbeResponse),
        (status = 400, body = ErrorBody),
    )
)]
pub async fn probe_mood(
    Extension(service): Extension<Arc<CompanionService>>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<MoodProbeResponse>, ApiError> {
    let request = serde_json::from_value::<MoodProbeRequest>(json_body(payload)?).ok();
    let text = request
        .and_then(|r| r.text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("text is required.".to_string()))?;
    let mood = service.classify(&text).await;
    Ok(Json(MoodProbeResponse { text, mood }))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotSupported
}
