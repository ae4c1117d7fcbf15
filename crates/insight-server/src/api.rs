use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use chrono::Utc;
use futures::{Stream, StreamExt as _};
use insight_core::analyzer::DEFAULT_UPLOAD_QUESTION;
use insight_core::history::{image_label, placeholder_text};
use insight_core::{AnalysisRecord, AnalysisRequest, AnalyzerError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Room for multipart boundaries and the question field on top of the image.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Builds the `/api/ai` router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);
    let api = Router::new()
        .route("/health", get(health))
        .route("/analyze", get(analyze_default).post(analyze_url))
        .route("/upload-image", post(upload_image))
        .route("/upload-image/stream", post(upload_image_stream))
        .route("/history", get(list_history))
        .route("/history/{id}", delete(delete_history))
        .route("/test-db", get(test_db))
        .route("/test-save", post(test_save));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/ai", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "AI服务运行正常"
}

async fn analyze_default(State(state): State<AppState>) -> Result<String, ApiError> {
    Ok(state.analyzer.analyze_default().await?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeForm {
    image_url: String,
    question: String,
}

async fn analyze_url(
    State(state): State<AppState>,
    Form(form): Form<AnalyzeForm>,
) -> Result<String, ApiError> {
    let request = AnalysisRequest::from_url(form.image_url, form.question);
    Ok(state.analyzer.analyze(&request).await?)
}

/// Synchronous upload: returns the full text and saves it before replying.
///
/// Backend failures still produce a 200 with placeholder text, which is what
/// gets saved.
async fn upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<String, ApiError> {
    let upload = read_upload(multipart, state.max_upload_bytes).await?;
    let question = upload.question.clone();
    let request = upload.into_request();

    let text = match state.analyzer.analyze(&request).await {
        Ok(text) => text,
        Err(AnalyzerError::Validation(message)) => return Err(ApiError::InvalidInput(message)),
        Err(err) => {
            warn!(request_id = %request.request_id, error = %err, "analysis failed, saving placeholder");
            placeholder_text(&question)
        }
    };
    state.recorder.record(&image_label(Utc::now()), &text).await;
    Ok(text)
}

async fn upload_image_stream(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let upload = read_upload(multipart, state.max_upload_bytes).await?;
    let callback = state
        .recorder
        .completion_callback(image_label(Utc::now()), upload.question.clone());
    let receiver = state.analyzer.start_stream(upload.into_request(), callback)?;

    let events = receiver.map(|event| Event::default().json_data(&event));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    success: bool,
    data: Vec<AnalysisRecord>,
    message: &'static str,
}

async fn list_history(State(state): State<AppState>) -> Result<Json<HistoryResponse>, ApiError> {
    let data = state
        .recorder
        .sink()
        .list_records()
        .await
        .map_err(|e| ApiError::store("获取历史记录失败", e))?;
    Ok(Json(HistoryResponse {
        success: true,
        data,
        message: "获取历史记录成功",
    }))
}

async fn delete_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .recorder
        .sink()
        .delete_record(id)
        .await
        .map_err(|e| ApiError::store("删除记录失败", e))?;
    if deleted {
        info!(record_id = id, "analysis record deleted");
        Ok(Json(json!({ "success": true, "message": "删除记录成功" })))
    } else {
        Ok(Json(json!({ "success": false, "message": "删除记录失败" })))
    }
}

/// Store probe; failures are reported in the body, not the status.
async fn test_db(State(state): State<AppState>) -> Json<Value> {
    match state.recorder.sink().list_records().await {
        Ok(records) => Json(json!({
            "success": true,
            "message": "数据库连接正常",
            "recordCount": records.len(),
        })),
        Err(err) => Json(json!({
            "success": false,
            "message": format!("数据库连接失败: {err}"),
        })),
    }
}

async fn test_save(State(state): State<AppState>) -> Json<Value> {
    match state
        .recorder
        .sink()
        .save_record("test-image-path", "测试AI分析结果")
        .await
    {
        Ok(record) => Json(json!({
            "success": true,
            "message": "测试记录保存成功",
            "data": record,
        })),
        Err(err) => Json(json!({
            "success": false,
            "message": format!("测试记录保存失败: {err}"),
        })),
    }
}

struct Upload {
    data: Vec<u8>,
    content_type: String,
    question: String,
}

impl Upload {
    fn into_request(self) -> AnalysisRequest {
        AnalysisRequest::from_bytes(self.data, self.content_type, self.question)
    }
}

/// Reads the `image` and optional `question` fields of an upload form.
async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> Result<Upload, ApiError> {
    let mut image = None;
    let mut question = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("image") => {
                let content_type = field.content_type().map(str::to_owned).unwrap_or_default();
                if !content_type.starts_with("image/") {
                    return Err(ApiError::UnsupportedMediaType(format!(
                        "只支持图片文件，收到: {}",
                        if content_type.is_empty() { "未知类型" } else { content_type.as_str() }
                    )));
                }
                let data = field.bytes().await.map_err(multipart_error)?;
                if data.len() > max_bytes {
                    return Err(too_large(max_bytes));
                }
                image = Some((data.to_vec(), content_type));
            }
            Some("question") => {
                question = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let (data, content_type) = image.ok_or_else(|| ApiError::InvalidInput("缺少图片文件".into()))?;
    if data.is_empty() {
        return Err(ApiError::InvalidInput("图片文件为空".into()));
    }
    // Absent or empty falls back to the default; a blank question is rejected later.
    let question = question
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| DEFAULT_UPLOAD_QUESTION.to_string());
    Ok(Upload {
        data,
        content_type,
        question,
    })
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::InvalidInput(format!("无效的上传表单: {}", err.body_text()))
    }
}

fn too_large(max_bytes: usize) -> ApiError {
    ApiError::PayloadTooLarge(format!("图片大小不能超过 {max_bytes} 字节"))
}
