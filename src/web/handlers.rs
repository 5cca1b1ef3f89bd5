use crate::{
    classify::{report, ClassificationPipeline, ClassificationResult, ClassifyOptions, ClassifyStatus},
    utils::error::{ApiResult, ClassifierError, WithRequestId},
    web::{
        extractors::{RequestId, ValidatedJson},
        AppState,
    },
    Result,
};
use axum::{
    body::Bytes,
    extract::{multipart::Field, Multipart, State},
    http::header,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::mpsc;

/// JSON请求体（base64模式）
#[derive(Debug, Deserialize)]
pub struct ClassifyJsonRequest {
    /// Base64编码的图像数据
    pub image: String,

    /// 置信度阈值覆盖
    #[serde(default)]
    pub threshold: Option<f32>,
}

/// JSON响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub timestamp: String,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, request_id: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(code: impl Into<String>, message: impl Into<String>, request_id: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id,
        }
    }
}

/// 批处理结果
#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub confident: usize,
    pub results: Vec<ClassificationResult>,
}

/// JSON base64上传处理器
pub async fn classify_json_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    ValidatedJson(request): ValidatedJson<ClassifyJsonRequest>,
) -> ApiResult<Json<ApiResponse<ClassificationResult>>> {
    tracing::info!(
        "Processing JSON classify request: request_id={}, threshold={:?}",
        request_id,
        request.threshold
    );

    let options = ClassifyOptions {
        threshold: request.threshold,
    };
    let status_tx = progress_logger(&state, &request_id);

    let result =
        ClassificationPipeline::process_base64(&state.manager, request.image, options, status_tx)
            .await
            .with_request_id(&request_id)?;

    Ok(Json(ApiResponse::success(result, request_id)))
}

/// Multipart文件上传处理器
pub async fn classify_upload_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    multipart: Multipart,
) -> ApiResult<Json<ApiResponse<ClassificationResult>>> {
    tracing::info!("Processing multipart classify request: request_id={}", request_id);

    let upload = read_upload(multipart).await.with_request_id(&request_id)?;
    let status_tx = progress_logger(&state, &request_id);

    let result =
        ClassificationPipeline::process_bytes(&state.manager, upload.data, upload.options, status_tx)
            .await
            .with_request_id(&request_id)?;

    Ok(Json(ApiResponse::success(result, request_id)))
}

/// 分类并返回可下载的结果文本
pub async fn classify_report_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    multipart: Multipart,
) -> ApiResult<Response> {
    tracing::info!("Processing report request: request_id={}", request_id);

    let upload = read_upload(multipart).await.with_request_id(&request_id)?;
    let result =
        ClassificationPipeline::process_bytes(&state.manager, upload.data, upload.options, None)
            .await
            .with_request_id(&request_id)?;

    let text = result
        .report
        .ok_or(ClassifierError::Uncertain(result.prediction.confidence))
        .with_request_id(&request_id)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", report::REPORT_FILE_NAME),
            ),
        ],
        text,
    )
        .into_response())
}

/// 批处理上传处理器（支持多个文件）
pub async fn classify_batch_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    multipart: Multipart,
) -> ApiResult<Json<ApiResponse<BatchResult>>> {
    let start_time = Instant::now();
    tracing::info!("Processing batch classify request: request_id={}", request_id);

    let batch = classify_batch(&state, &request_id, multipart)
        .await
        .with_request_id(&request_id)?;

    tracing::info!(
        "Batch classify completed: request_id={}, files={}, confident={}, time={:.3}s",
        request_id,
        batch.total,
        batch.confident,
        start_time.elapsed().as_secs_f32()
    );

    Ok(Json(ApiResponse::success(batch, request_id)))
}

/// 批处理：任一文件失败则整批失败
async fn classify_batch(
    state: &AppState,
    request_id: &str,
    mut multipart: Multipart,
) -> Result<BatchResult> {
    let mut files = Vec::new();
    let mut options = ClassifyOptions::default();

    while let Some(field) = next_field(&mut multipart).await? {
        let field_name = field.name().unwrap_or("unknown").to_string();

        match field_name.as_str() {
            "files" => {
                let data = read_file(field).await?;
                if !data.is_empty() {
                    files.push(data);
                }
            }
            "threshold" => {
                if let Some(threshold) = read_threshold(field).await? {
                    options.threshold = Some(threshold);
                }
            }
            _ => {
                tracing::debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    if files.is_empty() {
        return Err(ClassifierError::InvalidInput(
            "No valid image files provided".to_string(),
        ));
    }

    let mut results = Vec::with_capacity(files.len());
    for (i, file_data) in files.into_iter().enumerate() {
        tracing::debug!("Processing file {} of batch {}", i + 1, request_id);
        let result =
            ClassificationPipeline::process_bytes(&state.manager, file_data, options.clone(), None)
                .await?;
        results.push(result);
    }

    let confident = results.iter().filter(|r| r.is_confident()).count();

    Ok(BatchResult {
        total: results.len(),
        confident,
        results,
    })
}

/// 单文件上传内容
struct Upload {
    data: Bytes,
    options: ClassifyOptions,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload> {
    let mut image_data: Option<Bytes> = None;
    let mut options = ClassifyOptions::default();

    while let Some(field) = next_field(&mut multipart).await? {
        let field_name = field.name().unwrap_or("unknown").to_string();

        match field_name.as_str() {
            "file" => {
                // 格式由文件内容判断，不信任客户端声明的Content-Type
                let data = read_file(field).await?;
                if data.is_empty() {
                    return Err(ClassifierError::InvalidInput("Empty file".to_string()));
                }

                tracing::debug!("Received file: {} bytes", data.len());
                image_data = Some(data);
            }
            "threshold" => {
                if let Some(threshold) = read_threshold(field).await? {
                    options.threshold = Some(threshold);
                }
            }
            _ => {
                tracing::debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    let data = image_data
        .ok_or_else(|| ClassifierError::InvalidInput("No image file provided".to_string()))?;

    Ok(Upload { data, options })
}

async fn next_field(multipart: &mut Multipart) -> Result<Option<Field<'_>>> {
    multipart.next_field().await.map_err(|e| {
        ClassifierError::InvalidInput(format!("Failed to read multipart field: {}", e))
    })
}

async fn read_file(field: Field<'_>) -> Result<Bytes> {
    field
        .bytes()
        .await
        .map_err(|e| ClassifierError::InvalidInput(format!("Failed to read file data: {}", e)))
}

/// 读取阈值字段，空值表示使用默认阈值
async fn read_threshold(field: Field<'_>) -> Result<Option<f32>> {
    let value = field.text().await.map_err(|e| {
        ClassifierError::InvalidInput(format!("Failed to read threshold field: {}", e))
    })?;

    if value.trim().is_empty() {
        return Ok(None);
    }

    parse_threshold(&value).map(Some)
}

fn parse_threshold(value: &str) -> Result<f32> {
    let threshold: f32 = value.trim().parse().map_err(|_| {
        ClassifierError::InvalidInput(format!("Invalid threshold value: {}", value))
    })?;

    if !(0.0..=1.0).contains(&threshold) {
        return Err(ClassifierError::InvalidInput(
            "Threshold must be between 0.0 and 1.0".to_string(),
        ));
    }

    Ok(threshold)
}

/// 开发模式下记录流水线进度
fn progress_logger(
    state: &AppState,
    request_id: &str,
) -> Option<mpsc::UnboundedSender<ClassifyStatus>> {
    if !state.manager.config().dev_mode {
        return None;
    }

    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<ClassifyStatus>();
    let request_id = request_id.to_string();

    tokio::spawn(async move {
        while let Some(status) = status_rx.recv().await {
            tracing::debug!(
                "Classify progress [{}]: {:?} - {:.1}% - {}",
                request_id,
                status.stage,
                status.progress * 100.0,
                status.message
            );
        }
    });

    Some(status_tx)
}
