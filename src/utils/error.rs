use crate::web::handlers::ApiResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Validation(String),

    #[error("File too large: {0} bytes, max allowed: {1} bytes")]
    FileTooLarge(usize, usize),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Model is unsure about this image (confidence {:.2}%)", .0 * 100.0)]
    Uncertain(f32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ClassifierError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ClassifierError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ClassifierError::Validation(_) => StatusCode::BAD_REQUEST,
            ClassifierError::FileTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            ClassifierError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ClassifierError::Base64(_) => StatusCode::BAD_REQUEST,
            ClassifierError::Json(_) => StatusCode::BAD_REQUEST,
            ClassifierError::ImageDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ClassifierError::Uncertain(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ClassifierError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ClassifierError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            ClassifierError::ImageProcessing(_) => "IMAGE_PROCESSING_ERROR",
            ClassifierError::Inference(_) => "INFERENCE_ERROR",
            ClassifierError::InvalidInput(_) => "INVALID_INPUT",
            ClassifierError::Validation(_) => "VALIDATION_ERROR",
            ClassifierError::FileTooLarge(_, _) => "FILE_TOO_LARGE",
            ClassifierError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ClassifierError::Uncertain(_) => "UNCERTAIN_PREDICTION",
            ClassifierError::Config(_) => "CONFIG_ERROR",
            ClassifierError::Io(_) => "IO_ERROR",
            ClassifierError::Json(_) => "JSON_ERROR",
            ClassifierError::Base64(_) => "BASE64_DECODE_ERROR",
            ClassifierError::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            ClassifierError::Ort(_) => "ORT_ERROR",
            ClassifierError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 附带请求ID，用于HTTP错误响应
    pub fn with_request_id(self, request_id: impl Into<String>) -> ApiFailure {
        ApiFailure {
            error: self,
            request_id: request_id.into(),
        }
    }
}

/// HTTP层错误：错误本身加上所属请求的ID
#[derive(Debug)]
pub struct ApiFailure {
    pub error: ClassifierError,
    pub request_id: String,
}

pub type ApiResult<T> = std::result::Result<T, ApiFailure>;

/// 为 `Result` 附加请求ID
pub trait WithRequestId<T> {
    fn with_request_id(self, request_id: &str) -> ApiResult<T>;
}

impl<T> WithRequestId<T> for Result<T, ClassifierError> {
    fn with_request_id(self, request_id: &str) -> ApiResult<T> {
        self.map_err(|e| e.with_request_id(request_id))
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.error.status_code();

        if status.is_server_error() {
            tracing::error!(
                "Request failed: request_id={}, {} ({})",
                self.request_id,
                self.error,
                status
            );
        } else {
            tracing::warn!(
                "Request rejected: request_id={}, {} ({})",
                self.request_id,
                self.error,
                status
            );
        }

        let body = ApiResponse::<()>::error(
            self.error.error_code(),
            self.error.to_string(),
            self.request_id,
        );

        (status, axum::Json(body)).into_response()
    }
}
