use crate::utils::error::{ApiFailure, ClassifierError};
use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    Json,
};
use serde::Deserialize;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 验证的JSON提取器
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: for<'de> Deserialize<'de> + Validate,
    S: Send + Sync,
{
    type Rejection = ApiFailure;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let request_id = RequestId::from_extensions_or_headers(req.extensions(), req.headers());

        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|err| {
            ClassifierError::Validation(format!("JSON parse error: {}", err.body_text()))
                .with_request_id(request_id.0.clone())
        })?;

        value.validate().map_err(|e| {
            ClassifierError::Validation(format!("Validation error: {}", e))
                .with_request_id(request_id.0.clone())
        })?;

        Ok(ValidatedJson(value))
    }
}

/// 验证trait
pub trait Validate {
    type Error: std::fmt::Display;

    fn validate(&self) -> Result<(), Self::Error>;
}

impl Validate for crate::web::handlers::ClassifyJsonRequest {
    type Error = String;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.image.trim().is_empty() {
            return Err("Image data cannot be empty".to_string());
        }

        if let Some(threshold) = self.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err("Threshold must be between 0.0 and 1.0".to_string());
            }
        }

        Ok(())
    }
}

/// 请求ID：中间件写入请求扩展，缺失时取 X-Request-ID 头或新生成
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        RequestId(request_id)
    }

    fn from_extensions_or_headers(extensions: &axum::http::Extensions, headers: &HeaderMap) -> Self {
        extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| Self::from_headers(headers))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_extensions_or_headers(&parts.extensions, &parts.headers))
    }
}
