pub mod handlers;
pub mod middleware;
pub mod extractors;
pub mod ui;

use crate::{
    models::ModelManager,
    utils::error::{ApiResult, ClassifierError, WithRequestId},
    web::extractors::RequestId,
    Config, Result,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ModelManager>,
}

pub async fn serve(config: Config) -> Result<()> {
    // 模型只在启动时加载一次
    let manager = Arc::new(ModelManager::load(config.clone())?);
    let app = create_app(manager);

    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        ClassifierError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e))
    })?;

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST /classify         - JSON base64 upload");
    tracing::info!("  POST /classify/upload  - Multipart file upload");
    tracing::info!("  POST /classify/batch   - Multipart batch upload");
    tracing::info!("  POST /classify/report  - Download prediction as text");
    tracing::info!("  GET  /                 - Web UI");
    tracing::info!("  GET  /health           - Health check");
    tracing::info!("  GET  /api/info         - Service information");

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        ClassifierError::Internal(format!("Failed to bind to address {}: {}", addr, e))
    })?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ClassifierError::Internal(format!("Server failed: {}", e)))?;

    tracing::info!("Server stopped");
    Ok(())
}

pub fn create_app(manager: Arc<ModelManager>) -> Router {
    let server_config = manager.config().server_config.clone();
    let state = AppState { manager };

    Router::new()
        .route("/classify", post(handlers::classify_json_handler))
        .route("/classify/upload", post(handlers::classify_upload_handler))
        .route("/classify/batch", post(handlers::classify_batch_handler))
        .route("/classify/report", post(handlers::classify_report_handler))
        .route("/", get(ui::index_handler))
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(DefaultBodyLimit::max(server_config.max_request_size))
        .layer(RequestBodyLimitLayer::new(server_config.max_request_size))
        .layer(TimeoutLayer::new(Duration::from_secs(server_config.request_timeout)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 健康检查端点
async fn health_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
) -> ApiResult<Json<serde_json::Value>> {
    let manager = Arc::clone(&state.manager);
    tokio::task::spawn_blocking(move || manager.health_check())
        .await
        .map_err(|e| ClassifierError::Internal(format!("Health check task failed: {}", e)))
        .and_then(|checked| checked)
        .with_request_id(&request_id)?;

    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })))
}

/// 服务信息端点
async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.manager.get_stats();
    Json(json!({
        "service": "Terrain Classifier",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "model": stats,
        "supported_formats": ["image/jpeg", "image/png"],
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigArgs;
    use crate::image::loader::tests::encoded_image;
    use crate::models::TerrainModel;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use base64::Engine;
    use image::ImageFormat;
    use ndarray::Array4;
    use tower::ServiceExt;

    const BOUNDARY: &str = "terrain-test-boundary";

    struct FixedModel(Vec<f32>);

    impl TerrainModel for FixedModel {
        fn predict(&self, _input: Array4<f32>) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn app(scores: Vec<f32>) -> Router {
        let config = Config::new(ConfigArgs::default()).unwrap();
        create_app(Arc::new(ModelManager::with_model(
            Arc::new(FixedModel(scores)),
            config,
        )))
    }

    fn multipart_body(parts: &[(&str, Option<&str>, Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, content_type, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match content_type {
                Some(ct) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"upload\"\r\nContent-Type: {}\r\n\r\n",
                        name, ct
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn multipart_request(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// 错误响应使用统一信封，且 request_id 与响应头一致
    async fn assert_envelope_error(
        response: axum::response::Response,
        code: &str,
    ) -> serde_json::Value {
        let header_id = response.headers()["x-request-id"]
            .to_str()
            .unwrap()
            .to_string();
        let json = json_body(response).await;

        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], code);
        assert!(json["error"]["message"].is_string());
        assert!(json["timestamp"].is_string());
        assert!(json.get("data").is_none());
        assert_eq!(json["request_id"], header_id.as_str());
        json
    }

    #[tokio::test]
    async fn upload_returns_confident_prediction() {
        let png = encoded_image(200, 100, ImageFormat::Png);
        let body = multipart_body(&[("file", Some("image/png"), png)]);

        let response = app(vec![0.05, 0.05, 0.05, 0.85])
            .oneshot(multipart_request("/classify/upload", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["prediction"]["class"], "Plains");
        assert_eq!(json["data"]["verdict"], "confident");
        assert_eq!(
            json["data"]["report"],
            "Prediction: Plains 🌾\nConfidence: 85.00%"
        );
    }

    #[tokio::test]
    async fn json_endpoint_accepts_base64() {
        let jpeg = encoded_image(40, 40, ImageFormat::Jpeg);
        let payload = json!({
            "image": base64::engine::general_purpose::STANDARD.encode(&jpeg),
        });
        let request = Request::builder()
            .method("POST")
            .uri("/classify")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Request-ID", "abc-123")
            .body(Body::from(payload.to_string()))
            .unwrap();

        let response = app(vec![0.5, 0.2, 0.2, 0.1]).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["request_id"], "abc-123");
        assert_eq!(json["data"]["verdict"], "uncertain");
        assert!(json["data"].get("report").is_none());
    }

    #[tokio::test]
    async fn json_endpoint_validates_threshold() {
        let request = Request::builder()
            .method("POST")
            .uri("/classify")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"image": "abc", "threshold": 2.0}"#))
            .unwrap();

        let response = app(vec![0.25; 4]).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_envelope_error(response, "VALIDATION_ERROR").await;
    }

    #[tokio::test]
    async fn malformed_json_is_validation_error_with_request_id() {
        let request = Request::builder()
            .method("POST")
            .uri("/classify")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Request-ID", "req-json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app(vec![0.25; 4]).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["x-request-id"], "req-json");

        let json = assert_envelope_error(response, "VALIDATION_ERROR").await;
        assert_eq!(json["request_id"], "req-json");
    }

    #[tokio::test]
    async fn bad_base64_error_carries_request_id() {
        let request = Request::builder()
            .method("POST")
            .uri("/classify")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Request-ID", "req-b64")
            .body(Body::from(r#"{"image": "@@@not base64@@@"}"#))
            .unwrap();

        let response = app(vec![0.25; 4]).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["x-request-id"], "req-b64");

        let json = assert_envelope_error(response, "BASE64_DECODE_ERROR").await;
        assert_eq!(json["request_id"], "req-b64");
    }

    #[tokio::test]
    async fn report_download_is_an_attachment() {
        let png = encoded_image(30, 30, ImageFormat::Png);
        let body = multipart_body(&[("file", Some("image/png"), png)]);

        let response = app(vec![0.95, 0.02, 0.02, 0.01])
            .oneshot(multipart_request("/classify/report", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("terrain_result.txt"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("Prediction: Desert"));
    }

    #[tokio::test]
    async fn report_for_uncertain_prediction_is_rejected() {
        let png = encoded_image(30, 30, ImageFormat::Png);
        let body = multipart_body(&[("file", Some("image/png"), png)]);

        let response = app(vec![0.3, 0.3, 0.2, 0.2])
            .oneshot(multipart_request("/classify/report", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_envelope_error(response, "UNCERTAIN_PREDICTION").await;
    }

    #[tokio::test]
    async fn upload_without_file_is_bad_request() {
        let body = multipart_body(&[("threshold", None, b"0.5".to_vec())]);

        let response = app(vec![0.25; 4])
            .oneshot(multipart_request("/classify/upload", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_envelope_error(response, "INVALID_INPUT").await;
    }

    #[tokio::test]
    async fn upload_rejects_unsupported_format() {
        let bmp = encoded_image(8, 8, ImageFormat::Bmp);
        let body = multipart_body(&[("file", Some("image/bmp"), bmp)]);
        let mut request = multipart_request("/classify/upload", body);
        request
            .headers_mut()
            .insert("x-request-id", "req-bmp".parse().unwrap());

        let response = app(vec![0.25; 4]).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let json = assert_envelope_error(response, "UNSUPPORTED_FORMAT").await;
        assert_eq!(json["request_id"], "req-bmp");
    }

    #[tokio::test]
    async fn upload_sniffs_format_regardless_of_declared_type() {
        let png = encoded_image(24, 24, ImageFormat::Png);
        let body = multipart_body(&[("file", Some("application/octet-stream"), png)]);

        let response = app(vec![0.9, 0.04, 0.03, 0.03])
            .oneshot(multipart_request("/classify/upload", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["data"]["prediction"]["class"], "Desert");
    }

    #[tokio::test]
    async fn batch_fails_when_any_file_is_corrupt() {
        let body = multipart_body(&[
            ("files", Some("image/png"), encoded_image(10, 10, ImageFormat::Png)),
            ("files", Some("image/png"), b"not really a png".to_vec()),
        ]);

        let response = app(vec![0.1, 0.6, 0.2, 0.1])
            .oneshot(multipart_request("/classify/batch", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_envelope_error(response, "UNSUPPORTED_FORMAT").await;
    }

    #[tokio::test]
    async fn batch_accepts_octet_stream_and_empty_threshold() {
        let body = multipart_body(&[
            ("files", Some("application/octet-stream"), encoded_image(10, 10, ImageFormat::Png)),
            ("threshold", None, Vec::new()),
        ]);

        let response = app(vec![0.1, 0.6, 0.2, 0.1])
            .oneshot(multipart_request("/classify/batch", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["data"]["total"], 1);
        // 空阈值使用默认 0.8
        assert_eq!(json["data"]["confident"], 0);
        let threshold = json["data"]["results"][0]["threshold"].as_f64().unwrap();
        assert!((threshold - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn batch_counts_confident_results() {
        let body = multipart_body(&[
            ("files", Some("image/png"), encoded_image(10, 10, ImageFormat::Png)),
            ("files", Some("image/jpeg"), encoded_image(12, 12, ImageFormat::Jpeg)),
            ("threshold", None, b"0.5".to_vec()),
        ]);

        let response = app(vec![0.1, 0.6, 0.2, 0.1])
            .oneshot(multipart_request("/classify/batch", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["data"]["total"], 2);
        assert_eq!(json["data"]["confident"], 2);
    }

    #[tokio::test]
    async fn batch_rejects_malformed_threshold() {
        let body = multipart_body(&[
            ("files", Some("image/png"), encoded_image(10, 10, ImageFormat::Png)),
            ("threshold", None, b"very sure".to_vec()),
        ]);

        let response = app(vec![0.1, 0.6, 0.2, 0.1])
            .oneshot(multipart_request("/classify/batch", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_envelope_error(response, "INVALID_INPUT").await;
    }

    #[tokio::test]
    async fn health_and_info_report_model_state() {
        let app = app(vec![0.25; 4]);

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");

        let response = app
            .oneshot(Request::get("/api/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["model"]["input_size"], 150);
        assert_eq!(json["model"]["classes"][3], "Plains");
    }

    #[tokio::test]
    async fn index_page_is_served_with_security_headers() {
        let response = app(vec![0.25; 4])
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }
}
