use crate::session::SessionManager;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{
    ErrorResponse, GatewayError, StartQuery, StartResponse, StatusResponse, StopQuery,
    StopResponse,
};
use serde_json::{json, Value};
use tracing::error;

/// 同步返回给调用方的错误
#[derive(Debug)]
pub struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            err if err.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

/// 启动转码
pub async fn start_stream(
    State(manager): State<SessionManager>,
    Query(query): Query<StartQuery>,
) -> Result<Json<StartResponse>, ApiError> {
    let request = query.into_request()?;
    let hls_url = manager.start(request).await?;
    Ok(Json(StartResponse::new(hls_url)))
}

/// 停止转码并删除输出
pub async fn stop_stream(
    State(manager): State<SessionManager>,
    Query(query): Query<StopQuery>,
) -> Result<Json<StopResponse>, ApiError> {
    let stream_id = query.into_stream_id()?;
    manager.stop(&stream_id).await?;
    Ok(Json(StopResponse::default()))
}

/// 查询所有正在运行的流
pub async fn list_streams(State(manager): State<SessionManager>) -> Json<StatusResponse> {
    Json(StatusResponse {
        active_streams: manager.status(),
    })
}

/// 健康检查
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::super::routes::create_router;
    use crate::config::Config;
    use crate::resolver::OnvifClient;
    use crate::session::SessionManager;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const LONG_RUNNING: &str = r#"for last; do :; done
echo '#EXTM3U' > "$last"
exec sleep 30"#;

    fn app(root: &Path) -> Router {
        let mut config = Config::default();
        config.output.root = root.to_path_buf();
        config.transcoder.program = "sh".to_string();
        config.transcoder.global_args =
            vec!["-c".to_string(), LONG_RUNNING.to_string(), "fake-ffmpeg".to_string()];
        config.transcoder.stop_timeout_secs = 2;

        let discovery = Arc::new(OnvifClient::new(Duration::from_secs(1)).unwrap());
        let manager = SessionManager::from_config(&config, discovery);
        create_router(manager, &config.output)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let (status, body) = get(app, uri).await;
        (status, serde_json::from_str(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let root = tempfile::tempdir().unwrap();
        let (status, body) = get_json(&app(root.path()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_start_missing_parameters() {
        let root = tempfile::tempdir().unwrap();
        let app = app(root.path());

        let (status, body) = get_json(&app, "/start").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing brand");
        assert_eq!(body["reason"], "validation_error");

        let (status, body) =
            get_json(&app, "/start?brand=hikvision&ip=10.0.0.5&account=admin&password=x").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing stream_id");
    }

    #[tokio::test]
    async fn test_start_rejects_path_like_stream_id() {
        let root = tempfile::tempdir().unwrap();
        let (status, body) = get_json(
            &app(root.path()),
            "/start?brand=rtsp&ip=10.0.0.5&account=admin&password=x&stream_id=..%2Fetc",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "validation_error");
    }

    #[tokio::test]
    async fn test_stop_errors() {
        let root = tempfile::tempdir().unwrap();
        let app = app(root.path());

        let (status, body) = get_json(&app, "/stop").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing stream_id");

        let (status, body) = get_json(&app, "/stop?stream_id=cam9").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "No stream found with ID cam9");
        assert_eq!(body["reason"], "not_found");
    }

    #[tokio::test]
    async fn test_status_empty() {
        let root = tempfile::tempdir().unwrap();
        let (status, body) = get_json(&app(root.path()), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "active_streams": {} }));
    }

    #[tokio::test]
    async fn test_output_files_are_served() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("cam1")).unwrap();
        std::fs::write(root.path().join("cam1/output.m3u8"), "#EXTM3U\n").unwrap();
        let app = app(root.path());

        let (status, body) = get(&app, "/output/cam1/output.m3u8").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "#EXTM3U\n");

        let (status, _) = get(&app, "/output/cam1/missing.ts").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_status_stop_flow() {
        let root = tempfile::tempdir().unwrap();
        let app = app(root.path());
        let start = "/start?brand=rtsp&ip=10.0.0.5&account=admin&password=p%40ss&stream_id=cam1";

        let (status, body) = get_json(&app, start).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Stream started");
        assert_eq!(body["hls_url"], "/output/cam1/output.m3u8");

        let (status, body) = get_json(&app, start).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Stream with ID cam1 already running");
        assert_eq!(body["reason"], "duplicate_session");

        let (_, body) = get_json(&app, "/status").await;
        assert_eq!(body["active_streams"]["cam1"], "/output/cam1/output.m3u8");

        let (status, body) = get_json(&app, "/stop?stream_id=cam1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Stream stopped and files deleted");
        assert!(!root.path().join("cam1").exists());

        let (status, _) = get_json(&app, "/stop?stream_id=cam1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_failure_is_server_error() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output.root = root.path().to_path_buf();
        config.transcoder.program = "/nonexistent/ffmpeg".to_string();
        let discovery = Arc::new(OnvifClient::new(Duration::from_secs(1)).unwrap());
        let app = create_router(SessionManager::from_config(&config, discovery), &config.output);

        let (status, body) = get_json(
            &app,
            "/start?brand=hikvision&ip=10.0.0.5&account=admin&password=x&stream_id=cam1",
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["reason"], "launch_error");

        let (_, body) = get_json(&app, "/status").await;
        assert_eq!(body["active_streams"], serde_json::json!({}));
    }
}
