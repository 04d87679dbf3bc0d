use crate::config::ApiConfig;
use crate::error::IndexerError;
use crate::indexer::SegmentIndexer;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub indexer: Arc<SegmentIndexer>,
}

/// Push notification from a segment writer
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub s3_key: String,
    pub size_bytes: i64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/notify", post(notify))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "recording-indexer"
    }))
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.indexer.catalog().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Index one freshly written segment without waiting for the next scan.
///
/// Unauthenticated; keep it on a private network.
#[instrument(skip(state))]
async fn notify(
    State(state): State<AppState>,
    Json(request): Json<NotifyRequest>,
) -> Result<StatusCode, ApiError> {
    if request.size_bytes < 0 {
        metrics::counter!("indexer.push.rejected").increment(1);
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "size_bytes must not be negative",
            "INVALID_SIZE",
        ));
    }

    match state.indexer.ingest(&request.s3_key, request.size_bytes).await {
        Ok(recording) => {
            info!(
                camera_id = %recording.camera_id,
                started_at = %recording.started_at,
                s3_key = %recording.s3_key,
                "Recording indexed from push"
            );
            metrics::counter!("indexer.push.accepted").increment(1);
            Ok(StatusCode::NO_CONTENT)
        }
        Err(IndexerError::UnrecognizedKey(key)) => {
            warn!(s3_key = %key, "Rejected push for unrecognized key");
            metrics::counter!("indexer.push.rejected").increment(1);
            Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("Key does not match a segment naming convention: {key}"),
                "UNRECOGNIZED_KEY",
            ))
        }
        Err(e) => {
            error!(error = %e, "Failed to index pushed recording");
            metrics::counter!("indexer.push.failed").increment(1);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to index recording",
                "STORE_ERROR",
            ))
        }
    }
}

/// Serve the push ingest API until `shutdown` is cancelled
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let Some(ref addr) = config.listen_addr else {
        info!("No listen address configured, push ingest disabled");
        return Ok(());
    };

    let router = create_router(state);

    info!(address = %addr, "Starting push ingest API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to address {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MockSegmentCatalog, SegmentCatalog};
    use crate::key_parser::{KeyParser, ParseTimezone};
    use crate::scanner::Scanner;
    use crate::testing::{MemoryBucket, MemoryCatalog};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use std::time::Duration;
    use tower::ServiceExt;

    fn indexer(catalog: Arc<dyn SegmentCatalog>) -> Arc<SegmentIndexer> {
        let parser = KeyParser::new(Duration::from_secs(3600), ParseTimezone::Utc).unwrap();
        Arc::new(SegmentIndexer::new(parser, catalog, Duration::from_secs(5)))
    }

    fn notify_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/notify")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn error_code(response: axum::response::Response) -> String {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        json["code"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_notify_indexes_recording() {
        let catalog = Arc::new(MemoryCatalog::default());
        let router = create_router(AppState {
            indexer: indexer(catalog.clone()),
        });

        let response = router
            .oneshot(notify_request(
                r#"{"s3_key": "cam1_20240101_120000.mp4", "size_bytes": 500}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());

        let rows = catalog.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].camera_id, "cam1");
        assert_eq!(rows[0].size_bytes, 500);
    }

    #[tokio::test]
    async fn test_notify_repeated_is_idempotent() {
        let catalog = Arc::new(MemoryCatalog::default());
        let router = create_router(AppState {
            indexer: indexer(catalog.clone()),
        });

        for size in [100, 900] {
            let body = format!(
                r#"{{"s3_key": "cam1/2024/01/01/seg_20240101_120000.mp4", "size_bytes": {size}}}"#
            );
            let response = router.clone().oneshot(notify_request(&body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let rows = catalog.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].size_bytes, 900);
    }

    #[tokio::test]
    async fn test_notify_unrecognized_key_is_bad_request() {
        let catalog = Arc::new(MemoryCatalog::default());
        let router = create_router(AppState {
            indexer: indexer(catalog.clone()),
        });

        let response = router
            .oneshot(notify_request(r#"{"s3_key": "bogus.mp4", "size_bytes": 10}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "UNRECOGNIZED_KEY");
        assert!(catalog.rows().is_empty());
    }

    #[tokio::test]
    async fn test_notify_negative_size_is_bad_request() {
        let catalog = Arc::new(MemoryCatalog::default());
        let router = create_router(AppState {
            indexer: indexer(catalog.clone()),
        });

        let response = router
            .oneshot(notify_request(
                r#"{"s3_key": "cam1_20240101_120000.mp4", "size_bytes": -1}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "INVALID_SIZE");
        assert!(catalog.rows().is_empty());
    }

    #[tokio::test]
    async fn test_notify_malformed_body_is_rejected() {
        let router = create_router(AppState {
            indexer: indexer(Arc::new(MemoryCatalog::default())),
        });

        let response = router
            .oneshot(notify_request(r#"{"key": "cam1_20240101_120000.mp4"}"#))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_notify_store_failure_is_internal_error() {
        let mut catalog = MockSegmentCatalog::new();
        catalog.expect_upsert().times(1).returning(|r| {
            Err(IndexerError::Store {
                s3_key: r.s3_key.clone(),
                reason: "too many connections".to_string(),
            })
        });
        let router = create_router(AppState {
            indexer: indexer(Arc::new(catalog)),
        });

        let response = router
            .oneshot(notify_request(
                r#"{"s3_key": "cam1_20240101_120000.mp4", "size_bytes": 500}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_code(response).await, "STORE_ERROR");
    }

    #[tokio::test]
    async fn test_push_and_scan_converge_in_either_order() {
        let key = "cam7_20240101_120000.mp4";

        for push_first in [true, false] {
            let catalog = Arc::new(MemoryCatalog::default());
            let indexer = indexer(catalog.clone());
            let bucket = Arc::new(MemoryBucket::with_objects(10, &[(key, 2048)]));
            let scanner =
                Scanner::new("archive", bucket, indexer.clone(), Duration::from_secs(5), 10);
            let router = create_router(AppState {
                indexer: indexer.clone(),
            });
            let push = notify_request(&format!(r#"{{"s3_key": "{key}", "size_bytes": 1024}}"#));

            if push_first {
                router.oneshot(push).await.unwrap();
                scanner.scan_once().await.unwrap();
            } else {
                scanner.scan_once().await.unwrap();
                router.oneshot(push).await.unwrap();
            }

            let rows = catalog.rows();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].camera_id, "cam7");
            assert_eq!(rows[0].s3_key, key);
            // Last write wins
            let expected_size = if push_first { 2048 } else { 1024 };
            assert_eq!(rows[0].size_bytes, expected_size);
        }
    }

    #[tokio::test]
    async fn test_readiness_reflects_catalog() {
        let catalog = Arc::new(MemoryCatalog::default());
        let router = create_router(AppState {
            indexer: indexer(catalog.clone()),
        });

        let ready = Request::builder().uri("/ready").body(Body::empty()).unwrap();
        let response = router.clone().oneshot(ready).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        catalog.set_fail_writes(true);
        let ready = Request::builder().uri("/ready").body(Body::empty()).unwrap();
        let response = router.oneshot(ready).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
