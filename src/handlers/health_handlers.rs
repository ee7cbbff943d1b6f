//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness, checks the configured bucket

use crate::services::storage_service::StorageService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness only: always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Asks the backend whether the bucket is reachable with the current
/// credentials. HTTP 200 when it is, HTTP 503 otherwise. The backend
/// fault is logged; the response only says the bucket is unreachable.
pub async fn readyz(State(service): State<StorageService>) -> impl IntoResponse {
    let bucket_check = match service.check_ready().await {
        Ok(()) => CheckStatus {
            ok: true,
            error: None,
        },
        Err(e) => {
            tracing::warn!("readiness check for bucket `{}` failed: {}", service.bucket(), e);
            CheckStatus {
                ok: false,
                error: Some("bucket unreachable".into()),
            }
        }
    };

    let overall_ok = bucket_check.ok;
    let mut checks = HashMap::new();
    checks.insert("bucket", bucket_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use crate::{
        routes::routes::routes,
        services::{
            memory_backend::{BackendOp, MemoryBackend},
            storage_service::StorageService,
        },
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn healthz_is_always_ok() {
        let service = StorageService::new(Arc::new(MemoryBackend::new()), "files");
        let response = routes(1024)
            .with_state(service)
            .oneshot(get("/healthz"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_follows_bucket_reachability() {
        let backend = Arc::new(MemoryBackend::new());
        let app = routes(1024).with_state(StorageService::new(backend.clone(), "files"));

        let response = app.clone().oneshot(get("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        backend.fail(BackendOp::Head, "NoSuchBucket", "gone").await;
        let response = app.oneshot(get("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn readyz_does_not_expose_backend_fault() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .fail(BackendOp::Head, "InvalidAccessKeyId", "key AKIA123 is not valid")
            .await;
        let app = routes(1024).with_state(StorageService::new(backend, "files"));

        let response = app.oneshot(get("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["checks"]["bucket"]["error"], "bucket unreachable");
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("InvalidAccessKeyId"));
        assert!(!text.contains("AKIA123"));
    }
}
