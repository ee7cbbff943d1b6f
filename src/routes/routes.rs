//! Defines routes for the file gateway.
//!
//! ## Structure
//! - **File endpoints** (`/api/AwsS3`)
//!   - `POST   /api/AwsS3` — multipart upload (`file`, optional `folder`)
//!   - `GET    /api/AwsS3?fileName=&folder=` — download a file
//!   - `DELETE /api/AwsS3?fileName=&folder=` — delete a file
//!   - `GET    /api/AwsS3/directory?folder=` — read every file in a folder
//!   - `POST   /api/AwsS3/move` — move a file between folders
//!   - `PUT    /api/AwsS3/content` — store a text payload
//!
//! - **Health**
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{
            delete_file, get_file, move_file, read_directory, upload_content, upload_file,
        },
    },
    services::storage_service::StorageService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Build and return the router for all gateway routes.
///
/// Uploads are buffered in memory, so request bodies are capped at
/// `max_upload_bytes`. The router carries `StorageService` as shared state.
pub fn routes(max_upload_bytes: usize) -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // File routes
        .route(
            "/api/AwsS3",
            post(upload_file).get(get_file).delete(delete_file),
        )
        .route("/api/AwsS3/directory", get(read_directory))
        .route("/api/AwsS3/move", post(move_file))
        .route("/api/AwsS3/content", put(upload_content))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
