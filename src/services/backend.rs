//! The object-store seam the gateway talks through.
//!
//! `StorageService` never touches a vendor client directly; it only sees
//! `ObjectBackend`. The S3 implementation lives in `s3_backend`, the
//! in-process one in `memory_backend`.

use crate::models::object::{ObjectLocation, StoredFile};
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use std::{io, path::PathBuf};
use thiserror::Error;

/// Body of a put request.
#[derive(Debug, Clone)]
pub enum PutBody {
    Bytes(Bytes),
    /// Read by the backend from the local filesystem.
    File(PathBuf),
    Text(String),
}

/// A single put, always written with the canned ACL in `acl`.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub location: ObjectLocation,
    pub body: PutBody,
    pub content_type: Option<String>,
    pub acl: &'static str,
}

/// What the backend reported for a put.
#[derive(Debug, Clone)]
pub struct PutReceipt {
    pub status: StatusCode,
    pub etag: Option<String>,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// The store answered with an error code.
    #[error("{}: {message}", .code.as_deref().unwrap_or("Unknown"))]
    Service {
        code: Option<String>,
        message: String,
    },
    /// Local failure before or while talking to the store.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BackendError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => code.as_deref(),
            Self::Io(_) => None,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn put_object(&self, request: PutRequest) -> BackendResult<PutReceipt>;

    /// Open an object for reading with its declared content type.
    async fn get_object(&self, location: &ObjectLocation) -> BackendResult<StoredFile>;

    /// List keys under `prefix`, resuming from `token` when given.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> BackendResult<ListPage>;

    async fn copy_object(
        &self,
        source: &ObjectLocation,
        destination: &ObjectLocation,
    ) -> BackendResult<()>;

    async fn delete_object(&self, location: &ObjectLocation) -> BackendResult<()>;

    /// Cheap reachability check used by `/readyz`.
    async fn head_bucket(&self, bucket: &str) -> BackendResult<()>;
}
