//! src/services/storage_service.rs
//!
//! StorageService — file-level operations against one bucket. Every call is a
//! single backend request (move is copy + delete) wrapped in fault
//! classification and logging. No state is kept between calls.

use crate::models::object::{
    DirectoryEntry, KeyLayout, ObjectLocation, PUBLIC_READ_ACL, StoredFile, directory_prefix,
    file_name_of,
};
use crate::services::backend::{BackendError, ObjectBackend, PutBody, PutRequest};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt, TryStreamExt, pin_mut, stream};
use std::{io, path::Path, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Error codes meaning the store rejected our credentials.
const CREDENTIAL_CODES: [&str; 2] = ["InvalidAccessKeyId", "InvalidSecurity"];
const NOT_FOUND_CODES: [&str; 2] = ["NoSuchKey", "NotFound"];

const DEFAULT_READ_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store rejected the credentials ({code}): {message}")]
    Credentials { code: String, message: String },
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object store error {}: {message}", .code.as_deref().unwrap_or("Unknown"))]
    Backend {
        code: Option<String>,
        message: String,
    },
    #[error("object store answered {status} for `{location}`")]
    UnexpectedStatus { status: StatusCode, location: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Classify a backend failure for the object at `location`.
    pub fn from_backend(err: BackendError, location: &ObjectLocation) -> Self {
        let is_one_of = |codes: &[&str]| err.code().is_some_and(|code| codes.contains(&code));
        if is_one_of(&NOT_FOUND_CODES) {
            return Self::NotFound(location.to_string());
        }
        let credentials = is_one_of(&CREDENTIAL_CODES);

        match err {
            BackendError::Service { code, message } if credentials => Self::Credentials {
                code: code.unwrap_or_default(),
                message,
            },
            BackendError::Service { code, message } => Self::Backend { code, message },
            BackendError::Io(err) => Self::Io(err),
        }
    }
}

/// StorageService maps file names and directories onto bucket locations and
/// drives the backend:
/// - Upload from a byte stream, a local path or a text payload
/// - Read one file, or every file under a directory
/// - Move a file between directories (copy, then delete the source)
/// - Remove a file
///
/// Cloning is cheap; clones share the backend client.
#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn ObjectBackend>,
    bucket: String,
    layout: KeyLayout,
    read_concurrency: usize,
}

impl StorageService {
    pub fn new(backend: Arc<dyn ObjectBackend>, bucket: impl Into<String>) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
            layout: KeyLayout::default(),
            read_concurrency: DEFAULT_READ_CONCURRENCY,
        }
    }

    pub fn with_layout(mut self, layout: KeyLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Upper bound on concurrent reads in `read_directory`.
    pub fn with_read_concurrency(mut self, read_concurrency: usize) -> Self {
        self.read_concurrency = read_concurrency.max(1);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Where `file_name` inside `directory` lives in the store.
    pub fn locate(&self, file_name: &str, directory: Option<&str>) -> ObjectLocation {
        ObjectLocation::resolve(self.layout, &self.bucket, directory, file_name)
    }

    /// Log a classified fault for `operation` on `file_name`.
    fn report(&self, operation: &str, file_name: &str, err: &StorageError) {
        match err {
            StorageError::Credentials { code, message } => error!(
                "{} of `{}` failed: check the provided AWS credentials ({}: {})",
                operation, file_name, code, message
            ),
            StorageError::NotFound(location) => {
                warn!("{} of `{}`: no object at {}", operation, file_name, location)
            }
            StorageError::Backend { .. } | StorageError::UnexpectedStatus { .. } => error!(
                "{} of `{}` failed: {}",
                operation, file_name, err
            ),
            StorageError::Io(io_err) => error!(
                "unclassified fault during {} of `{}`: {}",
                operation, file_name, io_err
            ),
        }
    }

    /// Shared write path: public-read ACL, success only on a 200 answer.
    async fn put(
        &self,
        operation: &str,
        file_name: &str,
        location: ObjectLocation,
        body: PutBody,
        content_type: Option<String>,
    ) -> StorageResult<()> {
        let request = PutRequest {
            location: location.clone(),
            body,
            content_type,
            acl: PUBLIC_READ_ACL,
        };

        let result = match self.backend.put_object(request).await {
            Ok(receipt) if receipt.status == StatusCode::OK => {
                debug!("stored {} (etag {:?})", location, receipt.etag);
                Ok(())
            }
            Ok(receipt) => Err(StorageError::UnexpectedStatus {
                status: receipt.status,
                location: location.to_string(),
            }),
            Err(err) => Err(StorageError::from_backend(err, &location)),
        };

        match result {
            Ok(()) => {
                info!(
                    "{}: uploaded `{}` to {} at {}",
                    operation,
                    file_name,
                    location,
                    Utc::now().to_rfc3339()
                );
                Ok(())
            }
            Err(err) => {
                self.report(operation, file_name, &err);
                Err(err)
            }
        }
    }

    /// Buffer `stream` into memory and store it as `file_name`.
    pub async fn upload_stream<S>(
        &self,
        stream: S,
        file_name: &str,
        directory: Option<&str>,
        content_type: Option<&str>,
    ) -> StorageResult<()>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let mut buffer = BytesMut::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => buffer.extend_from_slice(&chunk),
                Err(err) => {
                    let err = StorageError::Io(err);
                    self.report("upload", file_name, &err);
                    return Err(err);
                }
            }
        }

        let location = self.locate(file_name, directory);
        self.put(
            "upload",
            file_name,
            location,
            PutBody::Bytes(buffer.freeze()),
            content_type.map(str::to_owned),
        )
        .await
    }

    /// Store the local file at `path` under its own file name.
    pub async fn upload_file(&self, path: &Path, directory: Option<&str>) -> StorageResult<()> {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            let err = StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{}` does not name a file", path.display()),
            ));
            self.report("upload", &path.display().to_string(), &err);
            return Err(err);
        };

        let location = self.locate(file_name, directory);
        self.put(
            "upload",
            file_name,
            location,
            PutBody::File(path.to_path_buf()),
            None,
        )
        .await
    }

    /// Store a text payload with an explicit content type.
    pub async fn upload_content(
        &self,
        contents: &str,
        content_type: &str,
        file_name: &str,
        directory: Option<&str>,
    ) -> StorageResult<()> {
        let location = self.locate(file_name, directory);
        self.put(
            "upload",
            file_name,
            location,
            PutBody::Text(contents.to_string()),
            Some(content_type.to_string()),
        )
        .await
    }

    /// Open `file_name` for reading. A missing object is `Ok(None)`.
    pub async fn read_file(
        &self,
        file_name: &str,
        directory: Option<&str>,
    ) -> StorageResult<Option<StoredFile>> {
        let location = self.locate(file_name, directory);
        self.read_location("read", file_name, &location).await
    }

    async fn read_location(
        &self,
        operation: &str,
        file_name: &str,
        location: &ObjectLocation,
    ) -> StorageResult<Option<StoredFile>> {
        match self.backend.get_object(location).await {
            Ok(file) => Ok(Some(file)),
            Err(err) => match StorageError::from_backend(err, location) {
                StorageError::NotFound(_) => {
                    debug!("{}: no object at {}", operation, location);
                    Ok(None)
                }
                err => {
                    self.report(operation, file_name, &err);
                    Err(err)
                }
            },
        }
    }

    /// Every key under `directory`, following continuation tokens.
    async fn list_keys(&self, directory: &str) -> StorageResult<Vec<String>> {
        let prefix = directory_prefix(directory);
        let mut keys = Vec::new();
        let mut token = None;

        loop {
            let page = self
                .backend
                .list_objects(&self.bucket, &prefix, token)
                .await
                .map_err(|err| {
                    let location = ObjectLocation::new(self.bucket.as_str(), prefix.as_str());
                    let err = StorageError::from_backend(err, &location);
                    self.report("list", directory, &err);
                    err
                })?;

            keys.extend(page.keys);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(keys)
    }

    /// Read every file under `directory`, in listing order.
    ///
    /// Keys whose last segment is empty (folder placeholders such as `dir/`)
    /// are skipped, as are objects that disappear between list and read.
    pub async fn read_directory(&self, directory: &str) -> StorageResult<Vec<DirectoryEntry>> {
        let keys = self.list_keys(directory).await?;
        let bucket = self.bucket.as_str();

        let entries: Vec<Option<DirectoryEntry>> = stream::iter(keys)
            .filter(|key| futures::future::ready(!file_name_of(key).is_empty()))
            .map(|key| async move {
                let location = ObjectLocation::new(bucket, key);
                let file_name = location.file_name().to_string();
                let file = self.read_location("read", &file_name, &location).await?;
                if file.is_none() {
                    warn!("{} vanished while reading `{}`", location, directory);
                }
                Ok::<_, StorageError>(file.map(|file| DirectoryEntry { file_name, file }))
            })
            .buffered(self.read_concurrency)
            .try_collect()
            .await?;

        Ok(entries.into_iter().flatten().collect())
    }

    /// Copy `file_name` from `source_directory` to `destination_directory`,
    /// then delete the source.
    ///
    /// Not atomic: when the delete fails the object stays in both places and
    /// the delete fault is returned.
    pub async fn move_file(
        &self,
        file_name: &str,
        source_directory: &str,
        destination_directory: &str,
    ) -> StorageResult<()> {
        let source = self.locate(file_name, Some(source_directory));
        let destination = self.locate(file_name, Some(destination_directory));

        if let Err(err) = self.backend.copy_object(&source, &destination).await {
            let err = StorageError::from_backend(err, &source);
            self.report("move", file_name, &err);
            return Err(err);
        }

        if let Err(err) = self.backend.delete_object(&source).await {
            let err = StorageError::from_backend(err, &source);
            error!(
                "move of `{}`: copied to {} but the source {} could not be removed; object now exists in both",
                file_name, destination, source
            );
            self.report("move", file_name, &err);
            return Err(err);
        }

        info!(
            "move: `{}` moved from {} to {} at {}",
            file_name,
            source,
            destination,
            Utc::now().to_rfc3339()
        );
        Ok(())
    }

    /// Delete `file_name`. Removing a missing object succeeds.
    pub async fn remove_file(&self, file_name: &str, directory: Option<&str>) -> StorageResult<()> {
        let location = self.locate(file_name, directory);
        match self.backend.delete_object(&location).await {
            Ok(()) => {
                info!(
                    "remove: deleted `{}` from {} at {}",
                    file_name,
                    location,
                    Utc::now().to_rfc3339()
                );
                Ok(())
            }
            Err(err) => {
                let err = StorageError::from_backend(err, &location);
                self.report("remove", file_name, &err);
                Err(err)
            }
        }
    }

    /// Check the bucket through the backend.
    pub async fn check_ready(&self) -> StorageResult<()> {
        self.backend.head_bucket(&self.bucket).await.map_err(|err| {
            StorageError::from_backend(err, &ObjectLocation::new(self.bucket.as_str(), ""))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_backend::{BackendOp, MemoryBackend};

    fn service() -> (Arc<MemoryBackend>, StorageService) {
        let backend = Arc::new(MemoryBackend::new());
        let service = StorageService::new(backend.clone(), "files");
        (backend, service)
    }

    fn body(bytes: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::iter(vec![
            Ok(Bytes::from_static(&bytes[..bytes.len() / 2])),
            Ok(Bytes::from_static(&bytes[bytes.len() / 2..])),
        ])
    }

    async fn read_all(file: StoredFile) -> Vec<u8> {
        let chunks: Vec<Bytes> = file.body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn upload_then_read_round_trips() {
        let (backend, service) = service();
        service
            .upload_stream(body(b"quarterly numbers"), "q1.csv", Some("reports"), Some("text/csv"))
            .await
            .unwrap();

        let stored = backend
            .object(&ObjectLocation::new("files", "reports/q1.csv"))
            .await
            .unwrap();
        assert_eq!(stored.acl, "public-read");

        let file = service
            .read_file("q1.csv", Some("reports"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.content_type.as_deref(), Some("text/csv"));
        assert_eq!(read_all(file).await, b"quarterly numbers");
    }

    #[tokio::test]
    async fn reading_a_missing_object_is_none() {
        let (_, service) = service();
        let file = service.read_file("ghost.txt", Some("nowhere")).await.unwrap();
        assert!(file.is_none());
    }

    #[tokio::test]
    async fn credential_codes_are_classified() {
        let (backend, service) = service();
        for code in CREDENTIAL_CODES {
            backend.fail(BackendOp::Get, code, "bad key").await;
            let err = service.read_file("a.txt", None).await.unwrap_err();
            assert!(matches!(err, StorageError::Credentials { .. }), "{code}");
        }
    }

    #[tokio::test]
    async fn other_codes_are_generic_backend_faults() {
        let (backend, service) = service();
        backend.fail(BackendOp::Put, "AccessDenied", "denied").await;

        let err = service
            .upload_content("hi", "text/plain", "a.txt", None)
            .await
            .unwrap_err();
        match err {
            StorageError::Backend { code, .. } => assert_eq!(code.as_deref(), Some("AccessDenied")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_ok_put_status_is_a_failure() {
        let (backend, service) = service();
        backend.set_put_status(StatusCode::ACCEPTED).await;

        let err = service
            .upload_content("{}", "application/json", "a.json", Some("cfg"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::UnexpectedStatus { status, .. } if status == StatusCode::ACCEPTED
        ));
    }

    #[tokio::test]
    async fn upload_content_keeps_content_type() {
        let (_, service) = service();
        service
            .upload_content("<p>hi</p>", "text/html", "index.html", Some("site"))
            .await
            .unwrap();

        let file = service
            .read_file("index.html", Some("site"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.content_type.as_deref(), Some("text/html"));
        assert_eq!(read_all(file).await, b"<p>hi</p>");
    }

    #[tokio::test]
    async fn upload_file_uses_the_local_file_name() {
        let (_, service) = service();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"remember").unwrap();

        service.upload_file(&path, Some("docs")).await.unwrap();

        let file = service.read_file("notes.txt", Some("docs")).await.unwrap().unwrap();
        assert_eq!(read_all(file).await, b"remember");
    }

    #[tokio::test]
    async fn upload_file_missing_path_is_an_io_fault() {
        let (_, service) = service();
        let dir = tempfile::tempdir().unwrap();

        let err = service
            .upload_file(&dir.path().join("absent.bin"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[tokio::test]
    async fn failing_stream_is_an_io_fault() {
        let (backend, service) = service();
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"part")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]);

        let err = service
            .upload_stream(broken, "a.bin", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(backend.object(&ObjectLocation::new("files", "a.bin")).await.is_none());
    }

    #[tokio::test]
    async fn removing_a_missing_object_succeeds() {
        let (_, service) = service();
        service.remove_file("ghost.txt", Some("dir")).await.unwrap();
    }

    #[tokio::test]
    async fn remove_deletes_the_object() {
        let (_, service) = service();
        service
            .upload_content("x", "text/plain", "a.txt", Some("dir"))
            .await
            .unwrap();
        service.remove_file("a.txt", Some("dir")).await.unwrap();
        assert!(service.read_file("a.txt", Some("dir")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn move_copies_then_deletes_source() {
        let (_, service) = service();
        service
            .upload_content("payload", "text/plain", "a.txt", Some("inbox"))
            .await
            .unwrap();

        service.move_file("a.txt", "inbox", "archive").await.unwrap();

        assert!(service.read_file("a.txt", Some("inbox")).await.unwrap().is_none());
        let moved = service
            .read_file("a.txt", Some("archive"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read_all(moved).await, b"payload");
    }

    #[tokio::test]
    async fn failed_delete_after_copy_leaves_a_duplicate() {
        let (backend, service) = service();
        service
            .upload_content("payload", "text/plain", "a.txt", Some("inbox"))
            .await
            .unwrap();
        backend.fail(BackendOp::Delete, "InternalError", "try again").await;

        let err = service.move_file("a.txt", "inbox", "archive").await.unwrap_err();
        assert!(matches!(err, StorageError::Backend { .. }));

        assert!(backend.object(&ObjectLocation::new("files", "inbox/a.txt")).await.is_some());
        assert!(backend.object(&ObjectLocation::new("files", "archive/a.txt")).await.is_some());
    }

    #[tokio::test]
    async fn failed_copy_does_not_delete_source() {
        let (backend, service) = service();
        service
            .upload_content("payload", "text/plain", "a.txt", Some("inbox"))
            .await
            .unwrap();
        backend.fail(BackendOp::Copy, "SlowDown", "throttled").await;

        assert!(service.move_file("a.txt", "inbox", "archive").await.is_err());
        assert!(backend.object(&ObjectLocation::new("files", "inbox/a.txt")).await.is_some());
        assert!(backend.object(&ObjectLocation::new("files", "archive/a.txt")).await.is_none());
    }

    #[tokio::test]
    async fn read_directory_skips_folder_placeholders() {
        let (_, service) = service();
        for name in ["a.txt", "b.txt"] {
            service
                .upload_content(name, "text/plain", name, Some("dir"))
                .await
                .unwrap();
        }
        // Placeholder object for the folder itself.
        service.upload_content("", "text/plain", "", Some("dir")).await.unwrap();
        service
            .upload_content("elsewhere", "text/plain", "c.txt", Some("other"))
            .await
            .unwrap();

        let entries = service.read_directory("dir").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn read_directory_follows_pagination_in_order() {
        let backend = Arc::new(MemoryBackend::with_page_size(2));
        let service = StorageService::new(backend.clone(), "files").with_read_concurrency(3);
        for i in 0..7 {
            let name = format!("f{i}.txt");
            service
                .upload_content(&name, "text/plain", &name, Some("bulk"))
                .await
                .unwrap();
        }

        let entries = service.read_directory("bulk").await.unwrap();
        assert_eq!(entries.len(), 7);
        for (i, entry) in entries.into_iter().enumerate() {
            assert_eq!(entry.file_name, format!("f{i}.txt"));
            assert_eq!(read_all(entry.file).await, format!("f{i}.txt").into_bytes());
        }
    }

    #[tokio::test]
    async fn read_directory_surfaces_listing_faults() {
        let (backend, service) = service();
        backend.fail(BackendOp::List, "InvalidAccessKeyId", "nope").await;

        let err = service.read_directory("dir").await.unwrap_err();
        assert!(matches!(err, StorageError::Credentials { .. }));
    }

    #[tokio::test]
    async fn legacy_layout_writes_into_bucket_path() {
        let backend = Arc::new(MemoryBackend::new());
        let service =
            StorageService::new(backend.clone(), "files").with_layout(KeyLayout::LegacyBucketPath);

        assert_eq!(
            service.locate("a.txt", Some("docs")),
            ObjectLocation::new("files/docs", "a.txt")
        );

        service
            .upload_content("legacy", "text/plain", "a.txt", Some("docs"))
            .await
            .unwrap();
        let entries = service.read_directory("docs").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "a.txt");

        let prefixed = StorageService::new(backend, "files");
        assert!(prefixed.read_file("a.txt", Some("docs")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn readiness_reflects_bucket_reachability() {
        let (backend, service) = service();
        service.check_ready().await.unwrap();

        backend.fail(BackendOp::Head, "NoSuchBucket", "gone").await;
        assert!(service.check_ready().await.is_err());
    }
}
