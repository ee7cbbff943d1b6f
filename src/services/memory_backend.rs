//! In-process `ObjectBackend`.
//!
//! Keeps objects in a sorted map so listings come back in key order like S3.
//! Used by `--backend memory` for local runs and by the test suite, which can
//! also make individual operations fail with a chosen error code.

use crate::{
    models::object::{ObjectLocation, StoredFile},
    services::backend::{
        BackendError, BackendResult, ListPage, ObjectBackend, PutBody, PutReceipt, PutRequest,
    },
};
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::collections::{BTreeMap, HashMap};
use tokio::{
    fs,
    sync::{Mutex, RwLock},
};
use tracing::debug;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Backend call, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Put,
    Get,
    List,
    Copy,
    Delete,
    Head,
}

#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub acl: String,
}

pub struct MemoryBackend {
    objects: RwLock<BTreeMap<(String, String), MemoryObject>>,
    faults: Mutex<HashMap<BackendOp, (String, String)>>,
    put_status: Mutex<StatusCode>,
    page_size: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Listing returns at most `page_size` keys per call.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(HashMap::new()),
            put_status: Mutex::new(StatusCode::OK),
            page_size: page_size.max(1),
        }
    }

    /// Make every future `op` fail with `code` until cleared.
    #[cfg(test)]
    pub async fn fail(&self, op: BackendOp, code: &str, message: &str) {
        self.faults
            .lock()
            .await
            .insert(op, (code.to_string(), message.to_string()));
    }

    #[cfg(test)]
    pub async fn clear_fault(&self, op: BackendOp) {
        self.faults.lock().await.remove(&op);
    }

    /// Status reported by subsequent successful puts.
    #[cfg(test)]
    pub async fn set_put_status(&self, status: StatusCode) {
        *self.put_status.lock().await = status;
    }

    /// Snapshot of a stored object, bypassing fault injection.
    #[cfg(test)]
    pub async fn object(&self, location: &ObjectLocation) -> Option<MemoryObject> {
        self.objects.read().await.get(&location.canonical()).cloned()
    }

    async fn check(&self, op: BackendOp) -> BackendResult<()> {
        match self.faults.lock().await.get(&op) {
            Some((code, message)) => Err(BackendError::service(code.as_str(), message.as_str())),
            None => Ok(()),
        }
    }
}

fn no_such_key(location: &ObjectLocation) -> BackendError {
    BackendError::service(
        "NoSuchKey",
        format!("The specified key does not exist: {}", location),
    )
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn put_object(&self, request: PutRequest) -> BackendResult<PutReceipt> {
        self.check(BackendOp::Put).await?;

        let data = match request.body {
            PutBody::Bytes(bytes) => bytes,
            PutBody::Text(text) => Bytes::from(text),
            PutBody::File(path) => Bytes::from(fs::read(&path).await?),
        };
        let etag = format!("{:x}", md5::compute(&data));

        self.objects.write().await.insert(
            request.location.canonical(),
            MemoryObject {
                data,
                content_type: request.content_type,
                acl: request.acl.to_string(),
            },
        );

        Ok(PutReceipt {
            status: *self.put_status.lock().await,
            etag: Some(etag),
        })
    }

    async fn get_object(&self, location: &ObjectLocation) -> BackendResult<StoredFile> {
        self.check(BackendOp::Get).await?;

        let object = self
            .objects
            .read()
            .await
            .get(&location.canonical())
            .cloned()
            .ok_or_else(|| no_such_key(location))?;
        debug!("get_object {} (acl {})", location, object.acl);

        Ok(StoredFile {
            content_length: Some(object.data.len() as u64),
            content_type: object.content_type,
            body: stream::once(async move { Ok(object.data) }).boxed(),
        })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> BackendResult<ListPage> {
        self.check(BackendOp::List).await?;

        let (bucket, base) = ObjectLocation::new(bucket, "").canonical();
        let full_prefix = format!("{}{}", base, prefix);
        let objects = self.objects.read().await;

        let mut keys: Vec<String> = objects
            .keys()
            .filter(|(b, key)| *b == bucket && key.starts_with(&full_prefix))
            .filter(|(_, key)| token.as_ref().is_none_or(|after| key > after))
            .map(|(_, key)| key.clone())
            .take(self.page_size + 1)
            .collect();

        let next_token = if keys.len() > self.page_size {
            keys.pop();
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage { keys, next_token })
    }

    async fn copy_object(
        &self,
        source: &ObjectLocation,
        destination: &ObjectLocation,
    ) -> BackendResult<()> {
        self.check(BackendOp::Copy).await?;

        let mut objects = self.objects.write().await;
        let object = objects
            .get(&source.canonical())
            .cloned()
            .ok_or_else(|| no_such_key(source))?;
        objects.insert(destination.canonical(), object);
        Ok(())
    }

    async fn delete_object(&self, location: &ObjectLocation) -> BackendResult<()> {
        self.check(BackendOp::Delete).await?;
        // Deleting a missing key succeeds, as on S3.
        self.objects.write().await.remove(&location.canonical());
        Ok(())
    }

    async fn head_bucket(&self, _bucket: &str) -> BackendResult<()> {
        self.check(BackendOp::Head).await
    }
}
