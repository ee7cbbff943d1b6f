//! `ObjectBackend` over the AWS SDK S3 client.

use crate::{
    config::AppConfig,
    models::object::{ObjectLocation, StoredFile},
    services::backend::{
        BackendError, BackendResult, ListPage, ObjectBackend, PutBody, PutReceipt, PutRequest,
    },
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::Region,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::ObjectCannedAcl,
};
use axum::http::StatusCode;
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::{error::Error as StdError, fmt, io};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Characters left untouched in an `x-amz-copy-source` value.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone)]
pub struct S3Backend {
    client: Client,
}

impl S3Backend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the AWS default chain plus the overrides in `cfg`.
    pub async fn from_config(cfg: &AppConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &cfg.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &cfg.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(cfg.force_path_style)
            .build();
        Self::new(Client::from_conf(s3_config))
    }
}

/// Map an SDK failure onto the backend error model. Only answers from the
/// service carry a code; dispatch, timeout and decoding failures are I/O.
fn sdk_error<E, R>(err: SdkError<E, R>) -> BackendError
where
    E: ProvideErrorMetadata + StdError + 'static,
    R: fmt::Debug,
{
    match err {
        SdkError::ServiceError(_) => {
            let code = err.code().map(str::to_owned);
            let message = err
                .message()
                .map(str::to_owned)
                .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
            BackendError::Service { code, message }
        }
        other => BackendError::Io(io::Error::other(DisplayErrorContext(&other).to_string())),
    }
}

fn copy_source(location: &ObjectLocation) -> String {
    let (bucket, key) = location.canonical();
    utf8_percent_encode(&format!("{}/{}", bucket, key), COPY_SOURCE).to_string()
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put_object(&self, request: PutRequest) -> BackendResult<PutReceipt> {
        let body = match request.body {
            PutBody::Bytes(bytes) => ByteStream::from(bytes),
            PutBody::Text(text) => ByteStream::from(text.into_bytes()),
            PutBody::File(path) => ByteStream::from_path(&path)
                .await
                .map_err(|err| BackendError::Io(io::Error::other(err)))?,
        };

        debug!("put_object {}", request.location);
        let (bucket, key) = request.location.canonical();
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .set_content_type(request.content_type)
            .acl(ObjectCannedAcl::from(request.acl))
            .send()
            .await
            .map_err(sdk_error)?;

        // Non-2xx answers surface as errors from `send`.
        Ok(PutReceipt {
            status: StatusCode::OK,
            etag: output.e_tag().map(str::to_owned),
        })
    }

    async fn get_object(&self, location: &ObjectLocation) -> BackendResult<StoredFile> {
        debug!("get_object {}", location);
        let (bucket, key) = location.canonical();
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;

        let content_type = output.content_type().map(str::to_owned);
        let content_length = output.content_length().and_then(|n| u64::try_from(n).ok());
        let body = ReaderStream::new(output.body.into_async_read()).boxed();

        Ok(StoredFile {
            body,
            content_type,
            content_length,
        })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> BackendResult<ListPage> {
        debug!("list_objects {}/{}", bucket, prefix);
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(sdk_error)?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(str::to_owned))
            .collect();

        Ok(ListPage {
            keys,
            next_token: output.next_continuation_token().map(str::to_owned),
        })
    }

    async fn copy_object(
        &self,
        source: &ObjectLocation,
        destination: &ObjectLocation,
    ) -> BackendResult<()> {
        debug!("copy_object {} -> {}", source, destination);
        let (bucket, key) = destination.canonical();
        self.client
            .copy_object()
            .copy_source(copy_source(source))
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_object(&self, location: &ObjectLocation) -> BackendResult<()> {
        debug!("delete_object {}", location);
        let (bucket, key) = location.canonical();
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> BackendResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::{
        config::{Credentials, http::HttpResponse},
        operation::get_object::GetObjectError,
    };
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
    };

    /// Client pointed at a local socket that answers one request with 204
    /// and hands back the request line.
    async fn capture_one_request() -> (S3Backend, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut request_line = String::new();
            reader.read_line(&mut request_line).await.unwrap();
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).await.unwrap();
                if header == "\r\n" || header.is_empty() {
                    break;
                }
            }
            reader
                .get_mut()
                .write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            request_line
        });

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .endpoint_url(format!("http://{}", addr))
            .force_path_style(true)
            .build();
        (S3Backend::new(Client::from_conf(config)), server)
    }

    #[test]
    fn copy_source_keeps_slashes_and_escapes_the_rest() {
        let loc = ObjectLocation::new("files", "reports/q1 final+v2.pdf");
        assert_eq!(copy_source(&loc), "files/reports/q1%20final%2Bv2.pdf");
    }

    #[test]
    fn copy_source_of_a_bucket_path_matches_the_prefixed_key() {
        let legacy = ObjectLocation::new("files/docs", "a b.txt");
        let prefixed = ObjectLocation::new("files", "docs/a b.txt");
        assert_eq!(copy_source(&legacy), "files/docs/a%20b.txt");
        assert_eq!(copy_source(&legacy), copy_source(&prefixed));
    }

    #[tokio::test]
    async fn bucket_path_is_sent_as_bucket_plus_prefixed_key() {
        let (backend, server) = capture_one_request().await;

        backend
            .delete_object(&ObjectLocation::new("files/docs", "a.txt"))
            .await
            .unwrap();

        let request_line = server.await.unwrap();
        assert!(
            request_line.starts_with("DELETE /files/docs/a.txt"),
            "unexpected request line: {request_line}"
        );
        assert!(!request_line.contains("%2F"));
    }

    #[test]
    fn transport_failures_are_io_not_service_faults() {
        let timeout: SdkError<GetObjectError, HttpResponse> =
            SdkError::timeout_error(io::Error::other("read timed out"));
        assert!(matches!(sdk_error(timeout), BackendError::Io(_)));

        let construction: SdkError<GetObjectError, HttpResponse> =
            SdkError::construction_failure(io::Error::other("bad input"));
        let err = sdk_error(construction);
        assert!(matches!(err, BackendError::Io(_)));
        assert_eq!(err.code(), None);
    }
}
