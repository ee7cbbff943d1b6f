//! HTTP handlers for file operations under `/api/AwsS3`.
//! Adapts multipart and query input to `StorageService` calls and maps the
//! outcome onto status codes. Downloads are streamed straight from the store.

use crate::{errors::AppError, services::storage_service::StorageService};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use futures::{TryStreamExt, future, stream};
use serde::{Deserialize, Serialize};
use serde_json::json;

const FILE_FIELD: &str = "file";
const FOLDER_FIELD: &str = "folder";

/// `?fileName=&folder=` as used by GET and DELETE.
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    #[serde(rename = "fileName")]
    pub file_name: Option<String>,
    pub folder: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    pub folder: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub file_name: String,
    pub source_folder: String,
    pub destination_folder: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUpload {
    pub file_name: String,
    pub folder: Option<String>,
    pub content_type: String,
    pub contents: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntryResponse {
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: usize,
    /// Base64 of the object body.
    pub content: String,
}

/// Value of a required parameter, rejecting absent and empty ones.
fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::bad_request(format!("`{}` is required", name)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// File name from a content-disposition header value.
fn clean_file_name(raw: &str) -> String {
    raw.trim_start().trim_matches('"').to_string()
}

/// `POST /api/AwsS3` — multipart upload (`file` part, optional `folder` field).
pub async fn upload_file(
    State(service): State<StorageService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut file: Option<(String, Option<String>, Bytes)> = None;
    let mut folder = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        match field.name().map(str::to_owned).as_deref() {
            Some(FILE_FIELD) => {
                let file_name = field.file_name().map(clean_file_name).unwrap_or_default();
                let content_type = field.content_type().map(str::to_owned);
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                file = Some((file_name, content_type, data));
            }
            Some(FOLDER_FIELD) => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                folder = non_empty(Some(value));
            }
            _ => {}
        }
    }

    let Some((file_name, content_type, data)) = file.filter(|(_, _, data)| !data.is_empty())
    else {
        return Err(AppError::bad_request("File is empty"));
    };
    if file_name.is_empty() {
        return Err(AppError::bad_request("File name is missing"));
    }

    let body = stream::once(future::ready(Ok(data)));
    service
        .upload_stream(body, &file_name, folder.as_deref(), content_type.as_deref())
        .await
        .map_err(|_| AppError::internal(format!("Failed to upload `{}`", file_name)))?;

    Ok((
        StatusCode::OK,
        Json(json!({ "fileName": file_name, "folder": folder })),
    ))
}

/// `GET /api/AwsS3?fileName=&folder=` — stream the object back.
pub async fn get_file(
    State(service): State<StorageService>,
    Query(q): Query<FileQuery>,
) -> Result<Response, AppError> {
    let file_name = required(&q.file_name, "fileName")?;
    let folder = required(&q.folder, "folder")?;

    let file = service
        .read_file(file_name, Some(folder))
        .await?
        .ok_or_else(|| AppError::not_found(format!("`{}` not found in `{}`", file_name, folder)))?;

    let content_type = file
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let content_length = file.content_length;

    let mut response = Response::new(Body::from_stream(file.body));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}

/// `DELETE /api/AwsS3?fileName=&folder=`
pub async fn delete_file(
    State(service): State<StorageService>,
    Query(q): Query<FileQuery>,
) -> Result<StatusCode, AppError> {
    let file_name = required(&q.file_name, "fileName")?;
    let folder = required(&q.folder, "folder")?;

    service.remove_file(file_name, Some(folder)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/AwsS3/directory?folder=` — every file in a folder, bodies inlined as base64.
pub async fn read_directory(
    State(service): State<StorageService>,
    Query(q): Query<DirectoryQuery>,
) -> Result<Json<Vec<DirectoryEntryResponse>>, AppError> {
    let folder = required(&q.folder, "folder")?;
    let entries = service.read_directory(folder).await?;

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let chunks: Vec<Bytes> = entry.file.body.try_collect().await.map_err(|err| {
            AppError::internal(format!("reading `{}`: {}", entry.file_name, err))
        })?;
        let data = chunks.concat();
        out.push(DirectoryEntryResponse {
            file_name: entry.file_name,
            content_type: entry.file.content_type,
            size: data.len(),
            content: general_purpose::STANDARD.encode(&data),
        });
    }

    Ok(Json(out))
}

/// `POST /api/AwsS3/move` — move a file between folders.
pub async fn move_file(
    State(service): State<StorageService>,
    Json(req): Json<MoveRequest>,
) -> Result<impl IntoResponse, AppError> {
    if [&req.file_name, &req.source_folder, &req.destination_folder]
        .iter()
        .any(|v| v.trim().is_empty())
    {
        return Err(AppError::bad_request(
            "fileName, sourceFolder and destinationFolder are required",
        ));
    }

    service
        .move_file(&req.file_name, &req.source_folder, &req.destination_folder)
        .await?;
    Ok(StatusCode::OK)
}

/// `PUT /api/AwsS3/content` — store a text payload with an explicit content type.
pub async fn upload_content(
    State(service): State<StorageService>,
    Json(req): Json<ContentUpload>,
) -> Result<impl IntoResponse, AppError> {
    if req.file_name.trim().is_empty() {
        return Err(AppError::bad_request("`fileName` is required"));
    }

    let folder = non_empty(req.folder);
    service
        .upload_content(&req.contents, &req.content_type, &req.file_name, folder.as_deref())
        .await?;
    Ok(StatusCode::OK)
}
