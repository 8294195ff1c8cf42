//! HTTP handlers for uploading, viewing, downloading and deleting items.
//! Bodies are streamed in both directions; storage concerns stay in
//! `ContentStore`.

use super::AppState;
use crate::{
    errors::AppError,
    models::item::{StoredItem, human_bytes, time_to_deletion},
    services::content_store::{ItemContent, PayloadEncoding},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::io;
use tokio_util::io::ReaderStream;

/// Text items below this size are inlined in the item view.
const INLINE_TEXT_LIMIT: u64 = 10_000_000;

/// JSON description of a stored item.
#[derive(Debug, Serialize)]
pub struct ItemView {
    pub id: String,
    pub name: String,
    pub link: String,
    pub size: u64,
    pub size_human: String,
    pub content_type: String,
    pub modified: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub time_to_deletion_secs: u64,
    pub is_image: bool,
    pub is_text: bool,
    pub is_audio: bool,
    pub is_video: bool,
    pub is_ascii: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ItemView {
    fn new(item: &StoredItem, state: &AppState) -> Self {
        let rate = state.store.config().minutes_per_gigabyte;
        Self {
            id: item.id.clone(),
            name: item.original_name.clone(),
            link: format!("{}{}", state.public_url, item.public_link),
            size: item.size,
            size_human: item.size_human.clone(),
            content_type: item.content_type.clone(),
            modified: item.modified_at,
            expires_at: item.expires_at(rate),
            time_to_deletion_secs: time_to_deletion(item.size, rate).as_secs(),
            is_image: item.is_image,
            is_text: item.is_text,
            is_audio: item.is_audio,
            is_video: item.is_video,
            is_ascii: item.is_ascii,
            text: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// `{id}/{name}`, the path part of the short link.
    pub id: String,
    pub item: ItemView,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub public_url: String,
    pub max_bytes_per_file: u64,
    pub max_bytes_per_file_human: String,
    pub max_bytes_total: u64,
    pub minutes_per_gigabyte: f64,
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub total_bytes: u64,
    pub total_human: String,
    pub max_bytes_total: u64,
    pub largest_id: Option<String>,
    pub largest_size: Option<u64>,
}

/// `GET /` — limits and retention rate, so clients know what to expect.
pub async fn home(State(state): State<AppState>) -> Json<ServiceInfo> {
    let cfg = state.store.config();
    Json(ServiceInfo {
        public_url: state.public_url.to_string(),
        max_bytes_per_file: cfg.max_bytes_per_file,
        max_bytes_per_file_human: human_bytes(cfg.max_bytes_per_file),
        max_bytes_total: cfg.max_bytes_total,
        minutes_per_gigabyte: cfg.minutes_per_gigabyte,
    })
}

/// `POST /` — multipart upload; the payload is the `file` field.
pub async fn upload_multipart(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| AppError::bad_request("file field has no filename"))?;
        let stream = field.map(|chunk| chunk.map_err(io::Error::other));

        let item = state.store.ingest(&filename, None, stream).await?;
        return Ok(created(&item, &state));
    }
    Err(AppError::bad_request("form has no `file` field"))
}

/// `PUT /{name}` — raw body upload; `Content-Length` is the declared size.
pub async fn upload_raw(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let declared_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let item = state.store.ingest(&name, declared_size, stream).await?;
    Ok(created(&item, &state))
}

fn created(item: &StoredItem, state: &AppState) -> (StatusCode, Json<UploadResponse>) {
    (
        StatusCode::CREATED,
        Json(UploadResponse {
            id: format!("{}/{}", item.id, item.original_name),
            item: ItemView::new(item, state),
        }),
    )
}

/// `GET /1/{id}/{name}` — the payload itself.
///
/// Clients that accept gzip get the stored bytes untouched; everyone else
/// gets a decompressed stream.
pub async fn get_raw(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let decompress = !accepts_gzip(&headers);
    let content = state.store.get(&id, &name, decompress).await?;
    Ok(payload_response(content))
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|coding| {
            let mut parts = coding.split(';').map(str::trim);
            let name = parts.next().unwrap_or_default();
            let refused = parts.any(|p| p.replace(' ', "") == "q=0");
            (name.eq_ignore_ascii_case("gzip") || name == "*") && !refused
        })
}

fn payload_response(content: ItemContent) -> Response {
    let ItemContent {
        item,
        encoding,
        reader,
    } = content;
    let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&item.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::VARY, HeaderValue::from_static("accept-encoding"));
    match encoding {
        PayloadEncoding::Gzip => {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        PayloadEncoding::Identity => {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(item.size));
        }
    }
    let disposition = format!("inline; filename=\"{}\"", item.original_name);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&http_date(item.modified_at)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    response
}

/// IMF-fixdate, the form HTTP date headers use.
fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `GET /{id}/{name}` — item metadata, with the text inlined when it is
/// small ASCII.
pub async fn show_item(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<ItemView>, AppError> {
    let item = state.store.load(&id).await?;
    if item.original_name != name {
        return Err(AppError::not_found(format!(
            "Data with id '{}' does not exist.",
            id
        )));
    }
    let mut view = ItemView::new(&item, &state);
    if item.is_ascii && item.size < INLINE_TEXT_LIMIT {
        view.text = Some(state.store.read_text(&item).await?);
    }
    Ok(Json(view))
}

/// `GET /delete/{id}` and `DELETE /{id}`.
pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.store.delete(&id).await? {
        return Err(AppError::not_found(format!(
            "Data with id '{}' does not exist.",
            id
        )));
    }
    tracing::info!(id = %id, "item deleted on request");
    Ok(Json(serde_json::json!({ "removed": id })))
}

/// `GET /exists/{id}/{name}`
pub async fn exists_item(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let exists = state.store.exists(&id, &name).await;
    tracing::debug!(id = %id, name = %name, exists, "checking file existence");
    Json(serde_json::json!({
        "exists": if exists { "yes" } else { "no" },
        "id": id,
        "name": name,
    }))
}

/// `GET /stats` — store usage as seen by the quota enforcer.
pub async fn stats(State(state): State<AppState>) -> Result<Json<StoreStats>, AppError> {
    let usage = state.store.usage().await?;
    Ok(Json(StoreStats {
        total_bytes: usage.total_bytes,
        total_human: human_bytes(usage.total_bytes),
        max_bytes_total: state.store.config().max_bytes_total,
        largest_id: usage.largest.as_ref().map(|l| l.id.clone()),
        largest_size: usage.largest.as_ref().map(|l| l.size),
    }))
}
