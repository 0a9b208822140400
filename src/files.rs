//! 文件列表与下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path as UrlPath};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::fmt_http_date;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::error::ApiError;
use crate::etag::etag_from_metadata;
use crate::storage::{FileEntry, Storage};

/// 列出根目录内容，按修改时间倒序。
pub async fn list_files(
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<Vec<FileEntry>>, ApiError> {
    let entries = storage.list_dir().await?;
    info!(count = entries.len(), "list files");
    Ok(JsonResponse(entries))
}

/// 下载单个文件，带长度、类型与保存文件名提示。
pub async fn download_file(
    UrlPath(name): UrlPath<String>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let target = storage.resolve_name(&name)?;
    // symlink_metadata: 链接指向根目录外的文件时不跟随
    let metadata = match fs::symlink_metadata(&target).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ApiError::NotFound("file not found".into()));
        }
        Err(err) => return Err(ApiError::Internal(err.to_string())),
    };
    if !metadata.is_file() {
        return Err(ApiError::NotFound("file not found".into()));
    }

    let file_size = metadata.len();
    let mime = mime_guess::from_path(&target).first_or_octet_stream();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&file_size.to_string())
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    response_headers.insert(header::CONTENT_DISPOSITION, content_disposition(&name)?);
    if let Ok(modified) = metadata.modified() {
        let value = fmt_http_date(modified);
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&value)
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
    }
    let etag = etag_from_metadata(&metadata);
    response_headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag).map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );

    let file = File::open(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    info!(name, size = file_size, "download file");
    let stream = ReaderStream::new(file);
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(stream),
    )
        .into_response())
}

/// 构建附件下载头；非 ASCII 文件名走 RFC 5987 扩展参数。
fn content_disposition(name: &str) -> Result<HeaderValue, ApiError> {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let encoded = urlencoding::encode(name);
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .map_err(|_| ApiError::Internal("响应头构建失败".into()))
}
