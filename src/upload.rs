//! 上传处理器：multipart 批量与原始请求体两种入口。

use axum::body::{Body as AxumBody, Bytes};
use axum::extract::{Extension, Multipart};
use axum::http::{HeaderMap, header};
use axum::response::Json as JsonResponse;
use futures_util::{Stream, StreamExt};
use http_body_util::BodyExt;
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::time;
use tracing::{info, warn};

use crate::atomic::AtomicFile;
use crate::config::DEFAULT_NAME_LOCK_WAIT_SECS;
use crate::error::ApiError;
use crate::locking::NameLocks;
use crate::storage::{FileEntry, Storage};

/// 上传相关的运行时配置。
#[derive(Debug)]
pub struct UploadConfig {
    pub max_total_size: u64,
    pub idle_timeout: Duration,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadOutcome {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    status: UploadStatus,
}

impl UploadOutcome {
    fn success(name: String, entry: &FileEntry) -> Self {
        Self {
            name,
            saved_name: Some(entry.name.clone()),
            size: Some(entry.size),
            status: UploadStatus::Success,
        }
    }

    fn failure(name: String, err: &ApiError) -> Self {
        Self {
            name,
            saved_name: None,
            size: None,
            status: UploadStatus::from_error(err),
        }
    }
}

#[derive(Serialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) enum UploadStatus {
    Success,
    InvalidPath,
    QuotaExceeded,
    IoFailure,
}

impl UploadStatus {
    fn from_error(err: &ApiError) -> Self {
        match err {
            ApiError::InvalidPath => UploadStatus::InvalidPath,
            ApiError::QuotaExceeded => UploadStatus::QuotaExceeded,
            _ => UploadStatus::IoFailure,
        }
    }
}

/// 处理 multipart 批量上传；文件严格按出现顺序逐个落盘，
/// 单个失败不打断批次，结果逐文件返回。
pub async fn upload_files(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(locks): Extension<Arc<NameLocks>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    mut multipart: Multipart,
) -> Result<JsonResponse<Vec<UploadOutcome>>, ApiError> {
    let mut outcomes = Vec::new();
    // 整个请求共用一份字节预算，防止单个批次无限占用磁盘
    let mut remaining = upload.max_total_size;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("malformed multipart body: {err}")))?
    {
        let declared = match field.file_name() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => fallback_name(),
        };
        if upload.max_total_size > 0 && remaining == 0 {
            warn!(name = declared, "request byte budget exhausted");
            outcomes.push(UploadOutcome::failure(declared, &ApiError::QuotaExceeded));
            continue;
        }
        let cap = if upload.max_total_size > 0 { remaining } else { 0 };
        match store_stream(&storage, &locks, upload.idle_timeout, cap, &declared, field).await {
            Ok(entry) => {
                info!(name = declared, saved = entry.name, size = entry.size, "file stored");
                remaining = remaining.saturating_sub(entry.size);
                outcomes.push(UploadOutcome::success(declared, &entry));
            }
            Err(err) => {
                warn!(name = declared, code = err.code(), "file rejected");
                outcomes.push(UploadOutcome::failure(declared, &err));
            }
        }
    }

    if outcomes.is_empty() {
        return Err(ApiError::BadRequest("no file parts in request".into()));
    }
    Ok(JsonResponse(outcomes))
}

/// 处理原始请求体上传，文件名取自百分号编码的 `X-Filename` 头。
pub async fn upload_raw(
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(locks): Extension<Arc<NameLocks>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    body: AxumBody,
) -> Result<JsonResponse<UploadOutcome>, ApiError> {
    let declared = match headers.get("X-Filename").map(|value| value.to_str()) {
        Some(Ok(raw)) if !raw.trim().is_empty() => urlencoding::decode(raw)
            .map_err(|_| ApiError::BadRequest("X-Filename is not valid percent-encoding".into()))?
            .into_owned(),
        Some(Err(_)) => {
            return Err(ApiError::BadRequest("X-Filename is not valid ASCII".into()));
        }
        _ => fallback_name(),
    };

    // 声明长度超限时直接拒绝，不落一个字节
    if upload.max_total_size > 0
        && let Some(declared_len) = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
        && declared_len > upload.max_total_size
    {
        return Err(ApiError::QuotaExceeded);
    }

    let stream = BodyExt::into_data_stream(body);
    let entry = store_stream(
        &storage,
        &locks,
        upload.idle_timeout,
        upload.max_total_size,
        &declared,
        stream,
    )
    .await?;
    info!(name = declared, saved = entry.name, size = entry.size, "file stored");
    Ok(JsonResponse(UploadOutcome::success(declared, &entry)))
}

/// 将一个字节流写入根目录：先流式写入隐藏临时文件并计数，
/// 超限立即中止；提交阶段在名字锁内挑选空闲文件名并原子重命名。
async fn store_stream<S, E>(
    storage: &Storage,
    locks: &NameLocks,
    idle_timeout: Duration,
    max_bytes: u64,
    declared: &str,
    stream: S,
) -> Result<FileEntry, ApiError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    storage.resolve_name(declared)?;

    let mut artifact = AtomicFile::create(storage).await?;
    let mut stream = std::pin::pin!(stream);
    let write_result: Result<u64, ApiError> = async {
        let mut written: u64 = 0;
        loop {
            let item = if idle_timeout.is_zero() {
                stream.next().await
            } else {
                match time::timeout(idle_timeout, stream.next()).await {
                    Ok(item) => item,
                    Err(_) => return Err(ApiError::BadRequest("upload stalled".into())),
                }
            };
            let chunk = match item {
                Some(chunk) => chunk
                    .map_err(|err| ApiError::Internal(format!("upload stream failed: {err}")))?,
                None => break,
            };
            if chunk.is_empty() {
                continue;
            }
            written += chunk.len() as u64;
            if max_bytes > 0 && written > max_bytes {
                return Err(ApiError::QuotaExceeded);
            }
            artifact
                .file_mut()
                .write_all(&chunk)
                .await
                .map_err(|err| ApiError::Internal(err.to_string()))?;
        }
        Ok(written)
    }
    .await;

    if let Err(err) = write_result {
        artifact.cleanup().await;
        return Err(err);
    }

    let guard = locks
        .lock_with_timeout(declared, Duration::from_secs(DEFAULT_NAME_LOCK_WAIT_SECS))
        .await;
    let _guard = match guard {
        Ok(guard) => guard,
        Err(()) => {
            artifact.cleanup().await;
            return Err(ApiError::Internal("timed out waiting for name lock".into()));
        }
    };
    let target = match storage.next_free_name(declared).await {
        Ok(target) => target,
        Err(err) => {
            artifact.cleanup().await;
            return Err(err.into());
        }
    };
    artifact.finalize(&target).await?;

    let saved_name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| ApiError::Internal("final path has no file name".into()))?;
    let metadata = tokio::fs::metadata(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(storage.entry_for(saved_name, &metadata))
}

/// 浏览器可能发送无名 Blob，给它一个带时间戳的兜底名。
fn fallback_name() -> String {
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("drop_{epoch}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::FromRequest;
    use axum::http::{Request, header};
    use futures_util::stream;
    use std::convert::Infallible;
    use std::io;
    use tempfile::tempdir;

    use crate::config::{DEFAULT_UPLOAD_IDLE_TIMEOUT_SECS, DEFAULT_UPLOAD_MAX_SIZE};

    fn make_storage() -> (tempfile::TempDir, Arc<Storage>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(&root).expect("create root");
        (temp, Arc::new(Storage::new(root)))
    }

    fn make_config() -> Arc<UploadConfig> {
        Arc::new(UploadConfig {
            max_total_size: DEFAULT_UPLOAD_MAX_SIZE,
            idle_timeout: Duration::from_secs(DEFAULT_UPLOAD_IDLE_TIMEOUT_SECS),
        })
    }

    async fn store_bytes(
        storage: &Storage,
        locks: &NameLocks,
        max_bytes: u64,
        declared: &str,
        data: &'static [u8],
    ) -> Result<FileEntry, ApiError> {
        store_stream(
            storage,
            locks,
            Duration::from_secs(DEFAULT_UPLOAD_IDLE_TIMEOUT_SECS),
            max_bytes,
            declared,
            byte_stream(data),
        )
        .await
    }

    fn byte_stream(data: &'static [u8]) -> impl Stream<Item = Result<Bytes, Infallible>> {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    #[tokio::test]
    async fn repeated_name_gets_numeric_suffix() {
        let (_temp, storage) = make_storage();
        let locks = NameLocks::new();

        let first = store_bytes(&storage, &locks, DEFAULT_UPLOAD_MAX_SIZE, "report.pdf", b"one")
            .await
            .expect("first upload");
        let second = store_bytes(&storage, &locks, DEFAULT_UPLOAD_MAX_SIZE, "report.pdf", b"two!")
            .await
            .expect("second upload");

        assert_eq!(first.name, "report.pdf");
        assert_eq!(first.size, 3);
        assert_eq!(second.name, "report (1).pdf");
        assert_eq!(second.size, 4);

        let one = std::fs::read(storage.root_path().join("report.pdf")).expect("read");
        let two = std::fs::read(storage.root_path().join("report (1).pdf")).expect("read");
        assert_eq!(one, b"one");
        assert_eq!(two, b"two!");

        let listed = storage.list_dir().await.expect("list");
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_same_name_uploads_never_collide() {
        let (_temp, storage) = make_storage();
        let locks = NameLocks::new();

        let (a, b) = tokio::join!(
            store_bytes(&storage, &locks, DEFAULT_UPLOAD_MAX_SIZE, "photo.jpg", b"aaaa"),
            store_bytes(&storage, &locks, DEFAULT_UPLOAD_MAX_SIZE, "photo.jpg", b"bbbbbb"),
        );
        let a = a.expect("upload a");
        let b = b.expect("upload b");

        assert_ne!(a.name, b.name);
        let bytes_a = std::fs::read(storage.root_path().join(&a.name)).expect("read a");
        let bytes_b = std::fs::read(storage.root_path().join(&b.name)).expect("read b");
        assert_eq!(bytes_a.len() as u64, a.size);
        assert_eq!(bytes_b.len() as u64, b.size);
        assert_ne!(bytes_a, bytes_b);
    }

    #[tokio::test]
    async fn oversized_upload_leaves_nothing_behind() {
        let (_temp, storage) = make_storage();
        let locks = NameLocks::new();

        let result = store_bytes(&storage, &locks, 4, "big.bin", b"12345").await;
        assert!(matches!(result, Err(ApiError::QuotaExceeded)));

        assert!(storage.list_dir().await.expect("list").is_empty());
        let leftovers = std::fs::read_dir(storage.root_path())
            .expect("read root")
            .count();
        assert_eq!(leftovers, 0, "temp artifact should be deleted");
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_visible_entry() {
        let (_temp, storage) = make_storage();
        let locks = NameLocks::new();

        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ]);
        let result = store_stream(
            &storage,
            &locks,
            Duration::from_secs(DEFAULT_UPLOAD_IDLE_TIMEOUT_SECS),
            DEFAULT_UPLOAD_MAX_SIZE,
            "movie.mp4",
            broken,
        )
        .await;
        assert!(matches!(result, Err(ApiError::Internal(_))));

        assert!(storage.list_dir().await.expect("list").is_empty());
        let leftovers = std::fs::read_dir(storage.root_path())
            .expect("read root")
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn traversal_name_is_rejected_before_any_write() {
        let (_temp, storage) = make_storage();
        let locks = NameLocks::new();

        let result = store_bytes(
            &storage,
            &locks,
            DEFAULT_UPLOAD_MAX_SIZE,
            "../escape.txt",
            b"x",
        )
        .await;
        assert!(matches!(result, Err(ApiError::InvalidPath)));
        let leftovers = std::fs::read_dir(storage.root_path())
            .expect("read root")
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn multipart_batch_reports_per_file_status() {
        let (_temp, storage) = make_storage();
        let locks = Arc::new(NameLocks::new());
        let config = make_config();

        let body = concat!(
            "--BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"files\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "alpha\r\n",
            "--BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"files\"; filename=\"../evil.txt\"\r\n\r\n",
            "beta\r\n",
            "--BOUNDARY--\r\n",
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                "multipart/form-data; boundary=BOUNDARY",
            )
            .body(AxumBody::from(body))
            .expect("request");
        let multipart = Multipart::from_request(request, &()).await.expect("multipart");

        let JsonResponse(outcomes) = upload_files(
            Extension(storage.clone()),
            Extension(locks),
            Extension(config),
            multipart,
        )
        .await
        .expect("upload batch");

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].status, UploadStatus::Success);
        assert_eq!(outcomes[0].saved_name.as_deref(), Some("a.txt"));
        assert_eq!(outcomes[0].size, Some(5));
        assert_eq!(outcomes[1].status, UploadStatus::InvalidPath);
        assert!(outcomes[1].saved_name.is_none());

        let listed = storage.list_dir().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a.txt");
    }

    #[tokio::test]
    async fn raw_upload_decodes_percent_encoded_header_name() {
        let (_temp, storage) = make_storage();
        let locks = Arc::new(NameLocks::new());
        let config = make_config();

        let mut headers = HeaderMap::new();
        headers.insert("X-Filename", "my%20report.pdf".parse().expect("header"));
        let JsonResponse(outcome) = upload_raw(
            headers,
            Extension(storage.clone()),
            Extension(locks),
            Extension(config),
            AxumBody::from("content"),
        )
        .await
        .expect("raw upload");

        assert_eq!(outcome.status, UploadStatus::Success);
        assert_eq!(outcome.saved_name.as_deref(), Some("my report.pdf"));
        let bytes = std::fs::read(storage.root_path().join("my report.pdf")).expect("read");
        assert_eq!(bytes, b"content");
    }
}
