//! 基于文件元数据的弱 ETag。

use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// 根据文件大小与修改时间生成弱 ETag。
pub fn etag_from_metadata(metadata: &Metadata) -> String {
    let size = metadata.len();
    let modified = metadata.modified().ok();
    if let Some(modified) = modified
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        return format!(
            "W/\"{}-{}-{}\"",
            size,
            duration.as_secs(),
            duration.subsec_nanos()
        );
    }
    format!("W/\"{}\"", size)
}
