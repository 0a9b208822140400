//! 清理残留上传临时文件的后台任务。

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{info, warn};

use crate::config::{TEMP_PREFIX, TEMP_SUFFIX, TEMP_SWEEP_INTERVAL_SECS};
use crate::storage::Storage;

/// 启动周期性的临时文件清理任务。
pub fn spawn_background_tasks(storage: Arc<Storage>, temp_ttl: Duration) {
    if temp_ttl.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TEMP_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = sweep_stale_artifacts(&storage, temp_ttl).await {
                warn!(error = %err, "temp artifact sweep failed");
            }
        }
    });
}

/// 删除根目录中早于 `min_age` 的上传临时文件。
///
/// 启动时以零阈值调用：上一次进程留下的临时文件不再属于任何
/// 在途上传，可以全部丢弃。
pub async fn sweep_stale_artifacts(
    storage: &Storage,
    min_age: Duration,
) -> Result<(), std::io::Error> {
    let now = SystemTime::now();
    let mut dir = fs::read_dir(storage.root_path()).await?;

    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(TEMP_PREFIX) || !name.ends_with(TEMP_SUFFIX) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };
        if !metadata.is_file() {
            continue;
        }
        if !min_age.is_zero() {
            let age = metadata
                .modified()
                .ok()
                .and_then(|ts| now.duration_since(ts).ok());
            match age {
                Some(age) if age >= min_age => {}
                _ => continue,
            }
        }
        let path = entry.path();
        if let Err(err) = fs::remove_file(&path).await {
            warn!(path = ?path, error = %err, "failed to remove stale temp artifact");
        } else {
            info!(path = ?path, "removed stale temp artifact");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::sweep_stale_artifacts;
    use crate::storage::Storage;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn startup_sweep_removes_artifacts_but_keeps_files() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(&root).expect("create root");
        std::fs::write(root.join(".landrop.dead.part"), b"junk").expect("write");
        std::fs::write(root.join("keep.txt"), b"data").expect("write");

        let storage = Storage::new(root.clone());
        sweep_stale_artifacts(&storage, Duration::ZERO)
            .await
            .expect("sweep");

        assert!(!root.join(".landrop.dead.part").exists());
        assert!(root.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn aged_sweep_keeps_recent_artifacts() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(&root).expect("create root");
        std::fs::write(root.join(".landrop.live.part"), b"inflight").expect("write");

        let storage = Storage::new(root.clone());
        sweep_stale_artifacts(&storage, Duration::from_secs(3600))
            .await
            .expect("sweep");

        assert!(root.join(".landrop.live.part").exists());
    }
}
