//! 临时写入与原子落盘的辅助方法。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use uuid::Uuid;

use crate::config::{TEMP_PREFIX, TEMP_SUFFIX};
use crate::error::ApiError;
use crate::storage::Storage;

/// 上传进行中的隐藏临时文件，提交即重命名。
pub struct AtomicFile {
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在根目录创建隐藏临时文件；最终文件名在提交时才确定。
    pub async fn create(storage: &Storage) -> Result<Self, ApiError> {
        let temp_name = format!("{TEMP_PREFIX}{}{TEMP_SUFFIX}", Uuid::new_v4());
        let temp_path = storage.root_path().join(temp_name);
        let file = File::create(&temp_path)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        Ok(Self { temp_path, file })
    }

    /// 返回临时文件的可写句柄。
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步并原子重命名到 `target`；重命名是最后一步，失败时清理临时文件。
    pub async fn finalize(self, target: &Path) -> Result<(), ApiError> {
        self.file
            .sync_all()
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        drop(self.file);

        if let Some(parent) = target.parent() {
            let _ = sync_dir(parent).await;
        }

        if let Err(err) = fs::rename(&self.temp_path, target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(target).await.is_ok() {
                    fs::rename(&self.temp_path, target)
                        .await
                        .map_err(|err| ApiError::Internal(err.to_string()))?;
                } else {
                    let _ = fs::remove_file(&self.temp_path).await;
                    return Err(ApiError::Internal(err.to_string()));
                }
            }
            #[cfg(not(windows))]
            {
                let _ = fs::remove_file(&self.temp_path).await;
                return Err(ApiError::Internal(err.to_string()));
            }
        }

        if let Some(parent) = target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(())
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
