//! 按声明文件名串行化上传提交的内存锁。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;

/// Manages asynchronous mutexes keyed by the declared upload name.
///
/// The commit step of an upload (probe a free final name, then rename)
/// must not interleave for the same declared name, otherwise two writers
/// can settle on the same disambiguated target.
#[derive(Debug, Default)]
pub struct NameLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 在超时时间内获取该名字的锁，超时返回 Err。
    pub async fn lock_with_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, ()> {
        let key = name.trim().to_string();
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| ())
    }
}
