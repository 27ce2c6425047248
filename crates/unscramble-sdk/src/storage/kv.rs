//! KV 存储 - 基于 sled 的本地键值存储
//!
//! 键值都是 UTF-8 字符串；每次写入后 flush，保证进程重启后进度不丢。

use std::path::{Path, PathBuf};

use sled::{Db, Tree};
use tracing::{debug, info};

use crate::error::{Result, UnscrambleError};
use crate::storage::LocalStore;

/// 进度数据所在的 Tree
const PROGRESS_TREE: &str = "progress";

/// sled 本地存储
#[derive(Debug)]
pub struct SledLocalStore {
    path: PathBuf,
    /// 持有数据库句柄，Tree 存活期间数据库不关闭
    #[allow(dead_code)]
    db: Db,
    tree: Tree,
}

impl SledLocalStore {
    /// 打开（或创建）`base_path/kv` 下的 sled 数据库
    pub async fn open(base_path: &Path) -> Result<Self> {
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| UnscrambleError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 上一个实例（例如刚刷新的页面进程）可能还没释放文件锁，带退避重试
        const MAX_OPEN_RETRIES: u32 = 6;
        const RETRY_DELAY_MS: u64 = 100;
        let mut last_err: Option<sled::Error> = None;
        let mut db_opt: Option<Db> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = e.to_string();
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        debug!("sled 文件锁被占用，{}ms 后重试", delay_ms);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            UnscrambleError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        let tree = db
            .open_tree(PROGRESS_TREE)
            .map_err(|e| UnscrambleError::KvStore(format!("打开进度 Tree 失败: {}", e)))?;

        info!("本地进度存储已打开: {}", kv_path.display());

        Ok(Self {
            path: kv_path,
            db,
            tree,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        self.tree
            .flush()
            .map_err(|e| UnscrambleError::KvStore(format!("flush 失败: {}", e)))?;
        Ok(())
    }
}

impl LocalStore for SledLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .tree
            .get(key)
            .map_err(|e| UnscrambleError::KvStore(format!("读取键值失败: {}", e)))?;

        match result {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    UnscrambleError::Serialization(format!("值不是合法 UTF-8 ({}): {}", key, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.tree
            .insert(key, value.as_bytes())
            .map_err(|e| UnscrambleError::KvStore(format!("写入键值失败: {}", e)))?;
        self.flush()
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.tree
            .remove(key)
            .map_err(|e| UnscrambleError::KvStore(format!("删除键值失败: {}", e)))?;
        self.flush()
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for result in self.tree.iter().keys() {
            let key = result
                .map_err(|e| UnscrambleError::KvStore(format!("遍历键失败: {}", e)))?;
            // 非 UTF-8 的键不是本 SDK 写入的，跳过
            if let Ok(key) = String::from_utf8(key.to_vec()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn set_batch(&self, pairs: &[(&str, String)]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (key, value) in pairs {
            batch.insert(key.as_bytes(), value.as_bytes());
        }
        self.tree
            .apply_batch(batch)
            .map_err(|e| UnscrambleError::KvStore(format!("批量写入失败: {}", e)))?;
        self.flush()
    }
}
