//! 存储模块 - 设备本地的进度持久化层
//!
//! 分层设计：
//! - `LocalStore`: 同步 key/value 接口（字符串键值），不感知网络
//! - `SledLocalStore`: 基于 sled 的实现，进程重启后数据仍在
//! - `ProgressStore`: 领域 API（进度、谜题、账号命名空间），上层不直接拼 key

use crate::error::Result;

pub mod kv;
pub mod progress_store;

pub use kv::SledLocalStore;
pub use progress_store::ProgressStore;

/// 本地 key/value 存储
///
/// 所有操作同步完成，读写之间不会让出执行权。
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    fn list_keys(&self) -> Result<Vec<String>>;

    /// 批量写入；默认逐条写，实现方可以覆盖为原子批量
    fn set_batch(&self, pairs: &[(&str, String)]) -> Result<()> {
        for (key, value) in pairs {
            self.set(key, value)?;
        }
        Ok(())
    }
}

/// 本地存储使用的 key
pub mod keys {
    /// 当前等级
    pub const LEVEL: &str = "unscramble:level";
    /// 当前分数
    pub const SCORE: &str = "unscramble:score";
    /// 未完成的谜题（JSON）
    pub const PUZZLE: &str = "unscramble:puzzle";
    /// 账号相关数据的命名空间前缀，登出时整体清除
    pub const ACCOUNT_PREFIX: &str = "unscramble:account:";
    /// 最近一次登录的账号 ID
    pub const ACCOUNT_LAST: &str = "unscramble:account:last";

    /// 账号邮箱 key
    pub fn account_email(account_id: &str) -> String {
        format!("{}{}:email", ACCOUNT_PREFIX, account_id)
    }
}
