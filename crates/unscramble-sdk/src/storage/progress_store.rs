//! 进度存储 - 在 `LocalStore` 之上提供领域 API

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::identity::AccountIdentity;
use crate::progress::{InProgressPuzzle, ProgressSnapshot, PRISTINE_LEVEL, PRISTINE_SCORE};
use crate::storage::{keys, LocalStore};

/// 进度存储
#[derive(Clone)]
pub struct ProgressStore {
    store: Arc<dyn LocalStore>,
}

impl ProgressStore {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// 读取本地进度快照
    ///
    /// 缺失或无法解析的字段按初始值处理（level 1 / score 300）。
    pub fn read_snapshot(&self) -> Result<ProgressSnapshot> {
        let level = match self.store.get(keys::LEVEL)? {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(level) if level >= 1 => level,
                _ => {
                    warn!("本地 level 值非法，按初始值处理: {:?}", raw);
                    PRISTINE_LEVEL
                }
            },
            None => PRISTINE_LEVEL,
        };
        let score = match self.store.get(keys::SCORE)? {
            Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
                warn!("本地 score 值非法，按初始值处理: {:?}", raw);
                PRISTINE_SCORE
            }),
            None => PRISTINE_SCORE,
        };
        ProgressSnapshot::new(level, score)
    }

    /// 写入 level 和 score（同一批次）
    pub fn write_progress(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        self.store.set_batch(&[
            (keys::LEVEL, snapshot.level().to_string()),
            (keys::SCORE, snapshot.score().to_string()),
        ])
    }

    pub fn save_puzzle(&self, puzzle: &InProgressPuzzle) -> Result<()> {
        puzzle.validate()?;
        let json = serde_json::to_string(puzzle)?;
        self.store.set(keys::PUZZLE, &json)
    }

    /// 读取未完成的谜题；内容损坏时丢弃并返回 None
    pub fn load_puzzle(&self) -> Result<Option<InProgressPuzzle>> {
        let Some(json) = self.store.get(keys::PUZZLE)? else {
            return Ok(None);
        };
        match serde_json::from_str::<InProgressPuzzle>(&json) {
            Ok(puzzle) => Ok(Some(puzzle)),
            Err(e) => {
                warn!("谜题状态损坏，已丢弃: {}", e);
                self.store.remove(keys::PUZZLE)?;
                Ok(None)
            }
        }
    }

    pub fn clear_puzzle(&self) -> Result<()> {
        self.store.remove(keys::PUZZLE)
    }

    /// 记录当前登录账号（账号命名空间下）
    pub fn remember_account(&self, identity: &AccountIdentity) -> Result<()> {
        let account_id = identity.account_id.as_str();
        let email_key = keys::account_email(account_id);
        let mut pairs = vec![(keys::ACCOUNT_LAST, account_id.to_string())];
        if let Some(email) = &identity.email {
            pairs.push((email_key.as_str(), email.clone()));
        }
        self.store.set_batch(&pairs)
    }

    /// 最近一次登录的账号 ID
    pub fn last_account(&self) -> Result<Option<String>> {
        self.store.get(keys::ACCOUNT_LAST)
    }

    /// 登出清理：删除 level / score / 谜题以及账号命名空间下的全部 key
    ///
    /// 返回删除的 key 数量。
    pub fn purge_session(&self) -> Result<usize> {
        let mut removed = 0usize;
        for key in self.store.list_keys()? {
            let is_session_key = key == keys::LEVEL
                || key == keys::SCORE
                || key == keys::PUZZLE
                || key.starts_with(keys::ACCOUNT_PREFIX);
            if is_session_key {
                self.store.remove(&key)?;
                removed += 1;
            }
        }
        info!("本地会话数据已清除: {} 个 key", removed);
        Ok(removed)
    }

    /// 底层存储（测试和诊断用）
    pub fn local_store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }
}
