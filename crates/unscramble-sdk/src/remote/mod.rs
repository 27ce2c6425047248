//! 远端进度服务
//!
//! 每个账号一条进度记录（level / score / email / updated_at），
//! 以账号 ID 唯一标识；upsert 采用合并语义，不覆盖未提交的字段。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UnscrambleError};
use crate::identity::{AccountId, AccountIdentity};
use crate::progress::ProgressSnapshot;

pub mod http;

pub use http::HttpProgressRemote;

/// 写入远端的进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpsert {
    pub level: u32,
    pub score: u64,
    pub email: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressUpsert {
    pub fn from_snapshot(snapshot: &ProgressSnapshot, identity: &AccountIdentity) -> Self {
        Self {
            level: snapshot.level(),
            score: snapshot.score(),
            email: identity.email.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// 远端进度服务 trait
#[async_trait]
pub trait ProgressRemote: Send + Sync {
    /// 拉取账号的进度记录；没有记录时返回 `Ok(None)`
    ///
    /// 记录存在但字段非法时返回 `MalformedRemoteRecord`。
    async fn fetch(&self, identity: &AccountIdentity) -> Result<Option<ProgressSnapshot>>;

    /// 写入（插入或合并更新）账号的进度记录
    async fn upsert(&self, identity: &AccountIdentity, progress: &ProgressUpsert) -> Result<()>;
}

/// 远端返回的原始记录
///
/// 字段全部可选，合法性在 `into_snapshot` 中检查。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteProgressRecord {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub level: Option<i64>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemoteProgressRecord {
    /// 从任意 JSON 解析；类型不符也算记录损坏
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| UnscrambleError::MalformedRemoteRecord(e.to_string()))
    }

    /// 转为快照；level 必须 >= 1，score 必须 >= 0
    pub fn into_snapshot(self, owner: &AccountId) -> Result<ProgressSnapshot> {
        let level = self
            .level
            .ok_or_else(|| UnscrambleError::MalformedRemoteRecord("缺少 level".to_string()))?;
        let score = self
            .score
            .ok_or_else(|| UnscrambleError::MalformedRemoteRecord("缺少 score".to_string()))?;
        let level = u32::try_from(level)
            .ok()
            .filter(|level| *level >= 1)
            .ok_or_else(|| {
                UnscrambleError::MalformedRemoteRecord(format!("level 非法: {}", level))
            })?;
        let score = u64::try_from(score).map_err(|_| {
            UnscrambleError::MalformedRemoteRecord(format!("score 非法: {}", score))
        })?;
        ProgressSnapshot::remote(owner.clone(), level, score, self.updated_at)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn owner() -> AccountId {
        AccountId::new("u-1")
    }

    #[test]
    fn test_valid_record_converts() {
        let record = RemoteProgressRecord::from_value(json!({
            "user_id": "u-1",
            "level": 7,
            "score": 1200,
            "email": "a@example.com",
            "updated_at": "2026-01-02T03:04:05Z"
        }))
        .unwrap();
        let snapshot = record.into_snapshot(&owner()).unwrap();
        assert_eq!((snapshot.level(), snapshot.score()), (7, 1200));
        assert_eq!(snapshot.owner(), Some(&owner()));
        assert!(snapshot.updated_at().is_some());
    }

    #[test]
    fn test_missing_or_invalid_fields_are_malformed() {
        let cases = vec![
            json!({ "score": 10 }),
            json!({ "level": 3 }),
            json!({ "level": 0, "score": 10 }),
            json!({ "level": 2, "score": -5 }),
        ];
        for case in cases {
            let result = RemoteProgressRecord::from_value(case.clone())
                .and_then(|record| record.into_snapshot(&owner()));
            assert!(
                matches!(result, Err(UnscrambleError::MalformedRemoteRecord(_))),
                "expected malformed for {}",
                case
            );
        }
    }

    #[test]
    fn test_wrong_types_are_malformed() {
        let result = RemoteProgressRecord::from_value(json!({ "level": "five", "score": 10 }));
        assert!(matches!(result, Err(UnscrambleError::MalformedRemoteRecord(_))));
    }
}
