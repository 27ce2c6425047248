//! 游戏进度数据模型
//!
//! - `ProgressSnapshot`：某一时刻的 level / score 快照（本地或远端）
//! - `InProgressPuzzle`：当前未完成的谜题状态

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UnscrambleError};
use crate::identity::AccountId;

/// 初始等级（未产生独立进度的设备）
pub const PRISTINE_LEVEL: u32 = 1;
/// 初始分数
pub const PRISTINE_SCORE: u64 = 300;

/// 进度快照
///
/// 字段私有，创建后不可修改；对比只看 level 和 score。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    level: u32,
    score: u64,
    /// 所属账号（本地 / 匿名状态为 None）
    owner: Option<AccountId>,
    /// 远端最后更新时间（本地快照没有权威时间戳）
    updated_at: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    /// 创建本地快照，level 必须 >= 1
    pub fn new(level: u32, score: u64) -> Result<Self> {
        if level == 0 {
            return Err(UnscrambleError::InvalidOperation(
                "level 必须为正整数".to_string(),
            ));
        }
        Ok(Self {
            level,
            score,
            owner: None,
            updated_at: None,
        })
    }

    /// 创建远端快照
    pub fn remote(
        owner: AccountId,
        level: u32,
        score: u64,
        updated_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let snapshot = Self::new(level, score)?;
        Ok(Self {
            owner: Some(owner),
            updated_at,
            ..snapshot
        })
    }

    /// 初始快照：level 1 / score 300
    pub fn pristine() -> Self {
        Self {
            level: PRISTINE_LEVEL,
            score: PRISTINE_SCORE,
            owner: None,
            updated_at: None,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn owner(&self) -> Option<&AccountId> {
        self.owner.as_ref()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// 是否仍是初始状态（设备从未产生独立进度）
    pub fn is_pristine(&self) -> bool {
        self.level == PRISTINE_LEVEL && self.score == PRISTINE_SCORE
    }

    /// level 和 score 是否一致
    pub fn same_progress(&self, other: &ProgressSnapshot) -> bool {
        self.level == other.level && self.score == other.score
    }

    /// 去掉归属和时间戳，得到本地视角的快照
    pub fn to_local(&self) -> Self {
        Self {
            level: self.level,
            score: self.score,
            owner: None,
            updated_at: None,
        }
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::pristine()
    }
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LV.{} ({} pts)", self.level, self.score)
    }
}

/// 未完成的谜题状态
///
/// 谜题内容由上层选择和打乱，这里只负责持久化玩家的中间状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProgressPuzzle {
    /// 目标单词（短语）
    pub target_words: Vec<String>,
    /// 打乱后的字母
    pub shuffled: Vec<char>,
    /// 已点选的字母下标（按点选顺序）
    pub picked: Vec<usize>,
    /// 已使用的提示次数
    #[serde(default)]
    pub hints_used: u32,
}

impl InProgressPuzzle {
    pub fn new(target_words: Vec<String>, shuffled: Vec<char>) -> Self {
        Self {
            target_words,
            shuffled,
            picked: Vec::new(),
            hints_used: 0,
        }
    }

    /// 当前拼出的字符串
    pub fn guess(&self) -> String {
        self.picked
            .iter()
            .filter_map(|&i| self.shuffled.get(i))
            .collect()
    }

    /// 检查下标合法且不重复
    pub fn validate(&self) -> Result<()> {
        let mut seen = vec![false; self.shuffled.len()];
        for &index in &self.picked {
            match seen.get_mut(index) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => {
                    return Err(UnscrambleError::InvalidOperation(format!(
                        "字母下标重复: {}",
                        index
                    )))
                }
                None => {
                    return Err(UnscrambleError::InvalidOperation(format!(
                        "字母下标越界: {} (共 {} 个字母)",
                        index,
                        self.shuffled.len()
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pristine_snapshot() {
        let snapshot = ProgressSnapshot::pristine();
        assert!(snapshot.is_pristine());
        assert_eq!(snapshot.level(), 1);
        assert_eq!(snapshot.score(), 300);
        assert_eq!(snapshot, ProgressSnapshot::default());
    }

    #[test]
    fn test_level_zero_rejected() {
        assert!(ProgressSnapshot::new(0, 100).is_err());
        assert!(ProgressSnapshot::new(1, 0).is_ok());
    }

    #[test]
    fn test_same_progress_ignores_owner_and_time() {
        let local = ProgressSnapshot::new(3, 450).unwrap();
        let remote =
            ProgressSnapshot::remote(AccountId::new("u-1"), 3, 450, Some(Utc::now())).unwrap();
        assert!(local.same_progress(&remote));
        assert_ne!(local, remote);
        assert_eq!(remote.to_local(), local);
    }

    #[test]
    fn test_pristine_score_with_other_level_is_not_pristine() {
        assert!(!ProgressSnapshot::new(2, 300).unwrap().is_pristine());
        assert!(!ProgressSnapshot::new(1, 301).unwrap().is_pristine());
    }

    #[test]
    fn test_puzzle_guess_and_validate() {
        let mut puzzle = InProgressPuzzle::new(
            vec!["RUST".to_string()],
            vec!['T', 'S', 'U', 'R'],
        );
        puzzle.picked = vec![3, 2, 1];
        assert_eq!(puzzle.guess(), "RUS");
        assert!(puzzle.validate().is_ok());

        puzzle.picked.push(3);
        assert!(puzzle.validate().is_err());

        puzzle.picked = vec![4];
        assert!(puzzle.validate().is_err());
    }
}
