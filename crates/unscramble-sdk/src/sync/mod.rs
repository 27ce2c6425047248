//! 进度同步模块
//!
//! 职责：
//! - 管理同步会话（登录身份、本会话是否已对账、是否有对账在途）
//! - 对比本地与远端进度，给出对账结论（engine）
//! - 冲突时等待玩家选择并落地（gate）
//! - 响应登录 / 登出 / 网络恢复等触发（orchestrator）

pub mod engine;
pub mod gate;
pub mod orchestrator;
pub mod session;

pub use engine::classify;
pub use orchestrator::ProgressSync;
pub use session::{ReconcileTicket, SyncSession};

use serde::{Deserialize, Serialize};

use crate::progress::ProgressSnapshot;

/// 同步阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    /// 空闲（初始状态，也是每次触发的结束状态）
    Idle,
    /// 对账中
    Reconciling,
    /// 冲突待玩家选择
    AwaitingUserChoice,
}

/// 本地与远端的分歧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// 检测到冲突时的本地进度
    pub local: ProgressSnapshot,
    /// 远端进度
    pub remote: ProgressSnapshot,
}

/// 对账结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// 两端一致，或远端没有记录
    NoActionNeeded,
    /// 本地是初始状态，直接采用远端
    AdoptRemote(ProgressSnapshot),
    /// 两端都有真实且不同的进度，需要玩家选择
    Conflict(Conflict),
}

/// 冲突时玩家的选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveChoice {
    /// 保留本设备进度并写入远端
    Local,
    /// 采用远端进度覆盖本设备
    Remote,
}

/// 冲突处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 已落地，会话标记为已对账
    Applied,
    /// 远端写入失败，冲突保留，可再次选择
    Deferred,
    /// 等待期间会话已切换，结果丢弃
    Discarded,
}

/// 触发对账的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// 登录（新会话）
    SignIn,
    /// 离线后恢复网络
    Reconnect,
    /// 启动时已登录 / 会话尚未对账
    Mount,
}

/// 对账未执行的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    NoIdentity,
    /// 已有对账在途，本次触发直接丢弃
    InFlight,
    /// 本会话已完成对账
    AlreadyReconciled,
    /// 冲突尚未解决
    AwaitingUserChoice,
}

/// 对账中止的原因（都不向玩家展示，等下次触发重试）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// 网络或服务端失败
    Remote,
    /// 本地存储读写失败
    LocalStore,
    /// 在途期间会话已切换
    Stale,
}

/// 一次对账调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAttempt {
    Completed(ReconciliationOutcome),
    Skipped(SkipReason),
    Aborted(AbortReason),
}

impl ReconcileAttempt {
    /// 对账结论；本会话已对账时视为 `NoActionNeeded`
    pub fn outcome(&self) -> Option<ReconciliationOutcome> {
        match self {
            ReconcileAttempt::Completed(outcome) => Some(outcome.clone()),
            ReconcileAttempt::Skipped(SkipReason::AlreadyReconciled) => {
                Some(ReconciliationOutcome::NoActionNeeded)
            }
            ReconcileAttempt::Skipped(_) | ReconcileAttempt::Aborted(_) => None,
        }
    }
}
