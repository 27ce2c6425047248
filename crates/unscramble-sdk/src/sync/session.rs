//! 同步会话 - 一个登录身份在本设备上的生命周期
//!
//! 防重入标志都收在这里，由 `ProgressSync` 独占持有。

use crate::identity::AccountIdentity;
use crate::sync::SkipReason;

/// 同步会话状态
#[derive(Debug, Clone, Default)]
pub struct SyncSession {
    identity: Option<AccountIdentity>,
    /// 会话代号，每次开启或拆除会话时递增
    epoch: u64,
    has_reconciled: bool,
    is_reconciling: bool,
}

/// 对账凭据：开始对账时领取，落地前核对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileTicket {
    pub epoch: u64,
    pub identity: AccountIdentity,
}

impl SyncSession {
    pub fn identity(&self) -> Option<&AccountIdentity> {
        self.identity.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn has_reconciled(&self) -> bool {
        self.has_reconciled
    }

    pub fn is_reconciling(&self) -> bool {
        self.is_reconciling
    }

    /// 登录
    ///
    /// 同一账号（会话恢复、token 刷新）只更新身份信息，返回 false；
    /// 新账号开启新会话并重置标志，返回 true。
    pub fn sign_in(&mut self, identity: AccountIdentity) -> bool {
        if let Some(current) = &self.identity {
            if current.same_account(&identity) {
                self.identity = Some(identity);
                return false;
            }
        }
        self.epoch += 1;
        self.identity = Some(identity);
        self.has_reconciled = false;
        self.is_reconciling = false;
        true
    }

    /// 登出：清空全部字段，在途对账随之作废
    pub fn sign_out(&mut self) {
        self.epoch += 1;
        self.identity = None;
        self.has_reconciled = false;
        self.is_reconciling = false;
    }

    /// 网络恢复：只重置"已对账"，不换会话。没有登录身份时返回 false
    pub fn reset_for_reconnect(&mut self) -> bool {
        if self.identity.is_none() {
            return false;
        }
        self.has_reconciled = false;
        true
    }

    /// 领取对账凭据，同时置 `is_reconciling`
    pub fn try_begin(&mut self) -> Result<ReconcileTicket, SkipReason> {
        let identity = self.identity.clone().ok_or(SkipReason::NoIdentity)?;
        if self.is_reconciling {
            return Err(SkipReason::InFlight);
        }
        if self.has_reconciled {
            return Err(SkipReason::AlreadyReconciled);
        }
        self.is_reconciling = true;
        Ok(ReconcileTicket {
            epoch: self.epoch,
            identity,
        })
    }

    /// 凭据是否仍属于当前会话
    pub fn is_current(&self, ticket: &ReconcileTicket) -> bool {
        self.epoch == ticket.epoch
            && self
                .identity
                .as_ref()
                .is_some_and(|identity| identity.same_account(&ticket.identity))
    }

    /// 结束在途对账；旧会话的凭据不会影响新会话
    pub fn finish(&mut self, epoch: u64) {
        if self.epoch == epoch {
            self.is_reconciling = false;
        }
    }

    pub fn mark_reconciled(&mut self) {
        if self.identity.is_some() {
            self.has_reconciled = true;
        }
    }
}
