//! 冲突处理 - 玩家选择保留本地或采用远端

use tracing::{info, warn};

use crate::error::{Result, UnscrambleError};
use crate::events::SyncEvent;
use crate::message;
use crate::remote::ProgressUpsert;
use crate::sync::orchestrator::transition;
use crate::sync::{ProgressSync, ResolveChoice, Resolution, SyncPhase};

impl ProgressSync {
    /// 按玩家选择解决待处理的冲突
    ///
    /// - `Remote`：远端进度覆盖本地存储和内存
    /// - `Local`：本地进度写入远端，本地不变；写入失败时冲突保留，返回 `Deferred`
    ///
    /// 没有待解决冲突或上一次选择仍在处理中时返回 `InvalidOperation`。
    pub async fn resolve(&self, choice: ResolveChoice) -> Result<Resolution> {
        match choice {
            ResolveChoice::Remote => self.resolve_with_remote(),
            ResolveChoice::Local => self.resolve_with_local().await,
        }
    }

    fn resolve_with_remote(&self) -> Result<Resolution> {
        let mut outbox = Vec::new();
        let adopted = {
            let mut state = self.state.lock();
            let pending = state
                .pending
                .as_ref()
                .ok_or_else(|| UnscrambleError::InvalidOperation("没有待解决的冲突".to_string()))?;
            if pending.resolving {
                return Err(UnscrambleError::InvalidOperation("冲突正在处理中".to_string()));
            }

            let adopted = pending.conflict.remote.to_local();
            self.store.write_progress(&adopted)?;
            state.pending = None;
            state.progress = adopted.clone();
            state.session.mark_reconciled();
            transition(&mut state, SyncPhase::Idle, &mut outbox);
            adopted
        };

        info!("✅ 冲突已解决：采用远端进度 {}", adopted);
        outbox.push(SyncEvent::ProgressChanged(adopted));
        outbox.push(SyncEvent::ConflictResolved(ResolveChoice::Remote));
        self.flush(outbox);
        self.messages.show(message::LOADED_SERVER_DATA);
        Ok(Resolution::Applied)
    }

    async fn resolve_with_local(&self) -> Result<Resolution> {
        let (identity, local, epoch) = {
            let mut state = self.state.lock();
            let identity = state.session.identity().cloned();
            let pending = state
                .pending
                .as_mut()
                .ok_or_else(|| UnscrambleError::InvalidOperation("没有待解决的冲突".to_string()))?;
            if pending.resolving {
                return Err(UnscrambleError::InvalidOperation("冲突正在处理中".to_string()));
            }
            let identity = identity.ok_or(UnscrambleError::NotSignedIn)?;
            let epoch = pending.epoch;
            pending.resolving = true;
            // 等待选择期间玩家可能继续玩过，推送最新的本地进度
            let local = state.progress.clone();
            (identity, local, epoch)
        };

        let upsert = ProgressUpsert::from_snapshot(&local, &identity);
        let result = self.remote.upsert(&identity, &upsert).await;

        let mut outbox = Vec::new();
        {
            let mut state = self.state.lock();
            let current = state.session.epoch() == epoch
                && state.pending.as_ref().is_some_and(|p| p.epoch == epoch);
            if !current {
                let stale = UnscrambleError::StaleApply(format!(
                    "会话已切换，丢弃 {} 的冲突处理结果",
                    identity.account_id
                ));
                info!("{}", stale);
                return Ok(Resolution::Discarded);
            }

            if let Err(e) = result {
                warn!("⚠️ 保存本地进度到远端失败，冲突保留: {}", e);
                if let Some(pending) = state.pending.as_mut() {
                    pending.resolving = false;
                }
                return Ok(Resolution::Deferred);
            }

            state.pending = None;
            state.session.mark_reconciled();
            transition(&mut state, SyncPhase::Idle, &mut outbox);
        }

        info!("✅ 冲突已解决：保留本地进度 {}", local);
        outbox.push(SyncEvent::ConflictResolved(ResolveChoice::Local));
        self.flush(outbox);
        self.messages.show(message::SAVED_LOCAL_DATA);
        Ok(Resolution::Applied)
    }
}
