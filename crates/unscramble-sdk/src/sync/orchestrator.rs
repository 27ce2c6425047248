//! 同步编排 - 登录、登出、网络恢复和游戏写入都从这里进入
//!
//! 会话、同步阶段、待解决冲突和内存进度收在同一把锁里，
//! 锁从不跨 `.await` 持有；远端 fetch / upsert 是仅有的挂起点。

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{EventManager, SyncEvent};
use crate::identity::{AccountIdentity, SessionEvent};
use crate::message::{self, TransientMessages};
use crate::network::{NetworkMonitor, NetworkStatusEvent};
use crate::progress::ProgressSnapshot;
use crate::remote::{ProgressRemote, ProgressUpsert};
use crate::storage::ProgressStore;
use crate::sync::{Conflict, ReconcileAttempt, SyncPhase, SyncSession, SyncTrigger};

/// 待解决的冲突
#[derive(Debug, Clone)]
pub(super) struct PendingConflict {
    pub(super) conflict: Conflict,
    /// 产生冲突时的会话代号
    pub(super) epoch: u64,
    /// 本地写入远端的请求在途
    pub(super) resolving: bool,
}

/// 编排器共享状态
#[derive(Debug)]
pub(super) struct SyncState {
    pub(super) session: SyncSession,
    pub(super) phase: SyncPhase,
    pub(super) pending: Option<PendingConflict>,
    pub(super) progress: ProgressSnapshot,
}

/// 切换同步阶段，事件先放进 outbox，解锁后再发
pub(super) fn transition(state: &mut SyncState, new: SyncPhase, outbox: &mut Vec<SyncEvent>) {
    if state.phase == new {
        return;
    }
    let old = std::mem::replace(&mut state.phase, new);
    debug!("同步阶段: {:?} -> {:?}", old, new);
    outbox.push(SyncEvent::PhaseChanged { old, new });
}

/// 在途对账守卫
///
/// 无论对账以何种方式结束（完成、失败、提前返回），drop 时清除 `is_reconciling`；
/// 会话已切换时什么都不做。
pub(super) struct InFlightGuard {
    state: Arc<Mutex<SyncState>>,
    events: Arc<EventManager>,
    epoch: u64,
}

impl InFlightGuard {
    pub(super) fn new(state: Arc<Mutex<SyncState>>, events: Arc<EventManager>, epoch: u64) -> Self {
        Self {
            state,
            events,
            epoch,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut outbox = Vec::new();
        {
            let mut state = self.state.lock();
            if state.session.epoch() == self.epoch {
                state.session.finish(self.epoch);
                if state.phase == SyncPhase::Reconciling {
                    transition(&mut state, SyncPhase::Idle, &mut outbox);
                }
            }
        }
        for event in outbox {
            self.events.emit(event);
        }
    }
}

/// 进度同步编排器
pub struct ProgressSync {
    pub(super) store: ProgressStore,
    pub(super) remote: Arc<dyn ProgressRemote>,
    pub(super) network: Arc<NetworkMonitor>,
    pub(super) events: Arc<EventManager>,
    pub(super) messages: Arc<TransientMessages>,
    pub(super) state: Arc<Mutex<SyncState>>,
    /// 串行化游戏进度推送
    push_lock: tokio::sync::Mutex<()>,
}

impl ProgressSync {
    /// 创建编排器，内存进度从本地存储加载
    pub fn new(
        store: ProgressStore,
        remote: Arc<dyn ProgressRemote>,
        network: Arc<NetworkMonitor>,
        events: Arc<EventManager>,
        messages: Arc<TransientMessages>,
    ) -> Result<Self> {
        let progress = store.read_snapshot()?;
        info!("本地进度: {}", progress);

        Ok(Self {
            store,
            remote,
            network,
            events,
            messages,
            state: Arc::new(Mutex::new(SyncState {
                session: SyncSession::default(),
                phase: SyncPhase::Idle,
                pending: None,
                progress,
            })),
            push_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub(super) fn flush(&self, outbox: Vec<SyncEvent>) {
        for event in outbox {
            self.events.emit(event);
        }
    }

    // ========== 状态查询 ==========

    pub fn phase(&self) -> SyncPhase {
        self.state.lock().phase
    }

    pub fn pending_conflict(&self) -> Option<Conflict> {
        self.state.lock().pending.as_ref().map(|p| p.conflict.clone())
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.state.lock().progress.clone()
    }

    /// 当前会话状态的拷贝
    pub fn session(&self) -> SyncSession {
        self.state.lock().session.clone()
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    // ========== 触发 ==========

    /// 处理身份提供方推送的会话事件
    ///
    /// 会话切换在锁内立即完成，在途对账随之作废；
    /// 需要对账时返回触发来源，由调用方在别处执行，事件不会排在 fetch 后面。
    pub fn apply_session_event(&self, event: SessionEvent) -> Option<SyncTrigger> {
        match event {
            SessionEvent::SignedIn(identity) => Some(self.start_session(identity, true)),
            SessionEvent::SignedOut => {
                self.teardown_session();
                None
            }
        }
    }

    /// 登录并对账
    pub async fn on_signed_in(&self, identity: AccountIdentity, announce: bool) -> ReconcileAttempt {
        let trigger = self.start_session(identity, announce);
        self.reconcile(trigger).await
    }

    /// 登录（不含对账）
    ///
    /// 新账号开启新会话，返回 `SignIn`；同一账号只刷新身份，返回 `Mount`。
    /// `announce` 为 true 时新会话显示登录成功提示（启动时恢复会话不显示）。
    pub fn start_session(&self, identity: AccountIdentity, announce: bool) -> SyncTrigger {
        let mut outbox = Vec::new();
        let started = {
            let mut state = self.state.lock();
            let started = state.session.sign_in(identity.clone());
            if started {
                if state.pending.take().is_some() {
                    info!("切换账号，丢弃上一会话的冲突");
                }
                transition(&mut state, SyncPhase::Idle, &mut outbox);
            }
            started
        };

        if !started {
            debug!("会话刷新: {}", identity.account_id);
            return SyncTrigger::Mount;
        }

        info!("✅ 新会话: {}", identity.account_id);
        if let Err(e) = self.store.remember_account(&identity) {
            warn!("⚠️ 保存账号信息失败: {}", e);
        }
        outbox.push(SyncEvent::SessionStarted(identity.account_id.clone()));
        self.flush(outbox);
        if announce {
            self.messages.show(message::LOGIN_SUCCESS);
        }
        SyncTrigger::SignIn
    }

    /// 会话存在且本会话尚未对账时对账
    pub async fn ensure_reconciled(&self) -> ReconcileAttempt {
        self.reconcile(SyncTrigger::Mount).await
    }

    /// 处理网络状态变化；只有离线到在线且已登录时才对账
    pub async fn on_network_event(&self, event: &NetworkStatusEvent) -> Option<ReconcileAttempt> {
        if !event.is_reconnect() {
            return None;
        }
        let reopened = self.state.lock().session.reset_for_reconnect();
        if !reopened {
            debug!("网络恢复，但没有登录身份");
            return None;
        }
        info!("网络恢复，重新对账");
        Some(self.reconcile(SyncTrigger::Reconnect).await)
    }

    /// 拆除会话：回到初始进度，清除残局和账号相关数据
    ///
    /// 没有会话时不做任何事，重复的登出事件因此无害。
    pub fn teardown_session(&self) {
        let mut outbox = Vec::new();
        {
            let mut state = self.state.lock();
            if state.session.identity().is_none() {
                debug!("没有活动会话，忽略登出");
                return;
            }
            state.session.sign_out();
            state.pending = None;
            state.progress = ProgressSnapshot::pristine();
            transition(&mut state, SyncPhase::Idle, &mut outbox);

            match self.store.purge_session() {
                Ok(removed) => info!("会话数据已清除，共 {} 个键", removed),
                Err(e) => warn!("⚠️ 清除会话数据失败: {}", e),
            }
        }

        outbox.push(SyncEvent::ProgressChanged(ProgressSnapshot::pristine()));
        outbox.push(SyncEvent::SessionReset);
        self.flush(outbox);
        self.messages.show(message::RESET_TO_LEVEL_ONE);
    }

    // ========== 游戏写入 ==========

    /// 记录游戏进度
    ///
    /// 返回是否应推送到远端：已登录、在线、本会话已对账、没有待解决冲突。
    /// 对账完成前绝不推送，新设备因此不会覆盖远端进度。
    pub fn record_progress(&self, level: u32, score: u64) -> Result<bool> {
        let snapshot = ProgressSnapshot::new(level, score)?;
        let push = {
            let mut state = self.state.lock();
            self.store.write_progress(&snapshot)?;
            state.progress = snapshot.clone();
            state.session.identity().is_some()
                && state.session.has_reconciled()
                && state.pending.is_none()
                && self.network.is_online()
        };
        self.events.emit(SyncEvent::ProgressChanged(snapshot));
        Ok(push)
    }

    /// 升一级并加分
    pub fn level_up(&self, points: u64) -> Result<bool> {
        let current = self.progress();
        self.record_progress(current.level().saturating_add(1), current.score().saturating_add(points))
    }

    /// 把最新的内存进度推到远端，失败只记录日志
    ///
    /// 推送串行执行，每次都取加锁时的最新进度，最后一次推送总是最新值。
    pub async fn push_latest(&self) {
        let _serial = self.push_lock.lock().await;
        let target = {
            let state = self.state.lock();
            match state.session.identity() {
                Some(identity) if state.session.has_reconciled() && state.pending.is_none() => {
                    Some((identity.clone(), state.progress.clone()))
                }
                _ => None,
            }
        };
        let Some((identity, progress)) = target else {
            debug!("会话不可推送，跳过");
            return;
        };
        if !self.network.is_online() {
            debug!("离线，跳过推送");
            return;
        }

        let upsert = ProgressUpsert::from_snapshot(&progress, &identity);
        match self.remote.upsert(&identity, &upsert).await {
            Ok(()) => debug!("进度已推送: {}", progress),
            Err(e) if e.is_remote_failure() => warn!("⚠️ 推送进度失败，下次再试: {}", e),
            Err(e) => warn!("⚠️ 推送进度出错: {}", e),
        }
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::network::{test_helpers::DummyNetworkStatusListener, NetworkStatus};
    use crate::remote::test_helpers::MemoryProgressRemote;
    use crate::storage::SledLocalStore;
    use std::time::Duration;
    use tempfile::TempDir;

    /// 测试装置：sled 本地存储 + 内存远端 + 可控网络
    pub struct Fixture {
        pub _dir: TempDir,
        pub sync: Arc<ProgressSync>,
        pub remote: Arc<MemoryProgressRemote>,
        pub network: Arc<NetworkMonitor>,
        pub store: ProgressStore,
    }

    impl Fixture {
        pub async fn new(remote: MemoryProgressRemote) -> Self {
            Self::with_local(remote, None).await
        }

        /// 预置本地进度
        pub async fn with_local(remote: MemoryProgressRemote, local: Option<(u32, u64)>) -> Self {
            let dir = TempDir::new().unwrap();
            let kv = SledLocalStore::open(dir.path()).await.unwrap();
            let store = ProgressStore::new(Arc::new(kv));
            if let Some((level, score)) = local {
                store
                    .write_progress(&ProgressSnapshot::new(level, score).unwrap())
                    .unwrap();
            }

            let listener = Arc::new(DummyNetworkStatusListener::new(NetworkStatus::Online));
            let network = Arc::new(NetworkMonitor::new(listener));
            network.start().await.unwrap();

            let events = Arc::new(EventManager::new(64));
            let messages = Arc::new(TransientMessages::new(Duration::from_millis(500), events.clone()));
            let remote = Arc::new(remote);
            let sync = Arc::new(
                ProgressSync::new(store.clone(), remote.clone(), network.clone(), events, messages).unwrap(),
            );

            Self {
                _dir: dir,
                sync,
                remote,
                network,
                store,
            }
        }

        /// 登录但不对账（网络暂时离线）
        pub async fn sign_in_offline(&self, account: &str) {
            self.network.set_status(NetworkStatus::Offline);
            self.sync.on_signed_in(AccountIdentity::new(account), false).await;
            self.network.set_status(NetworkStatus::Online);
        }
    }
}
