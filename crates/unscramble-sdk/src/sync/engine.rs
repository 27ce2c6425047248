//! 对账引擎 - 对比本地与远端进度并落地结论

use tracing::{debug, info, warn};

use crate::error::UnscrambleError;
use crate::events::SyncEvent;
use crate::message;
use crate::progress::ProgressSnapshot;
use crate::sync::orchestrator::{transition, InFlightGuard, PendingConflict};
use crate::sync::{
    AbortReason, Conflict, ProgressSync, ReconcileAttempt, ReconcileTicket, ReconciliationOutcome,
    SkipReason, SyncPhase, SyncTrigger,
};

/// 判定对账结论（纯函数）
///
/// - 远端没有记录：无需处理
/// - 本地是初始状态：采用远端
/// - level 与 score 都相同：无需处理
/// - 其他：冲突
pub fn classify(local: &ProgressSnapshot, remote: Option<&ProgressSnapshot>) -> ReconciliationOutcome {
    let Some(remote) = remote else {
        return ReconciliationOutcome::NoActionNeeded;
    };
    if local.is_pristine() {
        return ReconciliationOutcome::AdoptRemote(remote.clone());
    }
    if local.same_progress(remote) {
        return ReconciliationOutcome::NoActionNeeded;
    }
    ReconciliationOutcome::Conflict(Conflict {
        local: local.clone(),
        remote: remote.clone(),
    })
}

impl ProgressSync {
    /// 对账
    ///
    /// 不满足前置条件时直接返回 `Skipped`；远端失败时返回 `Aborted`，
    /// 本会话保持未对账，下次触发重试。
    pub async fn reconcile(&self, trigger: SyncTrigger) -> ReconcileAttempt {
        if !self.network.is_online() {
            debug!("离线，跳过对账 ({:?})", trigger);
            return ReconcileAttempt::Skipped(SkipReason::Offline);
        }

        let mut outbox = Vec::new();
        let (ticket, captured) = {
            let mut state = self.state.lock();
            if state.pending.is_some() {
                debug!("冲突待选择，跳过对账 ({:?})", trigger);
                return ReconcileAttempt::Skipped(SkipReason::AwaitingUserChoice);
            }
            let ticket = match state.session.try_begin() {
                Ok(ticket) => ticket,
                Err(reason) => {
                    debug!("跳过对账 ({:?}): {:?}", trigger, reason);
                    return ReconcileAttempt::Skipped(reason);
                }
            };
            match self.store.read_snapshot() {
                Ok(local) => {
                    transition(&mut state, SyncPhase::Reconciling, &mut outbox);
                    (ticket, local)
                }
                Err(e) => {
                    warn!("⚠️ 读取本地进度失败，中止对账: {}", e);
                    state.session.finish(ticket.epoch);
                    return ReconcileAttempt::Aborted(AbortReason::LocalStore);
                }
            }
        };
        self.flush(outbox);

        let _guard = InFlightGuard::new(self.state.clone(), self.events.clone(), ticket.epoch);
        info!(
            "开始对账 ({:?}): account={}, local={}",
            trigger, ticket.identity.account_id, captured
        );

        let remote = match self.remote.fetch(&ticket.identity).await {
            Ok(remote) => remote,
            Err(UnscrambleError::MalformedRemoteRecord(reason)) => {
                warn!("⚠️ 远端记录无效，按无记录处理: {}", reason);
                None
            }
            Err(e) => {
                warn!("⚠️ 拉取远端进度失败，等待下次触发: {}", e);
                return ReconcileAttempt::Aborted(AbortReason::Remote);
            }
        };

        self.apply(&ticket, &captured, remote)
    }

    /// 落地对账结论，整个过程在一个临界区内完成
    fn apply(
        &self,
        ticket: &ReconcileTicket,
        captured: &ProgressSnapshot,
        remote: Option<ProgressSnapshot>,
    ) -> ReconcileAttempt {
        let mut outbox = Vec::new();
        let mut notice = None;
        let outcome = {
            let mut state = self.state.lock();
            if !state.session.is_current(ticket) {
                let stale = UnscrambleError::StaleApply(format!(
                    "会话已切换，丢弃 {} 的对账结果",
                    ticket.identity.account_id
                ));
                info!("{}", stale);
                return ReconcileAttempt::Aborted(AbortReason::Stale);
            }

            // 拉取期间游戏可能写过进度，按最新本地重新判定
            let local = match self.store.read_snapshot() {
                Ok(local) => local,
                Err(e) => {
                    warn!("⚠️ 读取本地进度失败，中止对账: {}", e);
                    return ReconcileAttempt::Aborted(AbortReason::LocalStore);
                }
            };
            if !local.same_progress(captured) {
                info!("对账期间本地进度已变化: {} -> {}", captured, local);
            }

            let outcome = classify(&local, remote.as_ref());
            match &outcome {
                ReconciliationOutcome::NoActionNeeded => {
                    state.session.mark_reconciled();
                    transition(&mut state, SyncPhase::Idle, &mut outbox);
                }
                ReconciliationOutcome::AdoptRemote(remote) => {
                    let adopted = remote.to_local();
                    if let Err(e) = self.store.write_progress(&adopted) {
                        warn!("⚠️ 写入远端进度失败，中止对账: {}", e);
                        return ReconcileAttempt::Aborted(AbortReason::LocalStore);
                    }
                    state.progress = adopted.clone();
                    state.session.mark_reconciled();
                    transition(&mut state, SyncPhase::Idle, &mut outbox);
                    outbox.push(SyncEvent::ProgressChanged(adopted));
                    notice = Some(message::LOADED_SERVER_DATA);
                }
                ReconciliationOutcome::Conflict(conflict) => {
                    state.pending = Some(PendingConflict {
                        conflict: conflict.clone(),
                        epoch: ticket.epoch,
                        resolving: false,
                    });
                    transition(&mut state, SyncPhase::AwaitingUserChoice, &mut outbox);
                    outbox.push(SyncEvent::ConflictRaised(conflict.clone()));
                }
            }
            outcome
        };

        match &outcome {
            ReconciliationOutcome::NoActionNeeded => info!("✅ 对账完成：无需处理"),
            ReconciliationOutcome::AdoptRemote(remote) => info!("✅ 对账完成：采用远端进度 {}", remote),
            ReconciliationOutcome::Conflict(conflict) => info!(
                "⚠️ 进度冲突：本地 {}，远端 {}",
                conflict.local, conflict.remote
            ),
        }

        self.flush(outbox);
        if let Some(text) = notice {
            self.messages.show(text);
        }
        ReconcileAttempt::Completed(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{AccountId, AccountIdentity};
    use crate::network::NetworkStatus;
    use crate::remote::test_helpers::MemoryProgressRemote;
    use crate::storage::keys;
    use crate::sync::orchestrator::test_helpers::Fixture;
    use std::time::Duration;

    fn snapshot(level: u32, score: u64) -> ProgressSnapshot {
        ProgressSnapshot::new(level, score).unwrap()
    }

    fn remote_snapshot(level: u32, score: u64) -> ProgressSnapshot {
        ProgressSnapshot::remote(AccountId::new("u-1"), level, score, None).unwrap()
    }

    async fn wait_for_fetches(remote: &MemoryProgressRemote, count: usize) {
        for _ in 0..200 {
            if remote.fetch_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("fetch was never issued");
    }

    #[test]
    fn test_classify_table() {
        let pristine = ProgressSnapshot::pristine();
        assert_eq!(classify(&pristine, None), ReconciliationOutcome::NoActionNeeded);
        assert_eq!(
            classify(&pristine, Some(&remote_snapshot(5, 900))),
            ReconciliationOutcome::AdoptRemote(remote_snapshot(5, 900))
        );
        assert_eq!(
            classify(&snapshot(3, 450), Some(&remote_snapshot(3, 450))),
            ReconciliationOutcome::NoActionNeeded
        );
        assert!(matches!(
            classify(&snapshot(5, 900), Some(&remote_snapshot(7, 1200))),
            ReconciliationOutcome::Conflict(_)
        ));
        // 只有 score 不同也算冲突
        assert!(matches!(
            classify(&snapshot(5, 900), Some(&remote_snapshot(5, 950))),
            ReconciliationOutcome::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_second_reconcile_is_idempotent() {
        let fx = Fixture::new(MemoryProgressRemote::new().with_record("u-1", 3, 450)).await;
        fx.sign_in_offline("u-1").await;

        let first = fx.sync.reconcile(SyncTrigger::Mount).await;
        assert!(matches!(first, ReconcileAttempt::Completed(_)));
        let second = fx.sync.reconcile(SyncTrigger::Mount).await;

        assert_eq!(second.outcome(), Some(ReconciliationOutcome::NoActionNeeded));
        assert_eq!(fx.remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_same_tick_triggers_issue_one_fetch() {
        let fx = Fixture::new(MemoryProgressRemote::new().with_record("u-1", 5, 900)).await;
        fx.sign_in_offline("u-1").await;

        let (a, b) = tokio::join!(
            fx.sync.reconcile(SyncTrigger::Mount),
            fx.sync.reconcile(SyncTrigger::Reconnect)
        );

        assert_eq!(fx.remote.fetch_count(), 1);
        let completed = [&a, &b]
            .iter()
            .filter(|attempt| matches!(attempt, ReconcileAttempt::Completed(_)))
            .count();
        assert_eq!(completed, 1);
    }

    #[tokio::test]
    async fn test_trigger_while_in_flight_is_dropped() {
        let fx = Fixture::new(MemoryProgressRemote::new().with_record("u-1", 5, 900)).await;
        fx.sign_in_offline("u-1").await;
        fx.remote.hold_fetches();

        let sync = fx.sync.clone();
        let first = tokio::spawn(async move { sync.reconcile(SyncTrigger::SignIn).await });
        wait_for_fetches(&fx.remote, 1).await;
        assert_eq!(fx.sync.phase(), SyncPhase::Reconciling);
        assert!(fx.sync.session().is_reconciling());

        let second = fx.sync.reconcile(SyncTrigger::Reconnect).await;
        assert_eq!(second, ReconcileAttempt::Skipped(SkipReason::InFlight));

        fx.remote.release_fetch();
        let first = first.await.unwrap();
        assert!(matches!(
            first,
            ReconcileAttempt::Completed(ReconciliationOutcome::AdoptRemote(_))
        ));
        assert_eq!(fx.remote.fetch_count(), 1);
        assert!(!fx.sync.session().is_reconciling());
    }

    #[tokio::test]
    async fn test_pristine_device_adopts_remote() {
        let fx = Fixture::new(MemoryProgressRemote::new().with_record("u-1", 5, 900)).await;
        fx.sign_in_offline("u-1").await;

        let attempt = fx.sync.reconcile(SyncTrigger::Mount).await;

        assert!(matches!(
            attempt,
            ReconcileAttempt::Completed(ReconciliationOutcome::AdoptRemote(_))
        ));
        let stored = fx.store.read_snapshot().unwrap();
        assert_eq!((stored.level(), stored.score()), (5, 900));
        assert_eq!(fx.sync.progress().level(), 5);
        assert!(fx.sync.session().has_reconciled());
        assert_eq!(fx.sync.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_divergent_progress_raises_conflict() {
        let fx = Fixture::with_local(
            MemoryProgressRemote::new().with_record("u-1", 7, 1200),
            Some((5, 900)),
        )
        .await;
        fx.sign_in_offline("u-1").await;

        let attempt = fx.sync.reconcile(SyncTrigger::Mount).await;

        let ReconcileAttempt::Completed(ReconciliationOutcome::Conflict(conflict)) = attempt else {
            panic!("expected conflict, got {:?}", attempt);
        };
        assert_eq!((conflict.local.level(), conflict.remote.level()), (5, 7));
        assert_eq!(fx.sync.phase(), SyncPhase::AwaitingUserChoice);
        assert_eq!(fx.sync.pending_conflict(), Some(conflict));
        assert!(!fx.sync.session().has_reconciled());

        // 两端都没有被改动
        let stored = fx.store.read_snapshot().unwrap();
        assert_eq!((stored.level(), stored.score()), (5, 900));
        assert_eq!(fx.remote.record("u-1").unwrap().level(), 7);
        assert!(fx.remote.upserts().is_empty());

        // 冲突未解决前，后续触发被挡住
        let again = fx.sync.reconcile(SyncTrigger::Reconnect).await;
        assert_eq!(again, ReconcileAttempt::Skipped(SkipReason::AwaitingUserChoice));
        assert_eq!(fx.remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_matching_progress_needs_no_writes() {
        let fx = Fixture::with_local(
            MemoryProgressRemote::new().with_record("u-1", 3, 450),
            Some((3, 450)),
        )
        .await;
        fx.sign_in_offline("u-1").await;
        let keys_before = fx.store.local_store().list_keys().unwrap();

        let attempt = fx.sync.reconcile(SyncTrigger::Mount).await;

        assert_eq!(
            attempt,
            ReconcileAttempt::Completed(ReconciliationOutcome::NoActionNeeded)
        );
        assert!(fx.remote.upserts().is_empty());
        assert_eq!(fx.store.local_store().list_keys().unwrap(), keys_before);
        assert!(fx.sync.messages.current().is_none());
    }

    #[tokio::test]
    async fn test_missing_remote_record_needs_no_action() {
        let fx = Fixture::with_local(MemoryProgressRemote::new(), Some((4, 600))).await;
        fx.sign_in_offline("u-1").await;

        let attempt = fx.sync.reconcile(SyncTrigger::Mount).await;
        assert_eq!(
            attempt,
            ReconcileAttempt::Completed(ReconciliationOutcome::NoActionNeeded)
        );
        assert!(fx.sync.session().has_reconciled());
    }

    #[tokio::test]
    async fn test_malformed_remote_record_is_treated_as_missing() {
        let fx = Fixture::with_local(MemoryProgressRemote::new(), Some((4, 600))).await;
        fx.remote
            .fail_next_fetch(UnscrambleError::MalformedRemoteRecord("level 缺失".to_string()));
        fx.sign_in_offline("u-1").await;

        let attempt = fx.sync.reconcile(SyncTrigger::Mount).await;
        assert_eq!(
            attempt,
            ReconcileAttempt::Completed(ReconciliationOutcome::NoActionNeeded)
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_session_unreconciled() {
        let fx = Fixture::new(MemoryProgressRemote::new().with_record("u-1", 5, 900)).await;
        fx.remote
            .fail_next_fetch(UnscrambleError::NetworkUnavailable("timeout".to_string()));
        fx.sign_in_offline("u-1").await;

        let attempt = fx.sync.reconcile(SyncTrigger::Mount).await;
        assert_eq!(attempt, ReconcileAttempt::Aborted(AbortReason::Remote));
        let session = fx.sync.session();
        assert!(!session.has_reconciled());
        assert!(!session.is_reconciling());
        assert_eq!(fx.sync.phase(), SyncPhase::Idle);
        assert!(fx.sync.progress().is_pristine());

        // 下次触发重试
        let retry = fx.sync.reconcile(SyncTrigger::Reconnect).await;
        assert!(matches!(
            retry,
            ReconcileAttempt::Completed(ReconciliationOutcome::AdoptRemote(_))
        ));
        assert_eq!(fx.remote.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_offline_and_anonymous_are_skipped() {
        let fx = Fixture::new(MemoryProgressRemote::new()).await;
        assert_eq!(
            fx.sync.reconcile(SyncTrigger::Mount).await,
            ReconcileAttempt::Skipped(SkipReason::NoIdentity)
        );

        fx.sign_in_offline("u-1").await;
        fx.network.set_status(NetworkStatus::Offline);
        assert_eq!(
            fx.sync.reconcile(SyncTrigger::Mount).await,
            ReconcileAttempt::Skipped(SkipReason::Offline)
        );
        assert_eq!(fx.remote.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_result_is_discarded_after_sign_out() {
        let fx = Fixture::new(MemoryProgressRemote::new().with_record("u-1", 5, 900)).await;
        fx.sign_in_offline("u-1").await;
        fx.remote.hold_fetches();

        let sync = fx.sync.clone();
        let in_flight = tokio::spawn(async move { sync.reconcile(SyncTrigger::SignIn).await });
        wait_for_fetches(&fx.remote, 1).await;

        fx.sync.teardown_session();
        fx.remote.release_fetch();

        assert_eq!(
            in_flight.await.unwrap(),
            ReconcileAttempt::Aborted(AbortReason::Stale)
        );
        assert!(fx.sync.progress().is_pristine());
        assert_eq!(fx.store.local_store().get(keys::LEVEL).unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_result_does_not_touch_new_session() {
        let fx = Fixture::new(MemoryProgressRemote::new().with_record("u-1", 5, 900)).await;
        fx.sign_in_offline("u-1").await;
        fx.remote.hold_fetches();

        let sync = fx.sync.clone();
        let in_flight = tokio::spawn(async move { sync.reconcile(SyncTrigger::SignIn).await });
        wait_for_fetches(&fx.remote, 1).await;

        // 另一个账号登录（离线，不触发新的拉取）
        fx.network.set_status(NetworkStatus::Offline);
        fx.sync.on_signed_in(AccountIdentity::new("u-2"), false).await;
        fx.network.set_status(NetworkStatus::Online);
        fx.remote.release_fetch();

        assert_eq!(
            in_flight.await.unwrap(),
            ReconcileAttempt::Aborted(AbortReason::Stale)
        );
        assert!(fx.sync.progress().is_pristine());
        let session = fx.sync.session();
        assert_eq!(session.identity().unwrap().account_id.as_str(), "u-2");
        assert!(!session.has_reconciled());
    }

    #[tokio::test]
    async fn test_gameplay_during_fetch_is_not_rolled_back() {
        let fx = Fixture::new(MemoryProgressRemote::new().with_record("u-1", 5, 900)).await;
        fx.sign_in_offline("u-1").await;
        fx.remote.hold_fetches();

        let sync = fx.sync.clone();
        let in_flight = tokio::spawn(async move { sync.reconcile(SyncTrigger::SignIn).await });
        wait_for_fetches(&fx.remote, 1).await;

        // 拉取期间玩家升到 2 级，推送因尚未对账被压住
        assert!(!fx.sync.record_progress(2, 450).unwrap());
        fx.remote.release_fetch();

        let attempt = in_flight.await.unwrap();
        let ReconcileAttempt::Completed(ReconciliationOutcome::Conflict(conflict)) = attempt else {
            panic!("expected conflict, got {:?}", attempt);
        };
        assert_eq!(conflict.local.level(), 2);
        assert_eq!(fx.store.read_snapshot().unwrap().level(), 2);
        assert_eq!(fx.sync.progress().level(), 2);
    }

    #[tokio::test]
    async fn test_phase_events_are_emitted() {
        let fx = Fixture::new(MemoryProgressRemote::new().with_record("u-1", 5, 900)).await;
        fx.sign_in_offline("u-1").await;
        let mut receiver = fx.sync.events.subscribe();

        fx.sync.reconcile(SyncTrigger::Mount).await;

        let mut phases = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            if let SyncEvent::PhaseChanged { new, .. } = event {
                phases.push(new);
            }
        }
        assert_eq!(phases, vec![SyncPhase::Reconciling, SyncPhase::Idle]);
    }
}
