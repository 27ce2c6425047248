//! 事件系统模块 - 把同步状态变化推给游戏层
//!
//! 功能包括：
//! - 同步阶段变化、进度变化
//! - 冲突产生 / 解决
//! - 提示消息显示 / 消失
//! - 事件广播和按类型注册回调

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::identity::AccountId;
use crate::progress::ProgressSnapshot;
use crate::sync::{Conflict, ResolveChoice, SyncPhase};

/// SDK 事件类型
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// 同步阶段变化
    PhaseChanged { old: SyncPhase, new: SyncPhase },
    /// 内存中的进度变化（采用远端、玩家升级、登出重置）
    ProgressChanged(ProgressSnapshot),
    /// 检测到冲突，等待玩家选择
    ConflictRaised(Conflict),
    /// 冲突已按玩家选择解决
    ConflictResolved(ResolveChoice),
    /// 显示提示消息
    MessageShown { id: u64, text: String },
    /// 提示消息消失
    MessageDismissed { id: u64 },
    /// 新会话开始
    SessionStarted(AccountId),
    /// 会话已拆除，本地状态回到初始值
    SessionReset,
}

impl SyncEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::PhaseChanged { .. } => "phase_changed",
            SyncEvent::ProgressChanged(_) => "progress_changed",
            SyncEvent::ConflictRaised(_) => "conflict_raised",
            SyncEvent::ConflictResolved(_) => "conflict_resolved",
            SyncEvent::MessageShown { .. } => "message_shown",
            SyncEvent::MessageDismissed { .. } => "message_dismissed",
            SyncEvent::SessionStarted(_) => "session_started",
            SyncEvent::SessionReset => "session_reset",
        }
    }
}

/// 事件监听器
pub type EventListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 最后事件时间（UTC 毫秒）
    pub last_event_time: Option<i64>,
}

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SyncEvent>,
    /// 事件监听器映射（"*" 表示全部事件）
    listeners: RwLock<HashMap<String, Vec<EventListener>>>,
    /// 事件统计
    stats: RwLock<EventStats>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            stats: RwLock::new(EventStats::default()),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(chrono::Utc::now().timestamp_millis());
        }

        // 没有订阅者时 send 会失败，属正常场景（例如无 UI 的测试）
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        // 先拷出监听器，回调里可以再注册监听器而不死锁
        let callbacks: Vec<EventListener> = {
            let listeners = self.listeners.read();
            listeners
                .get(event.event_type())
                .into_iter()
                .chain(listeners.get("*"))
                .flatten()
                .cloned()
                .collect()
        };
        for callback in callbacks {
            callback(&event);
        }
    }

    /// 订阅全部事件
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// 添加事件监听器，`event_type` 为 "*" 时接收全部事件
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    /// 移除某类型的全部监听器
    pub fn remove_listeners(&self, event_type: &str) {
        self.listeners.write().remove(event_type);
    }

    /// 获取事件统计
    pub fn stats(&self) -> EventStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_listeners_by_type_and_wildcard() {
        let manager = EventManager::new(16);
        let typed = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let counter = typed.clone();
        manager.add_listener("session_reset", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = all.clone();
        manager.add_listener("*", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.emit(SyncEvent::SessionReset);
        manager.emit(SyncEvent::MessageDismissed { id: 1 });

        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);

        let stats = manager.stats();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.events_by_type.get("session_reset"), Some(&1));
    }

    #[tokio::test]
    async fn test_broadcast_subscription() {
        let manager = EventManager::new(16);
        let mut receiver = manager.subscribe();
        manager.emit(SyncEvent::SessionStarted(AccountId::new("u-1")));
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type(), "session_started");
    }
}
