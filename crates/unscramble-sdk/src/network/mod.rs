use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::Result;

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
    /// 网络受限（可达但不稳定）
    Limited,
}

impl NetworkStatus {
    pub fn is_reachable(self) -> bool {
        matches!(self, NetworkStatus::Online | NetworkStatus::Limited)
    }
}

/// 网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    pub timestamp: i64,
}

impl NetworkStatusEvent {
    /// 离线 → 在线的边沿
    pub fn is_reconnect(&self) -> bool {
        !self.old_status.is_reachable() && self.new_status.is_reachable()
    }
}

/// 网络状态监听器trait（由平台层实现，如浏览器 online/offline 事件）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn get_current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 网络监控管理器
#[derive(Debug)]
pub struct NetworkMonitor {
    listener: Arc<dyn NetworkStatusListener>,
    status_sender: broadcast::Sender<NetworkStatusEvent>,
    current_status: Arc<RwLock<NetworkStatus>>,
    forward_task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(listener: Arc<dyn NetworkStatusListener>) -> Self {
        let (status_sender, _) = broadcast::channel(100);

        Self {
            listener,
            status_sender,
            current_status: Arc::new(RwLock::new(NetworkStatus::Offline)),
            forward_task: Mutex::new(None),
        }
    }

    /// 启动网络监控
    ///
    /// 先取一次平台当前状态，再转发平台事件；只有状态真正变化时才广播。
    pub async fn start(&self) -> Result<()> {
        let initial = self.listener.get_current_status().await;
        *self.current_status.write() = initial;
        info!("网络监控启动，当前状态: {:?}", initial);

        let mut receiver = self.listener.start_monitoring().await?;
        let status_sender = self.status_sender.clone();
        let current_status = self.current_status.clone();

        let task = tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("网络事件积压，跳过 {} 条", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let old_status = {
                    let mut status = current_status.write();
                    let old = *status;
                    *status = event.new_status;
                    old
                };
                if old_status == event.new_status {
                    continue;
                }
                let _ = status_sender.send(NetworkStatusEvent {
                    old_status,
                    new_status: event.new_status,
                    timestamp: event.timestamp,
                });
            }
        });

        if let Some(previous) = self.forward_task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// 停止网络监控（取消平台订阅）
    pub async fn stop(&self) {
        let task = self.forward_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }
        self.listener.stop_monitoring().await;
    }

    /// 获取当前网络状态
    pub fn get_status(&self) -> NetworkStatus {
        *self.current_status.read()
    }

    /// 当前是否在线
    pub fn is_online(&self) -> bool {
        self.get_status().is_reachable()
    }

    /// 手动设置网络状态（平台层直接推送，或测试时使用）
    pub fn set_status(&self, new_status: NetworkStatus) {
        let old_status = {
            let mut status = self.current_status.write();
            let old = *status;
            *status = new_status;
            old
        };
        if old_status == new_status {
            return;
        }

        let event = NetworkStatusEvent {
            old_status,
            new_status,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let _ = self.status_sender.send(event);
    }

    /// 订阅网络状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.status_sender.subscribe()
    }
}

/// 默认网络状态监听器（假设网络始终在线）
///
/// 平台层应提供真实的监听实现；没有提供时使用它。
#[derive(Debug)]
pub struct AlwaysOnlineListener;

#[async_trait]
impl NetworkStatusListener for AlwaysOnlineListener {
    async fn get_current_status(&self) -> NetworkStatus {
        NetworkStatus::Online
    }

    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>> {
        // 发送端随即丢弃，接收端会立刻收到 Closed，转发任务随之结束
        let (_sender, receiver) = broadcast::channel(1);
        Ok(receiver)
    }

    async fn stop_monitoring(&self) {}
}


#[cfg(test)]
pub use test_helpers::DummyNetworkStatusListener;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_initial_status_comes_from_listener() {
        let listener = Arc::new(DummyNetworkStatusListener::new(NetworkStatus::Offline));
        let monitor = NetworkMonitor::new(listener);
        monitor.start().await.unwrap();
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_reconnect_edge_is_forwarded() {
        let listener = Arc::new(DummyNetworkStatusListener::new(NetworkStatus::Offline));
        let monitor = NetworkMonitor::new(listener.clone());
        monitor.start().await.unwrap();
        let mut events = monitor.subscribe();

        listener.push(NetworkStatus::Online);

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.is_reconnect());
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_set_status_without_change_is_silent() {
        let monitor = NetworkMonitor::new(Arc::new(AlwaysOnlineListener));
        monitor.start().await.unwrap();
        let mut events = monitor.subscribe();

        monitor.set_status(NetworkStatus::Online);
        assert!(events.try_recv().is_err());

        monitor.set_status(NetworkStatus::Offline);
        let event = events.try_recv().unwrap();
        assert_eq!(event.old_status, NetworkStatus::Online);
        assert!(!event.is_reconnect());
    }
}
