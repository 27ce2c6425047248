//! SDK 主接口 - 配置、初始化、会话 / 网络订阅和对游戏层暴露的 API

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, UnscrambleError};
use crate::events::{EventManager, SyncEvent};
use crate::identity::IdentityProvider;
use crate::message::{TransientMessage, TransientMessages};
use crate::network::{NetworkMonitor, NetworkStatus, NetworkStatusListener};
use crate::progress::{InProgressPuzzle, ProgressSnapshot};
use crate::remote::{HttpProgressRemote, ProgressRemote};
use crate::storage::{ProgressStore, SledLocalStore};
use crate::sync::{Conflict, ProgressSync, ReconcileAttempt, ResolveChoice, Resolution, SyncPhase};

/// 远端进度服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// 服务地址，例如 https://xyz.example.co
    pub base_url: String,
    /// 匿名 API key
    pub api_key: String,
    /// 进度表名
    pub table: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            table: "progress".to_string(),
        }
    }
}

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
        }
    }
}

/// 事件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 事件缓冲区大小
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}

/// Unscramble SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnscrambleConfig {
    /// 数据存储目录（本地进度在 data_dir/kv）
    pub data_dir: PathBuf,
    /// 远端进度服务
    pub remote: RemoteConfig,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
    /// 提示消息显示时长（毫秒）
    pub message_dismiss_ms: u64,
    /// 事件配置
    pub event_config: EventConfig,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for UnscrambleConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            remote: RemoteConfig::default(),
            http_client_config: HttpClientConfig::default(),
            message_dismiss_ms: 2000,
            event_config: EventConfig::default(),
            debug_mode: false,
        }
    }
}

/// 获取默认数据目录 ~/.unscramble/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".unscramble")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows
        home_dir.join(".unscramble")
    } else {
        PathBuf::from("./unscramble_data")
    }
}

impl UnscrambleConfig {
    pub fn builder() -> UnscrambleConfigBuilder {
        UnscrambleConfigBuilder::new()
    }

    /// 校验本地相关配置
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(UnscrambleError::Config("数据目录不能为空".to_string()));
        }
        if self.message_dismiss_ms == 0 {
            return Err(UnscrambleError::Config("提示消息显示时长不能为0".to_string()));
        }
        if self.event_config.buffer_size == 0 {
            return Err(UnscrambleError::Config("事件缓冲区大小不能为0".to_string()));
        }
        Ok(())
    }

    /// 使用 HTTP 远端时额外校验远端配置
    pub fn validate_remote(&self) -> Result<()> {
        if self.remote.base_url.trim().is_empty() {
            return Err(UnscrambleError::Config("远端 base_url 不能为空".to_string()));
        }
        if self.remote.table.trim().is_empty() {
            return Err(UnscrambleError::Config("远端表名不能为空".to_string()));
        }
        Ok(())
    }
}

/// Unscramble SDK 配置构建器
pub struct UnscrambleConfigBuilder {
    config: UnscrambleConfig,
}

impl UnscrambleConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: UnscrambleConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    /// 设置远端服务地址和匿名 key
    pub fn remote<S: Into<String>, K: Into<String>>(mut self, base_url: S, api_key: K) -> Self {
        self.config.remote.base_url = base_url.into();
        self.config.remote.api_key = api_key.into();
        self
    }

    pub fn remote_table<S: Into<String>>(mut self, table: S) -> Self {
        self.config.remote.table = table.into();
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn message_dismiss_ms(mut self, millis: u64) -> Self {
        self.config.message_dismiss_ms = millis;
        self
    }

    pub fn event_config(mut self, config: EventConfig) -> Self {
        self.config.event_config = config;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> UnscrambleConfig {
        self.config
    }
}

impl Default for UnscrambleConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 统一 SDK 主接口
///
/// 分层：
/// - 存储层：SledLocalStore / ProgressStore
/// - 网络层：NetworkMonitor
/// - 事件层：EventManager / TransientMessages
/// - 同步层：ProgressSync
pub struct UnscrambleSDK {
    /// SDK 配置
    config: UnscrambleConfig,

    /// 身份提供方
    identity: Arc<dyn IdentityProvider>,

    /// 网络监控
    network: Arc<NetworkMonitor>,

    /// 事件管理器
    event_manager: Arc<EventManager>,

    /// 提示消息
    messages: Arc<TransientMessages>,

    /// 进度同步
    sync: Arc<ProgressSync>,

    /// 取消会话 / 网络订阅
    shutdown_token: CancellationToken,

    /// 订阅任务
    tasks: Mutex<Vec<JoinHandle<()>>>,

    /// 是否已关闭
    shut_down: RwLock<bool>,
}

impl UnscrambleSDK {
    /// 初始化 SDK
    ///
    /// 分层初始化顺序：
    /// 1. 存储层 → 2. 网络层 → 3. 事件层 → 4. 同步层 → 5. 订阅 → 6. 恢复会话
    pub async fn initialize(
        config: UnscrambleConfig,
        identity: Arc<dyn IdentityProvider>,
        remote: Arc<dyn ProgressRemote>,
        network_listener: Arc<dyn NetworkStatusListener>,
    ) -> Result<Arc<Self>> {
        info!("正在初始化 UnscrambleSDK...");
        config.validate()?;

        // === 第1层：存储 ===
        let kv = SledLocalStore::open(&config.data_dir).await?;
        let store = ProgressStore::new(Arc::new(kv));

        // === 第2层：网络监控 ===
        let network = Arc::new(NetworkMonitor::new(network_listener));
        network.start().await?;

        // === 第3层：事件 ===
        let event_manager = Arc::new(EventManager::new(config.event_config.buffer_size));
        let messages = Arc::new(TransientMessages::new(
            Duration::from_millis(config.message_dismiss_ms),
            event_manager.clone(),
        ));

        // === 第4层：进度同步 ===
        let sync = Arc::new(ProgressSync::new(
            store,
            remote,
            network.clone(),
            event_manager.clone(),
            messages.clone(),
        )?);

        let sdk = Arc::new(Self {
            config,
            identity,
            network,
            event_manager,
            messages,
            sync,
            shutdown_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            shut_down: RwLock::new(false),
        });

        // === 订阅先于读取当前会话，避免漏掉其间的事件 ===
        sdk.spawn_session_listener();
        sdk.spawn_network_listener();

        // === 恢复已登录的会话 ===
        match sdk.identity.current_session().await {
            Ok(Some(identity)) => {
                info!("恢复会话: {}", identity.account_id);
                sdk.sync.on_signed_in(identity, false).await;
            }
            Ok(None) => info!("未登录，进度只保存在本设备"),
            Err(e) => warn!("⚠️ 读取当前会话失败: {}", e),
        }

        info!("✅ UnscrambleSDK 初始化完成");
        Ok(sdk)
    }

    /// 使用 HTTP 远端服务初始化
    pub async fn initialize_with_http(
        config: UnscrambleConfig,
        identity: Arc<dyn IdentityProvider>,
        network_listener: Arc<dyn NetworkStatusListener>,
    ) -> Result<Arc<Self>> {
        config.validate_remote()?;
        let remote = Arc::new(HttpProgressRemote::new(
            &config.remote,
            &config.http_client_config,
        )?);
        Self::initialize(config, identity, remote, network_listener).await
    }

    fn spawn_session_listener(&self) {
        let mut receiver = self.identity.subscribe();
        let sync = self.sync.clone();
        let token = self.shutdown_token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) => {
                            // 会话先切换，对账放到后台，下一个事件不用等 fetch
                            if let Some(trigger) = sync.apply_session_event(event) {
                                let sync = sync.clone();
                                tokio::spawn(async move {
                                    let attempt = sync.reconcile(trigger).await;
                                    debug!("会话事件触发的对账结束: {:?}", attempt);
                                });
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("会话事件积压，跳过 {} 条", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("会话事件订阅已结束");
        });
        self.tasks.lock().push(task);
    }

    fn spawn_network_listener(&self) {
        let mut receiver = self.network.subscribe();
        let sync = self.sync.clone();
        let token = self.shutdown_token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) => {
                            sync.on_network_event(&event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("网络事件积压，跳过 {} 条", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("网络事件订阅已结束");
        });
        self.tasks.lock().push(task);
    }

    /// 关闭 SDK：取消订阅并停止网络监控
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut shut_down = self.shut_down.write();
            if *shut_down {
                return Ok(());
            }
            *shut_down = true;
        }
        info!("正在关闭 UnscrambleSDK...");

        self.shutdown_token.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("订阅任务退出异常: {}", e);
            }
        }
        self.network.stop().await;
        self.messages.clear();

        info!("UnscrambleSDK 关闭完成");
        Ok(())
    }

    fn check_running(&self) -> Result<()> {
        if *self.shut_down.read() {
            return Err(UnscrambleError::InvalidOperation("SDK 已关闭".to_string()));
        }
        Ok(())
    }

    // ========== 同步 ==========

    pub fn phase(&self) -> SyncPhase {
        self.sync.phase()
    }

    pub fn pending_conflict(&self) -> Option<Conflict> {
        self.sync.pending_conflict()
    }

    /// 按玩家选择解决冲突
    pub async fn resolve_conflict(&self, choice: ResolveChoice) -> Result<Resolution> {
        self.check_running()?;
        self.sync.resolve(choice).await
    }

    /// 会话存在且尚未对账时对账（界面挂载时调用）
    pub async fn ensure_reconciled(&self) -> Result<ReconcileAttempt> {
        self.check_running()?;
        Ok(self.sync.ensure_reconciled().await)
    }

    /// 登出
    ///
    /// 身份提供方登出失败只记录日志，本地清理照常进行。
    pub async fn sign_out(&self) -> Result<()> {
        self.check_running()?;
        if let Err(e) = self.identity.sign_out().await {
            warn!("⚠️ 身份提供方登出失败，继续清理本地数据: {}", e);
        }
        self.sync.teardown_session();
        Ok(())
    }

    // ========== 游戏进度 ==========

    pub fn progress(&self) -> ProgressSnapshot {
        self.sync.progress()
    }

    /// 记录进度；满足条件时在后台推送到远端
    pub fn record_progress(&self, level: u32, score: u64) -> Result<()> {
        self.check_running()?;
        if self.sync.record_progress(level, score)? {
            self.spawn_push();
        }
        Ok(())
    }

    /// 升一级并加分，返回新进度
    pub fn level_up(&self, points: u64) -> Result<ProgressSnapshot> {
        self.check_running()?;
        if self.sync.level_up(points)? {
            self.spawn_push();
        }
        Ok(self.sync.progress())
    }

    fn spawn_push(&self) {
        let sync = self.sync.clone();
        tokio::spawn(async move {
            sync.push_latest().await;
        });
    }

    pub fn save_puzzle(&self, puzzle: &InProgressPuzzle) -> Result<()> {
        self.check_running()?;
        self.sync.store().save_puzzle(puzzle)
    }

    pub fn load_puzzle(&self) -> Result<Option<InProgressPuzzle>> {
        self.check_running()?;
        self.sync.store().load_puzzle()
    }

    pub fn clear_puzzle(&self) -> Result<()> {
        self.check_running()?;
        self.sync.store().clear_puzzle()
    }

    // ========== 状态查询 ==========

    /// 当前显示的提示消息
    pub fn transient_message(&self) -> Option<TransientMessage> {
        self.messages.current()
    }

    /// 订阅 SDK 事件
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_manager.subscribe()
    }

    pub fn event_manager(&self) -> &Arc<EventManager> {
        &self.event_manager
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.network.get_status()
    }

    /// 平台层直接推送网络状态
    pub fn set_network_status(&self, status: NetworkStatus) {
        self.network.set_status(status);
    }

    pub fn config(&self) -> &UnscrambleConfig {
        &self.config
    }
}
