//! Unscramble SDK - 单词拼图游戏的进度同步核心
//!
//! 本 SDK 负责：
//! - 💾 本设备进度（等级、分数、未完成的谜题）持久化
//! - 🔄 登录、恢复网络时与远端进度对账
//! - ⚖️ 两端进度冲突时等待玩家选择
//! - 🚪 登出时彻底清理账号相关数据
//! - ⚙️ 事件系统：同步阶段、进度变化、提示消息
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unscramble_sdk::{AlwaysOnlineListener, IdentityProvider, ResolveChoice, UnscrambleConfig, UnscrambleSDK};
//!
//! async fn run(identity: Arc<dyn IdentityProvider>) -> unscramble_sdk::Result<()> {
//!     let config = UnscrambleConfig::builder()
//!         .data_dir("/path/to/data")
//!         .remote("https://db.example.com", "anon-key")
//!         .build();
//!     unscramble_sdk::logging::init(config.debug_mode);
//!
//!     let sdk = UnscrambleSDK::initialize_with_http(config, identity, Arc::new(AlwaysOnlineListener)).await?;
//!
//!     // 玩家过关
//!     sdk.level_up(150)?;
//!
//!     // 冲突时由玩家选择
//!     if sdk.pending_conflict().is_some() {
//!         sdk.resolve_conflict(ResolveChoice::Remote).await?;
//!     }
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod events;
pub mod identity;
pub mod logging;
pub mod message;
pub mod network;
pub mod progress;
pub mod remote;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod version;

pub use error::{Result, UnscrambleError};
pub use events::{EventManager, EventStats, SyncEvent};
pub use identity::{AccountId, AccountIdentity, IdentityProvider, SessionEvent};
pub use message::TransientMessage;
pub use network::{
    AlwaysOnlineListener, NetworkMonitor, NetworkStatus, NetworkStatusEvent, NetworkStatusListener,
};
pub use progress::{InProgressPuzzle, ProgressSnapshot};
pub use remote::{HttpProgressRemote, ProgressRemote, ProgressUpsert};
pub use sdk::{EventConfig, HttpClientConfig, RemoteConfig, UnscrambleConfig, UnscrambleSDK};
pub use storage::{LocalStore, ProgressStore, SledLocalStore};
pub use sync::{
    Conflict, ProgressSync, ReconcileAttempt, ReconciliationOutcome, ResolveChoice, Resolution,
    SyncPhase, SyncTrigger,
};
pub use version::{SDK_NAME, SDK_VERSION};
