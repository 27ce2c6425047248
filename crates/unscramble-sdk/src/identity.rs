//! 账号身份与会话提供方
//!
//! 登录 / 登出由外部身份服务负责（平台层实现 `IdentityProvider`），
//! SDK 只消费当前会话和会话变化事件。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

/// 账号 ID（不透明字符串）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 已登录账号
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub account_id: AccountId,
    pub email: Option<String>,
    /// 访问远端服务用的 token
    #[serde(skip_serializing, default)]
    pub access_token: Option<String>,
}

impl AccountIdentity {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: AccountId::new(account_id),
            email: None,
            access_token: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// 是否同一账号（token 刷新不算换号）
    pub fn same_account(&self, other: &AccountIdentity) -> bool {
        self.account_id == other.account_id
    }
}

impl std::fmt::Debug for AccountIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountIdentity")
            .field("account_id", &self.account_id)
            .field("email", &self.email)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// 会话变化事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// 登录（包括启动时恢复会话、显式登录、token 刷新）
    SignedIn(AccountIdentity),
    /// 登出
    SignedOut,
}

/// 身份会话提供方 trait（由平台层实现）
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 启动时获取一次当前会话
    async fn current_session(&self) -> Result<Option<AccountIdentity>>;

    /// 订阅会话变化
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// 登出
    async fn sign_out(&self) -> Result<()>;
}
