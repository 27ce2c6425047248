//! HTTP 远端进度服务 - REST 表接口（PostgREST 风格）
//!
//! - 拉取：`GET {base_url}/rest/v1/{table}?user_id=eq.{id}`
//! - 写入：`POST {base_url}/rest/v1/{table}?on_conflict=user_id`，
//!   `Prefer: resolution=merge-duplicates`，按 user_id 合并

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::{Result, UnscrambleError};
use crate::identity::AccountIdentity;
use crate::progress::ProgressSnapshot;
use crate::remote::{ProgressRemote, ProgressUpsert, RemoteProgressRecord};
use crate::sdk::{HttpClientConfig, RemoteConfig};

const SELECT_COLUMNS: &str = "user_id,level,score,email,updated_at";

/// upsert 请求体
#[derive(Debug, Serialize)]
struct UpsertBody<'a> {
    user_id: &'a str,
    level: u32,
    score: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

/// HTTP 远端进度服务
pub struct HttpProgressRemote {
    client: Client,
    base_url: String,
    api_key: String,
    table: String,
}

impl HttpProgressRemote {
    /// 创建新的 HTTP 远端服务
    pub fn new(remote: &RemoteConfig, config: &HttpClientConfig) -> Result<Self> {
        if remote.base_url.trim().is_empty() {
            return Err(UnscrambleError::Config("远端 base_url 不能为空".to_string()));
        }

        let mut builder = Client::builder().user_agent(crate::version::user_agent());

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| UnscrambleError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = remote.base_url.trim_end_matches('/').to_string();
        info!("✅ 远端进度服务已创建 (base_url: {}, table: {})", base_url, remote.table);

        Ok(Self {
            client,
            base_url,
            api_key: remote.api_key.clone(),
            table: remote.table.clone(),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    /// 附加 apikey 和用户 token；没有用户 token 时退回匿名 key
    fn authorize(&self, request: RequestBuilder, identity: &AccountIdentity) -> RequestBuilder {
        let token = identity.access_token.as_deref().unwrap_or(&self.api_key);
        request.header("apikey", &self.api_key).bearer_auth(token)
    }

    /// 非 2xx 转为 Service 错误
    async fn check_status(response: Response, action: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "无法读取错误信息".to_string());
        error!("❌ {}失败，HTTP 状态码: {}, 错误: {}", action, status, message);
        Err(UnscrambleError::Service {
            status: status.as_u16(),
            message,
        })
    }
}

fn transport_error(action: &str, e: reqwest::Error) -> UnscrambleError {
    UnscrambleError::NetworkUnavailable(format!("{}失败: {}", action, e))
}

#[async_trait]
impl ProgressRemote for HttpProgressRemote {
    async fn fetch(&self, identity: &AccountIdentity) -> Result<Option<ProgressSnapshot>> {
        let filter = format!("eq.{}", identity.account_id);
        let request = self
            .client
            .get(self.table_url())
            .query(&[("user_id", filter.as_str()), ("select", SELECT_COLUMNS)]);

        let response = self
            .authorize(request, identity)
            .send()
            .await
            .map_err(|e| transport_error("拉取进度", e))?;
        let response = Self::check_status(response, "拉取进度").await?;

        // 读响应体失败属于传输层，只有解析失败才算记录损坏
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error("读取进度响应", e))?;
        let rows: Vec<serde_json::Value> = serde_json::from_slice(&body)
            .map_err(|e| UnscrambleError::MalformedRemoteRecord(format!("解析响应失败: {}", e)))?;

        let Some(row) = rows.into_iter().next() else {
            debug!("远端没有进度记录: {}", identity.account_id);
            return Ok(None);
        };

        let snapshot = RemoteProgressRecord::from_value(row)?.into_snapshot(&identity.account_id)?;
        debug!("远端进度: {} -> {}", identity.account_id, snapshot);
        Ok(Some(snapshot))
    }

    async fn upsert(&self, identity: &AccountIdentity, progress: &ProgressUpsert) -> Result<()> {
        let body = UpsertBody {
            user_id: identity.account_id.as_str(),
            level: progress.level,
            score: progress.score,
            email: progress.email.as_deref(),
            updated_at: progress.updated_at,
        };

        let request = self
            .client
            .post(self.table_url())
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body);

        let response = self
            .authorize(request, identity)
            .send()
            .await
            .map_err(|e| transport_error("写入进度", e))?;
        Self::check_status(response, "写入进度").await?;

        info!(
            "✅ 进度已写入远端: {} LV.{} ({} pts)",
            identity.account_id, progress.level, progress.score
        );
        Ok(())
    }
}
