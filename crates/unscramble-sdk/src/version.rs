//! SDK 版本信息
//!
//! **SDK Version** → Cargo.toml（唯一权威源）

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 包名，用于 HTTP User-Agent
pub const SDK_NAME: &str = env!("CARGO_PKG_NAME");

/// HTTP 请求使用的 User-Agent
pub fn user_agent() -> String {
    format!("{}/{}", SDK_NAME, SDK_VERSION)
}
