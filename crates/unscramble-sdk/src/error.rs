use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnscrambleError {
    /// 离线或传输层失败（连接失败、超时等）
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),
    /// 远端服务返回失败
    #[error("Service error [{status}]: {message}")]
    Service { status: u16, message: String },
    /// 远端记录缺少或含非法的 level / score
    #[error("Malformed remote record: {0}")]
    MalformedRemoteRecord(String),
    /// 在途调用返回时会话已切换
    #[error("Stale apply discarded: {0}")]
    StaleApply(String),
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Not signed in")]
    NotSignedIn,
}

impl From<serde_json::Error> for UnscrambleError {
    fn from(error: serde_json::Error) -> Self {
        UnscrambleError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for UnscrambleError {
    fn from(error: std::io::Error) -> Self {
        UnscrambleError::IO(error.to_string())
    }
}

impl From<sled::Error> for UnscrambleError {
    fn from(error: sled::Error) -> Self {
        UnscrambleError::KvStore(error.to_string())
    }
}

impl UnscrambleError {
    /// 是否属于远端失败（网络或服务端），这类错误只记录日志、等待下次触发重试
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            UnscrambleError::NetworkUnavailable(_) | UnscrambleError::Service { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, UnscrambleError>;
