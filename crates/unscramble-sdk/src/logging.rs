//! 日志初始化

use tracing::Level;

/// 安装 fmt 日志订阅器
///
/// 调试模式输出 DEBUG 级别，否则 INFO。宿主已安装过订阅器时返回 false，不覆盖。
pub fn init(debug_mode: bool) -> bool {
    let level = if debug_mode { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init(true);
        assert!(!init(false));
    }
}
