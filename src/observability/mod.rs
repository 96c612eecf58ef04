//! 可观测性：tracing 订阅器初始化，由宿主程序启动时调用一次

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认日志级别；RUST_LOG 优先
pub const DEFAULT_FILTER: &str = "info";

/// 安装 registry + EnvFilter + fmt 层；重复调用时返回 false 且不替换已有订阅器
pub fn init() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        assert!(!init());
    }
}
