//! 日志初始化
//!
//! 安装 `tracing-subscriber` 的 fmt 订阅者，过滤规则取自 `RUST_LOG`，
//! 未设置时使用 [`DEFAULT_LOG_FILTER`]。`log` crate 的记录经 `tracing-log` 转发。

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` 未设置时的默认过滤规则
pub const DEFAULT_LOG_FILTER: &str = "info";

static INIT: Once = Once::new();

/// 初始化日志（可重复调用，只有第一次生效）
pub fn init_logger() {
    init_logger_with(DEFAULT_LOG_FILTER);
}

/// 以指定的默认过滤规则初始化日志，`RUST_LOG` 优先
pub fn init_logger_with(default_filter: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));

        // 其他组件可能已经安装了 logger / subscriber，此时保留它们
        let _ = tracing_log::LogTracer::init();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            tracing::debug!("Global tracing subscriber already set, keeping it");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_idempotent() {
        init_logger();
        init_logger();
        init_logger_with("debug");
        tracing::info!("logger initialised");
    }
}
