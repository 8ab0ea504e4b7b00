//! 日志初始化

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// 生产环境：JSON
    Json,
    /// 开发环境：文本 + 源码位置
    Text,
    /// 未指定环境
    Default,
}

impl LogFormat {
    pub fn from_env_name(env: &str) -> Self {
        match env.trim().to_ascii_lowercase().as_str() {
            "prod" => LogFormat::Json,
            "dev" => LogFormat::Text,
            _ => LogFormat::Default,
        }
    }
}

/// 解析日志级别，无法识别时回退到 debug
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "debug",
    }
}

/// 初始化全局 tracing subscriber，`RUST_LOG` 优先于配置的级别
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match LogFormat::from_env_name(&config.env) {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Default => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    result.map_err(|e| Error::telemetry(format!("failed to init logging: {e}")))
}
