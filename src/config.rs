use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::interceptor::MissingTraceIdPolicy;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub client: Option<ClientConfig>,
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
}

/// 下游 gRPC 服务连接配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 单次调用超时，不配置时完全由入站请求的 deadline 决定
    pub timeout_secs: Option<u64>,
    pub tls: Option<TlsConfig>,
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub max_concurrent_streams: Option<u32>,
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,
    pub tcp_keepalive_secs: Option<u64>,
    #[serde(default)]
    pub missing_trace_id: MissingTraceIdPolicy,
    pub tls: Option<TlsConfig>,
}

/// TLS 证书材料路径（PEM）
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    /// 对端 CA 证书：客户端用于校验服务端，服务端用于校验客户端证书
    pub ca_cert: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    /// 客户端校验的服务端域名
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_otlp_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_export_timeout_secs")]
    pub export_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_otlp_endpoint(),
            export_timeout_secs: default_export_timeout_secs(),
        }
    }
}

/// 日志配置，与 `APP_ENV` / `LOG_LEVEL` 环境变量对应
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// prod -> JSON，dev -> 带源码位置的文本，其它 -> 默认格式
    #[serde(default)]
    pub env: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env: String::new(),
            level: default_log_level(),
        }
    }
}

fn default_version() -> String {
    "0.0.0".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4318/v1/traces".to_string()
}

fn default_export_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "debug".to_string()
}

pub const ENV_APP_ENV: &str = "APP_ENV";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT";

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// 用环境变量覆盖配置，空值忽略
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(env) = lookup(ENV_APP_ENV) {
            self.logging.env = env;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(endpoint) = lookup(ENV_OTLP_ENDPOINT) {
            self.telemetry.endpoint = endpoint;
        }
    }
}
