//! Flare RPC Telemetry 错误处理模块
//!
//! 分为两类：
//! - [`RpcError`]：拦截器链调用路径上的错误，最终映射为 gRPC `Status`
//! - [`Error`]：进程启动阶段（配置、TLS、遥测初始化）的错误

pub mod rpc;

pub use rpc::{RpcError, RpcResult, TraceIdError};

use thiserror::Error;

/// 启动 / 装配阶段的统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// IO 错误（读取配置文件、证书等）
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 传输层错误（地址、TLS 配置、连接）
    #[error("传输层错误: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// 遥测初始化或关闭失败
    #[error("遥测错误: {0}")]
    Telemetry(String),

    /// 指标注册失败
    #[error("指标错误: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// 创建遥测错误
    pub fn telemetry(msg: impl Into<String>) -> Self {
        Error::Telemetry(msg.into())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
