//! 调用路径错误
//!
//! 拦截器只记录日志后原样返回下游错误，`Invocation` 中的 `Status` 不做任何改写

use thiserror::Error;
use tonic::{Code, Status};

/// trace id 解析失败的原因
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceIdError {
    #[error("trace id header is missing")]
    Missing,

    #[error("trace id must be 32 hex characters, got {0}")]
    InvalidLength(usize),

    #[error("trace id contains non lowercase-hex characters")]
    InvalidHex,

    #[error("trace id must not be all zero")]
    AllZero,
}

/// 拦截器链错误
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    /// 调用上下文不是由入站请求派生，调用在发出前被终止
    #[error("failed to get request context: call is not bound to an inbound request")]
    MissingRequestContext,

    /// 入站调用缺少 trace id 或无法解码为 16 字节
    #[error("malformed trace id: {0}")]
    MalformedTraceId(#[from] TraceIdError),

    /// 元数据键或值不是合法的 ASCII 元数据
    #[error("invalid metadata {key}: {reason}")]
    InvalidMetadata { key: String, reason: String },

    /// 下游（网络或业务处理器）返回的错误
    #[error(transparent)]
    Invocation(#[from] Status),
}

impl RpcError {
    pub fn invalid_metadata(key: impl Into<String>, reason: impl ToString) -> Self {
        RpcError::InvalidMetadata {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// 映射后的 gRPC 状态码
    pub fn code(&self) -> Code {
        match self {
            RpcError::MissingRequestContext => Code::FailedPrecondition,
            RpcError::MalformedTraceId(_) => Code::InvalidArgument,
            RpcError::InvalidMetadata { .. } => Code::Internal,
            RpcError::Invocation(status) => status.code(),
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 只做分类，拦截器链本身从不重试
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Invocation(status) => matches!(
                status.code(),
                Code::Unavailable | Code::ResourceExhausted | Code::Aborted
            ),
            _ => false,
        }
    }
}

impl From<RpcError> for Status {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Invocation(status) => status,
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

/// 拦截器链结果类型
pub type RpcResult<T> = std::result::Result<T, RpcError>;
