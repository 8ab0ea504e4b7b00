//! 指标收集模块

use prometheus::{IntCounterVec, Opts, Registry};

use crate::error::Result;

/// gRPC 服务端请求计数
pub const GRPC_REQUESTS_TOTAL: &str = "grpc_requests_total";

/// gRPC 指标
///
/// 计数器按 `method` 标签分组，进程生命周期内单调递增；
/// 递增为原子操作，并发调用无需外部同步。
#[derive(Clone)]
pub struct GrpcMetrics {
    requests_total: IntCounterVec,
}

impl GrpcMetrics {
    pub fn new() -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new(GRPC_REQUESTS_TOTAL, "Total number of gRPC requests"),
            &["method"],
        )?;

        Ok(Self { requests_total })
    }

    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.requests_total.clone()))?;
        Ok(())
    }

    /// 记录一次请求（无论成功失败）
    pub fn record_request(&self, method: &str) {
        self.requests_total.with_label_values(&[method]).inc();
    }

    /// 读取某个方法的累计请求数
    pub fn requests_total(&self, method: &str) -> u64 {
        self.requests_total.with_label_values(&[method]).get()
    }
}

impl std::fmt::Debug for GrpcMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcMetrics").finish_non_exhaustive()
    }
}
