use async_trait::async_trait;

use super::{Call, Interceptor, Next};
use crate::error::RpcResult;
use crate::metrics::GrpcMetrics;

/// 指标拦截器（服务端最外层）
///
/// 在调用处理器之前无条件递增按方法分组的请求计数，失败的调用同样计为一次尝试。
/// 自身从不失败，处理器错误原样透传。
#[derive(Debug, Clone)]
pub struct MetricInterceptor {
    metrics: GrpcMetrics,
}

impl MetricInterceptor {
    pub fn new(metrics: GrpcMetrics) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &GrpcMetrics {
        &self.metrics
    }
}

#[async_trait]
impl<B, R> Interceptor<B, R> for MetricInterceptor
where
    B: Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &'static str {
        "metric interceptor"
    }

    async fn intercept(&self, call: Call<B>, next: Next<'_, B, R>) -> RpcResult<R> {
        self.metrics.record_request(call.method());
        next.run(call).await
    }
}
