use std::fmt::Debug;
use std::sync::Arc;

use super::{
    Chain, ClientTraceInterceptor, ContextRebindInterceptor, Interceptor, MetricInterceptor,
    MissingTraceIdPolicy, ServerTraceInterceptor,
};
use crate::telemetry::Telemetry;

/// 客户端组合拦截器
///
/// 无论 `with_*` 的调用顺序如何，构建出的链总是：上下文绑定 -> trace/日志。
pub struct ClientChainBuilder {
    context: Option<ContextRebindInterceptor>,
    tracing: Option<ClientTraceInterceptor>,
}

impl ClientChainBuilder {
    pub fn new() -> Self {
        Self {
            context: None,
            tracing: None,
        }
    }

    /// 客户端默认链：两个拦截器全部启用
    pub fn standard(telemetry: &Telemetry) -> Self {
        Self::new().with_context_rebind().with_tracing(telemetry)
    }

    pub fn with_context_rebind(mut self) -> Self {
        self.context = Some(ContextRebindInterceptor::new());
        self
    }

    pub fn with_tracing(mut self, telemetry: &Telemetry) -> Self {
        self.tracing = Some(ClientTraceInterceptor::new(telemetry));
        self
    }

    pub fn build<B, R>(self) -> Chain<B, R>
    where
        B: Send + 'static,
        R: Debug + Send + 'static,
    {
        // 按顺序装配拦截器
        let mut interceptors: Vec<Arc<dyn Interceptor<B, R>>> = Vec::with_capacity(2);

        if let Some(context) = self.context {
            interceptors.push(Arc::new(context));
        }

        if let Some(tracing) = self.tracing {
            interceptors.push(Arc::new(tracing));
        }

        Chain::new(interceptors)
    }
}

impl Default for ClientChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 服务端组合拦截器
///
/// 构建出的链总是：指标 -> trace/日志 -> 处理器。指标在最外层，保证每次尝试都被计数。
pub struct ServerChainBuilder {
    metrics: Option<MetricInterceptor>,
    tracing: Option<ServerTraceInterceptor>,
}

impl ServerChainBuilder {
    pub fn new() -> Self {
        Self {
            metrics: None,
            tracing: None,
        }
    }

    /// 服务端默认链：两个拦截器全部启用
    pub fn standard(telemetry: &Telemetry, policy: MissingTraceIdPolicy) -> Self {
        Self::new()
            .with_metrics(telemetry)
            .with_tracing(telemetry, policy)
    }

    pub fn with_metrics(mut self, telemetry: &Telemetry) -> Self {
        self.metrics = Some(MetricInterceptor::new(telemetry.metrics().clone()));
        self
    }

    pub fn with_tracing(mut self, telemetry: &Telemetry, policy: MissingTraceIdPolicy) -> Self {
        self.tracing = Some(ServerTraceInterceptor::new(telemetry, policy));
        self
    }

    pub fn build<B, R>(self) -> Chain<B, R>
    where
        B: Send + 'static,
        R: Debug + Send + 'static,
    {
        let mut interceptors: Vec<Arc<dyn Interceptor<B, R>>> = Vec::with_capacity(2);

        if let Some(metrics) = self.metrics {
            interceptors.push(Arc::new(metrics));
        }

        if let Some(tracing) = self.tracing {
            interceptors.push(Arc::new(tracing));
        }

        Chain::new(interceptors)
    }
}

impl Default for ServerChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}
