//! 可观测性上下文
//!
//! [`Telemetry`] 在进程启动时创建一次，以 `Arc` 的形式传入客户端 / 服务端拦截器链，
//! 进程退出时调用 [`Telemetry::shutdown`] 关闭一次。不使用全局 TracerProvider。

pub mod exporter;
pub mod logging;
pub mod trace;

pub use exporter::build_span_exporter;
pub use logging::{LogFormat, init_logging};
pub use trace::{ActiveSpan, SpanTracer, TraceId, reconstruct_context, remote_parent};

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;

use crate::config::{ServiceConfig, TelemetryConfig};
use crate::error::{Error, Result};
use crate::metrics::GrpcMetrics;

/// 客户端 tracer 作用域
pub const CLIENT_TRACER: &str = "grpc client";
/// 服务端 tracer 作用域
pub const SERVER_TRACER: &str = "grpc server";

/// 进程级遥测上下文：TracerProvider + 指标注册表
pub struct Telemetry {
    provider: SdkTracerProvider,
    registry: Registry,
    metrics: GrpcMetrics,
}

impl Telemetry {
    /// 按配置初始化：OTLP 批量导出 + `service.name` 资源
    pub fn init(service: &ServiceConfig, config: &TelemetryConfig) -> Result<Self> {
        let resource = Resource::builder()
            .with_service_name(service.name.clone())
            .build();

        let mut builder = SdkTracerProvider::builder().with_resource(resource);
        if config.enabled {
            let exporter = build_span_exporter(config)?;
            builder = builder.with_batch_exporter(exporter);
        }

        info!(
            service = %service.name,
            version = %service.version,
            exporter_enabled = config.enabled,
            endpoint = %config.endpoint,
            "Telemetry initialized"
        );

        Self::with_provider(builder.build())
    }

    /// 使用调用方构建好的 TracerProvider
    pub fn with_provider(provider: SdkTracerProvider) -> Result<Self> {
        let registry = Registry::new();
        let metrics = GrpcMetrics::new()?;
        metrics.register(&registry)?;

        Ok(Self {
            provider,
            registry,
            metrics,
        })
    }

    /// 获取指定作用域的 span 启动器
    pub fn tracer(&self, scope: &'static str) -> SpanTracer {
        SpanTracer::new(self.provider.tracer(scope))
    }

    pub fn metrics(&self) -> &GrpcMetrics {
        &self.metrics
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 以 Prometheus 文本格式导出指标
    pub fn render_metrics(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::telemetry(e.to_string()))
    }

    /// 刷新并关闭 TracerProvider
    pub fn shutdown(&self) -> Result<()> {
        self.provider
            .shutdown()
            .map_err(|e| Error::telemetry(format!("failed to shutdown tracer provider: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ServiceConfig {
        ServiceConfig {
            name: "orders".to_string(),
            version: "1.0.0".to_string(),
        }
    }

    #[test]
    fn test_init_without_exporter() {
        let config = TelemetryConfig {
            enabled: false,
            ..TelemetryConfig::default()
        };
        let telemetry = Telemetry::init(&service(), &config).unwrap();

        telemetry.metrics().record_request("/orders.Orders/Get");
        let text = telemetry.render_metrics().unwrap();

        assert!(text.contains(GRPC_REQUESTS_TOTAL_LINE));
        assert!(telemetry.shutdown().is_ok());
    }

    #[test]
    fn test_registry_exposes_request_counter() {
        let provider = SdkTracerProvider::builder().build();
        let telemetry = Telemetry::with_provider(provider).unwrap();
        telemetry.metrics().record_request("/orders.Orders/Get");

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&telemetry.registry().gather(), &mut buffer)
            .unwrap();

        assert!(String::from_utf8(buffer).unwrap().contains(GRPC_REQUESTS_TOTAL_LINE));
    }

    #[test]
    fn test_empty_endpoint_is_rejected() {
        let config = TelemetryConfig {
            endpoint: "  ".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(matches!(
            Telemetry::init(&service(), &config),
            Err(Error::Config(_))
        ));
    }

    const GRPC_REQUESTS_TOTAL_LINE: &str = "grpc_requests_total{method=\"/orders.Orders/Get\"} 1";
}
