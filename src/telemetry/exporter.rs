//! span 导出器

use std::time::Duration;

use opentelemetry_otlp::{SpanExporter, WithExportConfig};

use crate::config::TelemetryConfig;
use crate::error::{Error, Result};

/// 构建 OTLP/HTTP span 导出器
pub fn build_span_exporter(config: &TelemetryConfig) -> Result<SpanExporter> {
    if config.endpoint.trim().is_empty() {
        return Err(Error::config("telemetry endpoint must not be empty"));
    }

    SpanExporter::builder()
        .with_http()
        .with_endpoint(config.endpoint.clone())
        .with_timeout(Duration::from_secs(config.export_timeout_secs))
        .build()
        .map_err(|e| Error::telemetry(format!("failed to build span exporter: {e}")))
}
