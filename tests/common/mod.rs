//! 集成测试公共工具：内存 span 导出器 + 独立的遥测上下文
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flare_rpc_telemetry::Telemetry;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use tonic::metadata::MetadataMap;

pub const TRACE_ID_HEX: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

pub struct Harness {
    pub telemetry: Arc<Telemetry>,
    exporter: InMemorySpanExporter,
}

impl Harness {
    pub fn new() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let telemetry = Telemetry::with_provider(provider).expect("telemetry");

        Self {
            telemetry: Arc::new(telemetry),
            exporter,
        }
    }

    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.exporter.get_finished_spans().expect("finished spans")
    }

    pub fn requests_total(&self, method: &str) -> u64 {
        self.telemetry.metrics().requests_total(method)
    }
}

/// 记录调用次数
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn metadata_with_trace_id(value: &str) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    metadata.insert("x-trace-id", value.parse().expect("ascii value"));
    metadata
}

pub fn is_lower_hex_32(value: &str) -> bool {
    value.len() == 32 && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}
