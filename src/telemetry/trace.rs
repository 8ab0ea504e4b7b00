//! Trace 上下文提供者
//!
//! - [`SpanTracer::start`]：以给定上下文为父，启动一个子 span
//! - [`reconstruct_context`]：接收端根据原始 trace id 重建父上下文
//!
//! 重建出的上下文只携带 trace id，不带父 span id，因此服务端 span 与发起端
//! span 同属一条 trace，但不是严格意义上的父子关系。

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use opentelemetry::trace::{
    Span, SpanContext, SpanId, Status as SpanStatus, TraceContextExt, TraceFlags,
    TraceId as OtelTraceId, TraceState, Tracer,
};
use opentelemetry::Context;
use opentelemetry_sdk::trace::SdkTracer;

use crate::error::TraceIdError;

/// 16 字节 trace id，线上以 32 个小写十六进制字符传输
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId([u8; 16]);

impl TraceId {
    /// 字节长度
    pub const LEN: usize = 16;
    /// 十六进制字符串长度
    pub const HEX_LEN: usize = 32;

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        TraceId(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    /// 从 32 位小写十六进制字符串解析
    pub fn from_hex(hex: &str) -> Result<Self, TraceIdError> {
        if hex.len() != Self::HEX_LEN {
            return Err(TraceIdError::InvalidLength(hex.len()));
        }
        if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(TraceIdError::InvalidHex);
        }

        let id = OtelTraceId::from_hex(hex).map_err(|_| TraceIdError::InvalidHex)?;
        if id == OtelTraceId::INVALID {
            return Err(TraceIdError::AllZero);
        }

        Ok(id.into())
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&OtelTraceId::from(*self), f)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TraceId").field(&self.to_string()).finish()
    }
}

impl FromStr for TraceId {
    type Err = TraceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<OtelTraceId> for TraceId {
    fn from(id: OtelTraceId) -> Self {
        TraceId(id.to_bytes())
    }
}

impl From<TraceId> for OtelTraceId {
    fn from(id: TraceId) -> Self {
        OtelTraceId::from_bytes(id.0)
    }
}

/// span 启动器，绑定到某个 tracer 作用域（"grpc client" / "grpc server"）
#[derive(Clone)]
pub struct SpanTracer {
    tracer: SdkTracer,
}

impl SpanTracer {
    pub(crate) fn new(tracer: SdkTracer) -> Self {
        Self { tracer }
    }

    /// 以 `parent` 为父上下文启动 span，只做内存分配，不阻塞
    pub fn start(&self, parent: &Context, name: impl Into<Cow<'static, str>>) -> ActiveSpan {
        let mut builder = self.tracer.span_builder(name);
        // 重建的父上下文没有 span id，显式沿用其 trace id
        let inherited = parent.span().span_context().trace_id();
        if inherited != OtelTraceId::INVALID {
            builder = builder.with_trace_id(inherited);
        }

        let span = self.tracer.build_with_context(builder, parent);
        let trace_id = TraceId::from(span.span_context().trace_id());

        ActiveSpan {
            cx: parent.with_span(span),
            trace_id,
            ended: false,
        }
    }
}

/// 作用域内的 span：显式 `end()` 或离开作用域（包括 panic 展开）时结束，且只结束一次
pub struct ActiveSpan {
    cx: Context,
    trace_id: TraceId,
    ended: bool,
}

impl ActiveSpan {
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// 携带本 span 的子上下文
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// 将 span 状态标记为错误
    pub fn record_error(&self, err: &dyn fmt::Display) {
        self.cx.span().set_status(SpanStatus::error(err.to_string()));
    }

    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.ended {
            self.ended = true;
            self.cx.span().end();
        }
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSpan")
            .field("trace_id", &self.trace_id)
            .field("ended", &self.ended)
            .finish()
    }
}

/// 根据十六进制 trace id 重建父上下文
pub fn reconstruct_context(trace_id_hex: &str) -> Result<Context, TraceIdError> {
    TraceId::from_hex(trace_id_hex).map(remote_parent)
}

/// 只携带 trace id 的远端父上下文（span id 无效，标记为已采样）
pub fn remote_parent(trace_id: TraceId) -> Context {
    let span_context = SpanContext::new(
        trace_id.into(),
        SpanId::INVALID,
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    Context::new().with_remote_span_context(span_context)
}
