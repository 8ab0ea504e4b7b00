//! Flare RPC Telemetry
//!
//! gRPC client / server interceptor chains for distributed tracing, structured logging
//! and request metrics. A trace id travels in the `x-trace-id` metadata entry, the
//! server rebuilds the remote parent context from it, and every inbound call is counted
//! per method.

pub mod config;
pub mod context;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod telemetry;
pub mod tls;

// gRPC 拦截器与传输层
pub mod client;
pub mod interceptor;
pub mod server;
pub mod transport;

// Re-exports
pub use config::{
    ClientConfig, Config, LoggingConfig, ServerConfig, ServiceConfig, TelemetryConfig, TlsConfig,
};
pub use context::{CallContext, ReplyLease, RequestOrigin, RequestScope};
pub use error::{Error, Result, RpcError, RpcResult, TraceIdError};
pub use metrics::GrpcMetrics;
pub use telemetry::{ActiveSpan, SpanTracer, Telemetry, TraceId, init_logging, reconstruct_context};
pub use tls::TlsMaterial;

// gRPC 相关 re-exports
pub use client::{ClientBuilder, ClientChainService, GrpcClient};
pub use interceptor::{
    Call, Chain, ClientChainBuilder, ClientTraceInterceptor, ContextRebindInterceptor,
    Interceptor, Invoker, MetricInterceptor, MissingTraceIdPolicy, Next, ServerChainBuilder,
    ServerTraceInterceptor, invoker_fn,
};
pub use server::{InstrumentedServer, ServerBuilder, ServerChainLayer, ServerChainService};
pub use transport::GrpcReply;
