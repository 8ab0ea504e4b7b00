use std::fmt::Debug;

use async_trait::async_trait;
use opentelemetry::Context;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{CLIENT_COMPONENT, Call, Interceptor, Next, SERVER_COMPONENT};
use crate::error::{RpcError, RpcResult, TraceIdError};
use crate::metadata::TRACE_ID_KEY;
use crate::telemetry::{CLIENT_TRACER, SERVER_TRACER, SpanTracer, Telemetry, TraceId, remote_parent};

const CLIENT_NAME: &str = "log/trace interceptor";
const SERVER_NAME: &str = "server log/trace interceptor";

/// 客户端追踪拦截器
///
/// 以目标方法名启动 span，把 32 位十六进制 trace id 写入 `x-trace-id` 元数据，
/// 记录请求 / 应答或错误。span 在任何退出路径上都会结束。
#[derive(Clone)]
pub struct ClientTraceInterceptor {
    tracer: SpanTracer,
}

impl ClientTraceInterceptor {
    pub fn new(telemetry: &Telemetry) -> Self {
        Self {
            tracer: telemetry.tracer(CLIENT_TRACER),
        }
    }
}

#[async_trait]
impl<B, R> Interceptor<B, R> for ClientTraceInterceptor
where
    B: Send + 'static,
    R: Debug + Send + 'static,
{
    fn name(&self) -> &'static str {
        CLIENT_NAME
    }

    async fn intercept(&self, call: Call<B>, next: Next<'_, B, R>) -> RpcResult<R> {
        let method = call.method().to_owned();
        info!(component = CLIENT_COMPONENT, method = %method, "outgoing call");

        let span = self
            .tracer
            .start(call.context().trace_context(), method.clone());
        let trace_id = span.trace_id().to_hex();

        let mut call = call.attach(TRACE_ID_KEY, &trace_id)?;
        call.context_mut().set_trace_context(span.context().clone());

        match next.run(call).await {
            Ok(reply) => {
                info!(
                    component = CLIENT_COMPONENT,
                    method = %method,
                    trace_id = %trace_id,
                    reply = ?reply,
                    "got reply"
                );
                Ok(reply)
            }
            Err(err) => {
                span.record_error(&err);
                error!(
                    component = CLIENT_COMPONENT,
                    method = %method,
                    trace_id = %trace_id,
                    interceptor = CLIENT_NAME,
                    error = %err,
                    "failed to invoke"
                );
                Err(err)
            }
        }
    }
}

/// 入站调用缺少或携带非法 trace id 时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTraceIdPolicy {
    /// 记录告警并开启一条新的 trace，处理器照常执行
    #[default]
    FreshRoot,
    /// 返回 [`RpcError::MalformedTraceId`]，不调用处理器
    Reject,
}

/// 服务端追踪拦截器
///
/// 从入站元数据读取 trace id，重建只含 trace id 的父上下文，以完整方法名启动 span，
/// 记录入站调用与处理结果。处理器错误原样返回给传输层。
///
/// 调用上下文带有 [`ReplyLease`](crate::context::ReplyLease) 时，span 在应答体结束时才结束。
#[derive(Clone)]
pub struct ServerTraceInterceptor {
    tracer: SpanTracer,
    policy: MissingTraceIdPolicy,
}

impl ServerTraceInterceptor {
    pub fn new(telemetry: &Telemetry, policy: MissingTraceIdPolicy) -> Self {
        Self {
            tracer: telemetry.tracer(SERVER_TRACER),
            policy,
        }
    }

    pub fn policy(&self) -> MissingTraceIdPolicy {
        self.policy
    }

    fn parent_context(&self, method: &str, header: Option<&str>) -> RpcResult<Context> {
        let parsed = header
            .ok_or(TraceIdError::Missing)
            .and_then(TraceId::from_hex);

        match (parsed, self.policy) {
            (Ok(trace_id), _) => Ok(remote_parent(trace_id)),
            (Err(reason), MissingTraceIdPolicy::FreshRoot) => {
                warn!(
                    component = SERVER_COMPONENT,
                    method = %method,
                    reason = %reason,
                    "no usable incoming trace id, starting a new trace"
                );
                Ok(Context::new())
            }
            (Err(reason), MissingTraceIdPolicy::Reject) => {
                let err = RpcError::MalformedTraceId(reason);
                error!(
                    component = SERVER_COMPONENT,
                    method = %method,
                    interceptor = SERVER_NAME,
                    error = %err,
                    "rejecting call"
                );
                Err(err)
            }
        }
    }
}

#[async_trait]
impl<B, R> Interceptor<B, R> for ServerTraceInterceptor
where
    B: Send + 'static,
    R: Debug + Send + 'static,
{
    fn name(&self) -> &'static str {
        SERVER_NAME
    }

    async fn intercept(&self, mut call: Call<B>, next: Next<'_, B, R>) -> RpcResult<R> {
        let method = call.method().to_owned();
        info!(component = SERVER_COMPONENT, method = %method, "incoming call");

        let parent = self.parent_context(&method, call.read_first(TRACE_ID_KEY))?;
        let span = self.tracer.start(&parent, method.clone());
        let trace_id = span.trace_id();
        call.context_mut().set_trace_context(span.context().clone());
        let lease = call.context().reply_lease().cloned();

        let result = next.run(call).await;
        match &result {
            Ok(reply) => info!(
                component = SERVER_COMPONENT,
                method = %method,
                trace_id = %trace_id,
                reply = ?reply,
                "post proc message"
            ),
            Err(err) => {
                span.record_error(err);
                error!(
                    component = SERVER_COMPONENT,
                    method = %method,
                    trace_id = %trace_id,
                    interceptor = SERVER_NAME,
                    error = %err,
                    "handler failed"
                );
            }
        }

        // 流式应答：span 交给应答体，发送完毕时结束
        if let Some(lease) = lease {
            lease.hold(span);
        }
        result
    }
}
