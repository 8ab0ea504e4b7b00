//! gRPC 拦截器模块
//!
//! 拦截器链按注册顺序执行：第一个注册的拦截器在最外层，进入时最先执行，
//! 返回时最后执行；最后一个拦截器之后是终端调用器（网络调用或业务处理器）。
//!
//! - 客户端：上下文绑定 -> trace/日志 -> 网络
//! - 服务端：指标 -> trace/日志 -> 处理器
//!
//! 顺序由 [`ClientChainBuilder`] / [`ServerChainBuilder`] 固定，调用方无法调整。

pub mod composite;
pub mod context;
pub mod metrics;
pub mod tracing;

pub use composite::{ClientChainBuilder, ServerChainBuilder};
pub use context::ContextRebindInterceptor;
pub use metrics::MetricInterceptor;
pub use self::tracing::{ClientTraceInterceptor, MissingTraceIdPolicy, ServerTraceInterceptor};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tonic::metadata::MetadataMap;

use crate::context::{CallContext, RequestScope};
use crate::error::RpcResult;
use crate::metadata;

/// 拦截器日志中的组件名
pub const CLIENT_COMPONENT: &str = "grpc client";
pub const SERVER_COMPONENT: &str = "grpc server";

/// 一次远程调用（出站或入站），每次调用创建，链执行完后丢弃
#[derive(Debug)]
pub struct Call<B> {
    method: String,
    metadata: MetadataMap,
    context: CallContext,
    deadline: Option<Instant>,
    message: B,
}

/// [`Call`] 拆解后的各部分
#[derive(Debug)]
pub struct CallParts<B> {
    pub method: String,
    pub metadata: MetadataMap,
    pub context: CallContext,
    pub deadline: Option<Instant>,
    pub message: B,
}

impl<B> Call<B> {
    pub fn new(method: impl Into<String>, message: B) -> Self {
        Self {
            method: method.into(),
            metadata: MetadataMap::new(),
            context: CallContext::detached(),
            deadline: None,
            message,
        }
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut CallContext {
        &mut self.context
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn message(&self) -> &B {
        &self.message
    }

    /// 追加出站元数据，返回新的调用；调用方原有的调用对象已被消费，不会被修改
    pub fn attach(mut self, key: &str, value: &str) -> RpcResult<Self> {
        metadata::append(&mut self.metadata, key, value)?;
        Ok(self)
    }

    /// 读取入站元数据中某个键的第一个值
    pub fn read_first(&self, key: &str) -> Option<&str> {
        metadata::first(&self.metadata, key)
    }

    /// 绑定到入站请求的作用域：截止时间取两者中更早的一个
    pub fn rebind(&mut self, scope: &RequestScope) {
        self.deadline = match (self.deadline, scope.deadline()) {
            (Some(own), Some(inbound)) => Some(own.min(inbound)),
            (own, inbound) => own.or(inbound),
        };
    }

    pub fn into_parts(self) -> CallParts<B> {
        CallParts {
            method: self.method,
            metadata: self.metadata,
            context: self.context,
            deadline: self.deadline,
            message: self.message,
        }
    }
}

/// 终端调用器：网络调用（客户端）或业务处理器（服务端）
#[async_trait]
pub trait Invoker<B, R>: Send + Sync {
    async fn invoke(&self, call: Call<B>) -> RpcResult<R>;
}

/// 闭包形式的调用器
pub struct InvokerFn<F>(F);

pub fn invoker_fn<F>(f: F) -> InvokerFn<F> {
    InvokerFn(f)
}

#[async_trait]
impl<B, R, F, Fut> Invoker<B, R> for InvokerFn<F>
where
    B: Send + 'static,
    R: Send + 'static,
    F: Fn(Call<B>) -> Fut + Send + Sync,
    Fut: Future<Output = RpcResult<R>> + Send,
{
    async fn invoke(&self, call: Call<B>) -> RpcResult<R> {
        (self.0)(call).await
    }
}

/// 拦截器：包裹“下一个调用器”，可在调用前后检查 / 修改上下文与元数据
///
/// 拦截器从不吞掉错误：记录日志后原样返回。
#[async_trait]
pub trait Interceptor<B, R>: Send + Sync {
    /// 拦截器标识，用于日志
    fn name(&self) -> &'static str;

    async fn intercept(&self, call: Call<B>, next: Next<'_, B, R>) -> RpcResult<R>;
}

/// 链中剩余部分：尚未执行的拦截器 + 终端调用器
pub struct Next<'a, B, R> {
    rest: &'a [Arc<dyn Interceptor<B, R>>],
    endpoint: &'a dyn Invoker<B, R>,
}

impl<'a, B, R> Next<'a, B, R>
where
    B: Send + 'static,
    R: Send + 'static,
{
    pub async fn run(self, call: Call<B>) -> RpcResult<R> {
        match self.rest.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    rest,
                    endpoint: self.endpoint,
                };
                head.intercept(call, next).await
            }
            None => self.endpoint.invoke(call).await,
        }
    }
}

/// 拦截器链，构造后顺序不可变，可在并发调用间共享
pub struct Chain<B, R> {
    interceptors: Arc<[Arc<dyn Interceptor<B, R>>]>,
}

impl<B, R> Chain<B, R>
where
    B: Send + 'static,
    R: Send + 'static,
{
    pub fn new(interceptors: Vec<Arc<dyn Interceptor<B, R>>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    /// 按执行顺序列出拦截器标识
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// 通过整条链执行一次调用
    pub async fn invoke(&self, call: Call<B>, endpoint: &dyn Invoker<B, R>) -> RpcResult<R> {
        Next {
            rest: &self.interceptors,
            endpoint,
        }
        .run(call)
        .await
    }
}

impl<B, R> Clone for Chain<B, R> {
    fn clone(&self) -> Self {
        Self {
            interceptors: Arc::clone(&self.interceptors),
        }
    }
}
