//! 调用上下文
//!
//! 出站调用必须由一个仍在处理中的入站请求派生：[`CallContext`] 通过
//! [`RequestOrigin`] 能力交出入站请求的取消 / 截止时间作用域 [`RequestScope`]。
//! 不具备该能力的上下文会被上下文绑定拦截器拒绝。

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use opentelemetry::Context;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::metadata::MetadataMap;

use crate::metadata::{self, GRPC_TIMEOUT_KEY};

/// 入站请求的取消 / 截止时间作用域
#[derive(Debug, Clone)]
pub struct RequestScope {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestScope {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// 根据入站元数据中的 `grpc-timeout` 建立作用域
    pub fn from_metadata(metadata: &MetadataMap, cancellation: CancellationToken) -> Self {
        let scope = Self::new(cancellation);
        match metadata::first(metadata, GRPC_TIMEOUT_KEY).and_then(metadata::decode_timeout) {
            Some(timeout) => scope.with_timeout(timeout),
            None => scope,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// 能交出原始入站请求作用域的能力
pub trait RequestOrigin: Send + Sync + 'static {
    fn request_scope(&self) -> RequestScope;
}

impl RequestOrigin for RequestScope {
    fn request_scope(&self) -> RequestScope {
        self.clone()
    }
}

/// 应答租约：需要存活到应答体发送完毕的资源（服务端 span、请求作用域 guard）
///
/// 服务端 layer 在处理器返回应答头后取出这些资源，交给应答体持有；应答体读完或被丢弃时释放。
#[derive(Clone, Default)]
pub struct ReplyLease {
    held: Arc<Mutex<Vec<Box<dyn Send>>>>,
}

impl ReplyLease {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self, item: impl Send + 'static) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(item));
    }

    pub fn len(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn take(&self) -> Vec<Box<dyn Send>> {
        std::mem::take(&mut *self.held.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl fmt::Debug for ReplyLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyLease").field("held", &self.len()).finish()
    }
}

/// 一次调用携带的进程内上下文：trace 上下文 + 可选的入站请求来源
///
/// 通过 tonic / http 请求扩展在服务端处理器与出站客户端之间传递。
#[derive(Clone)]
pub struct CallContext {
    trace: Context,
    origin: Option<Arc<dyn RequestOrigin>>,
    lease: Option<ReplyLease>,
}

impl CallContext {
    /// 不属于任何入站请求的上下文
    pub fn detached() -> Self {
        Self {
            trace: Context::new(),
            origin: None,
            lease: None,
        }
    }

    pub fn from_origin(origin: impl RequestOrigin) -> Self {
        Self {
            trace: Context::new(),
            origin: Some(Arc::new(origin)),
            lease: None,
        }
    }

    /// 为一次入站调用建立上下文；返回的 guard 在调用结束（或被丢弃）时取消作用域
    pub fn accept(metadata: &MetadataMap) -> (Self, DropGuard) {
        let token = CancellationToken::new();
        let scope = RequestScope::from_metadata(metadata, token.clone());
        (Self::from_origin(scope), token.drop_guard())
    }

    pub fn with_trace_context(mut self, trace: Context) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_reply_lease(mut self, lease: ReplyLease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// 存在时，服务端 span 交由应答体持有，直到应答发送完毕
    pub fn reply_lease(&self) -> Option<&ReplyLease> {
        self.lease.as_ref()
    }

    pub fn set_trace_context(&mut self, trace: Context) {
        self.trace = trace;
    }

    pub fn trace_context(&self) -> &Context {
        &self.trace
    }

    pub fn origin(&self) -> Option<&Arc<dyn RequestOrigin>> {
        self.origin.as_ref()
    }

    pub fn request_scope(&self) -> Option<RequestScope> {
        self.origin.as_ref().map(|origin| origin.request_scope())
    }

    /// 从 tonic 请求扩展中取出上下文（服务端处理器中使用）
    pub fn from_request<T>(request: &tonic::Request<T>) -> Option<&CallContext> {
        request.extensions().get::<CallContext>()
    }

    /// 绑定到出站 tonic 请求
    pub fn attach_to<T>(&self, request: &mut tonic::Request<T>) {
        request.extensions_mut().insert(self.clone());
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::detached()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("has_origin", &self.origin.is_some())
            .field("has_reply_lease", &self.lease.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_context_has_no_scope() {
        assert!(CallContext::detached().request_scope().is_none());
        assert!(CallContext::default().origin().is_none());
    }

    #[tokio::test]
    async fn test_accept_reads_grpc_timeout() {
        let mut metadata = MetadataMap::new();
        metadata.insert(GRPC_TIMEOUT_KEY, "2S".parse().unwrap());

        let before = Instant::now();
        let (context, _guard) = CallContext::accept(&metadata);
        let deadline = context.request_scope().unwrap().deadline().unwrap();

        assert!(deadline >= before + Duration::from_secs(2));
        assert!(deadline <= Instant::now() + Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_accept_guard_cancels_scope_on_drop() {
        let (context, guard) = CallContext::accept(&MetadataMap::new());
        let scope = context.request_scope().unwrap();

        assert!(scope.deadline().is_none());
        assert!(!scope.is_cancelled());
        drop(guard);
        assert!(scope.is_cancelled());
    }

    #[test]
    fn test_reply_lease_hands_over_held_items() {
        let token = CancellationToken::new();
        let lease = ReplyLease::new();
        let context = CallContext::detached().with_reply_lease(lease.clone());

        context.reply_lease().unwrap().hold(token.clone().drop_guard());
        assert_eq!(lease.len(), 1);

        let held = lease.take();
        assert!(lease.is_empty());
        assert!(!token.is_cancelled());
        drop(held);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_tonic_request_extension_round_trip() {
        let context = CallContext::from_origin(RequestScope::new(CancellationToken::new()));
        let mut request = tonic::Request::new(());
        context.attach_to(&mut request);

        let restored = CallContext::from_request(&request).unwrap();
        assert!(restored.request_scope().is_some());
    }
}
