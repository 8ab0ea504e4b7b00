//! 运行客户端拦截器链的 tower 服务

use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tonic::Status;
use tonic::body::Body;
use tower::{BoxError, Service};

use crate::context::CallContext;
use crate::error::RpcResult;
use crate::interceptor::{Call, CallParts, Chain, Invoker};
use crate::metadata;
use crate::transport::{GrpcReply, dispatch, split_request};

/// 包裹 `Channel` 的客户端服务，可直接交给 tonic 生成的客户端使用
///
/// 出站请求的 [`CallContext`] 从请求扩展中读取（见 [`CallContext::attach_to`]）；
/// 链返回的错误以 `Status` 的形式交给 tonic，内容保持不变。
pub struct ClientChainService<S> {
    inner: S,
    chain: Chain<http::Request<Body>, GrpcReply>,
}

impl<S> ClientChainService<S> {
    pub fn new(inner: S, chain: Chain<http::Request<Body>, GrpcReply>) -> Self {
        Self { inner, chain }
    }

    pub fn chain(&self) -> &Chain<http::Request<Body>, GrpcReply> {
        &self.chain
    }
}

impl<S: Clone> Clone for ClientChainService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            chain: self.chain.clone(),
        }
    }
}

impl<S> Service<http::Request<Body>> for ClientChainService<S>
where
    S: Service<http::Request<Body>, Response = http::Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
{
    type Response = http::Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // 内层服务的就绪检查在网络调用器中完成
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        let endpoint = NetworkInvoker::new(self.inner.clone());
        let chain = self.chain.clone();

        Box::pin(async move {
            let (method, metadata, mut message) = split_request(request);
            let context = message
                .extensions_mut()
                .remove::<CallContext>()
                .unwrap_or_default();

            let call = Call::new(method, message)
                .with_metadata(metadata)
                .with_context(context);

            chain
                .invoke(call, &endpoint)
                .await
                .map(GrpcReply::into_inner)
                .map_err(|err| Box::new(Status::from(err)) as BoxError)
        })
    }
}

/// 终端调用器：把截止时间写入 `grpc-timeout` 后发往网络
pub struct NetworkInvoker<S> {
    inner: Mutex<S>,
}

impl<S> NetworkInvoker<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }
}

#[async_trait]
impl<S> Invoker<http::Request<Body>, GrpcReply> for NetworkInvoker<S>
where
    S: Service<http::Request<Body>, Response = http::Response<Body>> + Send,
    S::Future: Send,
    S::Error: Into<BoxError>,
{
    async fn invoke(&self, call: Call<http::Request<Body>>) -> RpcResult<GrpcReply> {
        let CallParts {
            metadata: mut outgoing,
            deadline,
            message,
            ..
        } = call.into_parts();

        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Status::deadline_exceeded("deadline exceeded before dispatch").into());
            }
            metadata::tighten_timeout(&mut outgoing, remaining);
        }

        let (mut parts, body) = message.into_parts();
        parts.headers = outgoing.into_headers();

        dispatch(&self.inner, http::Request::from_parts(parts, body)).await
    }
}
