use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use http_body::{Body as HttpBody, Frame, SizeHint};
use tokio::sync::Mutex;
use tonic::Status;
use tonic::body::Body;
use tower::{BoxError, Layer, Service};

use crate::context::{CallContext, ReplyLease};
use crate::error::RpcResult;
use crate::interceptor::{
    Call, CallParts, Chain, Invoker, MissingTraceIdPolicy, ServerChainBuilder,
};
use crate::telemetry::Telemetry;
use crate::transport::{GrpcReply, dispatch, split_request};

/// 服务端拦截器链层
#[derive(Clone)]
pub struct ServerChainLayer {
    chain: Chain<http::Request<Body>, GrpcReply>,
}

impl ServerChainLayer {
    pub fn new(telemetry: &Telemetry, policy: MissingTraceIdPolicy) -> Self {
        Self {
            chain: ServerChainBuilder::standard(telemetry, policy).build(),
        }
    }

    pub fn from_chain(chain: Chain<http::Request<Body>, GrpcReply>) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &Chain<http::Request<Body>, GrpcReply> {
        &self.chain
    }
}

impl<S> Layer<S> for ServerChainLayer {
    type Service = ServerChainService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ServerChainService {
            inner,
            chain: self.chain.clone(),
        }
    }
}

/// 在处理器外层运行服务端拦截器链
///
/// 每个入站调用都会创建自己的请求作用域。作用域 guard 与服务端 span 随应答体一起交出，
/// 应答体读完或被丢弃时才取消作用域、结束 span，流式应答因此覆盖整个流。处理器 panic
/// 或调用被提前丢弃时二者立即释放。链返回的错误转换为 gRPC 错误响应，该服务自身从不失败。
pub struct ServerChainService<S> {
    inner: S,
    chain: Chain<http::Request<Body>, GrpcReply>,
}

impl<S: Clone> Clone for ServerChainService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            chain: self.chain.clone(),
        }
    }
}

impl<S> Service<http::Request<Body>> for ServerChainService<S>
where
    S: Service<http::Request<Body>, Response = http::Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
{
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        let endpoint = HandlerInvoker::new(self.inner.clone());
        let chain = self.chain.clone();

        Box::pin(async move {
            let (method, metadata, message) = split_request(request);
            let (context, scope_guard) = CallContext::accept(&metadata);
            let lease = ReplyLease::new();

            let call = Call::new(method, message)
                .with_metadata(metadata)
                .with_context(context.with_reply_lease(lease.clone()));

            let response = match chain.invoke(call, &endpoint).await {
                Ok(reply) => reply.into_inner(),
                Err(err) => Status::from(err).into_http(),
            };

            // span 先于作用域释放
            let mut held = lease.take();
            held.push(Box::new(scope_guard));
            Ok(response.map(|body| Body::new(LeasedBody::new(body, held))))
        })
    }
}

/// 持有租约资源的应答体，流结束或被丢弃时释放
///
/// 经 `Body::new` 包装，空应答体（如 trailers-only 错误）在构造时即被丢弃并释放。
struct LeasedBody {
    inner: Body,
    held: Option<Vec<Box<dyn Send>>>,
}

impl LeasedBody {
    fn new(inner: Body, held: Vec<Box<dyn Send>>) -> Self {
        Self {
            inner,
            held: Some(held),
        }
    }
}

impl HttpBody for LeasedBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            this.held = None;
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// 终端调用器：把调用上下文放入请求扩展后交给处理器
pub struct HandlerInvoker<S> {
    inner: Mutex<S>,
}

impl<S> HandlerInvoker<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }
}

#[async_trait]
impl<S> Invoker<http::Request<Body>, GrpcReply> for HandlerInvoker<S>
where
    S: Service<http::Request<Body>, Response = http::Response<Body>> + Send,
    S::Future: Send,
    S::Error: Into<BoxError>,
{
    async fn invoke(&self, call: Call<http::Request<Body>>) -> RpcResult<GrpcReply> {
        let CallParts {
            metadata,
            context,
            message,
            ..
        } = call.into_parts();

        let (mut parts, body) = message.into_parts();
        parts.headers = metadata.into_headers();
        parts.extensions.insert(context);

        dispatch(&self.inner, http::Request::from_parts(parts, body)).await
    }
}
