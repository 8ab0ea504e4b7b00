//! http 层与拦截器链之间的适配
//!
//! 客户端适配器与服务端 layer 共用：请求头拆分为元数据通道，终端调用器通过
//! 内层 tower 服务完成调用，并把 trailers-only 的错误响应还原为 `Status`。

use std::fmt;

use tokio::sync::Mutex;
use tonic::body::Body;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};
use tower::{BoxError, Service, ServiceExt};

use crate::error::{RpcError, RpcResult};

/// 链路中传递的 http 应答，日志中只输出状态与头部
///
/// 拦截器看到的是应答头：只有 trailers-only 应答（`grpc-status` 在头部）会被识别为错误。
/// 先发头部、在 trailers 中给出错误状态的应答在链路上视为成功，状态留给读取应答体的一方。
pub struct GrpcReply(http::Response<Body>);

impl GrpcReply {
    pub fn new(response: http::Response<Body>) -> Self {
        Self(response)
    }

    pub fn response(&self) -> &http::Response<Body> {
        &self.0
    }

    pub fn into_inner(self) -> http::Response<Body> {
        self.0
    }
}

impl fmt::Debug for GrpcReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcReply")
            .field("status", &self.0.status())
            .field("headers", self.0.headers())
            .finish_non_exhaustive()
    }
}

/// 拆分 http 请求：(方法全名, 元数据, 去掉头部的请求)
pub(crate) fn split_request(
    request: http::Request<Body>,
) -> (String, MetadataMap, http::Request<Body>) {
    let (mut parts, body) = request.into_parts();
    let method = parts.uri.path().to_owned();
    let metadata = MetadataMap::from_headers(std::mem::take(&mut parts.headers));

    (method, metadata, http::Request::from_parts(parts, body))
}

/// 通过内层服务完成调用，等待到应答头为止
pub(crate) async fn dispatch<S>(
    inner: &Mutex<S>,
    request: http::Request<Body>,
) -> RpcResult<GrpcReply>
where
    S: Service<http::Request<Body>, Response = http::Response<Body>> + Send,
    S::Future: Send,
    S::Error: Into<BoxError>,
{
    let future = {
        let mut service = inner.lock().await;
        service.ready().await.map_err(into_rpc_error)?;
        service.call(request)
    };

    let response = future.await.map_err(into_rpc_error)?;
    match Status::from_header_map(response.headers()) {
        Some(status) if status.code() != Code::Ok => Err(status.into()),
        _ => Ok(GrpcReply(response)),
    }
}

fn into_rpc_error<E: Into<BoxError>>(err: E) -> RpcError {
    Status::from_error(err.into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_exposes_response_headers() {
        let reply = GrpcReply::new(Status::not_found("no such order").into_http());

        assert_eq!(reply.response().status(), http::StatusCode::OK);
        assert_eq!(reply.response().headers().get("grpc-status").unwrap(), "5");

        let debug = format!("{reply:?}");
        assert!(debug.contains("GrpcReply"));
        assert!(!debug.contains("body"));
    }

    #[test]
    fn test_split_request_moves_headers_into_metadata() {
        let request = http::Request::builder()
            .uri("http://localhost/orders.Orders/Get")
            .header("x-trace-id", "4bf92f3577b34da6a3ce929d0e0e4736")
            .body(Body::empty())
            .unwrap();

        let (method, metadata, message) = split_request(request);

        assert_eq!(method, "/orders.Orders/Get");
        assert_eq!(
            metadata.get("x-trace-id").unwrap(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert!(message.headers().is_empty());
    }
}
