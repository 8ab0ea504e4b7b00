//! gRPC 服务端模块
//!
//! 提供服务器构建器：生成已装配服务端拦截器链的 tonic `Server`

mod layer;

pub use layer::{HandlerInvoker, ServerChainLayer, ServerChainService};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Server;
use tower::layer::util::{Identity, Stack};
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::interceptor::MissingTraceIdPolicy;
use crate::telemetry::Telemetry;
use crate::tls::TlsMaterial;

/// 装配了拦截器链的 tonic 服务器
pub type InstrumentedServer = Server<Stack<ServerChainLayer, Identity>>;

/// 服务器构建器
pub struct ServerBuilder {
    telemetry: Arc<Telemetry>,
    addr: SocketAddr,
    max_concurrent_streams: Option<u32>,
    tcp_nodelay: bool,
    tcp_keepalive: Option<Duration>,
    missing_trace_id: MissingTraceIdPolicy,
    tls: Option<TlsMaterial>,
}

impl ServerBuilder {
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        Self {
            telemetry,
            addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            max_concurrent_streams: None,
            tcp_nodelay: true,
            tcp_keepalive: Some(Duration::from_secs(60)),
            missing_trace_id: MissingTraceIdPolicy::default(),
            tls: None,
        }
    }

    /// 从配置创建，配置了 TLS 时读取证书文件
    pub fn from_config(telemetry: Arc<Telemetry>, config: &ServerConfig) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.address, config.port)
            .parse()
            .map_err(|e| Error::config(format!("invalid server address: {}", e)))?;

        let mut builder = Self::new(telemetry)
            .addr(addr)
            .tcp_nodelay(config.tcp_nodelay)
            .missing_trace_id(config.missing_trace_id);

        builder.max_concurrent_streams = config.max_concurrent_streams;
        builder.tcp_keepalive = config.tcp_keepalive_secs.map(Duration::from_secs);

        if let Some(tls) = &config.tls {
            builder = builder.tls(TlsMaterial::load(tls)?);
        }

        Ok(builder)
    }

    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = Some(max);
        self
    }

    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    pub fn tcp_keepalive(mut self, keepalive: Duration) -> Self {
        self.tcp_keepalive = Some(keepalive);
        self
    }

    /// 入站请求缺少或携带非法 trace id 时的处理策略
    pub fn missing_trace_id(mut self, policy: MissingTraceIdPolicy) -> Self {
        self.missing_trace_id = policy;
        self
    }

    pub fn tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn get_addr(&self) -> SocketAddr {
        self.addr
    }

    /// 构建服务器，之后通过 `add_service` 注册服务并 `serve(get_addr())`
    pub fn build(self) -> Result<InstrumentedServer> {
        let mut server = Server::builder();

        if let Some(tls) = &self.tls {
            server = server.tls_config(tls.server_config()?)?;
        }

        server = server
            .max_concurrent_streams(self.max_concurrent_streams)
            .tcp_nodelay(self.tcp_nodelay)
            .tcp_keepalive(self.tcp_keepalive);

        let layer = ServerChainLayer::new(&self.telemetry, self.missing_trace_id);
        debug!(
            addr = %self.addr,
            interceptors = ?layer.chain().names(),
            policy = ?self.missing_trace_id,
            "grpc server ready"
        );

        Ok(server.layer(layer))
    }
}
