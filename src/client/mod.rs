//! gRPC 客户端模块
//!
//! 提供客户端构建器：建立 `Channel` 并在其外层装配客户端拦截器链

mod service;

pub use service::{ClientChainService, NetworkInvoker};

use std::sync::Arc;
use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::interceptor::ClientChainBuilder;
use crate::telemetry::Telemetry;
use crate::tls::TlsMaterial;

/// 客户端构建器
pub struct ClientBuilder {
    telemetry: Arc<Telemetry>,
    address: String,
    connect_timeout: Duration,
    timeout: Option<Duration>,
    tls: Option<TlsMaterial>,
}

impl ClientBuilder {
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        Self {
            telemetry,
            address: "http://localhost:50051".to_string(),
            connect_timeout: Duration::from_secs(5),
            timeout: None,
            tls: None,
        }
    }

    /// 从配置创建，配置了 TLS 时读取证书文件
    pub fn from_config(telemetry: Arc<Telemetry>, config: &ClientConfig) -> Result<Self> {
        let tls = config.tls.as_ref().map(TlsMaterial::load).transpose()?;
        let scheme = if tls.is_some() { "https" } else { "http" };

        let mut builder = Self::new(telemetry)
            .address(format!("{}://{}:{}", scheme, config.host, config.port))
            .connect_timeout(config.connect_timeout());

        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(tls) = tls {
            builder = builder.tls(tls);
        }

        Ok(builder)
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = Some(tls);
        self
    }

    fn endpoint(&self) -> Result<Endpoint> {
        let mut endpoint =
            Endpoint::from_shared(self.address.clone())?.connect_timeout(self.connect_timeout);

        if let Some(timeout) = self.timeout {
            endpoint = endpoint.timeout(timeout);
        }
        if let Some(tls) = &self.tls {
            endpoint = endpoint.tls_config(tls.client_config()?)?;
        }

        Ok(endpoint)
    }

    fn wrap(self, channel: Channel) -> GrpcClient {
        let chain = ClientChainBuilder::standard(&self.telemetry).build();
        let service = ClientChainService::new(channel, chain);
        debug!(
            address = %self.address,
            interceptors = ?service.chain().names(),
            "grpc client ready"
        );

        GrpcClient {
            service,
            address: self.address,
        }
    }

    /// 立即建立连接
    pub async fn connect(self) -> Result<GrpcClient> {
        let channel = self.endpoint()?.connect().await?;
        Ok(self.wrap(channel))
    }

    /// 首次调用时才建立连接
    pub fn connect_lazy(self) -> Result<GrpcClient> {
        let channel = self.endpoint()?.connect_lazy();
        Ok(self.wrap(channel))
    }
}

/// gRPC 客户端
///
/// `service()` 返回的服务可直接传给 tonic 生成客户端的 `new`。
#[derive(Clone)]
pub struct GrpcClient {
    service: ClientChainService<Channel>,
    address: String,
}

impl GrpcClient {
    pub fn service(&self) -> ClientChainService<Channel> {
        self.service.clone()
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl std::fmt::Debug for GrpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcClient")
            .field("address", &self.address)
            .field("interceptors", &self.service.chain().names())
            .finish()
    }
}
