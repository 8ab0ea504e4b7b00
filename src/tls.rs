//! 传输层安全材料

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::config::TlsConfig;
use crate::error::{Error, Result};

/// PEM 格式的证书材料
#[derive(Clone, Default)]
pub struct TlsMaterial {
    ca_cert: Option<Vec<u8>>,
    cert: Option<Vec<u8>>,
    key: Option<Vec<u8>>,
    domain: Option<String>,
}

impl TlsMaterial {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从配置中的文件路径读取
    pub fn load(config: &TlsConfig) -> Result<Self> {
        let read = |path: &Option<std::path::PathBuf>| -> Result<Option<Vec<u8>>> {
            path.as_ref().map(std::fs::read).transpose().map_err(Error::from)
        };

        Ok(Self {
            ca_cert: read(&config.ca_cert)?,
            cert: read(&config.cert)?,
            key: read(&config.key)?,
            domain: config.domain.clone(),
        })
    }

    pub fn with_ca_cert(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_cert = Some(pem.into());
        self
    }

    pub fn with_identity(
        mut self,
        cert_pem: impl Into<Vec<u8>>,
        key_pem: impl Into<Vec<u8>>,
    ) -> Self {
        self.cert = Some(cert_pem.into());
        self.key = Some(key_pem.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    fn identity(&self) -> Result<Option<Identity>> {
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => Ok(Some(Identity::from_pem(cert, key))),
            (None, None) => Ok(None),
            _ => Err(Error::config("tls cert and key must be configured together")),
        }
    }

    /// 客户端 TLS：CA 校验服务端，可选客户端证书（mTLS）
    pub fn client_config(&self) -> Result<ClientTlsConfig> {
        let mut tls = ClientTlsConfig::new();

        if let Some(ca) = &self.ca_cert {
            tls = tls.ca_certificate(Certificate::from_pem(ca));
        }
        if let Some(identity) = self.identity()? {
            tls = tls.identity(identity);
        }
        if let Some(domain) = &self.domain {
            tls = tls.domain_name(domain.clone());
        }

        Ok(tls)
    }

    /// 服务端 TLS：必须有服务端证书，配置 CA 时校验客户端证书
    pub fn server_config(&self) -> Result<ServerTlsConfig> {
        let identity = self
            .identity()?
            .ok_or_else(|| Error::config("server tls requires cert and key"))?;

        let mut tls = ServerTlsConfig::new().identity(identity);
        if let Some(ca) = &self.ca_cert {
            tls = tls.client_ca_root(Certificate::from_pem(ca));
        }

        Ok(tls)
    }
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("has_ca_cert", &self.ca_cert.is_some())
            .field("has_identity", &self.cert.is_some())
            .field("domain", &self.domain)
            .finish()
    }
}
