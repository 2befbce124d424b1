//! Connection-level socket factories

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::SslConfig;
use crate::context::{HostnameVerification, TlsContext, TlsContextBuilder};
use crate::error::{HarnessError, RequestError};
use crate::props::{check_peer_name_enabled, CHECK_PEER_NAME_ENV};

/// A connected, bidirectional byte stream
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens connections for one transport scheme
#[async_trait]
pub trait ConnectionSocketFactory: fmt::Debug + Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, RequestError>;

    /// Whether connections from this factory are encrypted
    fn is_secure(&self) -> bool;
}

async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, RequestError> {
    tracing::debug!("Connecting to {}:{}", host, port);
    TcpStream::connect((host, port))
        .await
        .map_err(|source| RequestError::Connect {
            addr: format!("{}:{}", host, port),
            source,
        })
}

/// Plain TCP connections
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainSocketFactory;

#[async_trait]
impl ConnectionSocketFactory for PlainSocketFactory {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, RequestError> {
        Ok(Box::new(connect_tcp(host, port).await?))
    }

    fn is_secure(&self) -> bool {
        false
    }
}

/// TCP connections wrapped in a rustls client session
#[derive(Clone)]
pub struct TlsSocketFactory {
    config: Arc<ClientConfig>,
    connector: TlsConnector,
    hostnames: HostnameVerification,
}

impl fmt::Debug for TlsSocketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSocketFactory")
            .field("hostnames", &self.hostnames)
            .finish()
    }
}

impl TlsSocketFactory {
    /// Use a prepared client configuration as-is
    pub fn from_config(config: Arc<ClientConfig>, hostnames: HostnameVerification) -> Self {
        Self {
            connector: TlsConnector::from(config.clone()),
            config,
            hostnames,
        }
    }

    /// Connections trusting `context`, with the given host-name policy
    pub fn new(context: &TlsContext, hostnames: HostnameVerification) -> Result<Self, HarnessError> {
        if hostnames == HostnameVerification::AllowAll {
            tracing::warn!("Host name verification disabled for TLS socket factory");
        }
        Ok(Self::from_config(context.client_config_with(hostnames)?, hostnames))
    }

    /// Connections trusting the platform's native root certificates
    pub fn native_roots() -> Result<Self, HarnessError> {
        let result = rustls_native_certs::load_native_certs();
        for err in &result.errors {
            tracing::warn!(error = %err, "error loading native root certificate");
        }

        let mut roots = rustls::RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(result.certs);
        tracing::debug!(added, ignored, "Loaded native root certificates");

        let config = ClientConfig::builder_with_provider(crate::context::crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| HarnessError::configuration("Unsupported TLS protocol versions", e))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self::from_config(
            Arc::new(config),
            HostnameVerification::Strict,
        ))
    }

    /// The rustls configuration, for pooled clients that take a preconfigured TLS backend
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    pub fn hostname_verification(&self) -> HostnameVerification {
        self.hostnames
    }
}

#[async_trait]
impl ConnectionSocketFactory for TlsSocketFactory {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, RequestError> {
        let tcp = connect_tcp(host, port).await?;
        let addr = format!("{}:{}", host, port);

        let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
            RequestError::InvalidUrl {
                url: addr.clone(),
                reason: format!("invalid TLS server name: {}", e),
            }
        })?;

        let stream = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|source| RequestError::Tls { addr, source })?;
        Ok(Box::new(stream))
    }

    fn is_secure(&self) -> bool {
        true
    }
}

/// Build the TLS socket factory for `config`, reading the peer-name
/// setting from [`CHECK_PEER_NAME_ENV`].
///
/// Returns `Ok(None)` when ssl mode is off. Client auth without ssl mode is
/// a [`HarnessError::Precondition`].
pub fn build_connection_socket_factory(
    config: &SslConfig,
) -> Result<Option<TlsSocketFactory>, HarnessError> {
    let raw = std::env::var(CHECK_PEER_NAME_ENV).ok();
    build_connection_socket_factory_with(config, raw.as_deref())
}

/// Same as [`build_connection_socket_factory`] with the raw peer-name
/// setting passed in.
pub fn build_connection_socket_factory_with(
    config: &SslConfig,
    check_peer_name: Option<&str>,
) -> Result<Option<TlsSocketFactory>, HarnessError> {
    config.validate()?;
    if !config.is_ssl_mode() {
        return Ok(None);
    }

    let hostnames =
        HostnameVerification::from_check_peer_name(check_peer_name_enabled(check_peer_name));
    let context = TlsContextBuilder::new().build(config)?;
    TlsSocketFactory::new(&context, hostnames)
        .map(Some)
        .map_err(|e| HarnessError::configuration("Unable to set up https socket factory", e))
}
