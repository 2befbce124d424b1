//! Restricting a client to exactly one transport
//!
//! A TLS-mode client loses its `http` scheme so tests cannot quietly fall
//! back to an unencrypted channel; a plain-mode client loses `https`.

use crate::client::HttpClientHandle;
use crate::config::SslConfig;
use crate::context::{HostnameVerification, TlsContext, TlsContextBuilder};
use crate::error::HarnessError;
use crate::scheme::{Scheme, HTTP, HTTPS};
use crate::socket::TlsSocketFactory;

/// Prepares an HTTP client for one transport mode
pub trait HttpClientConfigurer: Send + Sync {
    /// Adjust the client's schemes. Applying the same configurer again
    /// leaves the client unchanged.
    fn configure(&self, client: &mut HttpClientHandle);
}

/// Leaves only plain HTTP
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainOnlyConfigurer;

impl HttpClientConfigurer for PlainOnlyConfigurer {
    fn configure(&self, client: &mut HttpClientHandle) {
        let registry = client.scheme_registry_mut();
        registry.unregister(HTTPS);
        if !registry.contains(HTTP) {
            registry.register(Scheme::http());
        }
        tracing::info!("Client restricted to plain HTTP");
    }
}

/// Leaves only HTTPS, bound to one TLS context
#[derive(Debug, Clone)]
pub struct TlsOnlyConfigurer {
    factory: TlsSocketFactory,
}

impl TlsOnlyConfigurer {
    pub fn new(context: TlsContext) -> Self {
        Self {
            factory: TlsSocketFactory::from_config(
                context.client_config(),
                HostnameVerification::Strict,
            ),
        }
    }
}

impl HttpClientConfigurer for TlsOnlyConfigurer {
    fn configure(&self, client: &mut HttpClientHandle) {
        let registry = client.scheme_registry_mut();
        registry.unregister(HTTP);
        registry.register(Scheme::https(self.factory.clone()));
        tracing::info!("Client restricted to HTTPS");
    }
}

/// Pick the configurer matching `config`'s mode
pub fn configurer_for(config: &SslConfig) -> Result<Box<dyn HttpClientConfigurer>, HarnessError> {
    config.validate()?;
    if config.is_ssl_mode() {
        let context = TlsContextBuilder::new().build(config)?;
        Ok(Box::new(TlsOnlyConfigurer::new(context)))
    } else {
        Ok(Box::new(PlainOnlyConfigurer))
    }
}

/// Restrict `client` to the transport `config` asks for
pub fn configure(client: &mut HttpClientHandle, config: &SslConfig) -> Result<(), HarnessError> {
    configurer_for(config)?.configure(client);
    Ok(())
}
