//! Client-side TLS setup for integration tests
//!
//! Test servers run either plain HTTP or TLS from a fixed key/trust store
//! pair. This crate prepares HTTP clients to talk to them:
//!
//! - **Key stores** (`keystore`): PKCS#12 or PEM stores loaded from disk
//! - **TLS contexts** (`TlsContextBuilder`): trust material from the server's
//!   key store, client identity from the server's trust store, self-signed
//!   chains accepted
//! - **Configurers** (`configurer_for`, `configure`): restrict a client to
//!   HTTPS only or HTTP only, never both
//! - **Socket factories** (`build_connection_socket_factory`): TLS
//!   connections with optional host-name verification bypass
//!
//! # Example
//!
//! ```rust,ignore
//! use tlsharness::{configure, HttpClientHandle, SslConfig, TestStoreDefaults};
//!
//! let config = SslConfig::with_defaults(true, false, &TestStoreDefaults::from_env());
//! let mut client = HttpClientHandle::new()?;
//! configure(&mut client, &config)?;
//!
//! let resp = client.get("https://127.0.0.1:8983/solr/admin/info").await?;
//! ```
//!
//! The trust model is deliberately weak and meant for tests only.

mod client;
mod config;
mod configurer;
mod context;
mod error;
pub mod keystore;
pub mod props;
pub mod scheme;
mod socket;

pub use client::{HttpClientHandle, HttpResponse};
pub use config::{SslConfig, TestStoreDefaults, DEFAULT_TEST_KEYSTORE_PASSWORD};
pub use configurer::{
    configure, configurer_for, HttpClientConfigurer, PlainOnlyConfigurer, TlsOnlyConfigurer,
};
pub use context::{crypto_provider, HostnameVerification, TlsContext, TlsContextBuilder};
pub use error::{HarnessError, RequestError};
pub use keystore::{CredentialStore, StoreFormat};
pub use props::{parse_tri_state_boolean, CHECK_PEER_NAME_ENV};
pub use scheme::{Scheme, SchemeRegistry, SchemeState};
pub use socket::{
    build_connection_socket_factory, build_connection_socket_factory_with, Connection,
    ConnectionSocketFactory, PlainSocketFactory, TlsSocketFactory,
};

#[allow(deprecated)]
pub use props::{clear_global_test_tls_properties, set_global_test_tls_properties};
