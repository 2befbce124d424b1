//! Test server harness for E2E tests
//!
//! Starts an HTTP/1.1 server on an ephemeral port, either plain or TLS,
//! configured from the same [`SslConfig`] the client side uses. With
//! client auth on, the server demands a certificate signed by something in
//! its trust store.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

use tlsharness::{crypto_provider, keystore, SslConfig};

/// A request as seen by the test server
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub uri: String,
    /// Whether the connection presented a client certificate
    pub client_authenticated: bool,
}

type RequestLog = Arc<RwLock<Vec<RecordedRequest>>>;

/// A running test server instance
pub struct TestServer {
    pub addr: SocketAddr,
    scheme: &'static str,
    requests: RequestLog,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

/// Server-side TLS configuration for `config`: present the key store,
/// and when client auth is on, verify clients against the trust store.
pub fn server_tls_config(config: &SslConfig) -> Result<ServerConfig> {
    let provider = crypto_provider();
    let format = config.store_format();

    let key_store = config.key_store_path().context("ssl mode needs a key store")?;
    let (chain, key) = keystore::load(
        key_store,
        config.key_store_password().unwrap_or_default(),
        format,
    )?
    .into_identity()
    .context("key store holds no private key")?;

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = if config.is_client_auth_mode() {
        let trust_store = config
            .trust_store_path()
            .context("client auth needs a trust store")?;
        let trusted = keystore::load(
            trust_store,
            config.trust_store_password().unwrap_or_default(),
            format,
        )?;
        let mut roots = RootCertStore::empty();
        roots.add_parsable_certificates(trusted.certificates().iter().cloned());

        // Require client certificates
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .context("Failed to build client verifier")?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    Ok(builder.with_single_cert(chain, key)?)
}

impl TestServer {
    /// Start a server matching `config`'s mode
    pub async fn start(config: &SslConfig) -> Result<Self> {
        let acceptor = if config.is_ssl_mode() {
            Some(TlsAcceptor::from(Arc::new(server_tls_config(config)?)))
        } else {
            None
        };
        let scheme = if acceptor.is_some() { "https" } else { "http" };

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind test server")?;
        let addr = listener.local_addr()?;

        let requests: RequestLog = Arc::new(RwLock::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let log = requests.clone();
        tokio::spawn(async move {
            loop {
                let (stream, peer_addr) = tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                            break;
                        }
                    },
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Test server shutting down");
                        break;
                    }
                };

                let log = log.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                let client_authenticated =
                                    tls_stream.get_ref().1.peer_certificates().is_some();
                                serve_connection(tls_stream, log, client_authenticated).await;
                            }
                            Err(e) => {
                                tracing::debug!("TLS handshake failed from {}: {}", peer_addr, e);
                            }
                        },
                        None => serve_connection(stream, log, false).await,
                    }
                });
            }
        });

        tracing::debug!("Test server listening on {}://{}", scheme, addr);
        Ok(Self {
            addr,
            scheme,
            requests,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// URL for `path` using this server's own scheme
    pub fn url(&self, path: &str) -> String {
        self.url_with_scheme(self.scheme, path)
    }

    /// URL for `path` on this server's port with an arbitrary scheme
    pub fn url_with_scheme(&self, scheme: &str, path: &str) -> String {
        format!("{}://{}{}", scheme, self.addr, path)
    }

    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    /// Get all recorded requests
    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        self.requests.read().clone()
    }

    /// Shutdown the test server
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_connection<S>(stream: S, log: RequestLog, client_authenticated: bool)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let log = log.clone();
        async move {
            let method = req.method().to_string();
            let uri = req.uri().to_string();
            let body = format!("{} {}", method, uri);

            log.write().push(RecordedRequest {
                method,
                uri,
                client_authenticated,
            });

            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
        }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        tracing::debug!("HTTP connection error: {}", e);
    }
}
