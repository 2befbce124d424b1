use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_cert_signed_by_trust_anchor, verify_server_name};
use rustls::crypto::{
    verify_tls12_signature, verify_tls13_signature, CryptoProvider, WebPkiSupportedAlgorithms,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::config::SslConfig;
use crate::error::HarnessError;
use crate::keystore::{self, CredentialStore, StoreFormat};

/// Whether the server's certificate must name the host being connected to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostnameVerification {
    #[default]
    Strict,
    /// Accept certificates issued for any host name
    AllowAll,
}

impl HostnameVerification {
    pub fn from_check_peer_name(check: bool) -> Self {
        if check {
            Self::Strict
        } else {
            Self::AllowAll
        }
    }
}

/// Get the crypto provider for TLS connections.
///
/// Uses the process default when one is installed, otherwise a `ring`
/// provider that is not installed globally.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()))
}

/// Server certificate verifier that trusts any single-certificate chain.
///
/// Longer chains must lead to one of `roots`. Host names are checked
/// separately according to `hostnames`.
#[derive(Debug)]
struct SelfSignedTrustVerifier {
    roots: Arc<RootCertStore>,
    algorithms: WebPkiSupportedAlgorithms,
    hostnames: HostnameVerification,
}

impl ServerCertVerifier for SelfSignedTrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;

        if intermediates.is_empty() {
            tracing::trace!("Trusting single-certificate chain");
        } else {
            verify_server_cert_signed_by_trust_anchor(
                &cert,
                &self.roots,
                intermediates,
                now,
                self.algorithms.all,
            )?;
        }

        if self.hostnames == HostnameVerification::Strict {
            verify_server_name(&cert, server_name)?;
        }

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

struct ClientIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

/// Trust anchors plus optional client identity, ready to create connections.
///
/// Cloning is cheap; clones share the same material.
#[derive(Clone)]
pub struct TlsContext {
    roots: Arc<RootCertStore>,
    identity: Option<Arc<ClientIdentity>>,
    provider: Arc<CryptoProvider>,
    strict: Arc<ClientConfig>,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("trust_anchors", &self.roots.len())
            .field("has_identity", &self.identity.is_some())
            .finish()
    }
}

impl TlsContext {
    fn new(
        roots: RootCertStore,
        identity: Option<ClientIdentity>,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, HarnessError> {
        let roots = Arc::new(roots);
        let identity = identity.map(Arc::new);
        let strict = Arc::new(client_config(
            &roots,
            identity.as_deref(),
            &provider,
            HostnameVerification::Strict,
        )?);
        Ok(Self {
            roots,
            identity,
            provider,
            strict,
        })
    }

    /// Client configuration with standard host-name verification
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.strict.clone()
    }

    /// Client configuration with the given host-name policy
    pub fn client_config_with(
        &self,
        hostnames: HostnameVerification,
    ) -> Result<Arc<ClientConfig>, HarnessError> {
        match hostnames {
            HostnameVerification::Strict => Ok(self.client_config()),
            HostnameVerification::AllowAll => Ok(Arc::new(client_config(
                &self.roots,
                self.identity.as_deref(),
                &self.provider,
                hostnames,
            )?)),
        }
    }

    pub fn has_client_identity(&self) -> bool {
        self.identity.is_some()
    }

    pub fn trust_anchor_count(&self) -> usize {
        self.roots.len()
    }
}

fn client_config(
    roots: &Arc<RootCertStore>,
    identity: Option<&ClientIdentity>,
    provider: &Arc<CryptoProvider>,
    hostnames: HostnameVerification,
) -> Result<ClientConfig, HarnessError> {
    let verifier = SelfSignedTrustVerifier {
        roots: roots.clone(),
        algorithms: provider.signature_verification_algorithms,
        hostnames,
    };

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| HarnessError::configuration("Unsupported TLS protocol versions", e))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));

    match identity {
        Some(identity) => builder
            .with_client_auth_cert(identity.chain.clone(), identity.key.clone_key())
            .map_err(|e| HarnessError::configuration("Unable to install client key material", e)),
        None => Ok(builder.with_no_client_auth()),
    }
}

/// Builds client [`TlsContext`]s from an [`SslConfig`].
///
/// Key and trust stores swap roles here: the config describes the server,
/// and the client must trust what the server presents (its key store) and
/// present what the server trusts (its trust store).
#[derive(Debug, Default)]
pub struct TlsContextBuilder {
    _private: (),
}

impl TlsContextBuilder {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Build a context for `config`, which must be in ssl mode.
    ///
    /// Store and key failures come back as [`HarnessError::Configuration`]
    /// wrapping the cause.
    pub fn build(&self, config: &SslConfig) -> Result<TlsContext, HarnessError> {
        if !config.is_ssl_mode() {
            return Err(HarnessError::Precondition(
                "cannot build a TLS context when ssl mode is off".to_string(),
            ));
        }

        self.assemble(config)
            .map_err(|e| HarnessError::configuration("Unable to build client TLS context", e))
    }

    fn assemble(&self, config: &SslConfig) -> Result<TlsContext, HarnessError> {
        let format = config.store_format();

        // Server key store -> client trust material
        let trust_material = load_store(
            config.key_store_path(),
            config.key_store_password(),
            format,
            "key store",
        )?;
        let mut roots = RootCertStore::empty();
        let (added, ignored) =
            roots.add_parsable_certificates(trust_material.certificates().iter().cloned());
        if ignored > 0 {
            tracing::warn!(added, ignored, "Some trust certificates could not be parsed");
        }
        if added == 0 {
            return Err(HarnessError::InvalidConfig(
                "key store holds no usable trust anchors".to_string(),
            ));
        }

        // Server trust store -> client key material
        let identity = if config.is_client_auth_mode() {
            let key_material = load_store(
                config.trust_store_path(),
                config.trust_store_password(),
                format,
                "trust store",
            )?;
            let (chain, key) = key_material.into_identity().ok_or_else(|| {
                HarnessError::InvalidConfig(
                    "trust store holds no private key for client auth".to_string(),
                )
            })?;
            Some(ClientIdentity { chain, key })
        } else {
            None
        };

        let context = TlsContext::new(roots, identity, crypto_provider())?;
        tracing::debug!(
            trust_anchors = context.trust_anchor_count(),
            client_auth = context.has_client_identity(),
            "Built client TLS context"
        );
        Ok(context)
    }
}

fn load_store(
    path: Option<&Path>,
    password: Option<&str>,
    format: StoreFormat,
    role: &str,
) -> Result<CredentialStore, HarnessError> {
    let path = path.ok_or_else(|| {
        HarnessError::credential_load(format!("<unset {}>", role), "no path configured")
    })?;
    keystore::load(path, password.unwrap_or_default(), format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::pkcs12::Pkcs12;
    use openssl::pkey::PKey;
    use openssl::x509::X509;
    use rcgen::{CertificateParams, KeyPair};
    use std::path::PathBuf;

    struct Stores {
        _dir: tempfile::TempDir,
        with_key: PathBuf,
        certs_only: PathBuf,
    }

    fn stores() -> Stores {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();

        let p12 = Pkcs12::builder()
            .name("test")
            .pkey(&PKey::private_key_from_pkcs8(&key.serialize_der()).unwrap())
            .cert(&X509::from_der(cert.der()).unwrap())
            .build2("secret")
            .unwrap()
            .to_der()
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let with_key = dir.path().join("test.p12");
        let certs_only = dir.path().join("certs.pem");
        std::fs::write(&with_key, p12).unwrap();
        std::fs::write(&certs_only, cert.pem()).unwrap();

        Stores {
            _dir: dir,
            with_key,
            certs_only,
        }
    }

    fn ssl(client_auth: bool, key_store: &Path, trust_store: &Path) -> SslConfig {
        SslConfig::new(
            true,
            client_auth,
            Some(key_store),
            Some("secret"),
            Some(trust_store),
            Some("secret"),
        )
    }

    #[test]
    fn test_build_requires_ssl_mode() {
        let result = TlsContextBuilder::new().build(&SslConfig::default());
        assert!(matches!(result, Err(HarnessError::Precondition(_))));
    }

    #[test]
    fn test_build_trust_only() {
        let s = stores();
        let context = TlsContextBuilder::new()
            .build(&ssl(false, &s.with_key, &s.with_key))
            .unwrap();

        assert_eq!(context.trust_anchor_count(), 1);
        assert!(!context.has_client_identity());
        assert!(!context.client_config().client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_trust_only_never_touches_trust_store() {
        let s = stores();
        let config = ssl(false, &s.with_key, Path::new("/definitely/not/a/real/trust.p12"));
        assert!(TlsContextBuilder::new().build(&config).is_ok());
    }

    #[test]
    fn test_build_with_client_auth() {
        let s = stores();
        let context = TlsContextBuilder::new()
            .build(&ssl(true, &s.with_key, &s.with_key))
            .unwrap();

        assert!(context.has_client_identity());
        assert!(context.client_config().client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_missing_trust_store_with_client_auth() {
        let s = stores();
        let config = ssl(true, &s.with_key, Path::new("/definitely/not/a/real/trust.p12"));
        let err = TlsContextBuilder::new().build(&config).unwrap_err();

        assert!(matches!(err, HarnessError::Configuration { .. }));
        assert!(err.is_credential_load());
    }

    #[test]
    fn test_unset_key_store() {
        let config = SslConfig::new(
            true,
            false,
            None::<PathBuf>,
            None::<String>,
            None::<PathBuf>,
            None::<String>,
        );
        let err = TlsContextBuilder::new().build(&config).unwrap_err();
        assert!(err.is_credential_load());
    }

    #[test]
    fn test_client_auth_store_without_key() {
        let s = stores();
        let config = SslConfig::new(
            true,
            true,
            Some(&s.certs_only),
            None::<String>,
            Some(&s.certs_only),
            None::<String>,
        )
        .with_store_format(StoreFormat::Pem);

        let err = TlsContextBuilder::new().build(&config).unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { .. }));
        assert!(!err.is_credential_load());
    }

    #[test]
    fn test_wrong_password_is_configuration_error() {
        let s = stores();
        let config = SslConfig::new(
            true,
            false,
            Some(&s.with_key),
            Some("wrong"),
            Some(&s.with_key),
            Some("wrong"),
        );
        let err = TlsContextBuilder::new().build(&config).unwrap_err();
        assert!(matches!(err, HarnessError::Configuration { .. }));
        assert!(err.is_credential_load());
    }

    #[test]
    fn test_allow_all_config_is_distinct() {
        let s = stores();
        let context = TlsContextBuilder::new()
            .build(&ssl(false, &s.with_key, &s.with_key))
            .unwrap();

        let strict = context.client_config_with(HostnameVerification::Strict).unwrap();
        let relaxed = context.client_config_with(HostnameVerification::AllowAll).unwrap();
        assert!(Arc::ptr_eq(&strict, &context.client_config()));
        assert!(!Arc::ptr_eq(&strict, &relaxed));
    }

    #[test]
    fn test_hostname_verification_from_flag() {
        assert_eq!(
            HostnameVerification::from_check_peer_name(true),
            HostnameVerification::Strict
        );
        assert_eq!(
            HostnameVerification::from_check_peer_name(false),
            HostnameVerification::AllowAll
        );
    }
}
