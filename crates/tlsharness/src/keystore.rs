//! Key/trust store loading
//!
//! A store is read from disk on every call; nothing is cached here.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

use openssl::pkcs12::Pkcs12;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls_pemfile::{certs, private_key};
use serde::Deserialize;

use crate::error::HarnessError;

/// Container format of a key/trust store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum StoreFormat {
    /// Password-protected PKCS#12 (`.p12` / `.pfx`)
    #[default]
    Pkcs12,
    /// PEM bundle: certificates plus an optional private key, no password
    Pem,
}

impl FromStr for StoreFormat {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pkcs12" | "p12" | "pfx" => Ok(StoreFormat::Pkcs12),
            "pem" => Ok(StoreFormat::Pem),
            other => Err(HarnessError::InvalidConfig(format!(
                "Unsupported store format '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for StoreFormat {
    type Error = HarnessError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Certificates and optional private key read from a store
pub struct CredentialStore {
    certificates: Vec<CertificateDer<'static>>,
    private_key: Option<PrivateKeyDer<'static>>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("cert_count", &self.certificates.len())
            .field("has_key", &self.private_key.is_some())
            .finish()
    }
}

impl CredentialStore {
    /// Leaf certificate first, followed by any CA certificates
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    pub fn private_key(&self) -> Option<&PrivateKeyDer<'static>> {
        self.private_key.as_ref()
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// Split into the certificate chain and private key, for use as an identity
    pub fn into_identity(
        self,
    ) -> Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let key = self.private_key?;
        Some((self.certificates, key))
    }
}

/// Load the store at `path`.
///
/// Fails with [`HarnessError::CredentialLoad`] when the file is missing, is
/// not a valid store of `format`, holds no certificates, or `password` is
/// wrong.
pub fn load(
    path: &Path,
    password: &str,
    format: StoreFormat,
) -> Result<CredentialStore, HarnessError> {
    tracing::debug!(path = %path.display(), ?format, "Loading credential store");

    let store = match format {
        StoreFormat::Pkcs12 => load_pkcs12(path, password)?,
        StoreFormat::Pem => load_pem(path)?,
    };

    if store.certificates.is_empty() {
        return Err(HarnessError::credential_load(
            path,
            "store contains no certificates",
        ));
    }

    tracing::debug!(
        path = %path.display(),
        certs = store.certificates.len(),
        has_key = store.has_private_key(),
        "Loaded credential store"
    );
    Ok(store)
}

fn load_pkcs12(path: &Path, password: &str) -> Result<CredentialStore, HarnessError> {
    let der = std::fs::read(path)
        .map_err(|e| HarnessError::credential_load(path, format!("failed to read file: {}", e)))?;

    let parsed = Pkcs12::from_der(&der)
        .map_err(|e| HarnessError::credential_load(path, format!("not a PKCS#12 store: {}", e)))?
        .parse2(password)
        .map_err(|e| {
            HarnessError::credential_load(
                path,
                format!("wrong password or corrupt store: {}", e),
            )
        })?;

    let to_der_error =
        |e: openssl::error::ErrorStack| HarnessError::credential_load(path, e.to_string());

    let mut certificates = Vec::new();
    if let Some(cert) = &parsed.cert {
        certificates.push(CertificateDer::from(cert.to_der().map_err(to_der_error)?));
    }
    if let Some(ca) = &parsed.ca {
        for cert in ca {
            certificates.push(CertificateDer::from(cert.to_der().map_err(to_der_error)?));
        }
    }

    let private_key = match &parsed.pkey {
        Some(pkey) => {
            let pkcs8 = pkey.private_key_to_pkcs8().map_err(to_der_error)?;
            Some(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pkcs8)))
        }
        None => None,
    };

    Ok(CredentialStore {
        certificates,
        private_key,
    })
}

fn load_pem(path: &Path) -> Result<CredentialStore, HarnessError> {
    let open = || {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| HarnessError::credential_load(path, format!("failed to open file: {}", e)))
    };

    let certificates = certs(&mut open()?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            HarnessError::credential_load(path, format!("failed to parse certificates: {}", e))
        })?;

    let private_key = private_key(&mut open()?).map_err(|e| {
        HarnessError::credential_load(path, format!("failed to parse private key: {}", e))
    })?;

    Ok(CredentialStore {
        certificates,
        private_key,
    })
}
