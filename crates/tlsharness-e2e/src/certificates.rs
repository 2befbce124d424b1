//! Test key store generation using rcgen
//!
//! Stores are written to a temporary directory at runtime so no key material
//! is checked in. PKCS#12 containers are produced with openssl.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::stack::Stack;
use openssl::x509::X509;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use tempfile::TempDir;

/// Password protecting every generated PKCS#12 store
pub const TEST_STORE_PASSWORD: &str = "secret";

/// A leaf certificate, its key, and the CA certificates that go with it
struct Entry {
    leaf: Certificate,
    key: KeyPair,
    chain: Vec<Certificate>,
}

/// Key stores for one test run.
///
/// Every store holds a private key, so each can serve as a server key store,
/// a client trust store, or (for mutual TLS) a client identity.
pub struct TestKeyStores {
    _dir: TempDir,
    /// CA-issued `localhost` / `127.0.0.1` leaf, key and CA (PKCS#12)
    pub chained: PathBuf,
    /// Same material as `chained`, as a PEM bundle
    pub chained_pem: PathBuf,
    /// Single self-signed `localhost` / `127.0.0.1` certificate and key (PKCS#12)
    pub self_signed: PathBuf,
    /// Self-signed certificate for a host name tests never connect to (PKCS#12)
    pub wrong_host: PathBuf,
    /// Leaf issued by an unrelated CA (PKCS#12)
    pub foreign: PathBuf,
}

impl TestKeyStores {
    /// Generate every store into a fresh temporary directory
    pub fn generate() -> Result<Self> {
        let dir = tempfile::tempdir().context("Failed to create key store directory")?;

        let chained_entry = issued_entry("tlsharness Test CA")?;
        let chained = write_pkcs12(dir.path(), "chained.p12", &chained_entry)?;
        let chained_pem = write_pem(dir.path(), "chained.pem", &chained_entry)?;

        let self_signed = write_pkcs12(
            dir.path(),
            "self-signed.p12",
            &self_signed_entry(localhost_sans()?)?,
        )?;

        let wrong_host = write_pkcs12(
            dir.path(),
            "wrong-host.p12",
            &self_signed_entry(vec![SanType::DnsName("wrong-host.invalid".try_into()?)])?,
        )?;

        let foreign = write_pkcs12(
            dir.path(),
            "foreign.p12",
            &issued_entry("Unrelated Test CA")?,
        )?;

        Ok(Self {
            _dir: dir,
            chained,
            chained_pem,
            self_signed,
            wrong_host,
            foreign,
        })
    }
}

fn localhost_sans() -> Result<Vec<SanType>> {
    Ok(vec![
        SanType::DnsName("localhost".try_into()?),
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    ])
}

fn leaf_params(sans: Vec<SanType>) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "localhost");
        dn
    };
    params.subject_alt_names = sans;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    // the same leaf serves as server and (under client auth) client identity
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params
}

fn self_signed_entry(sans: Vec<SanType>) -> Result<Entry> {
    let key = KeyPair::generate()?;
    let leaf = leaf_params(sans).self_signed(&key)?;
    Ok(Entry {
        leaf,
        key,
        chain: vec![],
    })
}

fn issued_entry(ca_name: &str) -> Result<Entry> {
    let ca_key = KeyPair::generate()?;
    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name = {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, ca_name);
        dn.push(DnType::OrganizationName, "tlsharness E2E Tests");
        dn
    };
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let ca_cert = ca_params.clone().self_signed(&ca_key)?;
    let issuer = Issuer::new(ca_params, ca_key);

    let key = KeyPair::generate()?;
    let leaf = leaf_params(localhost_sans()?).signed_by(&key, &issuer)?;

    Ok(Entry {
        leaf,
        key,
        chain: vec![ca_cert],
    })
}

fn write_pkcs12(dir: &Path, name: &str, entry: &Entry) -> Result<PathBuf> {
    let pkey = PKey::private_key_from_pkcs8(&entry.key.serialize_der())?;
    let cert = X509::from_der(entry.leaf.der())?;

    let mut builder = Pkcs12::builder();
    builder.name("tlsharness").pkey(&pkey).cert(&cert);
    if !entry.chain.is_empty() {
        let mut ca = Stack::new()?;
        for c in &entry.chain {
            ca.push(X509::from_der(c.der())?)?;
        }
        builder.ca(ca);
    }
    let der = builder.build2(TEST_STORE_PASSWORD)?.to_der()?;

    let path = dir.join(name);
    std::fs::write(&path, der).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn write_pem(dir: &Path, name: &str, entry: &Entry) -> Result<PathBuf> {
    let mut pem = entry.leaf.pem();
    for c in &entry.chain {
        pem.push_str(&c.pem());
    }
    pem.push_str(&entry.key.serialize_pem());

    let path = dir.join(name);
    std::fs::write(&path, pem).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlsharness::{keystore, StoreFormat};

    #[test]
    fn test_generate_key_stores() {
        let stores = TestKeyStores::generate().unwrap();

        let chained = keystore::load(&stores.chained, TEST_STORE_PASSWORD, StoreFormat::Pkcs12)
            .unwrap();
        assert_eq!(chained.certificates().len(), 2);
        assert!(chained.has_private_key());

        let pem = keystore::load(&stores.chained_pem, "", StoreFormat::Pem).unwrap();
        assert_eq!(pem.certificates().len(), 2);
        assert!(pem.has_private_key());

        for path in [&stores.self_signed, &stores.wrong_host] {
            let store = keystore::load(path, TEST_STORE_PASSWORD, StoreFormat::Pkcs12).unwrap();
            assert_eq!(store.certificates().len(), 1);
            assert!(store.has_private_key());
        }
    }
}
