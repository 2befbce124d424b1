//! TLS mode configuration for test clients
//!
//! Values are resolved in this order (first found wins):
//! 1. Environment variables (TLSHARNESS_*)
//! 2. Config file (TOML)
//! 3. Defaults (plain HTTP, no client auth)

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::HarnessError;
use crate::keystore::StoreFormat;
use crate::props::{global_test_tls_properties, parse_tri_state_boolean};

/// Environment variable prefix
const ENV_PREFIX: &str = "TLSHARNESS";

/// Password of the default test key store when none is configured
pub const DEFAULT_TEST_KEYSTORE_PASSWORD: &str = "secret";

/// Client TLS mode plus the key/trust stores it needs.
///
/// Store paths are named from the server's point of view: the client trusts
/// what is configured as the key store and presents what is configured as
/// the trust store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    #[serde(alias = "use_ssl")]
    ssl_mode: bool,
    #[serde(alias = "client_auth")]
    client_auth_mode: bool,
    #[serde(alias = "key_store")]
    key_store_path: Option<PathBuf>,
    key_store_password: Option<String>,
    #[serde(alias = "trust_store")]
    trust_store_path: Option<PathBuf>,
    trust_store_password: Option<String>,
    store_format: StoreFormat,
}

impl SslConfig {
    /// Six-field form
    pub fn new(
        use_ssl: bool,
        client_auth: bool,
        key_store: Option<impl Into<PathBuf>>,
        key_store_password: Option<impl Into<String>>,
        trust_store: Option<impl Into<PathBuf>>,
        trust_store_password: Option<impl Into<String>>,
    ) -> Self {
        Self {
            ssl_mode: use_ssl,
            client_auth_mode: client_auth,
            key_store_path: key_store.map(Into::into),
            key_store_password: key_store_password.map(Into::into),
            trust_store_path: trust_store.map(Into::into),
            trust_store_password: trust_store_password.map(Into::into),
            store_format: StoreFormat::default(),
        }
    }

    /// Two-flag form: both roles use the default test store
    pub fn with_defaults(use_ssl: bool, client_auth: bool, defaults: &TestStoreDefaults) -> Self {
        Self::new(
            use_ssl,
            client_auth,
            defaults.path(),
            Some(defaults.password()),
            defaults.path(),
            Some(defaults.password()),
        )
    }

    /// Build a TLS-on configuration from the legacy process-wide properties
    #[deprecated(note = "prefer an explicit SslConfig over global TLS properties")]
    pub fn from_global_properties() -> Option<Self> {
        let props = global_test_tls_properties()?;
        Some(Self::new(
            true,
            false,
            Some(props.key_store),
            Some(props.key_store_password),
            Some(props.trust_store),
            Some(props.trust_store_password),
        ))
    }

    /// Set the container format of both stores
    pub fn with_store_format(mut self, format: StoreFormat) -> Self {
        self.store_format = format;
        self
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: SslConfig = toml::from_str(&content).map_err(|e| {
            HarnessError::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.apply_overrides(get_env)?;
        Ok(config)
    }

    /// Defaults overridden by the environment
    pub fn from_env() -> Result<Self, HarnessError> {
        let mut config = Self::default();
        config.apply_overrides(get_env)?;
        Ok(config)
    }

    /// Apply overrides looked up by unprefixed name (e.g. `USE_SSL`).
    ///
    /// Unrecognized boolean values leave the current value in place.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), HarnessError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_tri_state_boolean(lookup("USE_SSL").as_deref()) {
            self.ssl_mode = v;
        }
        if let Some(v) = parse_tri_state_boolean(lookup("CLIENT_AUTH").as_deref()) {
            self.client_auth_mode = v;
        }
        if let Some(v) = lookup("KEY_STORE") {
            self.key_store_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("KEY_STORE_PASSWORD") {
            self.key_store_password = Some(v);
        }
        if let Some(v) = lookup("TRUST_STORE") {
            self.trust_store_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("TRUST_STORE_PASSWORD") {
            self.trust_store_password = Some(v);
        }
        if let Some(v) = lookup("STORE_FORMAT") {
            self.store_format = v.parse()?;
        }
        Ok(())
    }

    /// Check the mode invariant: client auth only makes sense over TLS
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.client_auth_mode && !self.ssl_mode {
            return Err(HarnessError::Precondition(
                "client auth mode requires ssl mode".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_ssl_mode(&self) -> bool {
        self.ssl_mode
    }

    pub fn is_client_auth_mode(&self) -> bool {
        self.client_auth_mode
    }

    pub fn key_store_path(&self) -> Option<&Path> {
        self.key_store_path.as_deref()
    }

    pub fn key_store_password(&self) -> Option<&str> {
        self.key_store_password.as_deref()
    }

    pub fn trust_store_path(&self) -> Option<&Path> {
        self.trust_store_path.as_deref()
    }

    pub fn trust_store_password(&self) -> Option<&str> {
        self.trust_store_password.as_deref()
    }

    pub fn store_format(&self) -> StoreFormat {
        self.store_format
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{}_{}", ENV_PREFIX, name)).ok()
}

/// Location and password of the default test key store.
///
/// This is the only place a default store is resolved; everything else
/// receives plain [`SslConfig`] values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStoreDefaults {
    path: Option<PathBuf>,
    password: String,
}

impl TestStoreDefaults {
    /// A default store at `path`; a path that does not exist means no store
    pub fn new(path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.exists() {
            Some(path)
        } else {
            tracing::debug!(path = %path.display(), "Default test key store not found");
            None
        };
        Self {
            path,
            password: password.into(),
        }
    }

    /// No default store
    pub fn none() -> Self {
        Self {
            path: None,
            password: DEFAULT_TEST_KEYSTORE_PASSWORD.to_string(),
        }
    }

    /// Resolve from `TLSHARNESS_TEST_KEYSTORE` and `TLSHARNESS_TEST_KEYSTORE_PASSWORD`
    pub fn from_env() -> Self {
        Self::from_lookup(get_env)
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let password = lookup("TEST_KEYSTORE_PASSWORD")
            .unwrap_or_else(|| DEFAULT_TEST_KEYSTORE_PASSWORD.to_string());
        match lookup("TEST_KEYSTORE") {
            Some(path) => Self::new(path, password),
            None => Self {
                path: None,
                password,
            },
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| values.get(name).cloned()
    }

    #[test]
    fn test_default_is_plain_http() {
        let config = SslConfig::default();
        assert!(!config.is_ssl_mode());
        assert!(!config.is_client_auth_mode());
        assert!(config.key_store_path().is_none());
        assert_eq!(config.store_format(), StoreFormat::Pkcs12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_two_flag_form_uses_default_store_for_both_roles() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let defaults = TestStoreDefaults::new(file.path(), "secret");

        let config = SslConfig::with_defaults(true, true, &defaults);
        assert_eq!(config.key_store_path(), Some(file.path()));
        assert_eq!(config.trust_store_path(), Some(file.path()));
        assert_eq!(config.key_store_password(), Some("secret"));
        assert_eq!(config.trust_store_password(), Some("secret"));
    }

    #[test]
    fn test_missing_default_store_resolves_to_none() {
        let defaults = TestStoreDefaults::new("/definitely/not/a/real/store.p12", "secret");
        assert!(defaults.path().is_none());

        let config = SslConfig::with_defaults(true, false, &defaults);
        assert!(config.is_ssl_mode());
        assert!(config.key_store_path().is_none());
    }

    #[test]
    fn test_defaults_from_lookup() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();

        let defaults =
            TestStoreDefaults::from_lookup(overrides(&[("TEST_KEYSTORE", path.as_str())]));
        assert_eq!(defaults.path(), Some(file.path()));
        assert_eq!(defaults.password(), DEFAULT_TEST_KEYSTORE_PASSWORD);

        let defaults = TestStoreDefaults::from_lookup(overrides(&[(
            "TEST_KEYSTORE_PASSWORD",
            "changeit",
        )]));
        assert!(defaults.path().is_none());
        assert_eq!(defaults.password(), "changeit");
    }

    #[test]
    fn test_client_auth_requires_ssl() {
        let config = SslConfig::new(
            false,
            true,
            None::<PathBuf>,
            None::<String>,
            None::<PathBuf>,
            None::<String>,
        );
        assert!(matches!(
            config.validate(),
            Err(HarnessError::Precondition(_))
        ));
    }

    #[test]
    fn test_load_toml_with_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tls.toml");
        std::fs::write(
            &path,
            r#"
use_ssl = true
client_auth = true
key_store = "/stores/server.p12"
key_store_password = "secret"
trust_store = "/stores/trust.pem"
store_format = "pem"
"#,
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let config: SslConfig = toml::from_str(&content).unwrap();

        assert!(config.is_ssl_mode());
        assert!(config.is_client_auth_mode());
        assert_eq!(config.key_store_path(), Some(Path::new("/stores/server.p12")));
        assert_eq!(config.trust_store_path(), Some(Path::new("/stores/trust.pem")));
        assert_eq!(config.trust_store_password(), None);
        assert_eq!(config.store_format(), StoreFormat::Pem);
    }

    #[test]
    fn test_load_store_format_any_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tls.toml");

        for (raw, expected) in [
            ("PKCS12", StoreFormat::Pkcs12),
            ("Pfx", StoreFormat::Pkcs12),
            ("PEM", StoreFormat::Pem),
        ] {
            std::fs::write(&path, format!("use_ssl = true\nstore_format = \"{}\"\n", raw))
                .unwrap();
            let config = SslConfig::load(&path).unwrap();
            assert_eq!(config.store_format(), expected, "store_format = {}", raw);
        }

        std::fs::write(&path, "store_format = \"jks\"\n").unwrap();
        assert!(matches!(
            SslConfig::load(&path),
            Err(HarnessError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_rejects_missing_file() {
        let result = SslConfig::load("/definitely/not/a/real/tls.toml");
        assert!(matches!(result, Err(HarnessError::InvalidConfig(_))));
    }

    #[test]
    fn test_overrides_win_over_file_values() {
        let mut config = SslConfig::default();
        config
            .apply_overrides(overrides(&[
                ("USE_SSL", "TRUE"),
                ("CLIENT_AUTH", "false"),
                ("KEY_STORE", "/env/key.p12"),
                ("KEY_STORE_PASSWORD", "pw"),
                ("STORE_FORMAT", "P12"),
            ]))
            .unwrap();

        assert!(config.is_ssl_mode());
        assert!(!config.is_client_auth_mode());
        assert_eq!(config.key_store_path(), Some(Path::new("/env/key.p12")));
        assert_eq!(config.key_store_password(), Some("pw"));
        assert_eq!(config.store_format(), StoreFormat::Pkcs12);
    }

    #[test]
    fn test_unrecognized_boolean_override_is_ignored() {
        let mut config = SslConfig::new(
            true,
            false,
            Some("/a.p12"),
            Some("pw"),
            Some("/a.p12"),
            Some("pw"),
        );
        config
            .apply_overrides(overrides(&[("USE_SSL", "yes")]))
            .unwrap();
        assert!(config.is_ssl_mode());
    }

    #[test]
    fn test_bad_store_format_override() {
        let mut config = SslConfig::default();
        let result = config.apply_overrides(overrides(&[("STORE_FORMAT", "jks")]));
        assert!(matches!(result, Err(HarnessError::InvalidConfig(_))));
    }
}
