//! Process-level settings: the tri-state boolean parser, the peer-name check
//! setting, and the legacy global TLS properties.

use std::path::PathBuf;

use parking_lot::RwLock;

use crate::config::TestStoreDefaults;

/// Environment variable controlling host-name verification of built socket factories
pub const CHECK_PEER_NAME_ENV: &str = "TLSHARNESS_CHECK_PEER_NAME";

/// Parse `"true"`/`"false"` case-insensitively; anything else is unknown
pub fn parse_tri_state_boolean(raw: Option<&str>) -> Option<bool> {
    let raw = raw?;
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Resolve an unknown tri-state value to `default`
pub fn to_bool_or(value: Option<bool>, default: bool) -> bool {
    value.unwrap_or(default)
}

/// Whether peer host names should be verified for the given raw setting.
///
/// Unset and unrecognized values keep verification on.
pub fn check_peer_name_enabled(raw: Option<&str>) -> bool {
    to_bool_or(parse_tri_state_boolean(raw), true)
}

// ============================================================================
// Legacy process-wide TLS properties
// ============================================================================

/// Process-wide key/trust store locations for code that resolves its TLS
/// setup from global state instead of an explicit [`SslConfig`](crate::SslConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalTlsProperties {
    pub key_store: PathBuf,
    pub key_store_password: String,
    pub trust_store: PathBuf,
    pub trust_store_password: String,
}

static GLOBAL_TLS_PROPERTIES: RwLock<Option<GlobalTlsProperties>> = RwLock::new(None);

/// Point the process-wide TLS properties at the default test store.
///
/// Returns `false` (and leaves the properties untouched) when the defaults
/// carry no store. Pair every call with [`clear_global_test_tls_properties`]
/// during teardown.
#[deprecated(
    note = "global TLS state leaks between tests; build an SslConfig and use TlsContextBuilder instead"
)]
pub fn set_global_test_tls_properties(defaults: &TestStoreDefaults) -> bool {
    let Some(path) = defaults.path() else {
        tracing::warn!("No default test key store available, global TLS properties not set");
        return false;
    };

    tracing::warn!(store = %path.display(), "Setting process-wide TLS properties");
    *GLOBAL_TLS_PROPERTIES.write() = Some(GlobalTlsProperties {
        key_store: path.to_path_buf(),
        key_store_password: defaults.password().to_string(),
        trust_store: path.to_path_buf(),
        trust_store_password: defaults.password().to_string(),
    });
    true
}

/// Remove the process-wide TLS properties
#[deprecated(
    note = "global TLS state leaks between tests; build an SslConfig and use TlsContextBuilder instead"
)]
pub fn clear_global_test_tls_properties() {
    if GLOBAL_TLS_PROPERTIES.write().take().is_some() {
        tracing::debug!("Cleared process-wide TLS properties");
    }
}

/// Current process-wide TLS properties, if set
pub fn global_test_tls_properties() -> Option<GlobalTlsProperties> {
    GLOBAL_TLS_PROPERTIES.read().clone()
}
