use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while preparing TLS material or configuring a client
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Store file missing, corrupt, or wrong password
    #[error("Unable to load credential store from '{}': {reason}", path.display())]
    CredentialLoad { path: PathBuf, reason: String },

    /// Failure while assembling a TLS context
    #[error("{context}")]
    Configuration {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Caller asked for something its configuration does not allow
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Configuration file or environment value could not be understood
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HarnessError {
    /// Create a credential load error
    pub fn credential_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CredentialLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an underlying failure into a configuration error
    pub fn configuration(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self::Configuration {
            context: context.into(),
            source: source.into(),
        }
    }

    /// True if this error is, or wraps, a credential load failure
    pub fn is_credential_load(&self) -> bool {
        match self {
            Self::CredentialLoad { .. } => true,
            Self::Configuration { source, .. } => source
                .downcast_ref::<HarnessError>()
                .is_some_and(HarnessError::is_credential_load),
            _ => false,
        }
    }
}

/// Errors raised by [`HttpClientHandle`](crate::HttpClientHandle) requests
#[derive(Debug, Error)]
pub enum RequestError {
    /// The URL's scheme is not registered on the client
    #[error("Scheme '{0}' is not supported by this client")]
    SchemeNotSupported(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {addr} failed: {source}")]
    Tls {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_wraps_credential_load() {
        let cause = HarnessError::credential_load("/tmp/missing.p12", "not found");
        let err = HarnessError::configuration("Unable to build client TLS context", cause);

        assert!(err.is_credential_load());
        assert_eq!(err.to_string(), "Unable to build client TLS context");

        let source = std::error::Error::source(&err).expect("source kept");
        assert!(source.to_string().contains("/tmp/missing.p12"));
    }

    #[test]
    fn test_precondition_is_not_credential_load() {
        let err = HarnessError::Precondition("client auth without TLS".into());
        assert!(!err.is_credential_load());
    }
}
