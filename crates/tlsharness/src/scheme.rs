use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HarnessError;
use crate::socket::{ConnectionSocketFactory, PlainSocketFactory, TlsSocketFactory};

pub const HTTP: &str = "http";
pub const HTTPS: &str = "https";

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// A transport a client is willing to use
#[derive(Debug, Clone)]
pub struct Scheme {
    name: String,
    default_port: u16,
    socket_factory: Arc<dyn ConnectionSocketFactory>,
}

impl Scheme {
    pub fn new(
        name: impl Into<String>,
        default_port: u16,
        socket_factory: Arc<dyn ConnectionSocketFactory>,
    ) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            default_port,
            socket_factory,
        }
    }

    /// Plain HTTP on port 80
    pub fn http() -> Self {
        Self::new(HTTP, DEFAULT_HTTP_PORT, Arc::new(PlainSocketFactory))
    }

    /// HTTPS on port 443 over `factory`
    pub fn https(factory: TlsSocketFactory) -> Self {
        Self::new(HTTPS, DEFAULT_HTTPS_PORT, Arc::new(factory))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    pub fn socket_factory(&self) -> &Arc<dyn ConnectionSocketFactory> {
        &self.socket_factory
    }
}

/// Which of http/https a client can reach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeState {
    HttpOnly,
    HttpsOnly,
}

/// Schemes registered on a client, keyed by lowercase name
#[derive(Debug, Clone, Default)]
pub struct SchemeRegistry {
    schemes: HashMap<String, Scheme>,
}

impl SchemeRegistry {
    /// A registry with no schemes
    pub fn new() -> Self {
        Self::default()
    }

    /// `http` on port 80 and `https` on port 443 trusting the native roots
    pub fn with_defaults() -> Result<Self, HarnessError> {
        let mut registry = Self::new();
        registry.register(Scheme::http());
        registry.register(Scheme::https(TlsSocketFactory::native_roots()?));
        Ok(registry)
    }

    /// Register `scheme`, returning any scheme it replaced
    pub fn register(&mut self, scheme: Scheme) -> Option<Scheme> {
        tracing::debug!(scheme = scheme.name(), port = scheme.default_port(), "Registering scheme");
        self.schemes.insert(scheme.name.clone(), scheme)
    }

    /// Remove the scheme called `name`; absent schemes are not an error
    pub fn unregister(&mut self, name: &str) -> Option<Scheme> {
        let removed = self.schemes.remove(&name.to_ascii_lowercase());
        if removed.is_some() {
            tracing::debug!(scheme = name, "Unregistered scheme");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<&Scheme> {
        self.schemes.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered scheme names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.schemes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }

    /// `Some` when exactly one of http/https is registered
    pub fn state(&self) -> Option<SchemeState> {
        match (self.contains(HTTP), self.contains(HTTPS)) {
            (true, false) => Some(SchemeState::HttpOnly),
            (false, true) => Some(SchemeState::HttpsOnly),
            _ => None,
        }
    }
}
