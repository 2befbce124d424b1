//! Minimal HTTP/1.1 client whose transports come from a [`SchemeRegistry`]

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::header::{HeaderMap, HOST};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;

use crate::error::{HarnessError, RequestError};
use crate::scheme::SchemeRegistry;

/// A completed response, body fully read
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Body as UTF-8, lossy
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// An HTTP client that only reaches schemes present in its registry.
///
/// Each request opens a fresh connection through the scheme's socket
/// factory. Mutating the registry while requests are in flight requires
/// exclusive access, so callers serialize configuration themselves.
#[derive(Debug, Clone, Default)]
pub struct HttpClientHandle {
    registry: SchemeRegistry,
}

impl HttpClientHandle {
    /// A client with the default `http` and `https` schemes registered
    pub fn new() -> Result<Self, HarnessError> {
        Ok(Self::with_registry(SchemeRegistry::with_defaults()?))
    }

    pub fn with_registry(registry: SchemeRegistry) -> Self {
        Self { registry }
    }

    pub fn scheme_registry(&self) -> &SchemeRegistry {
        &self.registry
    }

    pub fn scheme_registry_mut(&mut self) -> &mut SchemeRegistry {
        &mut self.registry
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, RequestError> {
        self.request(Method::GET, url, Bytes::new()).await
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Bytes,
    ) -> Result<HttpResponse, RequestError> {
        let uri: Uri = url.parse().map_err(|e: hyper::http::uri::InvalidUri| {
            RequestError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let scheme_name = uri.scheme_str().ok_or_else(|| RequestError::InvalidUrl {
            url: url.to_string(),
            reason: "missing scheme".to_string(),
        })?;
        let scheme = self
            .registry
            .get(scheme_name)
            .ok_or_else(|| RequestError::SchemeNotSupported(scheme_name.to_ascii_lowercase()))?;

        let host_header = host_header(&uri).ok_or_else(|| RequestError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        })?;
        // IPv6 literals arrive bracketed
        let host = uri
            .host()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']');
        let port = uri.port_u16().unwrap_or(scheme.default_port());

        let conn = scheme.socket_factory().connect(host, port).await?;
        let (mut sender, connection) = http1::handshake(TokioIo::new(conn)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("Connection closed with error: {}", e);
            }
        });

        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, host_header)
            .body(Full::new(body))
            .map_err(|e| RequestError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!("{} {} via {}", request.method(), url, scheme.name());
        let response = sender.send_request(request).await?;

        let status = response.status();
        let headers = header_pairs(response.headers());
        let body = response.into_body().collect().await?.to_bytes();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// `Host` header value: host plus any explicit port, never user info
fn host_header(uri: &Uri) -> Option<String> {
    let host = uri.host()?;
    Some(match uri.port_u16() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| {
            (
                k.to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::Scheme;
    use hyper::header::HeaderValue;

    #[tokio::test]
    async fn test_unregistered_scheme_fails_before_connecting() {
        let mut registry = SchemeRegistry::new();
        registry.register(Scheme::http());
        let client = HttpClientHandle::with_registry(registry);

        let result = client.get("https://127.0.0.1:1/").await;
        assert!(matches!(result, Err(RequestError::SchemeNotSupported(s)) if s == "https"));
    }

    #[tokio::test]
    async fn test_empty_registry_supports_nothing() {
        let client = HttpClientHandle::default();
        let result = client.get("http://127.0.0.1:1/").await;
        assert!(matches!(result, Err(RequestError::SchemeNotSupported(_))));
    }

    #[tokio::test]
    async fn test_relative_url_is_invalid() {
        let client = HttpClientHandle::default();
        let result = client.get("/just/a/path").await;
        assert!(matches!(result, Err(RequestError::InvalidUrl { .. })));
    }

    #[test]
    fn test_host_header_drops_user_info() {
        let uri: Uri = "https://user:pw@example.test/solr".parse().unwrap();
        assert_eq!(host_header(&uri).as_deref(), Some("example.test"));

        let uri: Uri = "https://user:pw@127.0.0.1:8983/solr".parse().unwrap();
        assert_eq!(host_header(&uri).as_deref(), Some("127.0.0.1:8983"));
    }

    #[test]
    fn test_host_header_keeps_ipv6_brackets() {
        let uri: Uri = "http://[::1]:8080/".parse().unwrap();
        assert_eq!(host_header(&uri).as_deref(), Some("[::1]:8080"));
    }

    #[test]
    fn test_non_utf8_header_values_are_kept() {
        let mut headers = HeaderMap::new();
        headers.insert("x-raw", HeaderValue::from_bytes(b"caf\xe9").unwrap());
        headers.insert("x-plain", HeaderValue::from_static("ok"));

        let pairs = header_pairs(&headers);
        let raw = pairs.iter().find(|(k, _)| k == "x-raw").unwrap();
        assert_eq!(raw.1, "caf\u{fffd}");
        assert!(pairs.contains(&("x-plain".to_string(), "ok".to_string())));
    }
}
