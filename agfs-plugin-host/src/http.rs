//! Outbound HTTP for the `host_http` import.
//!
//! [`HttpClient`] is the seam between the gate and the network. The real
//! client builds a blocking `reqwest` client per call; tests substitute a
//! recording mock.

use agfs_types::{FsError, FsResult, HttpRequest, HttpResponse, Payload};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Performs one HTTP exchange. Implementations must honour `timeout` and
/// report expiry as `Timeout`.
pub trait HttpClient: Send + Sync {
    fn execute(&self, request: &HttpRequest, timeout: Duration) -> FsResult<HttpResponse>;
}

/// Default and ceiling for guest-requested timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub default: Duration,
    pub max: Duration,
}

impl HttpTimeouts {
    pub fn new(default_secs: u64, max_secs: u64) -> Self {
        let max = Duration::from_secs(max_secs.max(1));
        Self {
            default: Duration::from_secs(default_secs.max(1)).min(max),
            max,
        }
    }

    /// Absent or zero means the default; anything above the ceiling is
    /// clamped to it.
    pub fn resolve(&self, requested_secs: Option<u64>) -> Duration {
        match requested_secs {
            None | Some(0) => self.default,
            Some(secs) => Duration::from_secs(secs).min(self.max),
        }
    }
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self::new(30, 120)
    }
}

/// Blocking `reqwest` client. Must not be called from an async worker
/// thread; the plugin host only reaches it from blocking tasks.
#[derive(Debug, Default, Clone)]
pub struct ReqwestClient;

impl HttpClient for ReqwestClient {
    fn execute(&self, request: &HttpRequest, timeout: Duration) -> FsResult<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| FsError::invalid_argument(format!("bad HTTP method '{}'", request.method)))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("agfs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FsError::io(format!("http client: {e}")))?;

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.as_slice().to_vec());
        }

        debug!(method = %request.method, url = %request.url, timeout_secs = timeout.as_secs(), "Outbound HTTP");
        let resp = builder.send().map_err(|e| map_reqwest(&request.url, e))?;

        let status_code = resp.status().as_u16();
        let headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = resp.bytes().map_err(|e| map_reqwest(&request.url, e))?;

        Ok(HttpResponse {
            status_code,
            headers,
            body: Payload(body.to_vec()),
        })
    }
}

fn map_reqwest(url: &str, e: reqwest::Error) -> FsError {
    if e.is_timeout() {
        FsError::timeout(format!("{url}: {e}"))
    } else if e.is_builder() {
        FsError::invalid_argument(format!("{url}: {e}"))
    } else {
        FsError::io(format!("{url}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_resolution() {
        let t = HttpTimeouts::default();
        assert_eq!(t.resolve(None), Duration::from_secs(30));
        assert_eq!(t.resolve(Some(0)), Duration::from_secs(30));
        assert_eq!(t.resolve(Some(5)), Duration::from_secs(5));
        assert_eq!(t.resolve(Some(3600)), Duration::from_secs(120));
    }

    #[test]
    fn default_never_exceeds_max() {
        let t = HttpTimeouts::new(300, 60);
        assert_eq!(t.default, Duration::from_secs(60));
    }

    #[test]
    fn bad_method_is_invalid_argument() {
        let mut req = HttpRequest::get("http://127.0.0.1:9/");
        req.method = "GE T".to_string();
        let err = ReqwestClient.execute(&req, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind, agfs_types::ErrorKind::InvalidArgument);
    }
}
