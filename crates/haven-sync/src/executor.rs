//! # Request Executor
//!
//! The seam between the engines and HTTP. The queue engine hands every
//! operation to a [`RequestExecutor`]; the cache engine issues its GET
//! fetches through the same trait.
//!
//! ```text
//! QueuedOperation ──► HttpRequest::for_operation ──► RequestExecutor::execute
//!                                                         │
//!                          ┌──────────────────────────────┴───────────┐
//!                          ▼                                          ▼
//!                  Ok(HttpResponse{status, body})           Err(TransportError)
//!                  2xx → completed                          timeout / connect / other
//!                  else → failed (retry)                    → failed (retry)
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use haven_core::{HttpMethod, QueuedOperation};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult, TransportError};

// =============================================================================
// Request / Response
// =============================================================================

/// One HTTP-like request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Absolute URL, or an endpoint relative to the executor's base URL.
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        HttpRequest {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Builds the request that delivers `op`.
    pub fn for_operation(op: &QueuedOperation) -> Self {
        HttpRequest {
            method: op.http_method(),
            url: op.endpoint.clone(),
            headers: op.headers.clone(),
            body: op.payload.clone(),
        }
    }
}

/// Status code and raw body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status,
            body: body.into(),
        }
    }

    /// 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// =============================================================================
// Executor Trait
// =============================================================================

/// Performs one request.
///
/// Any response, whatever its status, is `Ok`; `Err` means no response was
/// obtained.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

// =============================================================================
// reqwest Executor
// =============================================================================

/// [`RequestExecutor`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: Option<Url>,
}

impl HttpExecutor {
    /// Creates an executor. Relative endpoints are joined onto `base_url`.
    pub fn new(base_url: Option<&str>, request_timeout: Duration) -> SyncResult<Self> {
        let base_url = match base_url {
            Some(raw) => {
                let mut url = Url::parse(raw)?;
                if !url.path().ends_with('/') {
                    let path = format!("{}/", url.path());
                    url.set_path(&path);
                }
                Some(url)
            }
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(HttpExecutor { client, base_url })
    }

    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Self::new(config.base_url(), config.request_timeout())
    }

    /// Resolves an endpoint to an absolute URL.
    pub fn resolve(&self, endpoint: &str) -> Result<Url, TransportError> {
        if let Ok(url) = Url::parse(endpoint) {
            return Ok(url);
        }

        let base = self.base_url.as_ref().ok_or_else(|| {
            TransportError::Other(format!(
                "relative endpoint '{}' without a base URL",
                endpoint
            ))
        })?;

        base.join(endpoint.trim_start_matches('/'))
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self.resolve(&request.url)?;
        debug!(method = request.method.as_str(), %url, "Executing request");

        let mut builder = self.client.request(to_reqwest_method(request.method), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_core::{NewOperation, OperationType};

    #[test]
    fn test_success_range() {
        assert!(HttpResponse::new(200, Vec::new()).is_success());
        assert!(HttpResponse::new(204, Vec::new()).is_success());
        assert!(!HttpResponse::new(304, Vec::new()).is_success());
        assert!(!HttpResponse::new(500, Vec::new()).is_success());
    }

    #[test]
    fn test_request_for_operation() {
        let op = QueuedOperation::new(
            NewOperation::new(OperationType::Delete, "/journals/9").header("X-Client", "ios"),
            chrono::Utc::now(),
        );
        let request = HttpRequest::for_operation(&op);

        assert_eq!(request.method, HttpMethod::Delete);
        assert_eq!(request.url, "/journals/9");
        assert_eq!(request.headers.get("X-Client").map(String::as_str), Some("ios"));
        assert!(request.body.is_none());
    }

    #[test]
    fn test_resolve_against_base() {
        let executor =
            HttpExecutor::new(Some("https://api.haven.app/v1"), Duration::from_secs(5)).unwrap();

        assert_eq!(
            executor.resolve("/checkins").unwrap().as_str(),
            "https://api.haven.app/v1/checkins"
        );
        assert_eq!(
            executor.resolve("tools/3").unwrap().as_str(),
            "https://api.haven.app/v1/tools/3"
        );
        assert_eq!(
            executor.resolve("https://cdn.haven.app/a.m4a").unwrap().host_str(),
            Some("cdn.haven.app")
        );
    }

    #[test]
    fn test_relative_endpoint_without_base() {
        let executor = HttpExecutor::new(None, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            executor.resolve("/checkins"),
            Err(TransportError::Other(_))
        ));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpExecutor::new(Some("::nope"), Duration::from_secs(5)),
            Err(SyncError::InvalidUrl(_))
        ));
    }
}
