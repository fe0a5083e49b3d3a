use std::time::Duration;
use async_trait::async_trait;
use log::{debug, error};
use thiserror::Error;

/// Error types that can occur when interacting with HTTP clients
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("HTTP request error: {0}")]
    RequestError(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Empty response from server")]
    EmptyResponse,
}

/// A raw HTTP response. Status handling is left to the caller, the catalog
/// client needs to tell 404 and 429 apart from other failures.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Value of the `Retry-After` header in seconds, if present
    pub retry_after: Option<u64>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, HttpClientError> {
        if self.body.trim().is_empty() {
            return Err(HttpClientError::EmptyResponse);
        }
        serde_json::from_str(&self.body).map_err(|e| {
            error!("Failed to parse JSON response: {}", e);
            HttpClientError::ParseError(e.to_string())
        })
    }
}

/// A trait for HTTP client implementations
///
/// Only transport failures are errors; any response that arrives, whatever
/// its status, is returned as an `HttpResponse`.
#[async_trait]
pub trait HttpClient: Send + Sync + std::fmt::Debug {
    /// Send a GET request with extra headers
    async fn get_with_headers(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpClientError>;

    /// Send a form-encoded POST request with extra headers
    async fn post_form_with_headers(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpClientError>;
}

/// An HTTP client implementation using reqwest
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with the specified timeout
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("labelmeta/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    async fn into_response(response: reqwest::Response) -> Result<HttpResponse, HttpClientError> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let body = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to read response body: {}", e);
                return Err(HttpClientError::ParseError(format!("Failed to read response body: {}", e)));
            }
        };

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

impl Default for ReqwestHttpClient {
    /// Create a new HTTP client with default timeout (10 seconds)
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get_with_headers(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpClientError> {
        debug!("GET request to {}", url);

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!("GET request failed: {}", e);
                return Err(HttpClientError::RequestError(e.to_string()));
            }
        };

        Self::into_response(response).await
    }

    async fn post_form_with_headers(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpClientError> {
        debug!("POST request to {}", url);

        let mut request = self.client.post(url).form(form);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!("POST request failed: {}", e);
                return Err(HttpClientError::RequestError(e.to_string()));
            }
        };

        Self::into_response(response).await
    }
}

/// Create a new HTTP client using the default implementation
pub fn new_http_client(timeout_secs: u64) -> std::sync::Arc<dyn HttpClient> {
    std::sync::Arc::new(ReqwestHttpClient::new(timeout_secs))
}
