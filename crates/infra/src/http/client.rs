use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response};
use thiserror::Error;
use tracing::debug;

/// Transport-level failures, before any HTTP status is known
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid request: {0}")]
    Build(String),
}

/// Thin `reqwest` wrapper with a per-client timeout and default headers.
///
/// Sends exactly once; retrying belongs to the caller's retry policy.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    timeout: Duration,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, HttpError> {
        Self::builder().build()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Execute the provided request builder once.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, HttpError> {
        let request = builder.build().map_err(|err| HttpError::Build(err.to_string()))?;
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "sending HTTP request");

        match self.client.execute(request).await {
            Ok(response) => {
                debug!(%method, %url, status = %response.status(), "received HTTP response");
                Ok(response)
            }
            Err(err) => {
                debug!(%method, %url, error = %err, "HTTP request failed");
                Err(self.classify(err))
            }
        }
    }

    fn classify(&self, err: reqwest::Error) -> HttpError {
        if err.is_timeout() {
            return HttpError::Timeout(self.timeout);
        }
        if err.is_builder() {
            return HttpError::Build(err.to_string());
        }
        if err.is_connect() {
            return HttpError::Connect(err.to_string());
        }
        HttpError::Request(err.to_string())
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    user_agent: Option<String>,
    default_headers: HeaderMap,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), user_agent: None, default_headers: HeaderMap::new() }
    }
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers.extend(headers);
        self
    }

    /// Add one default header, validating name and value
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, HttpError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| HttpError::Build(format!("invalid header name {name:?}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| HttpError::Build(format!("invalid value for header {name}: {err}")))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    pub fn build(self) -> Result<HttpClient, HttpError> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if !self.default_headers.is_empty() {
            builder = builder.default_headers(self.default_headers);
        }

        let client = builder.build().map_err(|err| HttpError::Build(err.to_string()))?;

        Ok(HttpClient { client, timeout: self.timeout })
    }
}
