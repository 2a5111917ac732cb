// HTTP transport abstraction
// The gateway and refresh coordinator talk to the network only through `Transport`

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Whether ambient credentials (cookies) travel with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsPolicy {
    #[default]
    Omit,
    Include,
}

/// A fully buffered outbound request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub credentials: CredentialsPolicy,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            credentials: CredentialsPolicy::Omit,
        }
    }

    /// Attach a JSON body and the matching Content-Type
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, TransportError> {
        let bytes = serde_json::to_vec(body).map_err(|e| TransportError {
            kind: "encode_error",
            message: e.to_string(),
        })?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    pub fn with_credentials(mut self, policy: CredentialsPolicy) -> Self {
        self.credentials = policy;
        self
    }

    /// Set a header, replacing any previous value
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Path portion of the URL, used for logging and test matching
    pub fn path(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        without_scheme
            .find('/')
            .map(|idx| &without_scheme[idx..])
            .unwrap_or("/")
    }
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: Bytes) -> Self {
        Self { status, body }
    }

    /// Build a JSON response (used by in-process transports)
    pub fn from_json(status: StatusCode, value: &Value) -> Self {
        Self::new(status, Bytes::from(value.to_string()))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Parse the body as JSON, substituting an error placeholder when it is not JSON
    pub fn json_or_placeholder(&self) -> Value {
        if self.body.is_empty() {
            return Value::Object(Default::default());
        }
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| serde_json::json!({ "error": "Invalid response" }))
    }
}

/// Network-level failure (no HTTP status was received)
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: &'static str,
    pub message: String,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connection_failed"
        } else if e.is_request() {
            "request_error"
        } else if e.is_body() {
            "body_error"
        } else if e.is_decode() {
            "decode_error"
        } else {
            "unknown"
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

/// Executes a single HTTP exchange
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// reqwest-backed transport
///
/// Holds two clients: one with a cookie jar for `CredentialsPolicy::Include`
/// and one without for requests that must not carry cookies.
pub struct ReqwestTransport {
    plain: Client,
    with_cookies: Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: u64, request_timeout: u64) -> anyhow::Result<Self> {
        use anyhow::Context;

        let plain = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let with_cookies = Client::builder()
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create cookie-aware HTTP client")?;

        Ok(Self {
            plain,
            with_cookies,
        })
    }

    fn client_for(&self, policy: CredentialsPolicy) -> &Client {
        match policy {
            CredentialsPolicy::Omit => &self.plain,
            CredentialsPolicy::Include => &self.with_cookies,
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let client = self.client_for(request.credentials);

        let mut builder = client
            .request(request.method.clone(), &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            let err = TransportError::from(e);
            tracing::warn!(
                error_kind = err.kind,
                error = %err.message,
                url = %request.url,
                "HTTP request error"
            );
            err
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(TransportError::from)?;

        tracing::debug!(status = %status, url = %request.url, "Received HTTP response");

        Ok(ApiResponse::new(status, body))
    }
}
