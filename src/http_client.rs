use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;

use crate::error::TransportError;

/// Outbound API request.
///
/// Paths are relative to the transport's base URL. The request is plain data
/// so it can be replayed after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,

    /// Set once the request has been replayed after a refresh
    pub retried: bool,

    /// Short id used to correlate log lines
    pub request_id: String,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
            request_id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
        }
    }

    /// Attach a JSON body and the matching content type
    pub fn with_json<B: serde::Serialize + ?Sized>(
        mut self,
        body: &B,
    ) -> serde_json::Result<Self> {
        let bytes = serde_json::to_vec(body)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// Set `Authorization: Bearer <token>`, replacing any previous value.
    /// Tokens that are not valid header values are skipped.
    pub fn set_bearer(&mut self, token: &str) {
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(value) => {
                self.headers.insert(AUTHORIZATION, value);
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    "Token contains characters not allowed in a header, sending without it"
                );
            }
        }
    }

    /// Token carried in the bearer authorization header, if any
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// Response as received from the transport, status untouched
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// 401 and 403 are both read as an invalid or expired access token
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        )
    }

    /// Body as lossy UTF-8, for error messages
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Performs a single network round trip
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Pre-send hook, run on every request before it reaches the transport
pub trait RequestHook: Send + Sync {
    fn before_send(&self, request: &mut ApiRequest);
}

/// reqwest-backed transport with connection pooling and a fixed per-call timeout
pub struct ReqwestTransport {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL without trailing slash
    base_url: String,
}

impl ReqwestTransport {
    /// Create a new transport
    pub fn new(
        base_url: &str,
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Absolute URL for a relative API path
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url_for(&request.path);

        tracing::debug!(
            request_id = %request.request_id,
            method = %request.method,
            url = %url,
            retried = request.retried,
            "Sending HTTP request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let error = TransportError::from(e);
                tracing::warn!(
                    request_id = %request.request_id,
                    error_kind = error.kind.as_str(),
                    error = %error.message,
                    url = %url,
                    "HTTP request error"
                );
                return Err(error);
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(TransportError::from)?;

        tracing::debug!(
            request_id = %request.request_id,
            status = %status,
            "Received HTTP response"
        );

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
