//! Proxy client for remote alerting backends.
//!
//! Requests are rebuilt against the datasource URL with the caller's
//! credentials stripped and the datasource's own credentials applied.
//! Success bodies are decoded into the same types the local engine returns;
//! error responses are passed through untouched.

use std::time::Duration;

use alerting_core::Datasource;
use axum::http::{HeaderMap, HeaderName, Method, header};
use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::ProxyConfig;
use crate::error::{ApiError, ApiResult};

/// Incoming headers never forwarded upstream.
const STRIPPED_HEADERS: [HeaderName; 8] = [
    header::AUTHORIZATION,
    header::COOKIE,
    header::HOST,
    header::CONTENT_LENGTH,
    header::CONTENT_TYPE,
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::ACCEPT_ENCODING,
];

/// Removes headers that must not reach a proxied backend.
#[must_use]
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in &STRIPPED_HEADERS {
        out.remove(name);
    }
    out.remove(crate::extract::ORG_ID_HEADER);
    out
}

/// Body of a proxied request.
#[derive(Debug, Clone)]
pub enum ProxyBody {
    /// No body.
    Empty,
    /// JSON body.
    Json(Bytes),
    /// YAML body.
    Yaml(Bytes),
}

impl ProxyBody {
    /// Serializes a value as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::BadRequest` if serialization fails.
    pub fn json<T: Serialize>(value: &T) -> ApiResult<Self> {
        Ok(Self::Json(Bytes::from(serde_json::to_vec(value)?)))
    }

    /// Serializes a value as YAML.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::BadRequest` if serialization fails.
    pub fn yaml<T: Serialize>(value: &T) -> ApiResult<Self> {
        let text = serde_yaml::to_string(value).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok(Self::Yaml(Bytes::from(text)))
    }
}

/// A request to a proxied backend.
///
/// The path is held as segments below the datasource URL. Fixed parts come
/// from [`ProxyRequest::new`]; caller supplied values such as ids and
/// namespaces are added with [`ProxyRequest::segment`] and are
/// percent-encoded, `/` included, when the URL is built.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// HTTP method.
    pub method: Method,
    /// Path segments below the datasource URL.
    pub segments: Vec<String>,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Headers forwarded from the caller.
    pub headers: HeaderMap,
    /// Body.
    pub body: ProxyBody,
}

impl ProxyRequest {
    /// A request for a fixed path such as `/api/v2/alerts`.
    pub fn new(method: Method, path: &str, headers: HeaderMap) -> Self {
        Self {
            method,
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query: Vec::new(),
            headers,
            body: ProxyBody::Empty,
        }
    }

    /// Appends one path segment.
    #[must_use]
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Adds query parameters.
    #[must_use]
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: ProxyBody) -> Self {
        self.body = body;
        self
    }

    /// Builds the target URL below the datasource URL.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::BadRequest`] for empty, `.` or `..` segments and
    /// [`ApiError::UpstreamUnavailable`] if the datasource URL is unusable.
    pub fn url(&self, ds: &Datasource) -> ApiResult<Url> {
        if let Some(bad) = self
            .segments
            .iter()
            .find(|s| matches!(s.as_str(), "" | "." | ".."))
        {
            return Err(ApiError::BadRequest(format!("invalid path segment {bad:?}")));
        }
        let mut url = Url::parse(&ds.url).map_err(|e| {
            ApiError::UpstreamUnavailable(format!("datasource {} has an invalid url: {e}", ds.uid))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                ApiError::UpstreamUnavailable(format!("datasource {} url cannot have a path", ds.uid))
            })?
            .pop_if_empty()
            .extend(&self.segments);
        Ok(url)
    }
}

/// Shared pooled HTTP client for proxied calls.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: Client,
    timeout: Duration,
}

impl ProxyClient {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new(config: &ProxyConfig) -> ApiResult<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| ApiError::Server(format!("failed to build proxy client: {e}")))?;
        Ok(Self::with_client(client, config.timeout))
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// The underlying client, shared with other outbound callers.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Sends a request and returns the success body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Upstream`] for non-success responses,
    /// [`ApiError::UpstreamTimeout`] when the deadline passes and
    /// [`ApiError::UpstreamUnavailable`] for transport failures.
    pub async fn send(&self, ds: &Datasource, request: ProxyRequest) -> ApiResult<Bytes> {
        let url = request.url(ds)?;
        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .timeout(self.timeout)
            .headers(request.headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(auth) = &ds.basic_auth {
            builder = builder.basic_auth(&auth.username, Some(&auth.password));
        }
        for (name, value) in &ds.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            ProxyBody::Empty => builder,
            ProxyBody::Json(body) => builder.header(header::CONTENT_TYPE, "application/json").body(body),
            ProxyBody::Yaml(body) => builder.header(header::CONTENT_TYPE, "application/yaml").body(body),
        };

        let response = builder.send().await.map_err(|e| {
            warn!(datasource = %ds.uid, url = %url, error = %e, "proxied request failed");
            if e.is_timeout() {
                ApiError::UpstreamTimeout
            } else if e.is_connect() {
                ApiError::UpstreamUnavailable("connection refused or unreachable".to_string())
            } else {
                ApiError::UpstreamUnavailable("request failed".to_string())
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::UpstreamTimeout
            } else {
                ApiError::UpstreamUnavailable("response body error".to_string())
            }
        })?;

        debug!(
            datasource = %ds.uid,
            method = %request.method,
            path = %url.path(),
            status = status.as_u16(),
            "proxied request completed"
        );

        if !status.is_success() {
            return Err(ApiError::Upstream {
                status: status.as_u16(),
                content_type,
                body,
            });
        }
        Ok(body)
    }

    /// Sends a request and decodes a JSON success body.
    ///
    /// # Errors
    ///
    /// See [`ProxyClient::send`]; undecodable bodies are
    /// [`ApiError::InvalidUpstreamResponse`].
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        ds: &Datasource,
        request: ProxyRequest,
    ) -> ApiResult<T> {
        let body = self.send(ds, request).await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidUpstreamResponse(e.to_string()))
    }

    /// Sends a request and decodes a YAML success body.
    ///
    /// # Errors
    ///
    /// See [`ProxyClient::send_json`].
    pub async fn send_yaml<T: DeserializeOwned>(
        &self,
        ds: &Datasource,
        request: ProxyRequest,
    ) -> ApiResult<T> {
        let body = self.send(ds, request).await?;
        serde_yaml::from_slice(&body).map_err(|e| ApiError::InvalidUpstreamResponse(e.to_string()))
    }
}
