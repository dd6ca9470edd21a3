//! Authenticated JSON transport to the control plane.
//!
//! Every request carries the API key header and a JSON content type. Any
//! status >= 400 is an error regardless of body, and the body is kept in the
//! error for diagnosis.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ProvisionError, Result};

use super::wire::Envelope;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Per-request correlation id, echoed in logs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_ERROR_BODY: usize = 2048;

/// Connection settings for [`HttpTransport`].
#[derive(Clone)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://api.gpcn.example`.
    pub host: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl ApiConfig {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("host", &self.host)
            .field("api_key", &"****")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// HTTP sender bound to one control plane.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base: String,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(ProvisionError::InvalidConfig("host is empty".to_string()));
        }
        if config.api_key.trim().is_empty() {
            return Err(ProvisionError::InvalidConfig("api key is empty".to_string()));
        }
        Url::parse(&config.host)
            .map_err(|e| ProvisionError::InvalidConfig(format!("host '{}' is not a valid URL: {}", config.host, e)))?;

        let mut api_key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| ProvisionError::InvalidConfig("api key contains invalid characters".to_string()))?;
        api_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, api_key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProvisionError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base: config.host.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Send a request and return the raw body of a successful response.
    pub async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<String> {
        let url = format!("{}{}", self.base, path);
        let request_id = Uuid::new_v4().to_string();
        debug!(method = %method, path = %path, request_id = %request_id, "Sending request");

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(REQUEST_ID_HEADER, request_id.as_str());
        if let Some(body) = body {
            request = request.json(body);
        }

        let transport = |source: reqwest::Error| ProvisionError::Transport {
            method: method.to_string(),
            path: path.to_string(),
            source,
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;

        if status.as_u16() >= 400 {
            warn!(
                method = %method,
                path = %path,
                request_id = %request_id,
                status = status.as_u16(),
                "Request failed"
            );
            let mut body = text;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(ProvisionError::HttpStatus {
                method: method.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(text)
    }

    /// Send a request and unwrap the response envelope. `None` when the
    /// envelope carries no data.
    pub async fn call<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<T>> {
        let text = self.send(method, path, body).await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|e| ProvisionError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        if !envelope.success {
            return Err(ProvisionError::Rejected {
                path: path.to_string(),
                message: envelope.message,
            });
        }
        Ok(envelope.data)
    }

    /// Like [`call`](Self::call), but the data is required.
    pub async fn fetch<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<&Value>) -> Result<T> {
        self.call(method, path, body).await?.ok_or_else(|| ProvisionError::Decode {
            path: path.to_string(),
            message: "response carried no data".to_string(),
        })
    }
}
