//! Authenticated calls to Kibana and Elasticsearch.

use std::time::Duration;

use reqwest::{redirect, Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::metrics;
use crate::{BackendError, Result};

pub const USER_AGENT: &str = concat!("elastic-backend/", env!("CARGO_PKG_VERSION"));

const KIBANA: &str = "kibana";
const ELASTICSEARCH: &str = "elasticsearch";

/// Outcome of an upstream call that got an HTTP response.
///
/// Only a 200 counts as success. Callers that do not care why there is no
/// data use [`ApiResponse::into_option`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse<T> {
    Success(T),
    NotFound,
    UpstreamError(StatusCode),
}

impl<T> ApiResponse<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            ApiResponse::Success(value) => Some(value),
            ApiResponse::NotFound | ApiResponse::UpstreamError(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiResponse::Success(_))
    }
}

#[derive(Debug, Clone)]
pub struct ElasticClient {
    client: Client,
    timeout_ms: u64,
}

impl ElasticClient {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(USER_AGENT)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| BackendError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout_ms })
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// GET `{base_url}/{segments..}` against Kibana, URL-encoding `query`.
    pub async fn call_kibana<T: DeserializeOwned>(
        &self,
        base_url: &str,
        segments: &[&str],
        api_key: &str,
        query: Option<&[(&str, &str)]>,
    ) -> Result<ApiResponse<T>> {
        let url = endpoint_url(base_url, segments)?;
        let mut request = self
            .client
            .get(url.clone())
            .header("Content-Type", "application/json")
            .header("kbn-xsrf", "true")
            .header("Authorization", format!("ApiKey {}", api_key));
        if let Some(query) = query {
            request = request.query(query);
        }

        self.execute(KIBANA, &url, request).await
    }

    /// POST `body` as JSON to `{base_url}/{segments..}` against Elasticsearch.
    pub async fn call_elasticsearch<T, B>(
        &self,
        base_url: &str,
        segments: &[&str],
        api_key: &str,
        body: &B,
    ) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = endpoint_url(base_url, segments)?;
        let request = self
            .client
            .post(url.clone())
            .header("Authorization", format!("ApiKey {}", api_key))
            .json(body);

        self.execute(ELASTICSEARCH, &url, request).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        target: &'static str,
        url: &Url,
        request: RequestBuilder,
    ) -> Result<ApiResponse<T>> {
        debug!(target_api = target, url = %url, "Calling upstream API");
        let timer = metrics::start_upstream_timer(target);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                timer.observe_duration();
                return Err(self.transport_error(target, url, e));
            }
        };
        timer.observe_duration();

        match response.status() {
            StatusCode::OK => {
                let body = match response.json::<T>().await {
                    Ok(body) => body,
                    Err(e) if e.is_decode() && !e.is_timeout() => {
                        metrics::record_upstream(target, "invalid_body");
                        return Err(BackendError::Upstream(format!(
                            "Invalid {} response body: {}",
                            target, e
                        )));
                    }
                    Err(e) => return Err(self.transport_error(target, url, e)),
                };
                metrics::record_upstream(target, "success");
                Ok(ApiResponse::Success(body))
            }
            StatusCode::NOT_FOUND => {
                metrics::record_upstream(target, "not_found");
                debug!(target_api = target, url = %url, "Upstream returned 404");
                Ok(ApiResponse::NotFound)
            }
            status => {
                metrics::record_upstream(target, "error_status");
                warn!(target_api = target, url = %url, status = %status, "Upstream returned non-success status");
                Ok(ApiResponse::UpstreamError(status))
            }
        }
    }
}

impl ElasticClient {
    /// Timeouts may fire while sending or while reading the body.
    fn transport_error(
        &self,
        target: &'static str,
        url: &Url,
        e: reqwest::Error,
    ) -> BackendError {
        if e.is_timeout() {
            metrics::record_upstream(target, "timeout");
            return BackendError::Timeout {
                timeout_ms: self.timeout_ms,
            };
        }
        metrics::record_upstream(target, "transport_error");
        BackendError::Upstream(format!("{} request to {} failed: {}", target, url, e))
    }
}

/// Appends `segments` to the path of `base_url`, percent-encoding each one so
/// `/`, `?` and `#` inside a value stay part of that segment.
pub fn endpoint_url(base_url: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| BackendError::Config(format!("Invalid base URL '{}': {}", base_url, e)))?;

    if let Some(segment) = segments
        .iter()
        .find(|segment| segment.is_empty() || **segment == "." || **segment == "..")
    {
        return Err(BackendError::InvalidInput(format!(
            "Invalid path segment '{}'",
            segment
        )));
    }

    url.path_segments_mut()
        .map_err(|_| BackendError::Config(format!("Base URL '{}' cannot have a path", base_url)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
