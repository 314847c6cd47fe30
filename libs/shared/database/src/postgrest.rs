use rand::Rng;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use shared_config::AppConfig;

/// How many extra attempts a contended write gets before the error is
/// surfaced to the caller.
const MAX_RETRIES: u32 = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("store conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("integrity violated: {0}")]
    Integrity(String),

    #[error("store rejected credentials: {0}")]
    Unauthorized(String),

    #[error("unexpected store response: {0}")]
    Decode(String),
}

impl StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

/// PostgREST client over the clinic's relational store. All core persistence
/// goes through here with the service-role key; caller identity is resolved
/// by the auth collaborator before requests reach the core.
pub struct StoreClient {
    client: Client,
    base_url: String,
    service_key: String,
}

impl StoreClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.database_url.clone(),
            service_key: config.database_service_key.clone(),
        }
    }

    fn headers(&self, extra: Option<HeaderMap>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(key) = HeaderValue::from_str(&self.service_key) {
            headers.insert("apikey", key);
        }
        if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", self.service_key)) {
            headers.insert(AUTHORIZATION, bearer);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(extra) = extra {
            headers.extend(extra);
        }

        headers
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, StoreError>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(method, path, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, StoreError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Store request {} {}", method, url);

        let mut req = self
            .client
            .request(method, &url)
            .headers(self.headers(extra_headers));

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Store error ({}): {}", status, error_text);

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    StoreError::Unauthorized(error_text)
                }
                StatusCode::NOT_FOUND => StoreError::NotFound(error_text),
                StatusCode::CONFLICT => StoreError::Conflict(error_text),
                StatusCode::UNPROCESSABLE_ENTITY => StoreError::Integrity(error_text),
                s if s.is_server_error() => StoreError::Unavailable(error_text),
                _ => StoreError::Transport(format!("{}: {}", status, error_text)),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    pub async fn select(&self, path: &str) -> Result<Vec<Value>, StoreError> {
        self.request(Method::GET, path, None).await
    }

    /// INSERT returning the created rows.
    pub async fn insert_returning(
        &self,
        path: &str,
        body: Value,
    ) -> Result<Vec<Value>, StoreError> {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        self.request_with_headers(Method::POST, path, Some(body), Some(headers))
            .await
    }

    /// INSERT that silently skips rows violating a unique constraint.
    /// An empty result means every row was a duplicate.
    pub async fn insert_ignore_duplicates(
        &self,
        path: &str,
        body: Value,
    ) -> Result<Vec<Value>, StoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=ignore-duplicates,return=representation"),
        );
        self.request_with_headers(Method::POST, path, Some(body), Some(headers))
            .await
    }

    /// Conditional UPDATE returning the rows it touched. With a filter such
    /// as `...&sent=eq.false` the returned row count doubles as the affected
    /// row count, which makes this the at-most-once claim primitive: zero
    /// rows back means another worker got there first.
    pub async fn update_where(&self, path: &str, body: Value) -> Result<Vec<Value>, StoreError> {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        self.request_with_headers(Method::PATCH, path, Some(body), Some(headers))
            .await
    }

    pub async fn delete_where(&self, path: &str) -> Result<(), StoreError> {
        // Without the representation preference PostgREST answers 204 with
        // an empty body, which the JSON decode would refuse.
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        let _: Vec<Value> = self
            .request_with_headers(Method::DELETE, path, None, Some(headers))
            .await?;
        Ok(())
    }

    /// Retry a contended write with jittered backoff, at most twice.
    pub async fn update_where_with_retry(
        &self,
        path: &str,
        body: Value,
    ) -> Result<Vec<Value>, StoreError> {
        let mut attempt = 0;
        loop {
            match self.update_where(path, body.clone()).await {
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let jitter_ms = rand::thread_rng().gen_range(50..250) * attempt as u64;
                    warn!(
                        "Store write contention on {} (attempt {}), retrying in {}ms",
                        path, attempt, jitter_ms
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(jitter_ms)).await;
                }
                other => return other,
            }
        }
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}
