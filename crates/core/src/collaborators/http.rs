//! JSON-over-HTTP processor and index writer.
//!
//! Endpoints, relative to the backend base URL:
//! - `POST /process` with a [`WorkItem`], returns `{"records": [...]}`
//! - `PUT /collections/{name}` with `{"dimensions": n}`
//! - `POST /collections/{name}/records` with `{"records": [...]}`
//! - `DELETE /collections/{name}/files/{file_id}`
//! - `DELETE /collections/{name}/records`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CollaboratorError, ContentProcessor, IndexRecord, IndexWriter, WorkItem};
use crate::config::BackendConfig;

/// Shared request plumbing for both backend clients.
#[derive(Clone)]
struct BackendClient {
    client: Client,
    base: Url,
    api_key: Option<String>,
}

impl BackendClient {
    fn new(config: &BackendConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                CollaboratorError::Permanent(format!("Failed to create HTTP client: {}", e))
            })?;
        let base = Url::parse(&config.url).map_err(|e| {
            CollaboratorError::Permanent(format!("Invalid backend url '{}': {}", config.url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(CollaboratorError::Permanent(format!(
                "Backend url '{}' cannot be a base",
                config.url
            )));
        }

        Ok(Self {
            client,
            base,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    /// Append path segments, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<reqwest::Response, CollaboratorError> {
        let url = self.url(segments);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, url);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                CollaboratorError::Transient(e.to_string())
            } else {
                CollaboratorError::Permanent(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!(
            "HTTP {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        );
        Err(classify_status(status, message))
    }
}

/// 5xx, 408 and 429 are retryable; every other failure status is not.
fn classify_status(status: StatusCode, message: String) -> CollaboratorError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        CollaboratorError::Transient(message)
    } else {
        CollaboratorError::Permanent(message)
    }
}

#[derive(Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    records: Vec<IndexRecord>,
}

#[derive(Serialize)]
struct RecordsBody<'a> {
    records: &'a [IndexRecord],
}

#[derive(Serialize)]
struct CollectionBody {
    dimensions: u32,
}

/// Sends items to the backend's `/process` endpoint.
pub struct HttpContentProcessor {
    backend: BackendClient,
}

impl HttpContentProcessor {
    pub fn new(config: &BackendConfig) -> Result<Self, CollaboratorError> {
        Ok(Self {
            backend: BackendClient::new(config)?,
        })
    }
}

#[async_trait]
impl ContentProcessor for HttpContentProcessor {
    async fn process(&self, item: &WorkItem) -> Result<Vec<IndexRecord>, CollaboratorError> {
        let response = self
            .backend
            .send(Method::POST, &["process"], Some(item))
            .await?;
        let parsed: ProcessResponse = response.json().await.map_err(|e| {
            CollaboratorError::Permanent(format!("Failed to parse process response: {}", e))
        })?;
        Ok(parsed.records)
    }
}

/// Writes records through the backend's collection endpoints.
pub struct HttpIndexWriter {
    backend: BackendClient,
}

impl HttpIndexWriter {
    pub fn new(config: &BackendConfig) -> Result<Self, CollaboratorError> {
        Ok(Self {
            backend: BackendClient::new(config)?,
        })
    }
}

#[async_trait]
impl IndexWriter for HttpIndexWriter {
    async fn ensure_collection(&self, name: &str, dimensions: u32) -> Result<(), CollaboratorError> {
        self.backend
            .send(
                Method::PUT,
                &["collections", name],
                Some(&CollectionBody { dimensions }),
            )
            .await?;
        Ok(())
    }

    async fn upsert(&self, name: &str, records: &[IndexRecord]) -> Result<(), CollaboratorError> {
        if records.is_empty() {
            return Ok(());
        }
        self.backend
            .send(
                Method::POST,
                &["collections", name, "records"],
                Some(&RecordsBody { records }),
            )
            .await?;
        Ok(())
    }

    async fn delete_file(&self, name: &str, file_id: &str) -> Result<(), CollaboratorError> {
        self.backend
            .send::<()>(Method::DELETE, &["collections", name, "files", file_id], None)
            .await?;
        Ok(())
    }

    async fn clear_collection(&self, name: &str) -> Result<(), CollaboratorError> {
        self.backend
            .send::<()>(Method::DELETE, &["collections", name, "records"], None)
            .await?;
        Ok(())
    }
}
