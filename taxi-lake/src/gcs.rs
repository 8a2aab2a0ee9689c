//! # Google Cloud Storage client
//!
//! Implements the core [`ObjectStore`] trait against the GCS JSON API with a bearer token.
//! Uploads go through a resumable session in fixed-size chunks so large Parquet files do not
//! need to fit in one request.
//!
//! Set `STORAGE_EMULATOR_HOST` to point the client at a local emulator instead of
//! `https://storage.googleapis.com`.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode, Url};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use taxi_lake_core::contract::ObjectStore;
use taxi_lake_core::error::StoreError;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
/// Resumable upload chunk size. Must be a multiple of 256 KiB.
pub const CHUNK_SIZE: usize = 8 * 1024 * 1024;

pub struct GcsClient {
    http: Client,
    endpoint: Url,
    project_id: String,
    token: String,
    chunk_size: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketList {
    #[serde(default)]
    items: Vec<BucketResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BucketResource {
    name: String,
}

impl GcsClient {
    pub fn new(
        project_id: impl Into<String>,
        token: impl Into<String>,
        endpoint: &str,
    ) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| StoreError::Transport(format!("invalid endpoint {endpoint}: {e}")))?;
        Ok(Self {
            http: Client::new(),
            endpoint,
            project_id: project_id.into(),
            token: token.into(),
            chunk_size: CHUNK_SIZE,
        })
    }

    /// Swap the underlying HTTP client, e.g. to disable proxies or set timeouts.
    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    /// Override the resumable chunk size. GCS requires a multiple of 256 KiB except for the last chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Build a client for `project_id` using the token and optional emulator host from env.
    pub fn new_from_env(
        project_id: &str,
        token: &str,
    ) -> Result<Self, StoreError> {
        let endpoint = std::env::var("STORAGE_EMULATOR_HOST")
            .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        tracing::info!(endpoint = %endpoint, project_id, "Initialized GcsClient");
        Self::new(project_id, token, &endpoint)
    }

    fn url_with_segments(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Transport(format!("endpoint cannot be a base: {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn buckets_url(&self) -> Result<Url, StoreError> {
        let mut url = self.url_with_segments(&["storage", "v1", "b"])?;
        url.query_pairs_mut().append_pair("project", &self.project_id);
        Ok(url)
    }

    /// Metadata URL for an object; the key is a single percent-encoded path segment.
    pub fn object_url(&self, bucket: &str, key: &str) -> Result<Url, StoreError> {
        self.url_with_segments(&["storage", "v1", "b", bucket, "o", key])
    }

    pub fn resumable_upload_url(&self, bucket: &str, key: &str) -> Result<Url, StoreError> {
        let mut url = self.url_with_segments(&["upload", "storage", "v1", "b", bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("name", key);
        Ok(url)
    }

    async fn start_session(&self, bucket: &str, key: &str, total: u64) -> Result<Url, StoreError> {
        let url = self.resumable_upload_url(bucket, key)?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header("X-Upload-Content-Length", total)
            .header(header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(unexpected(response).await);
        }
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StoreError::Transport("resumable session without Location header".into()))?;
        Url::parse(location).map_err(|e| StoreError::Transport(format!("bad session url: {e}")))
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

async fn unexpected(response: reqwest::Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StoreError::Response { status, body }
}

/// `Content-Range` header value for one chunk of a resumable upload.
pub fn content_range(start: u64, len: usize, total: u64) -> String {
    if len == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {}-{}/{}", start, start + len as u64 - 1, total)
    }
}

/// Bytes persisted by the server according to a 308 `Range` header (`bytes=0-N`).
/// A missing header means nothing was persisted yet.
pub fn persisted_bytes(range: Option<&str>) -> u64 {
    range
        .and_then(|r| r.trim().strip_prefix("bytes="))
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, end)| end.trim().parse::<u64>().ok())
        .map(|end| end + 1)
        .unwrap_or(0)
}

async fn read_chunk(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl ObjectStore for GcsClient {
    async fn list_buckets(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.buckets_url()?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let response = self
                .http
                .get(url)
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(transport)?;
            if !response.status().is_success() {
                let err = unexpected(response).await;
                tracing::error!(error = %err, "Failed to list buckets");
                return Err(err);
            }
            let page: BucketList = response.json().await.map_err(transport)?;
            names.extend(page.items.into_iter().map(|b| b.name));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        tracing::debug!(count = names.len(), "Listed buckets");
        Ok(names)
    }

    async fn create_bucket(&self, name: &str) -> Result<(), StoreError> {
        tracing::info!(bucket = name, project_id = %self.project_id, "Creating bucket");
        let response = self
            .http
            .post(self.buckets_url()?)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            s if s.is_success() => Ok(()),
            // 409: name in use (by anyone); 403: name reserved or owned elsewhere.
            StatusCode::CONFLICT | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(bucket = name, body = %body, "Bucket name unavailable");
                Err(StoreError::NameTaken(name.to_string()))
            }
            _ => Err(unexpected(response).await),
        }
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let response = self
            .http
            .get(self.object_url(bucket, key)?)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(unexpected(response).await),
        }
    }

    async fn upload(&self, bucket: &str, key: &str, local_path: &Path) -> Result<(), StoreError> {
        let local_err = |e: std::io::Error| StoreError::LocalFile {
            path: local_path.to_path_buf(),
            source: e,
        };
        let mut file = tokio::fs::File::open(local_path).await.map_err(local_err)?;
        let total = file.metadata().await.map_err(local_err)?.len();

        let session = self.start_session(bucket, key, total).await?;
        tracing::info!(bucket, key, bytes = total, "Started resumable upload");

        let mut buf = vec![0u8; self.chunk_size];
        let mut offset: u64 = 0;
        loop {
            let len = read_chunk(&mut file, &mut buf).await.map_err(local_err)?;
            let response = self
                .http
                .put(session.clone())
                .header(header::CONTENT_RANGE, content_range(offset, len, total))
                .body(buf[..len].to_vec())
                .send()
                .await
                .map_err(transport)?;
            let status = response.status();

            if status.is_success() {
                tracing::info!(bucket, key, bytes = total, "Upload session finalized");
                return Ok(());
            }
            // 308 Resume Incomplete: continue from what the server actually persisted.
            if status.as_u16() == 308 && len > 0 {
                let range = response
                    .headers()
                    .get(header::RANGE)
                    .and_then(|v| v.to_str().ok());
                let persisted = persisted_bytes(range);
                if persisted <= offset {
                    return Err(StoreError::Transport(format!(
                        "resumable upload made no progress at byte {offset}"
                    )));
                }
                if persisted != offset + len as u64 {
                    tracing::warn!(sent = offset + len as u64, persisted, "Server kept a partial chunk, resending the rest");
                    file.seek(SeekFrom::Start(persisted)).await.map_err(local_err)?;
                }
                offset = persisted;
                tracing::debug!(bytes = offset, total, "Chunk accepted");
                continue;
            }
            return Err(unexpected(response).await);
        }
    }
}
