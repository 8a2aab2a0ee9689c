use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::config::{DownloadSettings, UrlLayout};
use crate::contract::Fetcher;
use crate::error::FetchError;
use crate::task::TransferTask;

/// Downloads trip files over HTTP from one of the public mirrors.
///
/// Bodies are streamed into a uniquely named `.part` file beside `dest` and renamed into
/// place once complete, so a partial download never shows up at the canonical path.
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    layout: UrlLayout,
}

impl HttpFetcher {
    pub fn new(settings: &DownloadSettings) -> Self {
        Self::with_client(Client::new(), settings)
    }

    pub fn with_client(client: Client, settings: &DownloadSettings) -> Self {
        Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            layout: settings.layout,
        }
    }

    /// Source URL for a task. Named tasks are resolved against the base url directly.
    pub fn url_for(&self, task: &TransferTask) -> String {
        let file_name = task.remote_key();
        match (self.layout, task.kind()) {
            (UrlLayout::PerKind, Some(kind)) => {
                format!("{}/{}/{}", self.base_url, kind, file_name)
            }
            _ => format!("{}/{}", self.base_url, file_name),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, task: &TransferTask, dest: &Path) -> Result<PathBuf, FetchError> {
        let url = self.url_for(task);
        info!(url = %url, dest = %dest.display(), "[DOWNLOAD] Fetching trip file");

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::Write {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(url = %url, status = %status, "[DOWNLOAD] Mirror returned an error status");
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let part_path = part_path_for(dest);
        let write_err = |path: &Path, e: std::io::Error| FetchError::Write {
            path: path.to_path_buf(),
            source: e,
        };
        let mut file = tokio::fs::File::create(&part_path)
            .await
            .map_err(|e| write_err(&part_path, e))?;

        let mut written: u64 = 0;
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    error!(url = %url, error = %e, "[DOWNLOAD] Body stream failed");
                    drop(file);
                    let _ = tokio::fs::remove_file(&part_path).await;
                    return Err(FetchError::Request {
                        url,
                        message: e.to_string(),
                    });
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(write_err(&part_path, e));
            }
            written += chunk.len() as u64;
        }
        if let Err(e) = file.flush().await {
            drop(file);
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(write_err(&part_path, e));
        }
        drop(file);

        if let Err(e) = tokio::fs::rename(&part_path, dest).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(write_err(dest, e));
        }
        debug!(bytes = written, "[DOWNLOAD] Body written");
        info!(path = %dest.display(), bytes = written, "[DOWNLOAD] Downloaded trip file");
        Ok(dest.to_path_buf())
    }
}

fn part_path_for(dest: &Path) -> PathBuf {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    dest.with_file_name(format!(".{}.{}.part", file_name, uuid::Uuid::new_v4()))
}
