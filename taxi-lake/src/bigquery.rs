//! BigQuery REST query executor.
//!
//! Submits standard-SQL statements through `jobs.query` and polls `getQueryResults` until the
//! job reports completion. A statement counts as successful only once the job is complete
//! and carries no errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

use taxi_lake_core::contract::QueryExecutor;
use taxi_lake_core::error::WarehouseError;

pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com";
const QUERY_TIMEOUT_MS: u64 = 10_000;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct BigQueryClient {
    http: Client,
    endpoint: Url,
    project_id: String,
    token: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
    #[serde(default)]
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

impl QueryResponse {
    fn failure(&self) -> Option<String> {
        if let Some(err) = self.status.as_ref().and_then(|s| s.error_result.as_ref()) {
            return Some(format!("{}: {}", err.reason, err.message));
        }
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|e| format!("{}: {}", e.reason, e.message))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl BigQueryClient {
    pub fn new(
        project_id: impl Into<String>,
        token: impl Into<String>,
        endpoint: &str,
    ) -> Result<Self, WarehouseError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| WarehouseError::Query(format!("invalid endpoint {endpoint}: {e}")))?;
        Ok(Self {
            http: Client::new(),
            endpoint,
            project_id: project_id.into(),
            token: token.into(),
            poll_interval: POLL_INTERVAL,
        })
    }

    /// Swap the underlying HTTP client, e.g. to disable proxies or set timeouts.
    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn new_from_env(project_id: &str, token: &str) -> Result<Self, WarehouseError> {
        let endpoint = std::env::var("BIGQUERY_EMULATOR_HOST")
            .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        tracing::info!(endpoint = %endpoint, project_id, "Initialized BigQueryClient");
        Self::new(project_id, token, &endpoint)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url_with_segments(&self, segments: &[&str]) -> Result<Url, WarehouseError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| WarehouseError::Query(format!("endpoint cannot be a base: {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn queries_url(&self) -> Result<Url, WarehouseError> {
        self.url_with_segments(&["bigquery", "v2", "projects", &self.project_id, "queries"])
    }

    pub fn query_results_url(&self, job_id: &str, location: Option<&str>) -> Result<Url, WarehouseError> {
        let mut url = self.url_with_segments(&[
            "bigquery",
            "v2",
            "projects",
            &self.project_id,
            "queries",
            job_id,
        ])?;
        url.query_pairs_mut()
            .append_pair("timeoutMs", &QUERY_TIMEOUT_MS.to_string());
        if let Some(location) = location {
            url.query_pairs_mut().append_pair("location", location);
        }
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<QueryResponse, WarehouseError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| WarehouseError::Query(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Query(format!("status {status}: {body}")));
        }
        response
            .json::<QueryResponse>()
            .await
            .map_err(|e| WarehouseError::Query(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl QueryExecutor for BigQueryClient {
    async fn execute(&self, sql: &str) -> Result<(), WarehouseError> {
        let body = serde_json::json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_TIMEOUT_MS,
        });
        let mut response = self
            .send(self.http.post(self.queries_url()?).json(&body))
            .await?;

        loop {
            if let Some(message) = response.failure() {
                tracing::error!(error = %message, "Query job failed");
                return Err(WarehouseError::Query(message));
            }
            if response.job_complete {
                tracing::debug!("Query job complete");
                return Ok(());
            }
            let job = response
                .job_reference
                .as_ref()
                .ok_or_else(|| WarehouseError::Query("incomplete job without a job reference".into()))?;
            tracing::debug!(job_id = %job.job_id, "Query job still running, polling");
            tokio::time::sleep(self.poll_interval).await;
            let url = self.query_results_url(&job.job_id, job.location.as_deref())?;
            response = self.send(self.http.get(url)).await?;
        }
    }
}
