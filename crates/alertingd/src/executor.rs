//! Query executor backed by an HTTP query service.

use std::time::Duration;

use alerting_core::{AlertQuery, AlertingError, QueryExecutor, QueryResponse, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    org_id: i64,
    queries: &'a [AlertQuery],
    now: DateTime<Utc>,
}

#[derive(Deserialize)]
struct QueryReply {
    #[serde(default)]
    results: QueryResponse,
}

/// Runs rule queries by posting them to `{url}/api/ds/query`.
#[derive(Debug, Clone)]
pub struct HttpQueryExecutor {
    client: Client,
    endpoint: String,
}

impl HttpQueryExecutor {
    /// Create an executor for the query service at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertingError::config(format!("query client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/ds/query", url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn run_queries(
        &self,
        org_id: i64,
        queries: &[AlertQuery],
        now: DateTime<Utc>,
    ) -> Result<QueryResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&QueryRequest {
                org_id,
                queries,
                now,
            })
            .send()
            .await
            .map_err(|e| AlertingError::evaluation(format!("query service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlertingError::evaluation(format!(
                "query service returned {status}: {body}"
            )));
        }

        let reply: QueryReply = response
            .json()
            .await
            .map_err(|e| AlertingError::evaluation(format!("invalid query response: {e}")))?;
        debug!(org_id, results = reply.results.len(), "queries executed");
        Ok(reply.results)
    }
}
