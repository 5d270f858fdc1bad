//! Search index adapter.
//!
//! [`SearchEngine`] is the seam to the search backend: one `select`
//! operation taking a [`SelectQuery`]. [`SolrClient`] implements it over
//! Solr's JSON request handler. [`Index`] wraps an engine with the field
//! configuration and builds the filter queries used for harvesting.
//!
//! Filter queries are built by string concatenation, so every value
//! interpolated into a clause goes through [`solr_quoted`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::config::SolrConfig;
use crate::datestamp::datestamp_long;
use crate::error::{OaiError, Result};
use crate::models::{Document, ResultSet};

/// Parameters of a single select request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectQuery {
    pub q: String,
    pub fq: Option<String>,
    pub fl: Option<String>,
    pub start: usize,
    pub rows: Option<usize>,
}

impl SelectQuery {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, fq: impl Into<String>) -> Self {
        self.fq = Some(fq.into());
        self
    }

    pub fn fields(mut self, fl: impl Into<String>) -> Self {
        self.fl = Some(fl.into());
        self
    }

    pub fn page(mut self, start: usize, rows: usize) -> Self {
        self.start = start;
        self.rows = Some(rows);
        self
    }
}

/// Transport or protocol failure reported by a [`SearchEngine`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SearchEngineError(pub String);

/// A backend able to answer select queries.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Human-readable location of the backend, used in log lines.
    fn url(&self) -> &str;

    async fn select(&self, query: &SelectQuery) -> Result<ResultSet, SearchEngineError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Solr over HTTP
// ═══════════════════════════════════════════════════════════════════════

/// [`SearchEngine`] backed by a Solr core's `/select` handler.
pub struct SolrClient {
    url: String,
    client: reqwest::Client,
}

impl SolrClient {
    /// Create a client for the core at `url` (e.g. `http://localhost:8983/solr/fcrepo`).
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OaiError::Configuration(format!("Unable to build Solr client: {}", e)))?;
        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &SolrConfig) -> Result<Self> {
        Self::new(&config.url, Duration::from_secs(config.timeout_secs))
    }
}

#[derive(Deserialize)]
struct SelectResponse {
    response: SelectResponseBody,
}

#[derive(Deserialize)]
struct SelectResponseBody {
    #[serde(rename = "numFound")]
    num_found: u64,
    #[serde(default)]
    docs: Vec<serde_json::Value>,
}

#[async_trait]
impl SearchEngine for SolrClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn select(&self, query: &SelectQuery) -> Result<ResultSet, SearchEngineError> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", query.q.clone()),
            ("start", query.start.to_string()),
            ("wt", "json".to_string()),
        ];
        if let Some(fq) = &query.fq {
            params.push(("fq", fq.clone()));
        }
        if let Some(fl) = &query.fl {
            params.push(("fl", fl.clone()));
        }
        if let Some(rows) = query.rows {
            params.push(("rows", rows.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/select", self.url))
            .query(&params)
            .send()
            .await
            .map_err(|e| SearchEngineError(format!("Solr request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchEngineError(format!(
                "Solr returned {}: {}",
                status,
                solr_error_message(&body)
            )));
        }

        let parsed: SelectResponse = response
            .json()
            .await
            .map_err(|e| SearchEngineError(format!("Invalid Solr response: {}", e)))?;

        Ok(ResultSet {
            documents: parsed
                .response
                .docs
                .into_iter()
                .map(Document::from)
                .collect(),
            total_hits: parsed.response.num_found,
        })
    }
}

/// Pulls `error.msg` out of a Solr error body, falling back to the raw text.
fn solr_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["msg"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// Index
// ═══════════════════════════════════════════════════════════════════════

/// Field-aware view over a [`SearchEngine`].
pub struct Index {
    config: SolrConfig,
    engine: Arc<dyn SearchEngine>,
}

impl Index {
    pub fn new(config: SolrConfig, engine: Arc<dyn SearchEngine>) -> Self {
        info!("Solr URL: {}", engine.url());
        debug!("Index configuration: {:?}", config);
        Self { config, engine }
    }

    pub fn config(&self) -> &SolrConfig {
        &self.config
    }

    pub fn base_query(&self) -> &str {
        &self.config.base_query
    }

    pub fn handle_field(&self) -> &str {
        &self.config.handle_field
    }

    pub fn uri_field(&self) -> &str {
        &self.config.uri_field
    }

    pub fn last_modified_field(&self) -> &str {
        &self.config.last_modified_field
    }

    /// Runs a query, converting any engine failure into `UpstreamUnavailable`.
    pub async fn search(&self, query: &SelectQuery) -> Result<ResultSet> {
        self.engine.select(query).await.map_err(|e| {
            error!(q = %query.q, fq = ?query.fq, "Solr query failed: {}", e);
            OaiError::UpstreamUnavailable("Unable to connect to Solr".to_string())
        })
    }

    /// Query matching exactly the documents whose handle field equals `local_id`.
    pub fn local_id_query(&self, local_id: &str) -> String {
        format!("{}:{}", self.config.handle_field, solr_quoted(local_id))
    }

    /// Looks up a document by its local identifier.
    ///
    /// Returns the first match when the handle field is not unique.
    pub async fn get_doc(&self, local_id: &str) -> Result<Document> {
        let query = SelectQuery::new(self.local_id_query(local_id)).page(0, 1);
        let results = self.search(&query).await?;
        results
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| OaiError::RecordNotFound(local_id.to_string()))
    }

    /// Builds the filter query for a listing: the base query, an optional
    /// date range on the last-modified field, and an optional set filter,
    /// joined with `AND`. Absent clauses are left out.
    pub fn build_filter(
        &self,
        from: Option<&DateTime<Utc>>,
        until: Option<&DateTime<Utc>>,
        set_filter: Option<&str>,
    ) -> String {
        let mut clauses = Vec::new();
        if !self.config.base_query.trim().is_empty() {
            clauses.push(self.config.base_query.clone());
        }
        if from.is_some() || until.is_some() {
            clauses.push(format!(
                "{}:{}",
                self.config.last_modified_field,
                solr_date_range(from, until)
            ));
        }
        if let Some(filter) = set_filter {
            clauses.push(format!("({})", filter));
        }
        clauses.join(" AND ")
    }

    /// Fetches one page of harvestable documents matching `filter_query`.
    pub async fn get_docs(&self, filter_query: &str, start: usize, rows: usize) -> Result<ResultSet> {
        debug!("Solr fq = \"{}\"", filter_query);
        let query = SelectQuery::new("*:*")
            .filter(filter_query)
            .page(start, rows);
        self.search(&query).await
    }
}

/// Wraps a value in double quotes for use inside a Solr query, escaping
/// backslashes and embedded quotes.
pub fn solr_quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Builds a Solr range expression; an absent bound becomes `*`.
pub fn solr_date_range(from: Option<&DateTime<Utc>>, until: Option<&DateTime<Utc>>) -> String {
    let lower = from.map(datestamp_long).unwrap_or_else(|| "*".to_string());
    let upper = until.map(datestamp_long).unwrap_or_else(|| "*".to_string());
    format!("[{} TO {}]", lower, upper)
}
