//! Shared fixtures: an in-memory Solr stand-in, a canned repository fetcher,
//! and provider wiring.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fcrepo_oaipmh::config::{RepositoryConfig, SolrConfig};
use fcrepo_oaipmh::error::Result;
use fcrepo_oaipmh::fetch::{FetchResponse, ResourceFetcher};
use fcrepo_oaipmh::models::{Document, ResultSet};
use fcrepo_oaipmh::provider::ProviderContext;
use fcrepo_oaipmh::solr::{SearchEngine, SearchEngineError, SelectQuery};
use fcrepo_oaipmh::transform::TransformRegistry;
use serde_json::{json, Value};

// ─── Search engine ──────────────────────────────────────────────────

/// In-memory [`SearchEngine`] over a fixed document list.
///
/// `*:*` queries page through every document. `field:"value"` queries and
/// filters match documents whose field equals the value. Every call is
/// recorded.
pub struct InMemoryIndex {
    docs: Vec<Value>,
    fail: bool,
    calls: Mutex<Vec<SelectQuery>>,
}

impl InMemoryIndex {
    pub fn new(docs: Vec<Value>) -> Self {
        Self {
            docs,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// An engine whose every query fails at the transport level.
    pub fn unreachable() -> Self {
        Self {
            docs: Vec::new(),
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<SelectQuery> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// Parses `field:"value"` (or `field:value`) into its parts. Wildcards,
/// ranges and compound clauses yield `None`.
fn field_match(clause: &str) -> Option<(&str, String)> {
    let clause = clause.trim().trim_start_matches('(').trim_end_matches(')');
    let (field, value) = clause.split_once(':')?;
    if value == "*" || value.starts_with('[') || clause.contains(" OR ") {
        return None;
    }
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .replace("\\\"", "\"");
    Some((field, value))
}

fn matches(doc: &Value, clause: &str) -> bool {
    match field_match(clause) {
        Some((field, value)) => match &doc[field] {
            Value::String(s) => *s == value,
            Value::Array(values) => values.iter().any(|v| v.as_str() == Some(value.as_str())),
            _ => false,
        },
        None => true,
    }
}

#[async_trait]
impl SearchEngine for InMemoryIndex {
    fn url(&self) -> &str {
        "memory://solr"
    }

    async fn select(&self, query: &SelectQuery) -> std::result::Result<ResultSet, SearchEngineError> {
        self.calls.lock().unwrap().push(query.clone());
        if self.fail {
            return Err(SearchEngineError("connection refused".into()));
        }

        let mut hits: Vec<&Value> = self.docs.iter().filter(|d| matches(d, &query.q)).collect();
        if let Some(fq) = &query.fq {
            // Listing filters are conjunctions; only the set clause is selective.
            for clause in fq.split(" AND ") {
                hits.retain(|d| matches(d, clause));
            }
        }

        let total_hits = hits.len() as u64;
        let rows = query.rows.unwrap_or(10);
        Ok(ResultSet {
            documents: hits
                .into_iter()
                .skip(query.start)
                .take(rows)
                .cloned()
                .map(Document::from)
                .collect(),
            total_hits,
        })
    }
}

// ─── Repository fetcher ─────────────────────────────────────────────

/// [`ResourceFetcher`] returning one canned response for every URI.
pub struct CannedFetcher {
    status: u16,
    reason: String,
    body: String,
    requested: Mutex<Vec<String>>,
}

impl CannedFetcher {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::with_status(200, "OK", body)
    }

    pub fn with_status(status: u16, reason: &str, body: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            body: body.into(),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceFetcher for CannedFetcher {
    async fn get_rdf(&self, uri: &str) -> Result<FetchResponse> {
        self.requested.lock().unwrap().push(uri.to_string());
        Ok(FetchResponse {
            status: self.status,
            reason: self.reason.clone(),
            body: self.body.clone(),
        })
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

pub fn data_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn prange_rdf() -> String {
    std::fs::read_to_string(data_path("prange_poster.xml")).unwrap()
}

pub fn transforms() -> TransformRegistry {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("transforms");
    TransformRegistry::load_dir(&dir, &Default::default()).unwrap()
}

pub fn repository() -> RepositoryConfig {
    RepositoryConfig {
        name: "Test Repository".into(),
        base_url: "http://localhost:5000/oai".into(),
        admin_email: vec!["jdoe@example.com".into()],
        namespace_identifier: "fcrepo".into(),
        earliest_datestamp: "2014-01-01".into(),
        ..RepositoryConfig::default()
    }
}

/// Three harvestable documents, handles `1903.1/sample1..3`. The second
/// belongs to the "Prange Collection".
pub fn sample_docs() -> Vec<Value> {
    vec![
        json!({
            "id": "http://fcrepo-local:8080/fcrepo/rest/sample1",
            "handle": "1903.1/sample1",
            "last_modified": "2023-06-15T12:30:45Z",
            "collection_title_facet": ["Other Collection"],
        }),
        json!({
            "id": "http://fcrepo-local:8080/fcrepo/rest/sample2",
            "handle": "1903.1/sample2",
            "last_modified": "2023-06-16T08:37:29.123Z",
            "collection_title_facet": ["Prange Collection"],
        }),
        json!({
            "id": "http://fcrepo-local:8080/fcrepo/rest/sample3",
            "handle": "1903.1/sample3",
            "last_modified": "2023-06-17T00:00:00Z",
        }),
    ]
}

pub fn context(
    repository: RepositoryConfig,
    solr: SolrConfig,
    engine: Arc<dyn SearchEngine>,
    fetcher: Arc<dyn ResourceFetcher>,
) -> ProviderContext {
    ProviderContext::new(repository, solr, engine, transforms(), fetcher)
}
