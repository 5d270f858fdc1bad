//! Core data models used throughout the data provider.
//!
//! These types represent the indexed documents pulled from Solr and the
//! protocol-level values (headers, sets, formats, repository description)
//! handed to the OAI-PMH layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

/// A single Solr document: a flat mapping of field name to JSON value.
///
/// Transient and read-only; scoped to one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    /// Returns the string value of `field`.
    ///
    /// Multi-valued fields resolve to their first string entry; numbers and
    /// booleans are rendered with their JSON text.
    pub fn get_str(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(values) => values.iter().find_map(|v| v.as_str().map(str::to_string)),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            _ => Self::default(),
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub documents: Vec<Document>,
    /// Total number of matching documents in the index, not just this page.
    pub total_hits: u64,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// A harvestable set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Set {
    pub spec: String,
    pub name: String,
    pub description: Option<String>,
    /// Solr filter query fragment selecting member documents.
    pub filter: String,
}

/// A metadata format the repository can disseminate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFormat {
    pub prefix: String,
    pub namespace: String,
    pub schema: String,
}

/// The header of a record as reported by `GetRecord` and `ListIdentifiers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub identifier: String,
    pub datestamp: String,
    pub setspecs: Vec<String>,
}

/// One page of a `list_identifiers` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierPage {
    pub identifiers: Vec<String>,
    pub total_hits: u64,
    /// Cursor of the following page, `None` once the listing is complete.
    pub next_cursor: Option<usize>,
}

/// Static description of the repository returned by `Identify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identify {
    pub base_url: String,
    pub admin_email: Vec<String>,
    pub repository_name: String,
    pub earliest_datestamp: String,
    pub deleted_record: DeletedRecordPolicy,
    pub granularity: Granularity,
}

/// Datestamp granularity supported by the repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum Granularity {
    #[serde(rename = "YYYY-MM-DD")]
    Day,
    #[default]
    #[serde(rename = "YYYY-MM-DDThh:mm:ssZ")]
    Seconds,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "YYYY-MM-DD",
            Granularity::Seconds => "YYYY-MM-DDThh:mm:ssZ",
        }
    }

    /// Formats a timestamp for protocol responses.
    pub fn format(&self, ts: &DateTime<Utc>) -> String {
        match self {
            Granularity::Day => ts.format("%Y-%m-%d").to_string(),
            Granularity::Seconds => ts.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "YYYY-MM-DD" => Ok(Granularity::Day),
            "YYYY-MM-DDThh:mm:ssZ" => Ok(Granularity::Seconds),
            other => Err(format!(
                "unknown granularity '{}': must be YYYY-MM-DD or YYYY-MM-DDThh:mm:ssZ",
                other
            )),
        }
    }
}

/// How the repository reports deleted records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletedRecordPolicy {
    #[default]
    No,
    Transient,
    Persistent,
}

impl DeletedRecordPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletedRecordPolicy::No => "no",
            DeletedRecordPolicy::Transient => "transient",
            DeletedRecordPolicy::Persistent => "persistent",
        }
    }
}

impl FromStr for DeletedRecordPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no" => Ok(DeletedRecordPolicy::No),
            "transient" => Ok(DeletedRecordPolicy::Transient),
            "persistent" => Ok(DeletedRecordPolicy::Persistent),
            other => Err(format!(
                "unknown deleted record policy '{}': must be no, transient, or persistent",
                other
            )),
        }
    }
}
