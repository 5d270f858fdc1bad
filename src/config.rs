//! TOML configuration with environment overrides.
//!
//! The configuration is read once at startup by [`load_config`] and never
//! mutated afterwards; components receive the sections they need through
//! their constructors.
//!
//! # Environment Variables
//!
//! The following variables override values from the file:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `ADMIN_EMAIL` | `repository.admin_email` (comma separated) |
//! | `BASE_URL` | `repository.base_url` |
//! | `DATESTAMP_GRANULARITY` | `repository.granularity` |
//! | `EARLIEST_DATESTAMP` | `repository.earliest_datestamp` |
//! | `OAI_REPOSITORY_NAME` | `repository.name` |
//! | `OAI_NAMESPACE_IDENTIFIER` | `repository.namespace_identifier` |
//! | `REPORT_DELETED_RECORDS` | `repository.deleted_record` |
//! | `PAGE_SIZE` | `repository.page_size` |
//! | `SOLR_URL` | `solr.url` |
//!
//! The repository bearer token is read from the variable named by
//! `fcrepo.jwt_token_env` (default `FCREPO_JWT_TOKEN`).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::datestamp::parse_index_timestamp;
use crate::models::{DeletedRecordPolicy, Granularity};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub solr: SolrConfig,
    #[serde(default)]
    pub fcrepo: FcrepoConfig,
    #[serde(default)]
    pub transforms: TransformsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub admin_email: Vec<String>,
    #[serde(default)]
    pub namespace_identifier: String,
    #[serde(default)]
    pub earliest_datestamp: String,
    #[serde(default)]
    pub deleted_record: DeletedRecordPolicy,
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_url: default_base_url(),
            admin_email: Vec::new(),
            namespace_identifier: String::new(),
            earliest_datestamp: String::new(),
            deleted_record: DeletedRecordPolicy::default(),
            granularity: Granularity::default(),
            page_size: default_page_size(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:5000/".to_string()
}
fn default_page_size() -> usize {
    25
}

#[derive(Debug, Deserialize, Clone)]
pub struct SolrConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_base_query")]
    pub base_query: String,
    #[serde(default = "default_handle_field")]
    pub handle_field: String,
    #[serde(default = "default_uri_field")]
    pub uri_field: String,
    #[serde(default = "default_last_modified_field")]
    pub last_modified_field: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub auto_create_sets: bool,
    #[serde(default)]
    pub auto_set: AutoSetConfig,
    #[serde(default)]
    pub sets: Vec<SetConfig>,
    /// Extra spec -> filter entries merged into the set catalog.
    #[serde(default)]
    pub named_filters: BTreeMap<String, String>,
}

impl Default for SolrConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            base_query: default_base_query(),
            handle_field: default_handle_field(),
            uri_field: default_uri_field(),
            last_modified_field: default_last_modified_field(),
            timeout_secs: default_timeout_secs(),
            auto_create_sets: false,
            auto_set: AutoSetConfig::default(),
            sets: Vec::new(),
            named_filters: BTreeMap::new(),
        }
    }
}

fn default_base_query() -> String {
    "handle:*".to_string()
}
fn default_handle_field() -> String {
    "handle".to_string()
}
fn default_uri_field() -> String {
    "id".to_string()
}
fn default_last_modified_field() -> String {
    "last_modified".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// Settings for deriving sets from a facet-like query.
///
/// All three string keys are required when `solr.auto_create_sets` is on.
#[derive(Debug, Deserialize, Clone)]
pub struct AutoSetConfig {
    /// Query selecting one document per set (e.g. `component:Collection`).
    pub query: Option<String>,
    /// Field on those documents holding the set name.
    pub name_field: Option<String>,
    /// Field to filter member documents on (e.g. `collection_title_facet`).
    pub name_query_field: Option<String>,
    #[serde(default = "default_auto_set_rows")]
    pub rows: usize,
}

impl Default for AutoSetConfig {
    fn default() -> Self {
        Self {
            query: None,
            name_field: None,
            name_query_field: None,
            rows: default_auto_set_rows(),
        }
    }
}

fn default_auto_set_rows() -> usize {
    1000
}

impl AutoSetConfig {
    /// Names of the required keys that are not set.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.query.is_none() {
            missing.push("query");
        }
        if self.name_field.is_none() {
            missing.push("name_field");
        }
        if self.name_query_field.is_none() {
            missing.push("name_query_field");
        }
        missing
    }
}

/// A statically configured set.
#[derive(Debug, Deserialize, Clone)]
pub struct SetConfig {
    /// Derived from `name` when omitted.
    pub spec: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub filter: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FcrepoConfig {
    #[serde(default = "default_jwt_token_env")]
    pub jwt_token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FcrepoConfig {
    fn default() -> Self {
        Self {
            jwt_token_env: default_jwt_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_jwt_token_env() -> String {
    "FCREPO_JWT_TOKEN".to_string()
}

impl FcrepoConfig {
    pub fn jwt_token(&self) -> Option<String> {
        std::env::var(&self.jwt_token_env)
            .ok()
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransformsConfig {
    #[serde(default = "default_transforms_dir")]
    pub dir: PathBuf,
    /// File stem -> metadata prefix overrides.
    #[serde(default)]
    pub prefixes: BTreeMap<String, String>,
}

impl Default for TransformsConfig {
    fn default() -> Self {
        Self {
            dir: default_transforms_dir(),
            prefixes: BTreeMap::new(),
        }
    }
}

fn default_transforms_dir() -> PathBuf {
    PathBuf::from("transforms")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}

/// Reads, overrides from the process environment, and validates the
/// configuration file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    // Relative transform directories are resolved against the config file.
    if config.transforms.dir.is_relative() {
        if let Some(parent) = path.parent() {
            let candidate = parent.join(&config.transforms.dir);
            if candidate.is_dir() {
                config.transforms.dir = candidate;
            }
        }
    }

    validate(&config)?;
    Ok(config)
}

/// Applies the environment overrides listed in the module docs.
///
/// `lookup` abstracts the environment so callers can supply a fixed map.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let repo = &mut config.repository;

    if let Some(v) = lookup("ADMIN_EMAIL") {
        repo.admin_email = v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(v) = lookup("BASE_URL") {
        repo.base_url = v;
    }
    if let Some(v) = lookup("DATESTAMP_GRANULARITY") {
        repo.granularity = v
            .parse()
            .map_err(|e: String| anyhow::anyhow!("DATESTAMP_GRANULARITY: {}", e))?;
    }
    if let Some(v) = lookup("EARLIEST_DATESTAMP") {
        repo.earliest_datestamp = v;
    }
    if let Some(v) = lookup("OAI_REPOSITORY_NAME") {
        repo.name = v;
    }
    if let Some(v) = lookup("OAI_NAMESPACE_IDENTIFIER") {
        repo.namespace_identifier = v;
    }
    if let Some(v) = lookup("REPORT_DELETED_RECORDS") {
        repo.deleted_record = v
            .parse()
            .map_err(|e: String| anyhow::anyhow!("REPORT_DELETED_RECORDS: {}", e))?;
    }
    if let Some(v) = lookup("PAGE_SIZE") {
        repo.page_size = v
            .trim()
            .parse()
            .with_context(|| format!("PAGE_SIZE must be a positive integer, got '{}'", v))?;
    }
    if let Some(v) = lookup("SOLR_URL") {
        config.solr.url = v;
    }

    Ok(())
}

/// Checks the invariants the provider relies on.
pub fn validate(config: &Config) -> Result<()> {
    let repo = &config.repository;

    if repo.name.trim().is_empty() {
        bail!("repository.name must be set");
    }
    if repo.namespace_identifier.trim().is_empty() {
        bail!("repository.namespace_identifier must be set");
    }
    if repo.namespace_identifier.contains(':') {
        bail!("repository.namespace_identifier must not contain ':'");
    }
    if repo.admin_email.is_empty() {
        bail!("repository.admin_email must list at least one address");
    }
    if repo.page_size == 0 {
        bail!("repository.page_size must be >= 1");
    }
    if parse_index_timestamp(&repo.earliest_datestamp).is_none() {
        bail!(
            "repository.earliest_datestamp '{}' is not a valid datestamp",
            repo.earliest_datestamp
        );
    }

    if config.solr.url.trim().is_empty() {
        bail!("solr.url must be set (or SOLR_URL in the environment)");
    }
    if config.solr.auto_create_sets {
        let missing = config.solr.auto_set.missing_keys();
        if !missing.is_empty() {
            bail!(
                "solr.auto_create_sets is enabled but solr.auto_set is missing: {}",
                missing.join(", ")
            );
        }
    }

    Ok(())
}
