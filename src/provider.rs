//! Data provider façade.
//!
//! [`DataProvider`] is the backend contract consumed by the protocol layer
//! ([`crate::oai`]). [`FcrepoDataProvider`] implements it over the search
//! index, the set catalog, the transform registry and the repository
//! fetcher.
//!
//! # Request scoping
//!
//! A provider keeps a single-slot cache of the documents returned by its
//! most recent listing, keyed by serialized OAI identifier, so that header
//! and metadata lookups following a listing skip the index round trip. The
//! slot is emptied when a listing starts and refilled only when it succeeds.
//! Build one provider per request with
//! [`FcrepoDataProvider::new`]; the shared, pooled parts live in
//! [`ProviderContext`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::config::{Config, RepositoryConfig, SolrConfig};
use crate::datestamp::parse_index_timestamp;
use crate::error::{OaiError, Result};
use crate::fetch::{HttpFetcher, ResourceFetcher};
use crate::identifier::OaiIdentifier;
use crate::models::{Document, IdentifierPage, Identify, MetadataFormat, RecordHeader, Set};
use crate::sets::SetCatalog;
use crate::solr::{Index, SearchEngine, SolrClient};
use crate::transform::TransformRegistry;
use crate::xml::Element;

/// Backend operations required to answer OAI-PMH requests.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Static repository description. No I/O.
    fn identify(&self) -> Identify;

    /// True iff `identifier` belongs to this repository's namespace.
    fn is_valid_identifier(&self, identifier: &str) -> bool;

    /// Formats that can be disseminated, optionally for one record.
    async fn list_metadata_formats(&self, identifier: Option<&str>) -> Result<Vec<MetadataFormat>>;

    async fn get_record_header(&self, identifier: &str) -> Result<RecordHeader>;

    async fn get_record_metadata(&self, identifier: &str, metadata_prefix: &str) -> Result<Element>;

    /// Optional `<about>` containers of a record.
    async fn get_record_abouts(&self, identifier: &str) -> Result<Vec<Element>>;

    /// One page of identifiers matching the harvest filters, starting at `cursor`.
    async fn list_identifiers(
        &self,
        metadata_prefix: &str,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        set_spec: Option<&str>,
        cursor: usize,
    ) -> Result<IdentifierPage>;

    /// All set specs, or those containing `identifier` when given.
    async fn list_set_specs(&self, identifier: Option<&str>) -> Result<Vec<String>>;

    async fn get_set(&self, spec: &str) -> Result<Set>;
}

/// Long-lived components shared by every provider instance.
#[derive(Clone)]
pub struct ProviderContext {
    pub repository: Arc<RepositoryConfig>,
    pub index: Arc<Index>,
    pub sets: Arc<SetCatalog>,
    pub transforms: Arc<TransformRegistry>,
    pub fetcher: Arc<dyn ResourceFetcher>,
}

impl ProviderContext {
    pub fn new(
        repository: RepositoryConfig,
        solr: SolrConfig,
        engine: Arc<dyn SearchEngine>,
        transforms: TransformRegistry,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Self {
        let mut repository = repository;
        if let Some(earliest) = parse_index_timestamp(&repository.earliest_datestamp) {
            repository.earliest_datestamp = repository.granularity.format(&earliest);
        }
        let index = Arc::new(Index::new(solr, engine));
        Self {
            repository: Arc::new(repository),
            sets: Arc::new(SetCatalog::new(index.clone())),
            index,
            transforms: Arc::new(transforms),
            fetcher,
        }
    }

    /// Wires the HTTP clients and loads every transform. Fails on the first
    /// invalid transform definition.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transforms =
            TransformRegistry::load_dir(&config.transforms.dir, &config.transforms.prefixes)?;
        let engine = Arc::new(SolrClient::from_config(&config.solr)?);
        let fetcher = Arc::new(HttpFetcher::from_config(&config.fcrepo)?);
        Ok(Self::new(
            config.repository.clone(),
            config.solr.clone(),
            engine,
            transforms,
            fetcher,
        ))
    }
}

/// [`DataProvider`] backed by Solr and the Fedora repository.
pub struct FcrepoDataProvider {
    ctx: ProviderContext,
    cache: Mutex<HashMap<String, Document>>,
}

impl FcrepoDataProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        Self {
            ctx,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn oai_identifier(&self, local_id: &str) -> OaiIdentifier {
        OaiIdentifier::new(&self.ctx.repository.namespace_identifier, local_id)
    }

    /// Resolves an identifier to its index document, cache first.
    async fn document(&self, identifier: &str) -> Result<(OaiIdentifier, Document)> {
        let id = OaiIdentifier::parse(identifier)?;
        if let Some(doc) = self.cache.lock().await.get(&id.to_string()) {
            debug!("Cache hit for {}", id);
            return Ok((id, doc.clone()));
        }
        let doc = self.ctx.index.get_doc(&id.local_id).await?;
        Ok((id, doc))
    }

    fn required_field(&self, id: &OaiIdentifier, doc: &Document, field: &str) -> Result<String> {
        doc.get_str(field).ok_or_else(|| {
            error!("Index document for {} has no {} field", id.local_id, field);
            OaiError::UpstreamUnavailable(format!(
                "Index document for {} has no {} field",
                id.local_id, field
            ))
        })
    }
}

#[async_trait]
impl DataProvider for FcrepoDataProvider {
    fn identify(&self) -> Identify {
        let repo = &self.ctx.repository;
        Identify {
            base_url: repo.base_url.clone(),
            admin_email: repo.admin_email.clone(),
            repository_name: repo.name.clone(),
            earliest_datestamp: repo.earliest_datestamp.clone(),
            deleted_record: repo.deleted_record,
            granularity: repo.granularity,
        }
    }

    fn is_valid_identifier(&self, identifier: &str) -> bool {
        identifier
            .strip_prefix("oai:")
            .and_then(|rest| rest.strip_prefix(self.ctx.repository.namespace_identifier.as_str()))
            .is_some_and(|rest| rest.starts_with(':'))
    }

    async fn list_metadata_formats(&self, identifier: Option<&str>) -> Result<Vec<MetadataFormat>> {
        if let Some(identifier) = identifier {
            self.document(identifier).await?;
        }
        Ok(self.ctx.transforms.list_formats())
    }

    async fn get_record_header(&self, identifier: &str) -> Result<RecordHeader> {
        let (id, doc) = self.document(identifier).await?;
        let field = self.ctx.index.last_modified_field();
        let raw = self.required_field(&id, &doc, field)?;
        let last_modified = parse_index_timestamp(&raw).ok_or_else(|| {
            error!("Unparsable {} \"{}\" for {}", field, raw, id.local_id);
            OaiError::UpstreamUnavailable(format!(
                "Index document for {} has an invalid {} value",
                id.local_id, field
            ))
        })?;

        let setspecs = self.ctx.sets.sets_containing(&id.local_id).await?;

        Ok(RecordHeader {
            identifier: id.to_string(),
            datestamp: self.ctx.repository.granularity.format(&last_modified),
            setspecs: setspecs.into_iter().collect(),
        })
    }

    async fn get_record_metadata(&self, identifier: &str, metadata_prefix: &str) -> Result<Element> {
        if !self.ctx.transforms.supports(metadata_prefix) {
            return Err(OaiError::UnsupportedFormat(metadata_prefix.to_string()));
        }
        let (id, doc) = self.document(identifier).await?;
        let uri = self.required_field(&id, &doc, self.ctx.index.uri_field())?;

        let response = self.ctx.fetcher.get_rdf(&uri).await?;
        if !response.is_success() {
            error!("GET {} -> {} {}", uri, response.status, response.reason);
            return Err(OaiError::UpstreamUnavailable(
                "Unable to retrieve resource from fcrepo".to_string(),
            ));
        }

        let rdf = Element::parse(&response.body).map_err(|e| {
            error!("GET {} returned unparsable RDF/XML: {}", uri, e);
            OaiError::UpstreamUnavailable("Unable to parse resource from fcrepo".to_string())
        })?;
        self.ctx.transforms.transform(metadata_prefix, &rdf)
    }

    async fn get_record_abouts(&self, _identifier: &str) -> Result<Vec<Element>> {
        Ok(Vec::new())
    }

    async fn list_identifiers(
        &self,
        metadata_prefix: &str,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        set_spec: Option<&str>,
        cursor: usize,
    ) -> Result<IdentifierPage> {
        debug!(
            metadata_prefix,
            ?from,
            ?until,
            ?set_spec,
            cursor,
            "list_identifiers"
        );
        // A listing invalidates the cache even when it fails.
        self.cache.lock().await.clear();
        if !self.ctx.transforms.supports(metadata_prefix) {
            return Err(OaiError::UnsupportedFormat(metadata_prefix.to_string()));
        }

        let set_filter = match set_spec {
            Some(spec) => Some(self.ctx.sets.resolve_set_filter(spec).await?),
            None => None,
        };
        let index = &self.ctx.index;
        let filter = index.build_filter(from.as_ref(), until.as_ref(), set_filter.as_deref());
        let results = index
            .get_docs(&filter, cursor, self.ctx.repository.page_size)
            .await?;

        let consumed = cursor + results.documents.len();
        let mut cached = HashMap::with_capacity(results.documents.len());
        let mut identifiers = Vec::with_capacity(results.documents.len());
        for doc in results.documents {
            let Some(handle) = doc.get_str(index.handle_field()) else {
                warn!(
                    "Skipping index document without {}: {:?}",
                    index.handle_field(),
                    doc.get_str(index.uri_field())
                );
                continue;
            };
            let id = self.oai_identifier(&handle).to_string();
            identifiers.push(id.clone());
            cached.insert(id, doc);
        }
        *self.cache.lock().await = cached;

        let next_cursor = (consumed > cursor && (consumed as u64) < results.total_hits)
            .then_some(consumed);

        Ok(IdentifierPage {
            identifiers,
            total_hits: results.total_hits,
            next_cursor,
        })
    }

    async fn list_set_specs(&self, identifier: Option<&str>) -> Result<Vec<String>> {
        match identifier {
            Some(identifier) => {
                let id = OaiIdentifier::parse(identifier)?;
                Ok(self
                    .ctx
                    .sets
                    .sets_containing(&id.local_id)
                    .await?
                    .into_iter()
                    .collect())
            }
            None => Ok(self.ctx.sets.list_sets().await?.into_keys().collect()),
        }
    }

    async fn get_set(&self, spec: &str) -> Result<Set> {
        self.ctx.sets.get_set(spec).await
    }
}
