//! # fcrepo-oaipmh
//!
//! An OAI-PMH 2.0 data provider for a Fedora repository whose resources are
//! indexed in Solr.
//!
//! Harvest requests are answered read-through from the index: listings and
//! headers come from Solr documents, and full records are fetched from the
//! repository as RDF/XML and run through a per-format transform.
//!
//! ## Architecture
//!
//! ```text
//! HTTP /oai ──▶ oai::OaiRepository ──▶ provider::DataProvider
//!                                        │
//!          ┌──────────────┬──────────────┼───────────────┐
//!          ▼              ▼              ▼               ▼
//!     identifier       sets::       solr::Index     transform +
//!        codec       SetCatalog    (SearchEngine)    fetch (RDF)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! oaipmh --config ./config/oaipmh.toml formats   # check transform definitions
//! oaipmh --config ./config/oaipmh.toml sets      # resolve the set catalog
//! oaipmh --config ./config/oaipmh.toml serve     # start the endpoint
//! curl 'http://localhost:5000/oai?verb=Identify'
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Documents and protocol value types |
//! | [`datestamp`] | Timestamp parsing and formatting |
//! | [`identifier`] | OAI identifier codec |
//! | [`solr`] | Search engine trait, Solr client, index adapter |
//! | [`sets`] | Set catalog |
//! | [`xml`] | Namespace-aware XML element tree |
//! | [`transform`] | Metadata format transforms |
//! | [`fetch`] | RDF/XML retrieval from the repository |
//! | [`provider`] | Data provider trait and implementation |
//! | [`oai`] | OAI-PMH verb processing and response envelope |
//! | [`server`] | HTTP endpoint |

pub mod config;
pub mod datestamp;
pub mod error;
pub mod fetch;
pub mod identifier;
pub mod models;
pub mod oai;
pub mod provider;
pub mod server;
pub mod sets;
pub mod solr;
pub mod transform;
pub mod xml;
