//! Error taxonomy for the data provider.
//!
//! Every failure the core can produce is an [`OaiError`]. The protocol layer
//! ([`crate::oai`]) turns the request-level kinds into OAI-PMH error codes;
//! the HTTP layer ([`crate::server`]) turns the rest into 503/500 responses
//! using [`OaiError::class`].

use std::path::PathBuf;

use crate::xml::XmlError;

/// Convenience alias used across the core modules.
pub type Result<T, E = OaiError> = std::result::Result<T, E>;

/// Coarse classification of an [`OaiError`], independent of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller sent something unusable (bad identifier, set, or format).
    BadRequest,
    /// The request was well-formed but names a record that does not exist.
    NotFound,
    /// Solr or the repository could not be reached or answered with an error.
    Unavailable,
    /// The provider itself is misconfigured.
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum OaiError {
    /// The identifier string does not have the `oai:{namespace}:{local}` shape.
    #[error("Malformed OAI identifier \"{0}\": must start with \"oai:\" and contain a namespace")]
    MalformedIdentifier(String),

    /// No indexed document matches the local identifier.
    #[error("Unable to find handle {0} in the index")]
    RecordNotFound(String),

    /// `get_set` was asked for a spec that is not in the catalog.
    #[error("Unknown set \"{0}\"")]
    UnknownSet(String),

    /// A selective-harvest set spec could not be resolved to a filter.
    #[error("'{0}' is not a valid setSpec value")]
    InvalidSetSpec(String),

    /// No transform is loaded for the requested metadata prefix.
    #[error("Metadata format \"{0}\" is not supported by this repository")]
    UnsupportedFormat(String),

    /// Search engine or repository transport failure.
    #[error("{0}")]
    UpstreamUnavailable(String),

    /// Startup-time misconfiguration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A transform definition file could not be loaded.
    #[error("Invalid transform definition {path}: {reason}")]
    InvalidTransformDefinition { path: PathBuf, reason: String },

    /// A response document could not be serialized.
    #[error(transparent)]
    Xml(#[from] XmlError),
}

impl OaiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            OaiError::MalformedIdentifier(_)
            | OaiError::UnknownSet(_)
            | OaiError::InvalidSetSpec(_)
            | OaiError::UnsupportedFormat(_) => ErrorClass::BadRequest,
            OaiError::RecordNotFound(_) => ErrorClass::NotFound,
            OaiError::UpstreamUnavailable(_) => ErrorClass::Unavailable,
            OaiError::Configuration(_)
            | OaiError::InvalidTransformDefinition { .. }
            | OaiError::Xml(_) => ErrorClass::Internal,
        }
    }

    pub(crate) fn invalid_transform(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        OaiError::InvalidTransformDefinition {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
