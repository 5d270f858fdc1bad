//! OAI identifier codec.
//!
//! Protocol identifiers have the form `oai:{namespace}:{local}`, where
//! `local` is the percent-encoded repository handle or URI. Encoding keeps
//! `/` literal and escapes everything outside the unreserved set, so
//! `1903.1/sample1` stays readable while
//! `http://fcrepo-local:8080/rest/foo` becomes
//! `http%3A//fcrepo-local%3A8080/rest/foo`.

use std::fmt;
use std::str::FromStr;

use crate::error::OaiError;

const SCHEME: &str = "oai";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OaiIdentifier {
    pub namespace: String,
    pub local_id: String,
}

impl OaiIdentifier {
    pub fn new(namespace: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_id: local_id.into(),
        }
    }

    /// Parses `oai:{namespace}:{local}`.
    ///
    /// Splits on the first two colons only; the local part may contain
    /// further (encoded or literal) colons.
    pub fn parse(identifier: &str) -> Result<Self, OaiError> {
        let malformed = || OaiError::MalformedIdentifier(identifier.to_string());

        let rest = identifier
            .strip_prefix(SCHEME)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(malformed)?;
        let (namespace, encoded) = rest.split_once(':').ok_or_else(malformed)?;
        let local_id = urlencoding::decode(encoded).map_err(|_| malformed())?;

        Ok(Self::new(namespace, local_id.into_owned()))
    }
}

impl FromStr for OaiIdentifier {
    type Err = OaiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OaiIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", SCHEME, self.namespace, encode_local_id(&self.local_id))
    }
}

/// Percent-encodes a local identifier, leaving path separators intact.
pub fn encode_local_id(local_id: &str) -> String {
    local_id
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
