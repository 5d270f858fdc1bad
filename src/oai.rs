//! OAI-PMH 2.0 request processing.
//!
//! [`OaiRepository`] validates a request's arguments, dispatches the verb to
//! a [`DataProvider`] and assembles the response envelope. Request-level
//! failures become `<error>` elements inside a normal response; upstream and
//! internal failures are returned as [`OaiError`] for the HTTP layer.
//!
//! | Verb | Required | Optional |
//! |------|----------|----------|
//! | `Identify` | | |
//! | `ListMetadataFormats` | | `identifier` |
//! | `ListSets` | | `resumptionToken` |
//! | `ListIdentifiers` | `metadataPrefix` | `from`, `until`, `set` |
//! | `ListRecords` | `metadataPrefix` | `from`, `until`, `set` |
//! | `GetRecord` | `identifier`, `metadataPrefix` | |
//!
//! `resumptionToken` is exclusive with every other argument.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::datestamp::{datestamp_long, parse_datestamp, parse_index_timestamp};
use crate::error::{OaiError, Result};
use crate::models::{Granularity, RecordHeader};
use crate::provider::DataProvider;
use crate::xml::{Element, XSI_NS};

pub const OAI_NS: &str = "http://www.openarchives.org/OAI/2.0/";
const OAI_SCHEMA: &str = "http://www.openarchives.org/OAI/2.0/OAI-PMH.xsd";
const OAI_DC_NS: &str = "http://www.openarchives.org/OAI/2.0/oai_dc/";
const OAI_DC_SCHEMA: &str = "http://www.openarchives.org/OAI/2.0/oai_dc.xsd";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

/// Protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadArgument,
    BadResumptionToken,
    BadVerb,
    CannotDisseminateFormat,
    IdDoesNotExist,
    NoRecordsMatch,
    NoMetadataFormats,
    NoSetHierarchy,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadArgument => "badArgument",
            ErrorCode::BadResumptionToken => "badResumptionToken",
            ErrorCode::BadVerb => "badVerb",
            ErrorCode::CannotDisseminateFormat => "cannotDisseminateFormat",
            ErrorCode::IdDoesNotExist => "idDoesNotExist",
            ErrorCode::NoRecordsMatch => "noRecordsMatch",
            ErrorCode::NoMetadataFormats => "noMetadataFormats",
            ErrorCode::NoSetHierarchy => "noSetHierarchy",
        }
    }

    /// Codes reported with HTTP 404 rather than 400.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ErrorCode::NoRecordsMatch | ErrorCode::IdDoesNotExist)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub message: String,
}

impl ProtocolError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A serialized OAI-PMH response.
#[derive(Debug, Clone)]
pub struct OaiResponse {
    pub xml: String,
    pub error: Option<ErrorCode>,
}

impl OaiResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

enum Failure {
    Protocol(ProtocolError),
    Fatal(OaiError),
}

impl From<ProtocolError> for Failure {
    fn from(e: ProtocolError) -> Self {
        Failure::Protocol(e)
    }
}

impl From<OaiError> for Failure {
    fn from(e: OaiError) -> Self {
        let code = match &e {
            OaiError::MalformedIdentifier(_)
            | OaiError::UnknownSet(_)
            | OaiError::InvalidSetSpec(_) => ErrorCode::BadArgument,
            OaiError::RecordNotFound(_) => ErrorCode::IdDoesNotExist,
            OaiError::UnsupportedFormat(_) => ErrorCode::CannotDisseminateFormat,
            _ => return Failure::Fatal(e),
        };
        Failure::Protocol(ProtocolError::new(code, e.to_string()))
    }
}

type Outcome<T> = std::result::Result<T, Failure>;

fn bad_argument(message: impl Into<String>) -> Failure {
    Failure::Protocol(ProtocolError::new(ErrorCode::BadArgument, message))
}

fn bad_token(message: impl Into<String>) -> Failure {
    Failure::Protocol(ProtocolError::new(ErrorCode::BadResumptionToken, message))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Identify,
    ListMetadataFormats,
    ListSets,
    ListIdentifiers,
    ListRecords,
    GetRecord,
}

impl Verb {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "Identify" => Verb::Identify,
            "ListMetadataFormats" => Verb::ListMetadataFormats,
            "ListSets" => Verb::ListSets,
            "ListIdentifiers" => Verb::ListIdentifiers,
            "ListRecords" => Verb::ListRecords,
            "GetRecord" => Verb::GetRecord,
            _ => return None,
        })
    }

    fn as_str(&self) -> &'static str {
        match self {
            Verb::Identify => "Identify",
            Verb::ListMetadataFormats => "ListMetadataFormats",
            Verb::ListSets => "ListSets",
            Verb::ListIdentifiers => "ListIdentifiers",
            Verb::ListRecords => "ListRecords",
            Verb::GetRecord => "GetRecord",
        }
    }

    /// (required, optional) arguments, excluding `resumptionToken`.
    fn arguments(&self) -> (&'static [&'static str], &'static [&'static str]) {
        match self {
            Verb::Identify => (&[], &[]),
            Verb::ListMetadataFormats => (&[], &["identifier"]),
            Verb::ListSets => (&[], &[]),
            Verb::ListIdentifiers | Verb::ListRecords => {
                (&["metadataPrefix"], &["from", "until", "set"])
            }
            Verb::GetRecord => (&["identifier", "metadataPrefix"], &[]),
        }
    }

    fn resumable(&self) -> bool {
        matches!(
            self,
            Verb::ListSets | Verb::ListIdentifiers | Verb::ListRecords
        )
    }
}

/// Harvest arguments shared by `ListIdentifiers` and `ListRecords`, and the
/// state carried in their resumption tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestState {
    pub cursor: usize,
    pub metadata_prefix: String,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub set: Option<String>,
}

impl HarvestState {
    /// Encodes as `cursor|prefix|from|until|set`, each field percent-encoded.
    pub fn to_token(&self) -> String {
        let date = |d: &Option<DateTime<Utc>>| d.as_ref().map(datestamp_long).unwrap_or_default();
        [
            self.cursor.to_string(),
            self.metadata_prefix.clone(),
            date(&self.from),
            date(&self.until),
            self.set.clone().unwrap_or_default(),
        ]
        .iter()
        .map(|field| urlencoding::encode(field).into_owned())
        .collect::<Vec<_>>()
        .join("|")
    }

    pub fn from_token(token: &str) -> Option<Self> {
        let fields = token
            .split('|')
            .map(|f| urlencoding::decode(f).ok().map(|s| s.into_owned()))
            .collect::<Option<Vec<_>>>()?;
        let [cursor, prefix, from, until, set] = <[String; 5]>::try_from(fields).ok()?;

        let date = |s: &str| -> Option<Option<DateTime<Utc>>> {
            if s.is_empty() {
                Some(None)
            } else {
                parse_index_timestamp(s).map(Some)
            }
        };
        if prefix.is_empty() {
            return None;
        }
        Some(Self {
            cursor: cursor.parse().ok()?,
            metadata_prefix: prefix,
            from: date(&from)?,
            until: date(&until)?,
            set: (!set.is_empty()).then_some(set),
        })
    }
}

/// Processes OAI-PMH requests against a [`DataProvider`].
pub struct OaiRepository<'a, P: DataProvider + ?Sized> {
    provider: &'a P,
}

impl<'a, P: DataProvider + ?Sized> OaiRepository<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    /// Handles one request given its query or form parameters.
    pub async fn process(&self, params: &[(String, String)]) -> Result<OaiResponse> {
        let base_url = self.provider.identify().base_url;
        let mut request = oai("request").with_text(&base_url);

        let body = match self.dispatch(params, &mut request).await {
            Ok(body) => Ok(body),
            Err(Failure::Protocol(e)) => Err(e),
            Err(Failure::Fatal(e)) => return Err(e),
        };

        let mut root = oai("OAI-PMH")
            .with_attribute("xmlns", OAI_NS)
            .with_attribute("xmlns:xsi", XSI_NS)
            .with_attribute("xsi:schemaLocation", &format!("{} {}", OAI_NS, OAI_SCHEMA))
            .with_child(oai("responseDate").with_text(&Granularity::Seconds.format(&Utc::now())));

        let error = match body {
            Ok(body) => {
                root.push_child(request);
                root.push_child(body);
                None
            }
            Err(e) => {
                debug!("OAI-PMH error {}: {}", e.code, e.message);
                if matches!(e.code, ErrorCode::BadVerb | ErrorCode::BadArgument) {
                    request = oai("request").with_text(&base_url);
                }
                root.push_child(request);
                root.push_child(
                    oai("error")
                        .with_attribute("code", e.code.as_str())
                        .with_text(&e.message),
                );
                Some(e.code)
            }
        };

        Ok(OaiResponse {
            xml: root.to_document_string()?,
            error,
        })
    }

    async fn dispatch(&self, params: &[(String, String)], request: &mut Element) -> Outcome<Element> {
        let mut args: BTreeMap<&str, &str> = BTreeMap::new();
        for (key, value) in params {
            if args.insert(key.as_str(), value.as_str()).is_some() {
                let code = if key == "verb" {
                    ErrorCode::BadVerb
                } else {
                    ErrorCode::BadArgument
                };
                return Err(ProtocolError::new(code, format!("Repeated argument \"{}\"", key)).into());
            }
        }

        let verb_name = args.remove("verb").ok_or_else(|| {
            ProtocolError::new(ErrorCode::BadVerb, "Missing verb argument")
        })?;
        let verb = Verb::parse(verb_name).ok_or_else(|| {
            ProtocolError::new(ErrorCode::BadVerb, format!("Illegal verb \"{}\"", verb_name))
        })?;
        validate_arguments(verb, &args)?;

        request.push_attribute("verb", verb.as_str());
        for (key, value) in &args {
            request.push_attribute(key, value);
        }

        let body = match verb {
            Verb::Identify => self.identify(),
            Verb::ListMetadataFormats => self.list_metadata_formats(args.get("identifier").copied()).await?,
            Verb::ListSets => self.list_sets(args.get("resumptionToken").copied()).await?,
            Verb::ListIdentifiers | Verb::ListRecords => {
                let state = self.harvest_state(&args)?;
                self.list(verb, state).await?
            }
            Verb::GetRecord => {
                self.get_record(args["identifier"], args["metadataPrefix"]).await?
            }
        };
        Ok(body)
    }

    fn identify(&self) -> Element {
        let identify = self.provider.identify();
        let mut el = oai("Identify")
            .with_child(oai("repositoryName").with_text(&identify.repository_name))
            .with_child(oai("baseURL").with_text(&identify.base_url))
            .with_child(oai("protocolVersion").with_text("2.0"));
        for email in &identify.admin_email {
            el.push_child(oai("adminEmail").with_text(email));
        }
        el.with_child(oai("earliestDatestamp").with_text(&identify.earliest_datestamp))
            .with_child(oai("deletedRecord").with_text(identify.deleted_record.as_str()))
            .with_child(oai("granularity").with_text(identify.granularity.as_str()))
    }

    async fn list_metadata_formats(&self, identifier: Option<&str>) -> Outcome<Element> {
        if let Some(identifier) = identifier {
            self.check_identifier(identifier)?;
        }
        let formats = self.provider.list_metadata_formats(identifier).await?;
        if formats.is_empty() {
            return Err(ProtocolError::new(
                ErrorCode::NoMetadataFormats,
                "No metadata formats are available",
            )
            .into());
        }
        let mut el = oai("ListMetadataFormats");
        for format in formats {
            el.push_child(
                oai("metadataFormat")
                    .with_child(oai("metadataPrefix").with_text(&format.prefix))
                    .with_child(oai("schema").with_text(&format.schema))
                    .with_child(oai("metadataNamespace").with_text(&format.namespace)),
            );
        }
        Ok(el)
    }

    async fn list_sets(&self, token: Option<&str>) -> Outcome<Element> {
        if let Some(token) = token {
            return Err(bad_token(format!("Unknown resumption token \"{}\"", token)));
        }
        let specs = self.provider.list_set_specs(None).await?;
        if specs.is_empty() {
            return Err(ProtocolError::new(
                ErrorCode::NoSetHierarchy,
                "This repository does not support sets",
            )
            .into());
        }
        let mut el = oai("ListSets");
        for spec in specs {
            let set = self.provider.get_set(&spec).await?;
            let mut set_el = oai("set")
                .with_child(oai("setSpec").with_text(&set.spec))
                .with_child(oai("setName").with_text(&set.name));
            if let Some(description) = &set.description {
                set_el.push_child(oai("setDescription").with_child(dc_description(description)));
            }
            el.push_child(set_el);
        }
        Ok(el)
    }

    fn harvest_state(&self, args: &BTreeMap<&str, &str>) -> Outcome<HarvestState> {
        if let Some(token) = args.get("resumptionToken") {
            return HarvestState::from_token(token)
                .ok_or_else(|| bad_token(format!("Invalid resumption token \"{}\"", token)));
        }

        let granularity = self.provider.identify().granularity;
        let from = args
            .get("from")
            .map(|v| parse_bound(v, granularity, false))
            .transpose()?;
        let until = args
            .get("until")
            .map(|v| parse_bound(v, granularity, true))
            .transpose()?;

        if let (Some((from, from_g)), Some((until, until_g))) = (&from, &until) {
            if from_g != until_g {
                return Err(bad_argument(
                    "The from and until arguments must have the same granularity",
                ));
            }
            if from > until {
                return Err(bad_argument("The from argument must not be later than until"));
            }
        }

        Ok(HarvestState {
            cursor: 0,
            metadata_prefix: args["metadataPrefix"].to_string(),
            from: from.map(|(d, _)| d),
            until: until.map(|(d, _)| d),
            set: args.get("set").map(|s| s.to_string()),
        })
    }

    async fn list(&self, verb: Verb, mut state: HarvestState) -> Outcome<Element> {
        // Pages whose documents were all skipped are passed over.
        let page = loop {
            let page = self
                .provider
                .list_identifiers(
                    &state.metadata_prefix,
                    state.from,
                    state.until,
                    state.set.as_deref(),
                    state.cursor,
                )
                .await?;
            match page.next_cursor {
                Some(next) if page.identifiers.is_empty() => state.cursor = next,
                _ => break page,
            }
        };
        if page.identifiers.is_empty() {
            return Err(ProtocolError::new(
                ErrorCode::NoRecordsMatch,
                "No records match the request",
            )
            .into());
        }

        let mut el = oai(verb.as_str());
        for identifier in &page.identifiers {
            let header = header_element(&self.provider.get_record_header(identifier).await?);
            if verb == Verb::ListIdentifiers {
                el.push_child(header);
            } else {
                el.push_child(self.record(identifier, &state.metadata_prefix, header).await?);
            }
        }

        let complete = page.total_hits.to_string();
        let cursor = state.cursor.to_string();
        match page.next_cursor {
            Some(next) => {
                let token = HarvestState {
                    cursor: next,
                    ..state
                }
                .to_token();
                el.push_child(
                    oai("resumptionToken")
                        .with_attribute("completeListSize", &complete)
                        .with_attribute("cursor", &cursor)
                        .with_text(&token),
                );
            }
            None if state.cursor > 0 => el.push_child(
                oai("resumptionToken")
                    .with_attribute("completeListSize", &complete)
                    .with_attribute("cursor", &cursor),
            ),
            None => {}
        }
        Ok(el)
    }

    async fn get_record(&self, identifier: &str, metadata_prefix: &str) -> Outcome<Element> {
        self.check_identifier(identifier)?;
        let header = header_element(&self.provider.get_record_header(identifier).await?);
        let record = self.record(identifier, metadata_prefix, header).await?;
        Ok(oai("GetRecord").with_child(record))
    }

    async fn record(&self, identifier: &str, metadata_prefix: &str, header: Element) -> Outcome<Element> {
        let metadata = self
            .provider
            .get_record_metadata(identifier, metadata_prefix)
            .await?;
        let mut record = oai("record")
            .with_child(header)
            .with_child(oai("metadata").with_child(metadata));
        for about in self.provider.get_record_abouts(identifier).await? {
            record.push_child(oai("about").with_child(about));
        }
        Ok(record)
    }

    fn check_identifier(&self, identifier: &str) -> Outcome<()> {
        if self.provider.is_valid_identifier(identifier) {
            Ok(())
        } else {
            Err(ProtocolError::new(
                ErrorCode::IdDoesNotExist,
                format!("\"{}\" is not a valid identifier for this repository", identifier),
            )
            .into())
        }
    }
}

fn validate_arguments(verb: Verb, args: &BTreeMap<&str, &str>) -> Outcome<()> {
    let (required, optional) = verb.arguments();

    if args.contains_key("resumptionToken") {
        if !verb.resumable() {
            return Err(bad_argument(format!(
                "{} does not accept a resumptionToken",
                verb.as_str()
            )));
        }
        if args.len() > 1 {
            return Err(bad_argument("resumptionToken is an exclusive argument"));
        }
        return Ok(());
    }

    for key in args.keys() {
        if !required.iter().chain(optional).any(|k| k == key) {
            return Err(bad_argument(format!(
                "Illegal argument \"{}\" for {}",
                key,
                verb.as_str()
            )));
        }
    }
    if let Some(missing) = required.iter().find(|k| !args.contains_key(*k)) {
        return Err(bad_argument(format!(
            "Missing required argument \"{}\"",
            missing
        )));
    }
    Ok(())
}

/// Parses a `from`/`until` argument. A date-only `until` covers the whole day.
fn parse_bound(
    value: &str,
    repository: Granularity,
    upper: bool,
) -> Outcome<(DateTime<Utc>, Granularity)> {
    let (ts, granularity) = parse_datestamp(value)
        .ok_or_else(|| bad_argument(format!("Illegal datestamp \"{}\"", value)))?;
    if granularity == Granularity::Seconds && repository == Granularity::Day {
        return Err(bad_argument(format!(
            "Datestamp \"{}\" is finer than the repository granularity {}",
            value, repository
        )));
    }
    let ts = if upper && granularity == Granularity::Day {
        ts + Duration::seconds(86_399)
    } else {
        ts
    };
    Ok((ts, granularity))
}

fn oai(name: &str) -> Element {
    Element::new(name, Some(OAI_NS))
}

fn header_element(header: &RecordHeader) -> Element {
    let mut el = oai("header")
        .with_child(oai("identifier").with_text(&header.identifier))
        .with_child(oai("datestamp").with_text(&header.datestamp));
    for spec in &header.setspecs {
        el.push_child(oai("setSpec").with_text(spec));
    }
    el
}

fn dc_description(text: &str) -> Element {
    Element::new("oai_dc:dc", Some(OAI_DC_NS))
        .with_attribute("xmlns:oai_dc", OAI_DC_NS)
        .with_attribute("xmlns:dc", DC_NS)
        .with_attribute("xmlns:xsi", XSI_NS)
        .with_attribute(
            "xsi:schemaLocation",
            &format!("{} {}", OAI_DC_NS, OAI_DC_SCHEMA),
        )
        .with_child(Element::new("dc:description", Some(DC_NS)).with_text(text))
}
