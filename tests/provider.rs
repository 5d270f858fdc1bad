//! Data provider behaviour against an in-memory index and a canned
//! repository fetcher.

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use common::{context, prange_rdf, repository, sample_docs, CannedFetcher, InMemoryIndex};
use fcrepo_oaipmh::config::{SetConfig, SolrConfig};
use fcrepo_oaipmh::error::OaiError;
use fcrepo_oaipmh::models::Granularity;
use fcrepo_oaipmh::provider::{DataProvider, FcrepoDataProvider};
use fcrepo_oaipmh::transform::TransformRegistry;
use fcrepo_oaipmh::xml::RDF_NS;
use serde_json::json;
use tempfile::TempDir;

const OAI_DC_NS: &str = "http://www.openarchives.org/OAI/2.0/oai_dc/";

fn provider(engine: Arc<InMemoryIndex>, fetcher: Arc<CannedFetcher>) -> FcrepoDataProvider {
    FcrepoDataProvider::new(context(repository(), SolrConfig::default(), engine, fetcher))
}

fn prange_solr() -> SolrConfig {
    SolrConfig {
        sets: vec![SetConfig {
            spec: None,
            name: "Prange Collection".into(),
            description: None,
            filter: "collection_title_facet:\"Prange Collection\"".into(),
        }],
        ..SolrConfig::default()
    }
}

// ─── Listing ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_identifiers() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = provider(engine.clone(), Arc::new(CannedFetcher::ok("")));

    let page = p
        .list_identifiers("oai_dc", None, None, None, 0)
        .await
        .unwrap();
    assert_eq!(
        page.identifiers,
        vec![
            "oai:fcrepo:1903.1/sample1",
            "oai:fcrepo:1903.1/sample2",
            "oai:fcrepo:1903.1/sample3",
        ]
    );
    assert_eq!(page.total_hits, 3);
    assert_eq!(page.next_cursor, None);

    let call = &engine.calls()[0];
    assert_eq!(call.q, "*:*");
    assert_eq!(call.fq.as_deref(), Some("handle:*"));
    assert_eq!(call.rows, Some(25));
}

#[tokio::test]
async fn test_list_identifiers_date_range_filter() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = provider(engine.clone(), Arc::new(CannedFetcher::ok("")));
    let from = Utc.with_ymd_and_hms(2023, 6, 15, 0, 0, 0).unwrap();

    p.list_identifiers("oai_dc", Some(from), None, None, 0)
        .await
        .unwrap();
    assert_eq!(
        engine.calls()[0].fq.as_deref(),
        Some("handle:* AND last_modified:[2023-06-15T00:00:00Z TO *]")
    );
}

#[tokio::test]
async fn test_list_identifiers_by_set() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let ctx = context(
        repository(),
        prange_solr(),
        engine.clone(),
        Arc::new(CannedFetcher::ok("")),
    );
    let p = FcrepoDataProvider::new(ctx);

    let page = p
        .list_identifiers("oai_dc", None, None, Some("prange_collection"), 0)
        .await
        .unwrap();
    assert_eq!(page.identifiers, vec!["oai:fcrepo:1903.1/sample2"]);
    assert_eq!(
        engine.calls()[0].fq.as_deref(),
        Some("handle:* AND (collection_title_facet:\"Prange Collection\")")
    );

    let err = p
        .list_identifiers("oai_dc", None, None, Some("nope"), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, OaiError::InvalidSetSpec(s) if s == "nope"));
}

#[tokio::test]
async fn test_list_identifiers_pages() {
    let docs = (1..=30)
        .map(|i| json!({"handle": format!("1903.1/{}", i), "last_modified": "2023-06-15T00:00:00Z"}))
        .collect();
    let engine = Arc::new(InMemoryIndex::new(docs));
    let p = provider(engine, Arc::new(CannedFetcher::ok("")));

    let first = p.list_identifiers("oai_dc", None, None, None, 0).await.unwrap();
    assert_eq!(first.identifiers.len(), 25);
    assert_eq!(first.total_hits, 30);
    assert_eq!(first.next_cursor, Some(25));

    let second = p.list_identifiers("oai_dc", None, None, None, 25).await.unwrap();
    assert_eq!(second.identifiers.len(), 5);
    assert_eq!(second.identifiers[0], "oai:fcrepo:1903.1/26");
    assert_eq!(second.next_cursor, None);
}

#[tokio::test]
async fn test_list_identifiers_skips_documents_without_handle() {
    let engine = Arc::new(InMemoryIndex::new(vec![
        json!({"id": "http://example.com/orphan"}),
        json!({"handle": "1903.1/ok", "id": "http://example.com/ok"}),
    ]));
    let p = provider(engine, Arc::new(CannedFetcher::ok("")));
    let page = p.list_identifiers("oai_dc", None, None, None, 0).await.unwrap();
    assert_eq!(page.identifiers, vec!["oai:fcrepo:1903.1/ok"]);
    assert_eq!(page.total_hits, 2);
}

#[tokio::test]
async fn test_list_identifiers_unsupported_format() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = provider(engine.clone(), Arc::new(CannedFetcher::ok("")));
    let err = p
        .list_identifiers("fake_format", None, None, None, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, OaiError::UnsupportedFormat(_)));
    assert_eq!(engine.call_count(), 0);
}

// ─── Headers ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_record_header_from_listing_cache() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = provider(engine.clone(), Arc::new(CannedFetcher::ok("")));

    p.list_identifiers("oai_dc", None, None, None, 0)
        .await
        .unwrap();
    assert_eq!(engine.call_count(), 1);

    let header = p
        .get_record_header("oai:fcrepo:1903.1/sample2")
        .await
        .unwrap();
    assert_eq!(header.identifier, "oai:fcrepo:1903.1/sample2");
    assert_eq!(header.datestamp, "2023-06-16T08:37:29Z");
    assert!(header.setspecs.is_empty());
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn test_get_record_header_day_granularity() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let mut repo = repository();
    repo.granularity = Granularity::Day;
    let p = FcrepoDataProvider::new(context(
        repo,
        SolrConfig::default(),
        engine.clone(),
        Arc::new(CannedFetcher::ok("")),
    ));

    let header = p
        .get_record_header("oai:fcrepo:1903.1/sample1")
        .await
        .unwrap();
    assert_eq!(header.datestamp, "2023-06-15");
    assert_eq!(engine.calls()[0].q, "handle:\"1903.1/sample1\"");
    assert_eq!(p.identify().earliest_datestamp, "2014-01-01");
}

#[tokio::test]
async fn test_get_record_header_set_membership() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = FcrepoDataProvider::new(context(
        repository(),
        prange_solr(),
        engine.clone(),
        Arc::new(CannedFetcher::ok("")),
    ));

    let header = p
        .get_record_header("oai:fcrepo:1903.1/sample2")
        .await
        .unwrap();
    assert_eq!(header.setspecs, vec!["prange_collection"]);

    let other = p
        .get_record_header("oai:fcrepo:1903.1/sample1")
        .await
        .unwrap();
    assert!(other.setspecs.is_empty());

    assert_eq!(
        p.list_set_specs(Some("oai:fcrepo:1903.1/sample2"))
            .await
            .unwrap(),
        vec!["prange_collection"]
    );
    assert_eq!(p.list_set_specs(None).await.unwrap(), vec!["prange_collection"]);
}

#[tokio::test]
async fn test_get_record_header_not_found() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = provider(engine, Arc::new(CannedFetcher::ok("")));
    let err = p
        .get_record_header("oai:fcrepo:1903.1/missing")
        .await
        .unwrap_err();
    assert!(matches!(err, OaiError::RecordNotFound(h) if h == "1903.1/missing"));
}

#[tokio::test]
async fn test_get_record_header_malformed_identifier() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = provider(engine.clone(), Arc::new(CannedFetcher::ok("")));
    let err = p.get_record_header("invalid:ident").await.unwrap_err();
    assert!(matches!(err, OaiError::MalformedIdentifier(_)));
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn test_search_failure_is_upstream_unavailable() {
    let p = provider(
        Arc::new(InMemoryIndex::unreachable()),
        Arc::new(CannedFetcher::ok("")),
    );
    let err = p
        .get_record_header("oai:fcrepo:1903.1/sample1")
        .await
        .unwrap_err();
    assert!(matches!(err, OaiError::UpstreamUnavailable(_)));
}

// ─── Metadata ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_record_metadata_oai_dc() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let fetcher = Arc::new(CannedFetcher::ok(prange_rdf()));
    let p = provider(engine, fetcher.clone());

    let dc = p
        .get_record_metadata("oai:fcrepo:1903.1/sample1", "oai_dc")
        .await
        .unwrap();
    assert_eq!(dc.tag(), format!("{{{}}}dc", OAI_DC_NS));
    assert_eq!(
        fetcher.requested(),
        vec!["http://fcrepo-local:8080/fcrepo/rest/sample1"]
    );

    let fields: Vec<(String, String)> = dc
        .child_elements()
        .map(|e| (e.local_name().to_string(), e.text_content()))
        .collect();
    assert!(fields.contains(&("title".into(), "Shimbun Kyokai poster".into())));
    assert!(fields.contains(&("format".into(), "1 poster".into())));
    assert!(fields.contains(&(
        "rights".into(),
        "http://rightsstatements.org/vocab/InC/1.0/".into()
    )));
    assert_eq!(fields.iter().filter(|(k, _)| k == "subject").count(), 1);
}

#[tokio::test]
async fn test_get_record_metadata_rdf() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = provider(engine, Arc::new(CannedFetcher::ok(prange_rdf())));
    let rdf = p
        .get_record_metadata("oai:fcrepo:1903.1/sample1", "rdf")
        .await
        .unwrap();
    assert_eq!(rdf.tag(), format!("{{{}}}RDF", RDF_NS));
}

#[tokio::test]
async fn test_get_record_metadata_uses_listing_cache() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = provider(engine.clone(), Arc::new(CannedFetcher::ok(prange_rdf())));
    p.list_identifiers("oai_dc", None, None, None, 0)
        .await
        .unwrap();
    p.get_record_metadata("oai:fcrepo:1903.1/sample3", "oai_dc")
        .await
        .unwrap();
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn test_get_record_metadata_fetch_failure() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let fetcher = Arc::new(CannedFetcher::with_status(404, "Not Found", ""));
    let p = provider(engine.clone(), fetcher.clone());

    let err = p
        .get_record_metadata("oai:fcrepo:1903.1/sample1", "oai_dc")
        .await
        .unwrap_err();
    assert!(matches!(err, OaiError::UpstreamUnavailable(_)));
    assert_eq!(engine.call_count(), 1);
    assert_eq!(fetcher.requested().len(), 1);
}

#[tokio::test]
async fn test_get_record_metadata_unsupported_format() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let fetcher = Arc::new(CannedFetcher::ok(prange_rdf()));
    let p = provider(engine, fetcher.clone());
    let err = p
        .get_record_metadata("oai:fcrepo:1903.1/sample1", "fake_format")
        .await
        .unwrap_err();
    assert!(matches!(err, OaiError::UnsupportedFormat(_)));
    assert!(fetcher.requested().is_empty());
}

#[tokio::test]
async fn test_get_record_metadata_unparsable_body() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = provider(engine, Arc::new(CannedFetcher::ok("<rdf:RDF")));
    let err = p
        .get_record_metadata("oai:fcrepo:1903.1/sample1", "oai_dc")
        .await
        .unwrap_err();
    assert!(matches!(err, OaiError::UpstreamUnavailable(_)));
}

// ─── Formats, sets, identify ────────────────────────────────────────

#[tokio::test]
async fn test_list_metadata_formats() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = provider(engine, Arc::new(CannedFetcher::ok("")));

    let mut prefixes: Vec<_> = p
        .list_metadata_formats(None)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.prefix)
        .collect();
    prefixes.sort();
    assert_eq!(prefixes, vec!["oai_dc", "rdf"]);

    assert_eq!(
        p.list_metadata_formats(Some("oai:fcrepo:1903.1/sample1"))
            .await
            .unwrap()
            .len(),
        2
    );
    let err = p
        .list_metadata_formats(Some("oai:fcrepo:1903.1/missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, OaiError::RecordNotFound(_)));
}

#[tokio::test]
async fn test_get_set() {
    let engine = Arc::new(InMemoryIndex::new(sample_docs()));
    let p = FcrepoDataProvider::new(context(
        repository(),
        prange_solr(),
        engine,
        Arc::new(CannedFetcher::ok("")),
    ));
    let set = p.get_set("prange_collection").await.unwrap();
    assert_eq!(set.name, "Prange Collection");
    assert!(matches!(
        p.get_set("missing").await.unwrap_err(),
        OaiError::UnknownSet(_)
    ));
}

#[test]
fn test_identify_and_valid_identifier() {
    let engine = Arc::new(InMemoryIndex::new(vec![]));
    let p = provider(engine, Arc::new(CannedFetcher::ok("")));
    let identify = p.identify();
    assert_eq!(identify.repository_name, "Test Repository");
    assert_eq!(identify.earliest_datestamp, "2014-01-01T00:00:00Z");
    assert!(p.is_valid_identifier("oai:fcrepo:foo"));
    assert!(!p.is_valid_identifier("oai:other:thing"));
}

// ─── Transform loading ──────────────────────────────────────────────

#[test]
fn test_bad_transform_definition_fails_at_load() {
    let tmp = TempDir::new().unwrap();
    std::fs::copy(
        common::data_path("no_schema_location.xml"),
        tmp.path().join("broken.xml"),
    )
    .unwrap();

    let err = TransformRegistry::load_dir(tmp.path(), &Default::default()).unwrap_err();
    assert!(matches!(err, OaiError::InvalidTransformDefinition { .. }));
}
