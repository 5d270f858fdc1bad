//! Set catalog.
//!
//! The catalog is the union of three sources, merged in this order of
//! precedence (earlier wins on spec collision):
//!
//! 1. `[[solr.sets]]` entries from the configuration,
//! 2. `[solr.named_filters]` entries (spec doubles as the name),
//! 3. sets auto-derived from the `auto_set` query, one per distinct name.
//!
//! Selective harvesting and `ListSets` both consult this single catalog.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::SolrConfig;
use crate::error::{OaiError, Result};
use crate::models::Set;
use crate::solr::{solr_quoted, Index, SelectQuery};

/// Normalizes a set name into a spec: lowercase, with every run of
/// characters outside `[a-z0-9]` collapsed to a single underscore.
pub fn get_set_spec(name: &str) -> String {
    let mut spec = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            spec.push(c);
            in_separator = false;
        } else if !in_separator {
            spec.push('_');
            in_separator = true;
        }
    }
    spec
}

pub struct SetCatalog {
    index: Arc<Index>,
}

impl SetCatalog {
    pub fn new(index: Arc<Index>) -> Self {
        Self { index }
    }

    fn config(&self) -> &SolrConfig {
        self.index.config()
    }

    /// Returns every known set keyed by spec.
    ///
    /// Runs the auto-set query when `auto_create_sets` is enabled.
    pub async fn list_sets(&self) -> Result<BTreeMap<String, Set>> {
        let config = self.config();
        let mut sets = BTreeMap::new();

        for set_conf in &config.sets {
            let spec = set_conf
                .spec
                .clone()
                .unwrap_or_else(|| get_set_spec(&set_conf.name));
            sets.entry(spec.clone()).or_insert_with(|| Set {
                spec,
                name: set_conf.name.clone(),
                description: set_conf.description.clone(),
                filter: set_conf.filter.clone(),
            });
        }

        for (spec, filter) in &config.named_filters {
            sets.entry(spec.clone()).or_insert_with(|| Set {
                spec: spec.clone(),
                name: spec.clone(),
                description: None,
                filter: filter.clone(),
            });
        }

        if config.auto_create_sets {
            for set in self.auto_sets().await? {
                if sets.contains_key(&set.spec) {
                    debug!("Auto-derived set '{}' shadowed by configuration", set.spec);
                    continue;
                }
                sets.insert(set.spec.clone(), set);
            }
        }

        Ok(sets)
    }

    async fn auto_sets(&self) -> Result<Vec<Set>> {
        let auto = &self.config().auto_set;
        let (query, name_field, name_query_field) =
            match (&auto.query, &auto.name_field, &auto.name_query_field) {
                (Some(q), Some(n), Some(nq)) => (q, n, nq),
                _ => {
                    let missing = auto.missing_keys().join(", ");
                    error!("Missing auto_set configuration keys: {}", missing);
                    return Err(OaiError::Configuration(format!(
                        "auto_create_sets is enabled but auto_set is missing: {}",
                        missing
                    )));
                }
            };

        let select = SelectQuery::new(query.as_str())
            .fields(name_field.as_str())
            .page(0, auto.rows);
        let results = self.index.search(&select).await?;

        let mut seen = BTreeSet::new();
        let mut sets = Vec::new();
        for doc in &results.documents {
            let Some(name) = doc.get_str(name_field) else {
                continue;
            };
            let spec = get_set_spec(&name);
            if !seen.insert(spec.clone()) {
                continue;
            }
            sets.push(Set {
                spec,
                filter: format!("{}:{}", name_query_field, solr_quoted(&name)),
                name,
                description: None,
            });
        }
        Ok(sets)
    }

    pub async fn get_set(&self, spec: &str) -> Result<Set> {
        self.list_sets()
            .await?
            .remove(spec)
            .ok_or_else(|| OaiError::UnknownSet(spec.to_string()))
    }

    /// Resolves a set spec to its filter query for selective harvesting.
    pub async fn resolve_set_filter(&self, spec: &str) -> Result<String> {
        self.list_sets()
            .await?
            .remove(spec)
            .map(|set| set.filter)
            .ok_or_else(|| OaiError::InvalidSetSpec(spec.to_string()))
    }

    /// Returns the specs of all sets containing the document with `local_id`.
    ///
    /// Issues one membership query per known set, so the cost grows with the
    /// size of the catalog.
    pub async fn sets_containing(&self, local_id: &str) -> Result<BTreeSet<String>> {
        let mut specs = BTreeSet::new();
        for (spec, set) in self.list_sets().await? {
            let query = SelectQuery::new(self.index.local_id_query(local_id))
                .filter(set.filter.as_str())
                .fields(self.index.uri_field())
                .page(0, 1);
            let results = self.index.search(&query).await?;
            if results.total_hits > 0 || !results.is_empty() {
                specs.insert(spec);
            }
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutoSetConfig, SetConfig};
    use crate::models::ResultSet;
    use crate::solr::mock::{results, MockEngine};
    use serde_json::json;

    fn catalog(config: SolrConfig, engine: Arc<MockEngine>) -> SetCatalog {
        SetCatalog::new(Arc::new(Index::new(config, engine)))
    }

    fn static_set(spec: Option<&str>, name: &str, filter: &str) -> SetConfig {
        SetConfig {
            spec: spec.map(str::to_string),
            name: name.to_string(),
            description: None,
            filter: filter.to_string(),
        }
    }

    fn auto_config() -> SolrConfig {
        SolrConfig {
            auto_create_sets: true,
            auto_set: AutoSetConfig {
                query: Some("component:Collection".into()),
                name_field: Some("display_title".into()),
                name_query_field: Some("collection_title_facet".into()),
                rows: 1000,
            },
            ..SolrConfig::default()
        }
    }

    #[test]
    fn test_get_set_spec() {
        assert_eq!(get_set_spec(""), "");
        assert_eq!(get_set_spec("Simple"), "simple");
        assert_eq!(get_set_spec("SOME Collection [#1]"), "some_collection_1_");
        assert_eq!(
            get_set_spec("Katherine Anne Porter Correspondence"),
            "katherine_anne_porter_correspondence"
        );
        assert_eq!(get_set_spec("Café--Menus"), "caf_menus");
    }

    #[tokio::test]
    async fn test_no_sets_by_default() {
        let engine = Arc::new(MockEngine::returning(vec![]));
        let sets = catalog(SolrConfig::default(), engine.clone())
            .list_sets()
            .await
            .unwrap();
        assert!(sets.is_empty());
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_auto_create_sets() {
        let engine = Arc::new(MockEngine::returning(vec![
            json!({"display_title": "Foo Collection"}),
            json!({"display_title": "Bar Stuff"}),
            json!({"display_title": "Foo  Collection"}),
        ]));
        let sets = catalog(auto_config(), engine.clone())
            .list_sets()
            .await
            .unwrap();

        assert_eq!(
            sets.keys().cloned().collect::<Vec<_>>(),
            vec!["bar_stuff", "foo_collection"]
        );
        assert_eq!(
            sets["foo_collection"].filter,
            "collection_title_facet:\"Foo Collection\""
        );
        let call = &engine.calls()[0];
        assert_eq!(call.q, "component:Collection");
        assert_eq!(call.fl.as_deref(), Some("display_title"));
    }

    #[tokio::test]
    async fn test_static_sets_win_over_auto_sets() {
        let mut config = auto_config();
        config.sets = vec![static_set(None, "Foo Collection", "title:Foo")];
        let engine = Arc::new(MockEngine::returning(vec![
            json!({"display_title": "Foo Collection"}),
        ]));
        let sets = catalog(config, engine).list_sets().await.unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets["foo_collection"].filter, "title:Foo");
    }

    #[tokio::test]
    async fn test_missing_auto_set_config() {
        let config = SolrConfig {
            auto_create_sets: true,
            ..SolrConfig::default()
        };
        let engine = Arc::new(MockEngine::returning(vec![]));
        let err = catalog(config, engine).list_sets().await.unwrap_err();
        assert!(matches!(err, OaiError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_get_set() {
        let config = SolrConfig {
            sets: vec![static_set(Some("foo"), "Foo!", "title:Foo")],
            ..SolrConfig::default()
        };
        let catalog = catalog(config, Arc::new(MockEngine::returning(vec![])));

        let set = catalog.get_set("foo").await.unwrap();
        assert_eq!(set.spec, "foo");
        assert_eq!(set.name, "Foo!");
        assert_eq!(set.filter, "title:Foo");

        let err = catalog.get_set("nope").await.unwrap_err();
        assert!(matches!(err, OaiError::UnknownSet(_)));
    }

    #[tokio::test]
    async fn test_resolve_set_filter_checks_named_filters() {
        let mut config = SolrConfig {
            sets: vec![static_set(Some("foo"), "Foo!", "title:Foo")],
            ..SolrConfig::default()
        };
        config
            .named_filters
            .insert("posters".into(), "component:Poster".into());
        config
            .named_filters
            .insert("foo".into(), "title:Shadowed".into());
        let catalog = catalog(config, Arc::new(MockEngine::returning(vec![])));

        assert_eq!(catalog.resolve_set_filter("foo").await.unwrap(), "title:Foo");
        assert_eq!(
            catalog.resolve_set_filter("posters").await.unwrap(),
            "component:Poster"
        );
        let err = catalog.resolve_set_filter("missing").await.unwrap_err();
        assert!(matches!(err, OaiError::InvalidSetSpec(_)));
    }

    #[tokio::test]
    async fn test_sets_containing() {
        let config = SolrConfig {
            sets: vec![
                static_set(Some("foo"), "Foo!", "title:Foo"),
                static_set(Some("bar"), "Bar!", "title:Bar"),
                static_set(Some("baz"), "Baz!", "title:Baz"),
            ],
            ..SolrConfig::default()
        };
        let engine = Arc::new(MockEngine::new(|query| {
            if query.fq.as_deref() == Some("title:Bar") {
                Ok(results(&[json!({"id": "bar"})]))
            } else {
                Ok(ResultSet::default())
            }
        }));
        let catalog = catalog(config, engine.clone());

        let specs = catalog.sets_containing("some/handle").await.unwrap();
        assert_eq!(specs.into_iter().collect::<Vec<_>>(), vec!["bar"]);

        let calls = engine.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.q == "handle:\"some/handle\""));
        assert!(calls.iter().all(|c| c.fl.as_deref() == Some("id")));
    }
}
