//! Metadata transform pipeline.
//!
//! Each supported metadata format is described by one definition file in
//! the transforms directory. The format prefix is the file stem unless
//! overridden in `[transforms.prefixes]`.
//!
//! # Definition format
//!
//! ```xml
//! <transform mode="map"
//!     xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
//!     xsi:schemaLocation="http://www.openarchives.org/OAI/2.0/oai_dc/ http://www.openarchives.org/OAI/2.0/oai_dc.xsd">
//!   <output name="oai_dc:dc">
//!     <namespace prefix="oai_dc" uri="http://www.openarchives.org/OAI/2.0/oai_dc/"/>
//!     <namespace prefix="dc" uri="http://purl.org/dc/elements/1.1/"/>
//!   </output>
//!   <map from="http://purl.org/dc/terms/title" to="dc:title"/>
//! </transform>
//! ```
//!
//! `xsi:schemaLocation` is required: its first token is the target namespace
//! and the remainder the schema URI. `mode="copy"` passes the source root
//! through unchanged.
//!
//! A `map` transform walks the source in document order. Every element
//! whose expanded name (namespace URI + local name) matches a rule's `from`
//! yields one output element carrying the source element's trimmed text, or
//! its `rdf:resource` when it has no text. Identical outputs are emitted once.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{OaiError, Result};
use crate::models::MetadataFormat;
use crate::xml::{split_qname, Element, RDF_NS, XSI_NS};

#[derive(Debug, Clone)]
struct MapRule {
    from: String,
    to: String,
    to_namespace: String,
}

#[derive(Debug, Clone)]
enum TransformKind {
    Copy,
    Map {
        output: String,
        output_namespace: Option<String>,
        namespaces: Vec<(String, String)>,
        rules: Vec<MapRule>,
    },
}

/// One loaded metadata format.
#[derive(Debug, Clone)]
pub struct Transformer {
    format: MetadataFormat,
    path: PathBuf,
    kind: TransformKind,
}

impl Transformer {
    /// Loads a definition file. `prefix` overrides the file stem.
    pub fn load(path: &Path, prefix: Option<&str>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OaiError::invalid_transform(path, e.to_string()))?;
        Self::from_definition(path, &content, prefix)
    }

    /// Builds a transformer from definition text; `path` is used for the
    /// default prefix and error messages.
    pub fn from_definition(path: &Path, content: &str, prefix: Option<&str>) -> Result<Self> {
        let invalid = |reason: String| OaiError::invalid_transform(path, reason);

        let root = Element::parse(content).map_err(|e| invalid(e.to_string()))?;
        if root.local_name() != "transform" {
            return Err(invalid(format!(
                "root element must be <transform>, found <{}>",
                root.name()
            )));
        }

        let schema_location = root
            .attribute(Some(XSI_NS), "schemaLocation")
            .ok_or_else(|| invalid("No @xsi:schemaLocation".to_string()))?;
        let (namespace, schema) = schema_location
            .trim()
            .split_once(char::is_whitespace)
            .map(|(ns, schema)| (ns.to_string(), schema.trim().to_string()))
            .ok_or_else(|| {
                invalid(format!(
                    "xsi:schemaLocation \"{}\" must contain a namespace and a schema",
                    schema_location
                ))
            })?;

        let prefix = match prefix {
            Some(p) => p.to_string(),
            None => path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .ok_or_else(|| invalid("cannot derive a prefix from the file name".to_string()))?,
        };

        let kind = match root.attribute(None, "mode").unwrap_or("map") {
            "copy" => TransformKind::Copy,
            "map" => parse_map(&root).map_err(invalid)?,
            other => return Err(invalid(format!("unknown mode \"{}\"", other))),
        };

        Ok(Self {
            format: MetadataFormat {
                prefix,
                namespace,
                schema,
            },
            path: path.to_path_buf(),
            kind,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.format.prefix
    }

    pub fn metadata_format(&self) -> &MetadataFormat {
        &self.format
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies the transform. Pure function of `source`.
    pub fn apply(&self, source: &Element) -> Element {
        let (output, output_namespace, namespaces, rules) = match &self.kind {
            TransformKind::Copy => return source.clone(),
            TransformKind::Map {
                output,
                output_namespace,
                namespaces,
                rules,
            } => (output, output_namespace, namespaces, rules),
        };

        let mut root = Element::new(output.as_str(), output_namespace.as_deref());
        for (prefix, uri) in namespaces {
            root.push_attribute(&format!("xmlns:{}", prefix), uri);
        }
        if !namespaces.iter().any(|(p, _)| p == "xsi") {
            root.push_attribute("xmlns:xsi", XSI_NS);
        }
        root.push_attribute(
            "xsi:schemaLocation",
            &format!("{} {}", self.format.namespace, self.format.schema),
        );

        let mut matches: Vec<(&MapRule, String)> = Vec::new();
        source.walk(&mut |el| {
            let name = el.expanded_name();
            for rule in rules.iter().filter(|r| r.from == name) {
                if let Some(value) = element_value(el) {
                    matches.push((rule, value));
                }
            }
        });

        let mut seen = HashSet::new();
        for (rule, value) in matches {
            if seen.insert((rule.to.as_str(), value.clone())) {
                root.push_child(
                    Element::new(rule.to.as_str(), Some(rule.to_namespace.as_str())).with_text(&value),
                );
            }
        }
        root
    }
}

fn element_value(el: &Element) -> Option<String> {
    let text = el.text_content();
    let text = text.trim();
    if !text.is_empty() {
        return Some(text.to_string());
    }
    el.attribute(Some(RDF_NS), "resource")
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

fn parse_map(root: &Element) -> std::result::Result<TransformKind, String> {
    let output_el = root
        .child_elements()
        .find(|e| e.local_name() == "output")
        .ok_or("map transform has no <output> element")?;
    let output = output_el
        .attribute(None, "name")
        .ok_or("<output> is missing its name attribute")?
        .to_string();

    let mut namespaces = Vec::new();
    for ns in output_el.child_elements().filter(|e| e.local_name() == "namespace") {
        match (ns.attribute(None, "prefix"), ns.attribute(None, "uri")) {
            (Some(p), Some(u)) => namespaces.push((p.to_string(), u.to_string())),
            _ => return Err("<namespace> requires prefix and uri".to_string()),
        }
    }
    let lookup = |qname: &str| -> std::result::Result<Option<String>, String> {
        match split_qname(qname).0 {
            None => Ok(None),
            Some(prefix) => namespaces
                .iter()
                .find(|(p, _)| p == prefix)
                .map(|(_, u)| Some(u.clone()))
                .ok_or_else(|| format!("undeclared prefix \"{}\" in \"{}\"", prefix, qname)),
        }
    };

    let output_namespace = lookup(&output)?;

    let mut rules = Vec::new();
    for rule in root.child_elements().filter(|e| e.local_name() == "map") {
        let (Some(from), Some(to)) = (rule.attribute(None, "from"), rule.attribute(None, "to"))
        else {
            return Err("<map> requires from and to".to_string());
        };
        let to_namespace = lookup(to)?
            .ok_or_else(|| format!("output element \"{}\" must be prefixed", to))?;
        rules.push(MapRule {
            from: from.to_string(),
            to: to.to_string(),
            to_namespace,
        });
    }
    if rules.is_empty() {
        return Err("map transform declares no <map> rules".to_string());
    }

    Ok(TransformKind::Map {
        output,
        output_namespace,
        namespaces,
        rules,
    })
}

/// All loaded transforms, keyed by metadata prefix.
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    transformers: BTreeMap<String, Transformer>,
}

impl TransformRegistry {
    /// Loads every `*.xml` definition in `dir`, in file-name order.
    ///
    /// Any invalid definition aborts loading.
    pub fn load_dir(dir: &Path, prefixes: &BTreeMap<String, String>) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            OaiError::Configuration(format!(
                "Unable to read transforms directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "xml"))
            .collect();
        paths.sort();

        let mut stems = HashSet::new();
        let mut transformers = Vec::new();
        for path in &paths {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            stems.insert(stem.to_string());
            let transformer = Transformer::load(path, prefixes.get(stem).map(String::as_str))?;
            debug!(
                "Loaded transform {} from {}",
                transformer.prefix(),
                path.display()
            );
            transformers.push(transformer);
        }

        for stem in prefixes.keys().filter(|s| !stems.contains(s.as_str())) {
            warn!("Prefix override for \"{}\" matches no transform file", stem);
        }

        let registry = Self::from_transformers(transformers)?;
        if registry.transformers.is_empty() {
            return Err(OaiError::Configuration(format!(
                "No transform definitions found in {}",
                dir.display()
            )));
        }
        info!(
            "Metadata formats: {}",
            registry.transformers.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(registry)
    }

    /// Builds a registry from already-loaded transformers. Duplicate
    /// prefixes are a configuration error.
    pub fn from_transformers(items: impl IntoIterator<Item = Transformer>) -> Result<Self> {
        let mut transformers = BTreeMap::new();
        for t in items {
            if let Some(previous) = transformers.get(t.prefix()).map(|p: &Transformer| p.path()) {
                return Err(OaiError::Configuration(format!(
                    "Metadata prefix \"{}\" defined by both {} and {}",
                    t.prefix(),
                    previous.display(),
                    t.path().display()
                )));
            }
            transformers.insert(t.prefix().to_string(), t);
        }
        Ok(Self { transformers })
    }

    pub fn supports(&self, prefix: &str) -> bool {
        self.transformers.contains_key(prefix)
    }

    pub fn list_formats(&self) -> Vec<MetadataFormat> {
        self.transformers
            .values()
            .map(|t| t.metadata_format().clone())
            .collect()
    }

    /// Transforms `source` into the format registered under `prefix`.
    pub fn transform(&self, prefix: &str, source: &Element) -> Result<Element> {
        let transformer = self
            .transformers
            .get(prefix)
            .ok_or_else(|| OaiError::UnsupportedFormat(prefix.to_string()))?;
        Ok(transformer.apply(source))
    }
}
