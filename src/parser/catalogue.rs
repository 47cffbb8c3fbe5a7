use std::cell::OnceCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CatalogueError;
use crate::parser::node::Node;
use crate::parser::xml;

/// Loads the full definition tree of one compound by identifier.
#[cfg_attr(test, mockall::automock)]
pub trait CompoundSource {
    fn load(&self, id: &str) -> Result<Node, CatalogueError>;
}

/// Analyzer output on disk: `<dir>/<id>.xml`, each holding a
/// `compounddef` whose `id` attribute matches the file name.
#[derive(Debug, Clone)]
pub struct XmlDirectory {
    dir: PathBuf,
}

impl XmlDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CompoundSource for XmlDirectory {
    fn load(&self, id: &str) -> Result<Node, CatalogueError> {
        let path = self.dir.join(format!("{id}.xml"));
        let root = xml::parse_file(&path).map_err(|source| CatalogueError::Compound {
            id: id.to_string(),
            source,
        })?;
        // A file without the expected definition yields the absent node.
        let found = root
            .iter()
            .find(|c| c.tag() == "compounddef" && c.attr("id") == id)
            .unwrap_or_default();
        Ok(found)
    }
}

/// Compound definitions kept in memory, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    compounds: HashMap<String, Node>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `compounddef` under its `id` attribute.
    pub fn insert(&mut self, compounddef: Node) {
        self.compounds
            .insert(compounddef.attr("id").to_string(), compounddef);
    }
}

impl CompoundSource for MemorySource {
    fn load(&self, id: &str) -> Result<Node, CatalogueError> {
        self.compounds
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogueError::Unknown(id.to_string()))
    }
}

/// A catalogue entry: the listing record plus the lazily resolved definition.
#[derive(Debug)]
pub struct CompoundRef {
    id: String,
    entry: Node,
    resolved: OnceCell<Node>,
}

impl CompoundRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The `compound` record from the top-level listing.
    pub fn entry(&self) -> &Node {
        &self.entry
    }

    pub fn kind(&self) -> &str {
        self.entry.attr("kind")
    }

    pub fn name(&self) -> String {
        self.entry.trimmed_text("name")
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }
}

/// Maps compound identifiers to lazily loaded definitions. Built once from
/// the top-level listing; only the per-entry cache changes afterwards.
pub struct Catalogue {
    source: Box<dyn CompoundSource>,
    compounds: Vec<CompoundRef>,
    positions: HashMap<String, usize>,
}

impl std::fmt::Debug for Catalogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalogue")
            .field("compounds", &self.compounds)
            .finish_non_exhaustive()
    }
}

impl Catalogue {
    /// Opens `index.xml`; compound files are read from the same directory.
    pub fn open(index_path: &Path) -> Result<Self, CatalogueError> {
        let listing = xml::parse_file(index_path).map_err(CatalogueError::Index)?;
        let dir = index_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self::from_listing(&listing, Box::new(XmlDirectory::new(dir))))
    }

    /// Builds the catalogue from a listing root whose `compound` children
    /// carry `refid` attributes.
    pub fn from_listing(listing: &Node, source: Box<dyn CompoundSource>) -> Self {
        let mut compounds = Vec::new();
        let mut positions = HashMap::new();
        for entry in listing.children("compound") {
            let id = entry.attr("refid").to_string();
            if positions.contains_key(&id) {
                debug!(%id, "duplicate compound in listing ignored");
                continue;
            }
            positions.insert(id.clone(), compounds.len());
            compounds.push(CompoundRef {
                id,
                entry,
                resolved: OnceCell::new(),
            });
        }
        Self {
            source,
            compounds,
            positions,
        }
    }

    pub fn len(&self) -> usize {
        self.compounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&CompoundRef> {
        self.positions.get(id).map(|&i| &self.compounds[i])
    }

    /// Entries in listing order.
    pub fn iter(&self) -> impl Iterator<Item = &CompoundRef> {
        self.compounds.iter()
    }

    /// The definition of `id`, loading it on first access.
    pub fn resolve(&self, id: &str) -> Result<Node, CatalogueError> {
        let compound = self
            .get(id)
            .ok_or_else(|| CatalogueError::Unknown(id.to_string()))?;
        self.element(compound)
    }

    /// The definition behind `compound`; the first successful load is cached
    /// and returned by every later call.
    pub fn element(&self, compound: &CompoundRef) -> Result<Node, CatalogueError> {
        if let Some(node) = compound.resolved.get() {
            return Ok(node.clone());
        }
        debug!(id = %compound.id, "resolving compound");
        let node = self.source.load(&compound.id)?;
        Ok(compound.resolved.get_or_init(|| node).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::node::NodeBuilder;

    fn listing(ids: &[(&str, &str)]) -> Node {
        NodeBuilder::new("doxygenindex")
            .children(ids.iter().map(|(id, kind)| {
                NodeBuilder::new("compound")
                    .attr("refid", *id)
                    .attr("kind", *kind)
                    .child(NodeBuilder::new("name").text(id).build())
                    .build()
            }))
            .build()
    }

    fn compounddef(id: &str) -> Node {
        NodeBuilder::new("compounddef")
            .attr("id", id)
            .attr("kind", "struct")
            .child(NodeBuilder::new("compoundname").text(id).build())
            .build()
    }

    #[test]
    fn test_resolution_is_cached_per_identifier() {
        let mut source = MockCompoundSource::new();
        source
            .expect_load()
            .withf(|id| id.to_string() == "s1")
            .times(1)
            .returning(|id| Ok(compounddef(id)));
        source
            .expect_load()
            .withf(|id| id.to_string() == "s2")
            .times(1)
            .returning(|id| Ok(compounddef(id)));

        let catalogue = Catalogue::from_listing(
            &listing(&[("s1", "struct"), ("s2", "struct")]),
            Box::new(source),
        );
        let first = catalogue.resolve("s1").unwrap();
        let second = catalogue.resolve("s1").unwrap();
        assert_eq!(first, second);
        assert!(first.ptr_eq(&second));
        assert!(catalogue.get("s1").unwrap().is_resolved());
        assert!(!catalogue.get("s2").unwrap().is_resolved());

        catalogue.resolve("s2").unwrap();
        catalogue.resolve("s2").unwrap();
    }

    #[test]
    fn test_listing_order_and_metadata() {
        let catalogue = Catalogue::from_listing(
            &listing(&[("b_8h", "file"), ("a", "struct"), ("b_8h", "file")]),
            Box::new(MemorySource::new()),
        );
        assert_eq!(catalogue.len(), 2);
        let ids: Vec<_> = catalogue.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["b_8h", "a"]);
        assert_eq!(catalogue.get("a").unwrap().kind(), "struct");
        assert_eq!(catalogue.get("a").unwrap().name(), "a");
    }

    #[test]
    fn test_unknown_identifier_is_an_error() {
        let catalogue = Catalogue::from_listing(&listing(&[]), Box::new(MemorySource::new()));
        assert!(matches!(
            catalogue.resolve("nope"),
            Err(CatalogueError::Unknown(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_memory_source_round_trip() {
        let mut source = MemorySource::new();
        source.insert(compounddef("s1"));
        let catalogue = Catalogue::from_listing(&listing(&[("s1", "struct")]), Box::new(source));
        let node = catalogue.resolve("s1").unwrap();
        assert_eq!(node.trimmed_text("compoundname"), "s1");
    }

    #[test]
    fn test_xml_directory_loads_matching_definition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("structs.xml"),
            r#"<doxygen><compounddef id="other" kind="struct"/><compounddef id="structs" kind="struct"><compoundname>s</compoundname></compounddef></doxygen>"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("empty.xml"), "<doxygen></doxygen>").unwrap();

        let source = XmlDirectory::new(dir.path());
        let node = source.load("structs").unwrap();
        assert_eq!(node.trimmed_text("compoundname"), "s");
        assert!(source.load("empty").unwrap().is_absent());
        assert!(matches!(
            source.load("missing"),
            Err(CatalogueError::Compound { ref id, .. }) if id == "missing"
        ));
    }
}
