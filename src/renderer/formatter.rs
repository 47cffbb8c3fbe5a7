//! Walks compound definitions and drives a [`Format`]'s hooks.
//!
//! The formatter owns ordering, naming and grouping decisions: which
//! sections are shown, in which order their entries appear, how names are
//! qualified, and when a typedef stands in for the compound it aliases.
//! Formats only decide how each piece of text looks.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::{Config, SortOrder};
use crate::error::RenderError;
use crate::parser::catalogue::Catalogue;
use crate::parser::node::{Node, NodeBuilder};
use crate::parser::text::{description_filter, is_anonymous, AnonymousPolicy, TextFilter};
use crate::renderer::components::{qualified_name, section_title};
use crate::renderer::stream::Sink;
use crate::renderer::traits::{Event, Format, HookContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompoundKind {
    File,
    Struct,
    Union,
}

impl CompoundKind {
    fn of(elem: &Node) -> Result<Self, RenderError> {
        match elem.attr("kind") {
            "file" => Ok(CompoundKind::File),
            "struct" => Ok(CompoundKind::Struct),
            "union" => Ok(CompoundKind::Union),
            other => Err(RenderError::UnsupportedKind {
                element: "compound".to_string(),
                kind: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberKind {
    Function,
    Variable,
    Enum,
    Typedef,
    Define,
}

impl MemberKind {
    fn of(elem: &Node) -> Result<Self, RenderError> {
        match elem.attr("kind") {
            "function" => Ok(MemberKind::Function),
            "variable" => Ok(MemberKind::Variable),
            "enum" => Ok(MemberKind::Enum),
            "typedef" => Ok(MemberKind::Typedef),
            "define" => Ok(MemberKind::Define),
            other => Err(RenderError::UnsupportedKind {
                element: "member".to_string(),
                kind: other.to_string(),
            }),
        }
    }
}

/// One generation run's document formatter.
///
/// The set of compounds claimed by typedef aliases lives as long as the
/// formatter, so a single instance should render every file of one run and
/// no more.
pub struct DocFormatter<'a> {
    catalogue: &'a Catalogue,
    config: &'a Config,
    format: &'a mut dyn Format,
    filter: TextFilter,
    anonymous: AnonymousPolicy,
    stack: Vec<Node>,
    language: String,
    copyright: String,
    claimed: HashSet<String>,
    level: usize,
}

impl<'a> DocFormatter<'a> {
    pub fn new(catalogue: &'a Catalogue, config: &'a Config, format: &'a mut dyn Format) -> Self {
        let anonymous = config.anonymous.unwrap_or_else(|| format.anonymous_policy());
        Self {
            catalogue,
            config,
            format,
            filter: description_filter(),
            anonymous,
            stack: Vec::new(),
            language: String::new(),
            copyright: String::new(),
            claimed: HashSet::new(),
            level: 1,
        }
    }

    /// Compound identifiers already rendered under a typedef alias.
    pub fn claimed(&self) -> &HashSet<String> {
        &self.claimed
    }

    /// Claims every compound aliased by a typedef of `files` up front, so
    /// nested-compound listings skip it whichever file is rendered first.
    pub fn claim_aliases(&mut self, files: &[Node]) {
        for file in files {
            for typedef in file.children(".//memberdef[@kind='typedef']") {
                if let Some(target) = self.alias_target(&typedef) {
                    debug!(typedef = %typedef.trimmed_text("name"), compound = %target, "alias claimed");
                    self.claimed.insert(target);
                }
            }
        }
    }

    /// The catalogued compound a typedef stands for, if any.
    fn alias_target(&self, typedef: &Node) -> Option<String> {
        let target = typedef
            .child("type/ref[@kindref='compound']")
            .attr("refid")
            .to_string();
        (!target.is_empty() && self.catalogue.contains(&target)).then_some(target)
    }

    /// Renders a file compound; `path` is the output it is written to.
    pub fn render_file(&mut self, compound: &Node, path: &str, out: &mut dyn Sink) -> Result<(), RenderError> {
        self.language = compound.attr("language").to_string();
        self.copyright = compound
            .child(".//simplesect[@kind='copyright']")
            .trimmed_text("");
        self.hook(out, |f, cx| f.reset(cx, path))?;
        self.compounddef(compound, None, None, out)
    }

    /// Renders any supported compound without per-file setup.
    pub fn render_compound(&mut self, compound: &Node, out: &mut dyn Sink) -> Result<(), RenderError> {
        self.compounddef(compound, None, None, out)
    }

    fn hook<F>(&mut self, out: &mut dyn Sink, call: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut dyn Format, &mut HookContext<'_>) -> Result<(), RenderError>,
    {
        let mut cx = HookContext {
            out,
            stack: &self.stack,
            language: &self.language,
            config: self.config,
        };
        call(&mut *self.format, &mut cx)
    }

    fn depth(&self, tag: &str) -> usize {
        self.stack.iter().filter(|e| e.tag() == tag).count()
    }

    fn has_text(&self, elem: &Node) -> bool {
        !elem.trimmed_text("").is_empty()
    }

    fn has_filtered_text(&self, elem: &Node) -> bool {
        !self.format.maptext(elem, Some(&self.filter)).trim().is_empty()
    }

    fn begin(&mut self, elem: &Node, out: &mut dyn Sink) -> Result<(), RenderError> {
        self.stack.push(elem.clone());
        self.hook(out, |f, cx| f.event(cx, elem, Event::Begin))
    }

    fn end(&mut self, elem: &Node, out: &mut dyn Sink) -> Result<(), RenderError> {
        let result = self.hook(out, |f, cx| f.event(cx, elem, Event::End));
        self.stack.pop();
        result
    }

    fn heading(&mut self, text: &str, out: &mut dyn Sink) -> Result<(), RenderError> {
        if text.is_empty() {
            return Ok(());
        }
        let level = self.level + self.depth("sectiondef");
        self.hook(out, |f, cx| f.heading(cx, text, level))
    }

    fn summary(&mut self, elem: &Node, out: &mut dyn Sink) -> Result<(), RenderError> {
        if self.has_text(elem) && self.has_filtered_text(elem) {
            self.hook(out, |f, cx| f.summary(cx, elem))?;
        }
        Ok(())
    }

    fn copyright(&mut self, out: &mut dyn Sink) -> Result<(), RenderError> {
        if self.copyright.is_empty() {
            return Ok(());
        }
        let text = self.copyright.clone();
        self.hook(out, |f, cx| f.copyright(cx, &text))
    }

    fn name(&mut self, kind: &str, name: &str, brief: &Node, out: &mut dyn Sink) -> Result<(), RenderError> {
        if name.is_empty() {
            return Ok(());
        }
        let text = if is_anonymous(name) {
            match self.anonymous {
                AnonymousPolicy::Label => format!("anonymous {}", kind),
                AnonymousPolicy::Suppress => qualified_name(kind, ""),
            }
        } else {
            qualified_name(kind, name)
        };
        self.hook(out, |f, cx| f.name(cx, kind, &text, brief))
    }

    fn syntax(&mut self, text: &str, out: &mut dyn Sink) -> Result<(), RenderError> {
        if text.is_empty() {
            return Ok(());
        }
        self.hook(out, |f, cx| f.syntax(cx, text))
    }

    fn enumvalues(&mut self, values: &[Node], out: &mut dyn Sink) -> Result<(), RenderError> {
        if values.is_empty() {
            return Ok(());
        }
        self.hook(out, |f, cx| f.enumvalues(cx, values))
    }

    fn description(&mut self, elem: &Node, out: &mut dyn Sink) -> Result<(), RenderError> {
        if !self.has_text(elem) {
            return Ok(());
        }
        let params = elem.child(".//parameterlist");
        if self.has_text(&params) {
            self.hook(out, |f, cx| f.parameters(cx, &params))?;
        }
        let returns = elem.child(".//simplesect[@kind='return']");
        if self.has_text(&returns) {
            self.hook(out, |f, cx| f.returns(cx, &returns))?;
        }
        if self.has_filtered_text(elem) {
            self.hook(out, |f, cx| f.description(cx, elem))?;
        }
        Ok(())
    }

    fn memberdef(&mut self, elem: &Node, out: &mut dyn Sink) -> Result<(), RenderError> {
        let kind = MemberKind::of(elem)?;
        let name = elem.trimmed_text("name");

        if kind == MemberKind::Typedef {
            if let Some(target) = self.alias_target(elem) {
                let compound = self.catalogue.resolve(&target)?;
                debug!(typedef = %name, compound = %target, "typedef renders aliased compound");
                self.claimed.insert(target);
                let definition = elem.trimmed_text("definition");
                return self.compounddef(&compound, Some(&name), Some(&definition), out);
            }
        }

        let brief = elem.child("briefdescription");
        let detailed = elem.child("detaileddescription");
        self.begin(elem, out)?;
        match kind {
            MemberKind::Function => {
                self.name("function", &name, &brief, out)?;
                let syntax = elem.trimmed_text("definition") + &elem.trimmed_text("argsstring");
                self.syntax(&syntax, out)?;
            }
            MemberKind::Variable => {
                self.name("variable", &name, &brief, out)?;
                self.syntax(&elem.trimmed_text("definition"), out)?;
            }
            MemberKind::Enum => {
                self.name("enum", &name, &brief, out)?;
                self.enumvalues(&elem.children("enumvalue"), out)?;
            }
            MemberKind::Typedef => {
                self.name("typedef", &name, &brief, out)?;
                self.syntax(&elem.trimmed_text("definition"), out)?;
            }
            MemberKind::Define => {
                let function_like = elem.child("param").is_present();
                let macro_kind = if function_like { "FUNCTION-MACRO" } else { "OBJECT-MACRO" };
                self.name(macro_kind, &name, &brief, out)?;
                let mut syntax = format!("#define {}", name);
                if function_like {
                    let params: Vec<String> = elem
                        .children(".//defname")
                        .iter()
                        .map(|p| p.trimmed_text(""))
                        .collect();
                    syntax.push_str(&format!("({})", params.join(", ")));
                }
                self.syntax(&syntax, out)?;
            }
        }
        self.description(&detailed, out)?;
        self.end(elem, out)
    }

    fn sectiondef(&mut self, elem: &Node, out: &mut dyn Sink) -> Result<(), RenderError> {
        let mut contents = Vec::new();
        for inner in elem.children("innerclass") {
            let id = inner.attr("refid");
            if self.claimed.contains(id) {
                continue;
            }
            if !self.catalogue.contains(id) {
                warn!(refid = %id, "nested compound missing from catalogue, skipped");
                continue;
            }
            contents.push(self.catalogue.resolve(id)?);
        }
        contents.extend(elem.children("memberdef"));
        if contents.is_empty() {
            return Ok(());
        }

        self.begin(elem, out)?;
        let mut title = elem.trimmed_text("header");
        if title.is_empty() {
            title = section_title(elem.attr("kind")).to_string();
        }
        self.heading(&title, out)?;
        self.summary(&elem.child("description"), out)?;

        sort_entries(&mut contents, self.config.order);
        for entry in &contents {
            if entry.tag() == "compounddef" {
                self.compounddef(entry, None, None, out)?;
            } else {
                self.memberdef(entry, out)?;
            }
        }
        self.end(elem, out)
    }

    fn compounddef(
        &mut self,
        elem: &Node,
        override_name: Option<&str>,
        override_definition: Option<&str>,
        out: &mut dyn Sink,
    ) -> Result<(), RenderError> {
        if elem.is_absent() {
            warn!("compound definition missing, skipped");
            return Ok(());
        }
        let kind = CompoundKind::of(elem)?;
        let id = elem.attr("id");
        if !id.is_empty() && self.stack.iter().any(|e| e.tag() == "compounddef" && e.attr("id") == id) {
            warn!(%id, "compound nests itself, skipped");
            return Ok(());
        }

        // Nested compounds are rendered as one more section, after the
        // member sections so typedef aliases can claim them first.
        let mut sections = elem.children("sectiondef");
        let inner = elem.children("innerclass");
        if !inner.is_empty() {
            sections.push(
                NodeBuilder::new("sectiondef")
                    .attr("kind", "innerclass")
                    .children(inner)
                    .build(),
            );
        }

        self.begin(elem, out)?;
        match kind {
            CompoundKind::File => {
                let title = file_title(elem);
                self.heading(&title, out)?;
                let merged = NodeBuilder::new("description")
                    .children(elem.child("briefdescription").children("para"))
                    .children(elem.child("detaileddescription").children("para"))
                    .build();
                self.summary(&merged, out)?;
                for section in &sections {
                    self.sectiondef(section, out)?;
                }
                self.copyright(out)?;
            }
            CompoundKind::Struct | CompoundKind::Union => {
                let name = match override_name {
                    Some(name) => name.to_string(),
                    None => elem.trimmed_text("compoundname"),
                };
                let brief = elem.child("briefdescription");
                self.name(elem.attr("kind"), &name, &brief, out)?;
                if let Some(definition) = override_definition {
                    self.syntax(definition, out)?;
                }
                self.description(&elem.child("detaileddescription"), out)?;
                for section in &sections {
                    self.sectiondef(section, out)?;
                }
            }
        }
        self.end(elem, out)
    }
}

/// Explicit title, else the relative source path, else the compound name.
fn file_title(elem: &Node) -> String {
    let title = elem.trimmed_text("title");
    if !title.is_empty() {
        return title;
    }
    let location = elem.child("location");
    let file = location.attr("file");
    if file.is_empty() || is_absolute_path(file) {
        elem.trimmed_text("compoundname")
    } else {
        file.to_string()
    }
}

fn is_absolute_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    Path::new(path).is_absolute() || path.starts_with('/') || path.starts_with('\\') || drive
}

fn sort_entries(entries: &mut [Node], order: SortOrder) {
    match order {
        SortOrder::Doxygen => {}
        SortOrder::Alpha => entries.sort_by_key(|e| {
            let name = e.trimmed_text("compoundname");
            if name.is_empty() {
                e.trimmed_text("name")
            } else {
                name
            }
        }),
        SortOrder::Source => entries.sort_by_key(|e| {
            let location = e.child("location");
            (
                location.attr("file").to_string(),
                location.attr("line").trim().parse::<u64>().ok(),
                location.attr("column").trim().parse::<u64>().ok(),
            )
        }),
    }
}
