//! End-to-end rendering over an in-memory catalogue.

use similar::TextDiff;

use crate::config::{Config, SortOrder};
use crate::error::RenderError;
use crate::parser::catalogue::{Catalogue, MemorySource};
use crate::parser::node::{Node, NodeBuilder};
use crate::parser::text::{AnonymousPolicy, TextRules};
use crate::parser::xml::parse_str;
use crate::renderer::formatter::DocFormatter;
use crate::renderer::renderer::Generator;
use crate::renderer::traits::{Event, Format, HookContext};
use crate::template::format::TemplateFormat;

const INDEX: &str = include_str!("../../tests/fixtures/xml/index.xml");
const COMPOUNDS: &[(&str, &str)] = &[
    ("geo_8h", include_str!("../../tests/fixtures/xml/geo_8h.xml")),
    ("structpoint", include_str!("../../tests/fixtures/xml/structpoint.xml")),
    ("structrect", include_str!("../../tests/fixtures/xml/structrect.xml")),
    ("union__0", include_str!("../../tests/fixtures/xml/union__0.xml")),
];

fn compounddef(xml: &str, origin: &str) -> Node {
    parse_str(xml, origin)
        .expect("fixture parses")
        .child("compounddef")
}

fn geo_catalogue() -> Catalogue {
    let listing = parse_str(INDEX, "index.xml").expect("index parses");
    let mut source = MemorySource::new();
    for (id, xml) in COMPOUNDS {
        source.insert(compounddef(xml, id));
    }
    Catalogue::from_listing(&listing, Box::new(source))
}

/// A catalogue whose listing names exactly the given compound definitions.
fn catalogue_of(compounds: Vec<Node>) -> Catalogue {
    let mut listing = NodeBuilder::new("doxygenindex");
    let mut source = MemorySource::new();
    for compound in compounds {
        listing.push_child(
            NodeBuilder::new("compound")
                .attr("refid", compound.attr("id"))
                .attr("kind", compound.attr("kind"))
                .build(),
        );
        source.insert(compound);
    }
    Catalogue::from_listing(&listing.build(), Box::new(source))
}

fn squeeze(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Writes one line per hook call, and checks begin/end pairing.
#[derive(Default)]
struct Recorder {
    open: Vec<String>,
    events: usize,
}

impl Format for Recorder {
    fn text_rules(&self) -> TextRules {
        TextRules::new().close("para", " %s")
    }

    fn reset(&mut self, cx: &mut HookContext<'_>, path: &str) -> Result<(), RenderError> {
        cx.write(&format!("reset {}\n", path))?;
        Ok(())
    }

    fn heading(&mut self, cx: &mut HookContext<'_>, text: &str, level: usize) -> Result<(), RenderError> {
        cx.write(&format!("h{} {}\n", level, text))?;
        Ok(())
    }

    fn summary(&mut self, cx: &mut HookContext<'_>, elem: &Node) -> Result<(), RenderError> {
        let text = squeeze(&self.maptext(elem, Some(&crate::parser::text::description_filter())));
        cx.write(&format!("summary {}\n", text))?;
        Ok(())
    }

    fn copyright(&mut self, cx: &mut HookContext<'_>, text: &str) -> Result<(), RenderError> {
        cx.write(&format!("copyright {}\n", text))?;
        Ok(())
    }

    fn name(&mut self, cx: &mut HookContext<'_>, kind: &str, text: &str, brief: &Node) -> Result<(), RenderError> {
        let brief = squeeze(&self.maptext(brief, None));
        if brief.is_empty() {
            cx.write(&format!("name {} {}\n", kind, text))?;
        } else {
            cx.write(&format!("name {} {} | {}\n", kind, text, brief))?;
        }
        Ok(())
    }

    fn syntax(&mut self, cx: &mut HookContext<'_>, text: &str) -> Result<(), RenderError> {
        cx.write(&format!("syntax {}\n", text))?;
        Ok(())
    }

    fn parameters(&mut self, cx: &mut HookContext<'_>, list: &Node) -> Result<(), RenderError> {
        let names: Vec<String> = list
            .children(".//parametername")
            .iter()
            .map(|n| n.trimmed_text(""))
            .collect();
        cx.write(&format!("parameters {}\n", names.join(", ")))?;
        Ok(())
    }

    fn returns(&mut self, cx: &mut HookContext<'_>, elem: &Node) -> Result<(), RenderError> {
        cx.write(&format!("returns {}\n", squeeze(&self.maptext(elem, None))))?;
        Ok(())
    }

    fn enumvalues(&mut self, cx: &mut HookContext<'_>, values: &[Node]) -> Result<(), RenderError> {
        let names: Vec<String> = values.iter().map(|v| v.trimmed_text("name")).collect();
        cx.write(&format!("enumvalues {}\n", names.join(", ")))?;
        Ok(())
    }

    fn description(&mut self, cx: &mut HookContext<'_>, elem: &Node) -> Result<(), RenderError> {
        let text = squeeze(&self.maptext(elem, Some(&crate::parser::text::description_filter())));
        cx.write(&format!("description {}\n", text))?;
        Ok(())
    }

    fn event(&mut self, cx: &mut HookContext<'_>, elem: &Node, event: Event) -> Result<(), RenderError> {
        self.events += 1;
        match event {
            Event::Begin => {
                assert!(cx.stack.last().is_some_and(|top| top.ptr_eq(elem)));
                self.open.push(elem.tag().to_string());
            }
            Event::End => {
                assert_eq!(self.open.pop().as_deref(), Some(elem.tag()));
            }
        }
        Ok(())
    }
}

const GEO_RECORDED: &str = "\
reset include_geo.h.txt
h1 include/geo.h
summary Plane geometry. Points and rectangles.
h2 Macros
name OBJECT-MACRO GEO_VERSION | Library version.
syntax #define GEO_VERSION
name FUNCTION-MACRO GEO_MAX() | Larger of two values.
syntax #define GEO_MAX(a, b)
h2 Typedefs
name typedef typedef coord_t | Coordinate type.
syntax typedef double coord_t
name struct struct point_t | A point.
syntax typedef struct point point_t
h3 Fields
name variable x | Horizontal.
syntax double point::x
name variable y | Vertical.
syntax double point::y
h2 Enums
name enum enum shape | Kinds of shapes.
enumvalues SHAPE_POINT, SHAPE_RECT
h2 Functions
name function rect_area() | Area of a rectangle.
syntax double rect_area(const struct rect *r)
parameters r
returns The area.
description Computes w * h.
name variable geo_origin | The origin.
syntax const struct point geo_origin
h2 Data Structures
name struct struct rect | An axis-aligned rectangle.
h3 Fields
name variable min | Lower corner.
syntax struct point rect::min
name variable max | Upper corner.
syntax struct point rect::max
h3 Data Structures
name union anonymous union
h4 Fields
name variable tag
syntax int tag
copyright 2024 Geo Authors
";

fn assert_text_eq(expected: &str, actual: &str) {
    if expected != actual {
        let diff = TextDiff::from_lines(expected, actual);
        panic!(
            "rendered output differs:\n{}",
            diff.unified_diff().header("expected", "actual")
        );
    }
}

#[test]
fn test_geo_header_hook_sequence() {
    let catalogue = geo_catalogue();
    let config = Config::default();
    let mut recorder = Recorder::default();

    let rendered = Generator::new(&catalogue, &config)
        .render_to_strings(&mut recorder)
        .expect("render succeeds");

    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].name, "include_geo.h.txt");
    assert_text_eq(GEO_RECORDED, &rendered[0].content);
    assert!(recorder.open.is_empty());
    assert!(recorder.events > 0);
}

#[test]
fn test_typedef_claims_aliased_struct() {
    let catalogue = geo_catalogue();
    let config = Config::default();
    let mut recorder = Recorder::default();
    let file = catalogue.resolve("geo_8h").expect("file resolves");

    let mut formatter = DocFormatter::new(&catalogue, &config, &mut recorder);
    let mut out = String::new();
    formatter.render_file(&file, "geo.txt", &mut out).expect("render succeeds");

    assert!(formatter.claimed().contains("structpoint"));
    assert!(!formatter.claimed().contains("structrect"));
    // Only the alias names the struct; the nested-compound section skips it.
    assert!(!out.contains("struct point |"));
    assert_eq!(out.matches("h3 Fields").count(), 2);
}

#[test]
fn test_alpha_order() {
    let catalogue = geo_catalogue();
    let config = Config {
        order: SortOrder::Alpha,
        ..Config::default()
    };
    let mut recorder = Recorder::default();
    let rendered = Generator::new(&catalogue, &config)
        .render_to_strings(&mut recorder)
        .expect("render succeeds");
    let content = &rendered[0].content;

    let max = content.find("GEO_MAX").expect("GEO_MAX rendered");
    let version = content.find("GEO_VERSION").expect("GEO_VERSION rendered");
    assert!(max < version);
    // Listing order keeps max before min inside rect.
    let upper = content.find("name variable max").expect("max rendered");
    let lower = content.find("name variable min").expect("min rendered");
    assert!(upper < lower);
}

#[test]
fn test_source_order_uses_locations() {
    let catalogue = geo_catalogue();
    let config = Config::default();
    let mut recorder = Recorder::default();
    let rendered = Generator::new(&catalogue, &config)
        .render_to_strings(&mut recorder)
        .expect("render succeeds");
    let content = &rendered[0].content;

    let lower = content.find("name variable min").expect("min rendered");
    let upper = content.find("name variable max").expect("max rendered");
    assert!(lower < upper);
}

#[test]
fn test_rendering_is_deterministic() {
    let catalogue = geo_catalogue();
    let config = Config::default();
    let render = || {
        let mut format = TemplateFormat::bundled("markdown", &config)
            .expect("markdown is bundled")
            .expect("markdown compiles");
        Generator::new(&catalogue, &config)
            .render_to_strings(&mut format)
            .expect("render succeeds")
    };
    let first = render();
    let second = render();
    assert_eq!(first, second);
    assert_eq!(first[0].name, "include_geo.h.md");
}

#[test]
fn test_markdown_output() {
    let catalogue = geo_catalogue();
    let config = Config::default();
    let mut format = TemplateFormat::bundled("markdown", &config)
        .expect("markdown is bundled")
        .expect("markdown compiles");
    let rendered = Generator::new(&catalogue, &config)
        .render_to_strings(&mut format)
        .expect("render succeeds");
    let md = &rendered[0].content;

    assert!(md.starts_with("# include/geo.h\n"), "got:\n{}", md);
    assert!(md.contains("\n## Functions\n"));
    assert!(md.contains("\n### rect\\_area()\n"));
    assert!(md.contains("```c\ndouble rect_area(const struct rect *r)\n```\n"));
    assert!(md.contains("- `r`: The rectangle."));
    assert!(md.contains("**Returns** The area."));
    assert!(md.contains("Computes `w \\* h`."));
    assert!(md.contains("- `SHAPE_POINT`: Just a point.\n- `SHAPE_RECT`\n"));
    assert!(md.contains("#### anonymous union"));
    assert!(md.trim_end().ends_with("2024 Geo Authors"));
    assert!(!md.contains("\n\n\n"));
}

#[test]
fn test_html_output() {
    let catalogue = geo_catalogue();
    let config = Config::default();
    let mut format = TemplateFormat::bundled("html", &config)
        .expect("html is bundled")
        .expect("html compiles");
    let rendered = Generator::new(&catalogue, &config)
        .render_to_strings(&mut format)
        .expect("render succeeds");

    assert_eq!(rendered[0].name, "include_geo.h.html");
    let html = &rendered[0].content;
    assert!(html.contains("<section"));
    assert!(html.contains("const struct rect *r"));
    assert!(html.contains("rect_area()"));
    assert!(html.trim_end().ends_with("</html>"));
}

#[test]
fn test_suppressed_anonymous_names() {
    let catalogue = geo_catalogue();
    let config = Config {
        anonymous: Some(AnonymousPolicy::Suppress),
        ..Config::default()
    };
    let mut recorder = Recorder::default();
    let rendered = Generator::new(&catalogue, &config)
        .render_to_strings(&mut recorder)
        .expect("render succeeds");
    let content = &rendered[0].content;

    assert!(content.contains("name union union\n"));
    assert!(!content.contains("anonymous"));
}

fn file_with(sections: Vec<Node>) -> NodeBuilder {
    file_named("lib.h", sections)
}

fn file_named(name: &str, sections: Vec<Node>) -> NodeBuilder {
    NodeBuilder::new("compounddef")
        .attr("id", name.replace('.', "_8"))
        .attr("kind", "file")
        .child(NodeBuilder::new("compoundname").text(name).build())
        .children(sections)
        .child(NodeBuilder::new("location").attr("file", name).build())
}

fn typedef_of(name: &str, refid: &str, target: &str) -> Node {
    NodeBuilder::new("memberdef")
        .attr("kind", "typedef")
        .child(
            NodeBuilder::new("type")
                .text("struct ")
                .child(
                    NodeBuilder::new("ref")
                        .attr("refid", refid)
                        .attr("kindref", "compound")
                        .text(target)
                        .build(),
                )
                .build(),
        )
        .child(NodeBuilder::new("name").text(name).build())
        .child(
            NodeBuilder::new("definition")
                .text(&format!("typedef struct {} {}", target, name))
                .build(),
        )
        .build()
}

fn member(kind: &str, name: &str) -> Node {
    NodeBuilder::new("memberdef")
        .attr("kind", kind)
        .child(NodeBuilder::new("name").text(name).build())
        .child(NodeBuilder::new("definition").text(&format!("int {}", name)).build())
        .build()
}

#[test]
fn test_empty_sections_render_nothing() {
    let empty = NodeBuilder::new("sectiondef").attr("kind", "func").build();
    let file = file_with(vec![empty]).build();
    let catalogue = catalogue_of(vec![file]);
    let config = Config::default();
    let mut recorder = Recorder::default();

    let rendered = Generator::new(&catalogue, &config)
        .render_to_strings(&mut recorder)
        .expect("render succeeds");
    assert_eq!(rendered[0].content, "reset lib.h.txt\nh1 lib.h\n");
}

#[test]
fn test_section_of_only_claimed_compounds_is_skipped() {
    let alias = typedef_of("s_t", "structs", "s");
    let typedefs = NodeBuilder::new("sectiondef")
        .attr("kind", "typedef")
        .child(alias)
        .build();
    let file = file_with(vec![typedefs])
        .child(NodeBuilder::new("innerclass").attr("refid", "structs").text("s").build())
        .build();
    let inner = NodeBuilder::new("compounddef")
        .attr("id", "structs")
        .attr("kind", "struct")
        .child(NodeBuilder::new("compoundname").text("s").build())
        .build();
    let catalogue = catalogue_of(vec![file, inner]);
    let config = Config::default();
    let mut recorder = Recorder::default();

    let rendered = Generator::new(&catalogue, &config)
        .render_to_strings(&mut recorder)
        .expect("render succeeds");
    assert_eq!(rendered.len(), 1);
    assert_text_eq(
        "reset lib.h.txt\nh1 lib.h\nh2 Typedefs\nname struct struct s_t\nsyntax typedef struct s s_t\n",
        &rendered[0].content,
    );
}

#[test]
fn test_typedef_claims_hold_across_files() {
    // a.h lists the struct as nested and is rendered before b.h, which
    // holds the typedef naming it.
    let nested = file_named("a.h", Vec::new())
        .child(NodeBuilder::new("innerclass").attr("refid", "structs").text("s").build())
        .build();
    let typedefs = NodeBuilder::new("sectiondef")
        .attr("kind", "typedef")
        .child(typedef_of("s_t", "structs", "s"))
        .build();
    let aliasing = file_named("b.h", vec![typedefs]).build();
    let inner = NodeBuilder::new("compounddef")
        .attr("id", "structs")
        .attr("kind", "struct")
        .child(NodeBuilder::new("compoundname").text("s").build())
        .build();
    let catalogue = catalogue_of(vec![nested, aliasing, inner]);
    let config = Config::default();
    let mut recorder = Recorder::default();

    let rendered = Generator::new(&catalogue, &config)
        .render_to_strings(&mut recorder)
        .expect("render succeeds");
    let names: Vec<&str> = rendered.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["a.h.txt", "b.h.txt"]);
    assert_text_eq("reset a.h.txt\nh1 a.h\n", &rendered[0].content);

    let struct_names: usize = rendered
        .iter()
        .map(|r| r.content.matches("name struct ").count())
        .sum();
    assert_eq!(struct_names, 1);
    assert!(rendered[1].content.contains("name struct struct s_t\n"));
}

#[test]
fn test_colliding_output_names_are_renamed() {
    let catalogue = catalogue_of(vec![
        file_named("a/_b.h", Vec::new()).build(),
        file_named("a_/b.h", Vec::new()).build(),
    ]);
    let config = Config::default();
    let mut recorder = Recorder::default();

    let rendered = Generator::new(&catalogue, &config)
        .render_to_strings(&mut recorder)
        .expect("render succeeds");
    let names: Vec<&str> = rendered.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["a___b.h.txt", "a___b.h-2.txt"]);
    assert!(rendered[1].content.starts_with("reset a___b.h-2.txt\nh1 a_/b.h\n"));
}

#[test]
fn test_missing_nested_compound_is_skipped() {
    let funcs = NodeBuilder::new("sectiondef")
        .attr("kind", "func")
        .child(member("function", "run"))
        .build();
    let file = file_with(vec![funcs])
        .child(NodeBuilder::new("innerclass").attr("refid", "structghost").text("ghost").build())
        .build();
    let catalogue = catalogue_of(vec![file]);
    let config = Config::default();
    let mut recorder = Recorder::default();

    let rendered = Generator::new(&catalogue, &config)
        .render_to_strings(&mut recorder)
        .expect("render succeeds");
    let content = &rendered[0].content;
    assert!(content.contains("name function run()\n"));
    assert!(!content.contains("Data Structures"));
}

#[test]
fn test_unknown_member_kind_aborts() {
    let friends = NodeBuilder::new("sectiondef")
        .attr("kind", "friend")
        .child(member("friend", "peer"))
        .build();
    let catalogue = catalogue_of(vec![file_with(vec![friends]).build()]);
    let config = Config::default();
    let mut recorder = Recorder::default();

    let err = Generator::new(&catalogue, &config)
        .render_to_strings(&mut recorder)
        .unwrap_err();
    match err {
        RenderError::UnsupportedKind { element, kind } => {
            assert_eq!(element, "member");
            assert_eq!(kind, "friend");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unknown_compound_kind_aborts() {
    let catalogue = catalogue_of(Vec::new());
    let config = Config::default();
    let mut recorder = Recorder::default();
    let class = NodeBuilder::new("compounddef")
        .attr("id", "classwidget")
        .attr("kind", "class")
        .build();

    let mut formatter = DocFormatter::new(&catalogue, &config, &mut recorder);
    let mut out = String::new();
    let err = formatter.render_compound(&class, &mut out).unwrap_err();
    assert!(matches!(err, RenderError::UnsupportedKind { ref kind, .. } if kind == "class"));
    assert!(out.is_empty());
}

#[test]
fn test_configured_extension_wins() {
    let catalogue = geo_catalogue();
    let config = Config {
        fileext: Some(".markdown".to_string()),
        ..Config::default()
    };
    let format = TemplateFormat::bundled("markdown", &config)
        .expect("markdown is bundled")
        .expect("markdown compiles");
    let file = catalogue.resolve("geo_8h").expect("file resolves");
    let name = Generator::new(&catalogue, &config).output_name(&file, &format);
    assert_eq!(name, "include_geo.h.markdown");
}
