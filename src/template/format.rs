//! Output formats written in the template language.
//!
//! The template's top level runs once and configures the format through
//! its globals:
//!
//! - `escape`: `"none"`, `"html"` or `"markdown"`
//! - `textmap` / `tailmap`: tag to pattern maps for leading and trailing text
//! - `fileext`: extension of generated files
//! - `anonymous`: `"label"` or `"suppress"`
//!
//! Each formatter hook then calls the template function of the same name,
//! if the template defines one.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{RenderError, TemplateError};
use crate::parser::node::Node;
use crate::parser::text::{self, description_filter, AnonymousPolicy, Escaper, TextRules};
use crate::renderer::traits::{Event, Format, HookContext};
use crate::template::interp::{Environment, Host, Template};
use crate::template::value::Value;

const BUNDLED: &[(&str, &str)] = &[
    ("markdown", include_str!("../../formats/markdown.dxt")),
    ("html", include_str!("../../formats/html.dxt")),
];

/// Names of the formats compiled into the binary.
pub fn bundled_names() -> impl Iterator<Item = &'static str> {
    BUNDLED.iter().map(|(name, _)| *name)
}

/// Source of a bundled format.
pub fn bundled_source(name: &str) -> Option<&'static str> {
    BUNDLED
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, source)| *source)
}

pub struct TemplateFormat {
    template: Template,
    env: Environment,
    escaper: Escaper,
    rules: TextRules,
    fileext: Option<String>,
    anonymous: AnonymousPolicy,
}

impl std::fmt::Debug for TemplateFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateFormat")
            .field("template", &self.template.name())
            .field("escaper", &self.escaper)
            .field("fileext", &self.fileext)
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

impl TemplateFormat {
    /// Runs the template's top level and reads its settings.
    pub fn new(template: Template, config: &Config) -> Result<Self, TemplateError> {
        let mut env = Environment::new()
            .with("conf", Value::from(&config.entries()))
            .with("language", "");
        let mut preamble = String::new();
        template.execute(&mut env, &mut preamble)?;
        if !preamble.is_empty() {
            debug!(template = %template.name(), "discarding top-level output");
        }

        let setting = |message: String| TemplateError::Runtime {
            template: template.name().to_string(),
            line: 0,
            message,
        };
        let escaper = match env.get("escape") {
            Some(Value::Str(name)) => Escaper::from_str(name).map_err(setting)?,
            _ => Escaper::None,
        };
        let anonymous = match env.get("anonymous") {
            Some(Value::Str(name)) => AnonymousPolicy::from_str(name).map_err(setting)?,
            _ => AnonymousPolicy::default(),
        };
        let fileext = env.get("fileext").and_then(Value::as_str).map(str::to_string);

        let mut rules = TextRules::new();
        for (tag, pattern) in pattern_map(env.get("textmap"), "textmap").map_err(setting)? {
            rules = rules.open(&tag, &pattern);
        }
        for (tag, pattern) in pattern_map(env.get("tailmap"), "tailmap").map_err(setting)? {
            rules = rules.close(&tag, &pattern);
        }

        Ok(Self {
            template,
            env,
            escaper,
            rules,
            fileext,
            anonymous,
        })
    }

    pub fn load(path: &Path, config: &Config) -> Result<Self, TemplateError> {
        Self::new(Template::load(path)?, config)
    }

    /// A format compiled into the binary, by name.
    pub fn bundled(name: &str, config: &Config) -> Option<Result<Self, TemplateError>> {
        let source = bundled_source(name)?;
        Some(Template::compile(&format!("{}.dxt", name), source).and_then(|t| Self::new(t, config)))
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    fn invoke(&mut self, cx: &mut HookContext<'_>, hook: &str, args: Vec<Value>) -> Result<(), RenderError> {
        if self.env.function(hook).is_none() {
            return Ok(());
        }
        trace!(hook, depth = cx.stack.len(), "template hook");
        self.env.bind("language", cx.language);
        let mut host = HookHost {
            stack: cx.stack,
            escaper: self.escaper,
            rules: &self.rules,
        };
        self.template
            .call(&mut self.env, hook, args, &mut *cx.out, &mut host)?;
        Ok(())
    }
}

fn pattern_map(value: Option<&Value>, name: &str) -> Result<BTreeMap<String, String>, String> {
    match value {
        None | Some(Value::None) => Ok(BTreeMap::new()),
        Some(Value::Map(entries)) => entries
            .iter()
            .map(|(tag, pattern)| match pattern {
                Value::Str(p) => Ok((tag.clone(), p.clone())),
                other => Err(format!("{}[{}] must be str, not {}", name, tag, other.type_name())),
            })
            .collect(),
        Some(other) => Err(format!("{} must be a map, not {}", name, other.type_name())),
    }
}

/// Host functions available to hook bodies.
struct HookHost<'h> {
    stack: &'h [Node],
    escaper: Escaper,
    rules: &'h TextRules,
}

impl Host for HookHost<'_> {
    fn call(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
        let result = match name {
            "maptext" => self.maptext(args),
            "depth" => match args {
                [Value::Str(tag)] => Ok(Value::from(self.stack.iter().filter(|e| e.tag() == tag).count())),
                _ => Err("depth() expects one tag name".to_string()),
            },
            "escape" => match args {
                [value] => Ok(Value::Str(self.escaper.apply(&value.to_string()))),
                _ => Err("escape() expects one argument".to_string()),
            },
            _ => return None,
        };
        Some(result)
    }
}

impl HookHost<'_> {
    fn maptext(&self, args: &[Value]) -> Result<Value, String> {
        let (node, filter) = match args {
            [Value::Node(node)] => (node, None),
            [Value::Node(node), Value::Str(filter)] if filter == "description" => (node, Some(description_filter())),
            [Value::Node(_), other] => return Err(format!("unknown maptext filter `{}`", other)),
            _ => return Err("maptext() expects a node".to_string()),
        };
        let escaper = self.escaper;
        Ok(Value::Str(text::map_text(
            node,
            &|t| escaper.apply(t),
            self.rules,
            filter.as_ref(),
        )))
    }
}

impl Format for TemplateFormat {
    fn escape(&self, text: &str) -> String {
        self.escaper.apply(text)
    }

    fn text_rules(&self) -> TextRules {
        self.rules.clone()
    }

    fn anonymous_policy(&self) -> AnonymousPolicy {
        self.anonymous
    }

    fn file_extension(&self) -> Option<String> {
        self.fileext.clone()
    }

    fn reset(&mut self, cx: &mut HookContext<'_>, path: &str) -> Result<(), RenderError> {
        self.invoke(cx, "reset", vec![Value::from(path)])
    }

    fn heading(&mut self, cx: &mut HookContext<'_>, text: &str, level: usize) -> Result<(), RenderError> {
        self.invoke(cx, "heading", vec![Value::from(text), Value::from(level)])
    }

    fn summary(&mut self, cx: &mut HookContext<'_>, elem: &Node) -> Result<(), RenderError> {
        self.invoke(cx, "summary", vec![Value::Node(elem.clone())])
    }

    fn copyright(&mut self, cx: &mut HookContext<'_>, text: &str) -> Result<(), RenderError> {
        self.invoke(cx, "copyright", vec![Value::from(text)])
    }

    fn name(&mut self, cx: &mut HookContext<'_>, kind: &str, text: &str, brief: &Node) -> Result<(), RenderError> {
        self.invoke(
            cx,
            "name",
            vec![Value::from(kind), Value::from(text), Value::Node(brief.clone())],
        )
    }

    fn syntax(&mut self, cx: &mut HookContext<'_>, text: &str) -> Result<(), RenderError> {
        self.invoke(cx, "syntax", vec![Value::from(text)])
    }

    fn parameters(&mut self, cx: &mut HookContext<'_>, list: &Node) -> Result<(), RenderError> {
        self.invoke(cx, "parameters", vec![Value::Node(list.clone())])
    }

    fn returns(&mut self, cx: &mut HookContext<'_>, elem: &Node) -> Result<(), RenderError> {
        self.invoke(cx, "returns", vec![Value::Node(elem.clone())])
    }

    fn enumvalues(&mut self, cx: &mut HookContext<'_>, values: &[Node]) -> Result<(), RenderError> {
        self.invoke(cx, "enumvalues", vec![Value::from(values.to_vec())])
    }

    fn description(&mut self, cx: &mut HookContext<'_>, elem: &Node) -> Result<(), RenderError> {
        self.invoke(cx, "description", vec![Value::Node(elem.clone())])
    }

    fn event(&mut self, cx: &mut HookContext<'_>, elem: &Node, event: Event) -> Result<(), RenderError> {
        self.invoke(
            cx,
            "event",
            vec![Value::Node(elem.clone()), Value::from(event.as_str())],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::node::NodeBuilder;

    fn format(source: &str) -> TemplateFormat {
        TemplateFormat::new(Template::compile("fmt", source).unwrap(), &Config::default()).unwrap()
    }

    #[test]
    fn test_settings_from_globals() {
        let fmt = format(
            "escape = 'html'\nfileext = '.html'\nanonymous = 'suppress'\ntextmap = {'bold': '<b>%s'}\ntailmap = {'bold': '</b>%s'}\n",
        );
        assert_eq!(fmt.escape("<a & b>"), "&lt;a &amp; b&gt;");
        assert_eq!(fmt.file_extension().as_deref(), Some(".html"));
        assert_eq!(fmt.anonymous_policy(), AnonymousPolicy::Suppress);

        let para = NodeBuilder::new("para")
            .text("x ")
            .child(NodeBuilder::new("bold").text("y").build())
            .text(" z")
            .build();
        assert_eq!(fmt.maptext(&para, None), "x <b>y</b> z");
    }

    #[test]
    fn test_bad_settings_are_reported() {
        let result = TemplateFormat::new(
            Template::compile("fmt", "escape = 'latex'\n").unwrap(),
            &Config::default(),
        );
        assert!(matches!(result, Err(TemplateError::Runtime { .. })));
    }

    #[test]
    fn test_hooks_call_template_functions() {
        let mut fmt = format(
            "def heading(text, level):\n    : ${repeat('#', level)} ${escape(text)} (${language})\n",
        );
        let config = Config::default();
        let stack = Vec::new();
        let mut out = String::new();
        let mut cx = HookContext {
            out: &mut out,
            stack: &stack,
            language: "C",
            config: &config,
        };
        fmt.heading(&mut cx, "Geometry", 2).unwrap();
        // No `syntax` function: nothing happens.
        fmt.syntax(&mut cx, "int x;").unwrap();
        assert_eq!(out, "## Geometry (C)\n");
    }

    #[test]
    fn test_host_maptext_filters_descriptions() {
        let mut fmt = format("def description(elem):\n    : ${maptext(elem, 'description')}|${depth('sectiondef')}\n");
        let detailed = NodeBuilder::new("detaileddescription")
            .child(NodeBuilder::new("para").text("kept").build())
            .child(
                NodeBuilder::new("para")
                    .child(NodeBuilder::new("parameterlist").text("dropped").build())
                    .build(),
            )
            .build();
        let config = Config::default();
        let stack = vec![NodeBuilder::new("sectiondef").build()];
        let mut out = String::new();
        let mut cx = HookContext {
            out: &mut out,
            stack: &stack,
            language: "",
            config: &config,
        };
        fmt.description(&mut cx, &detailed).unwrap();
        assert_eq!(out, "kept|1\n");
    }

    #[test]
    fn test_template_errors_abort_rendering() {
        let mut fmt = format("def summary(elem):\n    : ${elem.nope}\n");
        let config = Config::default();
        let mut out = String::new();
        let mut cx = HookContext {
            out: &mut out,
            stack: &[],
            language: "",
            config: &config,
        };
        let err = fmt.summary(&mut cx, &Node::absent()).unwrap_err();
        assert!(matches!(err, RenderError::Template(TemplateError::Runtime { line: 2, .. })));
    }

    #[test]
    fn test_bundled_formats_compile() {
        for name in bundled_names() {
            let fmt = TemplateFormat::bundled(name, &Config::default())
                .expect("bundled format exists")
                .unwrap();
            assert!(fmt.file_extension().is_some(), "{name} sets fileext");
        }
        assert!(TemplateFormat::bundled("nroff", &Config::default()).is_none());
    }
}
