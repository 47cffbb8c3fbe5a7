//! Flattens marked-up documentation text into escaped fragments.
//!
//! The walk is depth first. Each element contributes its leading text
//! (through an optional per-tag "open" rule), then each included child
//! subtree, then the child's tail (through an optional per-tag "close"
//! rule). An inclusion filter keyed by tag prunes whole subtrees; the text
//! after a pruned child is still emitted, escaped but without its rule.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::node::Node;

/// How a tag's text is wrapped. Patterns hold `%s` where the escaped text
/// goes (`%%` is a literal percent); a leading `%T` strips leading
/// whitespace from the text first.
#[derive(Clone)]
pub enum TagRule {
    Pattern(String),
    Dynamic(Rc<dyn Fn(&Node) -> String>),
}

impl fmt::Debug for TagRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagRule::Pattern(p) => f.debug_tuple("Pattern").field(p).finish(),
            TagRule::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl TagRule {
    fn apply(&self, node: &Node, text: &str, escape: &dyn Fn(&str) -> String) -> String {
        let pattern = match self {
            TagRule::Pattern(p) => p.clone(),
            TagRule::Dynamic(f) => f(node),
        };
        let (pattern, text) = match pattern.strip_prefix("%T") {
            Some(rest) => (rest, text.trim_start()),
            None => (pattern.as_str(), text),
        };
        substitute(pattern, &escape(text))
    }
}

fn substitute(pattern: &str, text: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + text.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.peek() {
                Some('s') => {
                    chars.next();
                    out.push_str(text);
                    continue;
                }
                Some('%') => {
                    chars.next();
                    out.push('%');
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

/// Per-tag rules for leading text (`open`) and trailing text (`close`).
#[derive(Debug, Clone, Default)]
pub struct TextRules {
    pub open: HashMap<String, TagRule>,
    pub close: HashMap<String, TagRule>,
}

impl TextRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(mut self, tag: &str, pattern: &str) -> Self {
        self.open
            .insert(tag.to_string(), TagRule::Pattern(pattern.to_string()));
        self
    }

    pub fn close(mut self, tag: &str, pattern: &str) -> Self {
        self.close
            .insert(tag.to_string(), TagRule::Pattern(pattern.to_string()));
        self
    }

    pub fn open_with(mut self, tag: &str, rule: impl Fn(&Node) -> String + 'static) -> Self {
        self.open
            .insert(tag.to_string(), TagRule::Dynamic(Rc::new(rule)));
        self
    }

    pub fn close_with(mut self, tag: &str, rule: impl Fn(&Node) -> String + 'static) -> Self {
        self.close
            .insert(tag.to_string(), TagRule::Dynamic(Rc::new(rule)));
        self
    }
}

#[derive(Clone)]
enum Inclusion {
    Fixed(bool),
    When(Rc<dyn Fn(&Node) -> bool>),
}

/// Decides per child tag whether a subtree is walked. Tags without an entry
/// are included.
#[derive(Clone, Default)]
pub struct TextFilter {
    rules: HashMap<String, Inclusion>,
}

impl fmt::Debug for TextFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.rules.keys().collect();
        tags.sort();
        f.debug_struct("TextFilter").field("tags", &tags).finish()
    }
}

impl TextFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude(mut self, tag: &str) -> Self {
        self.rules.insert(tag.to_string(), Inclusion::Fixed(false));
        self
    }

    pub fn include_when(mut self, tag: &str, pred: impl Fn(&Node) -> bool + 'static) -> Self {
        self.rules
            .insert(tag.to_string(), Inclusion::When(Rc::new(pred)));
        self
    }

    pub fn includes(&self, node: &Node) -> bool {
        match self.rules.get(node.tag()) {
            None => true,
            Some(Inclusion::Fixed(keep)) => *keep,
            Some(Inclusion::When(pred)) => pred(node),
        }
    }
}

/// Drops paragraphs that only carry a parameter list or a copyright note,
/// both of which are rendered elsewhere.
pub fn description_filter() -> TextFilter {
    TextFilter::new().include_when("para", |para| {
        para.child("parameterlist").is_absent()
            && para.child("simplesect[@kind='copyright']").is_absent()
    })
}

/// The ordered text fragments of `node`'s subtree.
pub fn extract(
    node: &Node,
    escape: &dyn Fn(&str) -> String,
    rules: &TextRules,
    filter: Option<&TextFilter>,
) -> Vec<String> {
    let mut fragments = Vec::new();
    if node.is_present() {
        walk(node, escape, rules, filter, &mut fragments);
    }
    fragments
}

/// [`extract`] joined into one string.
pub fn map_text(
    node: &Node,
    escape: &dyn Fn(&str) -> String,
    rules: &TextRules,
    filter: Option<&TextFilter>,
) -> String {
    extract(node, escape, rules, filter).concat()
}

fn walk(
    node: &Node,
    escape: &dyn Fn(&str) -> String,
    rules: &TextRules,
    filter: Option<&TextFilter>,
    out: &mut Vec<String>,
) {
    let text = node.leading_text();
    match rules.open.get(node.tag()) {
        Some(rule) => out.push(rule.apply(node, text, escape)),
        None if !text.is_empty() => out.push(escape(text)),
        None => {}
    }

    for child in node.iter() {
        let tail = child.tail();
        // An excluded child loses its subtree but keeps its tail, unwrapped:
        // its close rule would pair with markup that was never opened.
        if !filter.map_or(true, |f| f.includes(&child)) {
            if !tail.is_empty() {
                out.push(escape(tail));
            }
            continue;
        }
        walk(&child, escape, rules, filter, out);

        match rules.close.get(child.tag()) {
            Some(rule) => out.push(rule.apply(&child, tail, escape)),
            None if !tail.is_empty() => out.push(escape(tail)),
            None => {}
        }
    }
}

/// Text escaping for a target format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Escaper {
    #[default]
    None,
    Html,
    Markdown,
}

impl Escaper {
    pub fn apply(&self, text: &str) -> String {
        match self {
            Escaper::None => text.to_string(),
            Escaper::Html => escape_html(text),
            Escaper::Markdown => escape_markdown(text),
        }
    }
}

impl FromStr for Escaper {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Escaper::None),
            "html" => Ok(Escaper::Html),
            "markdown" | "md" => Ok(Escaper::Markdown),
            other => Err(format!("unknown escaper `{other}` (expected none, html or markdown)")),
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '>' | '|' | '#') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// What to show for a compiler-generated anonymous name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnonymousPolicy {
    /// `anonymous struct`, `anonymous union`, ...
    #[default]
    Label,
    /// Drop the name, keeping only the kind title.
    Suppress,
}

impl FromStr for AnonymousPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "label" => Ok(AnonymousPolicy::Label),
            "suppress" => Ok(AnonymousPolicy::Suppress),
            other => Err(format!("unknown anonymous policy `{other}` (expected label or suppress)")),
        }
    }
}

/// Anonymous types are named `@0`, `@1`, ... by the analyzer.
pub fn is_anonymous(name: &str) -> bool {
    static ANON: OnceLock<Regex> = OnceLock::new();
    ANON.get_or_init(|| Regex::new(r"^@[0-9]").expect("static pattern"))
        .is_match(name)
}
