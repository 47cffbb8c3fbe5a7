//! Splits template source into host lines and output directives.
//!
//! A directive is a line whose first non-blank character is `:`, optionally
//! followed by one space. The rest of the line, newline included, is copied
//! to the output with every `${expr}` replaced by the expression's value.
//! Every other line is host code and passes through untouched.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Expr(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// Host code without its line terminator.
    Host(String),
    /// Output segments in order; literals keep their newline.
    Emit(Vec<Segment>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedLine {
    /// 1-based line number in the template source.
    pub number: usize,
    /// Leading whitespace, the line's nesting under host blocks.
    pub indent: String,
    pub kind: LineKind,
}

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^(\s*): ?(.*)").expect("static pattern"))
}

fn expression_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static pattern"))
}

/// Literal and expression segments of directive content. Empty literals
/// are dropped.
pub fn segments(content: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut last = 0;
    for caps in expression_re().captures_iter(content) {
        let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            out.push(Segment::Literal(content[last..whole.start()].to_string()));
        }
        out.push(Segment::Expr(expr.as_str().to_string()));
        last = whole.end();
    }
    if last < content.len() {
        out.push(Segment::Literal(content[last..].to_string()));
    }
    out
}

pub fn translate(source: &str) -> Vec<TranslatedLine> {
    source
        .split_inclusive('\n')
        .enumerate()
        .map(|(i, line)| translate_line(i + 1, line))
        .collect()
}

fn translate_line(number: usize, line: &str) -> TranslatedLine {
    if let Some(caps) = directive_re().captures(line) {
        let indent = caps.get(1).map_or("", |m| m.as_str());
        let content = caps.get(2).map_or("", |m| m.as_str());
        return TranslatedLine {
            number,
            indent: indent.to_string(),
            kind: LineKind::Emit(segments(content)),
        };
    }

    let text = line.trim_end_matches(['\n', '\r']);
    let body = text.trim_start();
    TranslatedLine {
        number,
        indent: text[..text.len() - body.len()].to_string(),
        kind: LineKind::Host(body.to_string()),
    }
}
