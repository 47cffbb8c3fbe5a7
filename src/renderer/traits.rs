use std::io;

use crate::config::Config;
use crate::error::RenderError;
use crate::parser::node::Node;
use crate::parser::text::{self, AnonymousPolicy, TextFilter, TextRules};
use crate::renderer::stream::Sink;

/// Whether a hook call opens or closes an element's rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Begin,
    End,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Begin => "begin",
            Event::End => "end",
        }
    }
}

/// What a hook can see of the ongoing render: the output, the stack of
/// elements being rendered, and run-wide settings.
pub struct HookContext<'a> {
    pub out: &'a mut dyn Sink,
    pub stack: &'a [Node],
    pub language: &'a str,
    pub config: &'a Config,
}

impl HookContext<'_> {
    pub fn write(&mut self, text: &str) -> io::Result<()> {
        self.out.write_text(text)
    }

    /// How many elements tagged `tag` are open on the render stack.
    pub fn depth(&self, tag: &str) -> usize {
        self.stack.iter().filter(|e| e.tag() == tag).count()
    }
}

/// One output format. The document formatter decides what is rendered and in
/// which order; a format decides how each piece looks. Every hook defaults to
/// writing nothing.
pub trait Format {
    fn escape(&self, text: &str) -> String {
        text.to_string()
    }

    fn text_rules(&self) -> TextRules {
        TextRules::default()
    }

    fn anonymous_policy(&self) -> AnonymousPolicy {
        AnonymousPolicy::Label
    }

    /// Extension (with the dot) for output files when the configuration
    /// does not name one.
    fn file_extension(&self) -> Option<String> {
        None
    }

    /// Escaped, rule-formatted text of `node`.
    fn maptext(&self, node: &Node, filter: Option<&TextFilter>) -> String {
        let rules = self.text_rules();
        text::map_text(node, &|t| self.escape(t), &rules, filter)
    }

    /// Called once per output file before its compound is rendered.
    fn reset(&mut self, _cx: &mut HookContext<'_>, _path: &str) -> Result<(), RenderError> {
        Ok(())
    }

    fn heading(&mut self, _cx: &mut HookContext<'_>, _text: &str, _level: usize) -> Result<(), RenderError> {
        Ok(())
    }

    fn summary(&mut self, _cx: &mut HookContext<'_>, _elem: &Node) -> Result<(), RenderError> {
        Ok(())
    }

    fn copyright(&mut self, _cx: &mut HookContext<'_>, _text: &str) -> Result<(), RenderError> {
        Ok(())
    }

    /// `kind` is the record kind (`function`, `struct`, `FUNCTION-MACRO`,
    /// ...), `text` the display name already qualified by its kind title,
    /// `brief` the brief description element.
    fn name(&mut self, _cx: &mut HookContext<'_>, _kind: &str, _text: &str, _brief: &Node) -> Result<(), RenderError> {
        Ok(())
    }

    fn syntax(&mut self, _cx: &mut HookContext<'_>, _text: &str) -> Result<(), RenderError> {
        Ok(())
    }

    fn parameters(&mut self, _cx: &mut HookContext<'_>, _list: &Node) -> Result<(), RenderError> {
        Ok(())
    }

    fn returns(&mut self, _cx: &mut HookContext<'_>, _elem: &Node) -> Result<(), RenderError> {
        Ok(())
    }

    fn enumvalues(&mut self, _cx: &mut HookContext<'_>, _values: &[Node]) -> Result<(), RenderError> {
        Ok(())
    }

    fn description(&mut self, _cx: &mut HookContext<'_>, _elem: &Node) -> Result<(), RenderError> {
        Ok(())
    }

    fn event(&mut self, _cx: &mut HookContext<'_>, _elem: &Node, _event: Event) -> Result<(), RenderError> {
        Ok(())
    }
}
