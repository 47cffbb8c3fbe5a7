//! Read-only view over a labeled documentation tree.
//!
//! Every accessor is safe under absence: a missing attribute is `""`, a
//! missing child is the absent [`Node`], a missing list is empty. Callers
//! probe optional fields by checking the returned value instead of branching
//! on presence first.

use std::fmt;
use std::rc::Rc;

/// One element of the source tree: tag, attributes, leading text, children
/// and the text trailing the element inside its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    tail: String,
    children: Vec<Rc<Element>>,
}

/// A handle to an [`Element`], or the absent sentinel.
///
/// Cloning is cheap. Two nodes compare equal when their subtrees are
/// structurally equal.
#[derive(Clone, Default, PartialEq)]
pub struct Node(Option<Rc<Element>>);

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(elem) => write!(f, "Node(<{}>)", elem.tag),
            None => write!(f, "Node(absent)"),
        }
    }
}

impl Node {
    /// The absent sentinel.
    pub fn absent() -> Self {
        Node(None)
    }

    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }

    /// True when both handles point at the same element.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn tag(&self) -> &str {
        self.0.as_deref().map_or("", |e| e.tag.as_str())
    }

    /// Text before the first child.
    pub fn leading_text(&self) -> &str {
        self.0.as_deref().map_or("", |e| e.text.as_str())
    }

    /// Text following this element inside its parent.
    pub fn tail(&self) -> &str {
        self.0.as_deref().map_or("", |e| e.tail.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .as_deref()
            .into_iter()
            .flat_map(|e| e.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Direct children in document order.
    pub fn iter(&self) -> impl Iterator<Item = Node> + '_ {
        self.0
            .as_deref()
            .into_iter()
            .flat_map(|e| e.children.iter().map(|c| Node(Some(Rc::clone(c)))))
    }

    /// Attribute value, `""` when missing.
    pub fn attr(&self, name: &str) -> &str {
        self.0
            .as_deref()
            .and_then(|e| e.attrs.iter().find(|(k, _)| k == name))
            .map_or("", |(_, v)| v.as_str())
    }

    /// First node matching `path`, or the absent sentinel.
    pub fn child(&self, path: &str) -> Node {
        self.select(path).into_iter().next().unwrap_or_default()
    }

    /// All nodes matching `path` in document order.
    pub fn children(&self, path: &str) -> Vec<Node> {
        self.select(path)
    }

    /// Tag of the first node matching `path`, `""` when none.
    pub fn tag_name(&self, path: &str) -> String {
        self.child(path).tag().to_string()
    }

    /// Leading text of every match, concatenated.
    pub fn text(&self, path: &str) -> String {
        self.select(path)
            .iter()
            .map(|n| n.leading_text())
            .collect()
    }

    /// Full text of every match (descendants included), concatenated.
    pub fn raw_text(&self, path: &str) -> String {
        let mut out = String::new();
        for node in self.select(path) {
            if let Some(elem) = node.0.as_deref() {
                collect_text(elem, &mut out);
            }
        }
        out
    }

    /// [`Node::raw_text`] with surrounding whitespace removed.
    pub fn trimmed_text(&self, path: &str) -> String {
        self.raw_text(path).trim().to_string()
    }

    fn select(&self, path: &str) -> Vec<Node> {
        let Some(root) = &self.0 else {
            return Vec::new();
        };
        let path = path.trim();
        if path.is_empty() || path == "." {
            return vec![self.clone()];
        }

        let mut current = vec![Rc::clone(root)];
        let mut descendant = false;
        for segment in split_path(path) {
            if segment.is_empty() {
                descendant = true;
                continue;
            }
            if segment == "." && !descendant {
                continue;
            }
            let step = Step::parse(segment);
            let mut next = Vec::new();
            for elem in &current {
                if descendant {
                    for_each_descendant(elem, &mut |d| {
                        if step.matches(d) {
                            next.push(Rc::clone(d));
                        }
                    });
                } else {
                    next.extend(elem.children.iter().filter(|c| step.matches(c)).cloned());
                }
            }
            current = next;
            descendant = false;
        }
        current.into_iter().map(|e| Node(Some(e))).collect()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw_text(""))
    }
}

fn collect_text(elem: &Element, out: &mut String) {
    out.push_str(&elem.text);
    for child in &elem.children {
        collect_text(child, out);
        out.push_str(&child.tail);
    }
}

fn for_each_descendant(elem: &Rc<Element>, f: &mut dyn FnMut(&Rc<Element>)) {
    for child in &elem.children {
        f(child);
        for_each_descendant(child, f);
    }
}

/// Splits on `/` outside of `[...]` predicates.
fn split_path(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '\'' | '"' if quote == Some(c) => quote = None,
            '\'' | '"' if quote.is_none() && depth > 0 => quote = Some(c),
            '[' if quote.is_none() => depth += 1,
            ']' if quote.is_none() => depth = depth.saturating_sub(1),
            '/' if quote.is_none() && depth == 0 => {
                segments.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&path[start..]);
    segments
}

#[derive(Debug)]
enum NameTest {
    Any,
    SelfNode,
    Tag(String),
}

#[derive(Debug)]
enum Predicate {
    HasAttr(String),
    AttrEquals(String, String),
    HasChild(String),
    Never,
}

#[derive(Debug)]
struct Step {
    test: NameTest,
    predicates: Vec<Predicate>,
}

impl Step {
    fn parse(segment: &str) -> Step {
        let (name, mut rest) = match segment.find('[') {
            Some(i) => (&segment[..i], &segment[i..]),
            None => (segment, ""),
        };
        let test = match name {
            "*" => NameTest::Any,
            "." => NameTest::SelfNode,
            tag => NameTest::Tag(tag.to_string()),
        };

        let mut predicates = Vec::new();
        while let Some(stripped) = rest.strip_prefix('[') {
            let Some(end) = stripped.find(']') else {
                predicates.push(Predicate::Never);
                break;
            };
            predicates.push(Predicate::parse(&stripped[..end]));
            rest = &stripped[end + 1..];
        }
        if !rest.is_empty() {
            predicates.push(Predicate::Never);
        }

        Step { test, predicates }
    }

    fn matches(&self, elem: &Element) -> bool {
        let name_ok = match &self.test {
            NameTest::Any | NameTest::SelfNode => true,
            NameTest::Tag(tag) => elem.tag == *tag,
        };
        name_ok && self.predicates.iter().all(|p| p.matches(elem))
    }
}

impl Predicate {
    fn parse(body: &str) -> Predicate {
        let body = body.trim();
        if let Some(attr) = body.strip_prefix('@') {
            match attr.split_once('=') {
                Some((name, value)) => {
                    let value = value.trim();
                    let unquoted = value
                        .strip_prefix('\'')
                        .and_then(|v| v.strip_suffix('\''))
                        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')));
                    match unquoted {
                        Some(v) => Predicate::AttrEquals(name.trim().to_string(), v.to_string()),
                        None => Predicate::Never,
                    }
                }
                None => Predicate::HasAttr(attr.trim().to_string()),
            }
        } else if !body.is_empty() && body.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            Predicate::HasChild(body.to_string())
        } else {
            Predicate::Never
        }
    }

    fn matches(&self, elem: &Element) -> bool {
        match self {
            Predicate::HasAttr(name) => elem.attrs.iter().any(|(k, _)| k == name),
            Predicate::AttrEquals(name, value) => {
                elem.attrs.iter().any(|(k, v)| k == name && v == value)
            }
            Predicate::HasChild(tag) => elem.children.iter().any(|c| c.tag == *tag),
            Predicate::Never => false,
        }
    }
}

/// Builds nodes by hand: used by the XML reader and for synthetic nodes the
/// formatter assembles from existing ones.
#[derive(Debug, Clone)]
pub struct NodeBuilder(Element);

impl NodeBuilder {
    pub fn new(tag: impl Into<String>) -> Self {
        NodeBuilder(Element {
            tag: tag.into(),
            attrs: Vec::new(),
            text: String::new(),
            tail: String::new(),
            children: Vec::new(),
        })
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_attr(name, value);
        self
    }

    /// Appends text after the last child (or to the leading text when there
    /// are no children yet).
    pub fn text(mut self, text: &str) -> Self {
        self.push_text(text);
        self
    }

    pub fn child(mut self, node: Node) -> Self {
        self.push_child(node);
        self
    }

    pub fn children(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        for node in nodes {
            self.push_child(node);
        }
        self
    }

    pub fn push_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.attrs.push((name.into(), value.into()));
    }

    pub fn push_text(&mut self, text: &str) {
        match self.0.children.last_mut() {
            Some(last) => Rc::make_mut(last).tail.push_str(text),
            None => self.0.text.push_str(text),
        }
    }

    /// Absent nodes are ignored.
    pub fn push_child(&mut self, node: Node) {
        if let Some(elem) = node.0 {
            self.0.children.push(elem);
        }
    }

    pub fn build(self) -> Node {
        Node(Some(Rc::new(self.0)))
    }
}
