use std::fs;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::XmlError;
use crate::parser::node::{Node, NodeBuilder};

/// Reads an XML file into a node tree rooted at the document element.
pub fn parse_file(path: &Path) -> Result<Node, XmlError> {
    let content = fs::read_to_string(path).map_err(|source| XmlError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&content, &path.display().to_string())
}

/// Parses XML text. Whitespace is kept: text before the first child lands in
/// the element's leading text, text after a child in that child's tail.
pub fn parse_str(xml: &str, origin: &str) -> Result<Node, XmlError> {
    let mut reader = Reader::from_str(xml);
    // The bottom entry collects the document element.
    let mut stack = vec![NodeBuilder::new("")];

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let builder = start_element(&start).map_err(|m| syntax(&reader, origin, m))?;
                stack.push(builder);
            }
            Ok(Event::Empty(start)) => {
                let builder = start_element(&start).map_err(|m| syntax(&reader, origin, m))?;
                top(&mut stack).push_child(builder.build());
            }
            Ok(Event::End(end)) => {
                if stack.len() < 2 {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    return Err(syntax(&reader, origin, format!("unexpected closing tag `{name}`")));
                }
                if let Some(done) = stack.pop() {
                    top(&mut stack).push_child(done.build());
                }
            }
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|e| syntax(&reader, origin, e.to_string()))?;
                top(&mut stack).push_text(&text);
            }
            Ok(Event::CData(data)) => {
                let bytes = data.into_inner();
                top(&mut stack).push_text(&String::from_utf8_lossy(&bytes));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(syntax(&reader, origin, e.to_string())),
        }
    }

    if stack.len() != 1 {
        return Err(syntax(&reader, origin, "unexpected end of document".to_string()));
    }
    let document = stack.pop().map(NodeBuilder::build).unwrap_or_default();
    let root = document.iter().next();
    root.ok_or_else(|| syntax(&reader, origin, "document has no root element".to_string()))
}

fn syntax(reader: &Reader<&[u8]>, origin: &str, message: String) -> XmlError {
    XmlError::Syntax {
        origin: origin.to_string(),
        position: reader.buffer_position() as u64,
        message,
    }
}

fn top(stack: &mut Vec<NodeBuilder>) -> &mut NodeBuilder {
    if stack.is_empty() {
        stack.push(NodeBuilder::new(""));
    }
    let last = stack.len() - 1;
    &mut stack[last]
}

fn start_element(start: &BytesStart<'_>) -> Result<NodeBuilder, String> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut builder = NodeBuilder::new(tag);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        builder.push_attr(key, value.into_owned());
    }
    Ok(builder)
}
