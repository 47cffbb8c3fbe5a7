//! # doxyover
//!
//! Turns Doxygen XML output into per-file documents. The layout of each
//! document is decided by an output format written in a small template
//! language; see [`template`].

pub mod config;
pub mod error;
pub mod parser;
pub mod renderer;
pub mod template;

#[cfg(test)]
mod tests;

pub use config::{Config, ConfigValue, SortOrder};
pub use error::{CatalogueError, RenderError, TemplateError, XmlError};
pub use parser::{Catalogue, CompoundSource, MemorySource, Node, NodeBuilder, XmlDirectory};
pub use renderer::{DocFormatter, Format, Generator, HookContext, RenderedFile};
pub use template::{Environment, Template, TemplateFormat, Value};
