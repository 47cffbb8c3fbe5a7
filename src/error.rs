use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures turning XML text into a [`crate::Node`] tree.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed XML in {origin} at byte {position}: {message}")]
    Syntax {
        origin: String,
        position: u64,
        message: String,
    },
}

/// Failures building or resolving the compound catalogue.
#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("cannot load compound index")]
    Index(#[source] XmlError),

    #[error("cannot load compound `{id}`")]
    Compound {
        id: String,
        #[source]
        source: XmlError,
    },

    #[error("compound `{0}` is not listed in the catalogue")]
    Unknown(String),
}

/// Template compile and execution errors, always located in the template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{template}:{line}: syntax error: {message}")]
    Syntax {
        template: String,
        line: usize,
        message: String,
    },

    #[error("{template}:{line}: {message}")]
    Runtime {
        template: String,
        line: usize,
        message: String,
    },

    #[error("{template}:{line}: write failed: {source}")]
    Output {
        template: String,
        line: usize,
        #[source]
        source: io::Error,
    },
}

/// Errors that abort a generation run.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The input schema is closed; an unknown kind means the producer and
    /// this consumer disagree on its version.
    #[error("unsupported {element} kind `{kind}`")]
    UnsupportedKind { element: String, kind: String },

    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("output write failed: {0}")]
    Io(#[from] io::Error),
}
