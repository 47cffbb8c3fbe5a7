use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::RenderError;
use crate::parser::catalogue::Catalogue;
use crate::parser::node::Node;
use crate::renderer::components::output_stem;
use crate::renderer::formatter::DocFormatter;
use crate::renderer::stream::{IoSink, SquashWriter};
use crate::renderer::traits::Format;

/// One rendered file compound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub name: String,
    pub content: String,
}

/// Generates one output per file compound of a catalogue.
pub struct Generator<'a> {
    catalogue: &'a Catalogue,
    config: &'a Config,
}

impl<'a> Generator<'a> {
    pub fn new(catalogue: &'a Catalogue, config: &'a Config) -> Self {
        Self { catalogue, config }
    }

    fn extension(&self, format: &dyn Format) -> String {
        self.config
            .fileext
            .clone()
            .or_else(|| format.file_extension())
            .unwrap_or_else(|| ".txt".to_string())
    }

    fn source_path(compound: &Node) -> String {
        let location = compound.child("location");
        let file = location.attr("file");
        if file.is_empty() {
            compound.trimmed_text("compoundname")
        } else {
            file.to_string()
        }
    }

    /// Output file name for a file compound.
    pub fn output_name(&self, compound: &Node, format: &dyn Format) -> String {
        format!("{}{}", output_stem(&Self::source_path(compound)), self.extension(format))
    }

    /// Output names for `files`, in order. A name already taken by an
    /// earlier file gets a `-2`, `-3`, ... suffix before the extension.
    pub fn output_names(&self, files: &[Node], format: &dyn Format) -> Vec<String> {
        let extension = self.extension(format);
        let mut taken = HashSet::new();
        let mut names = Vec::with_capacity(files.len());
        for compound in files {
            let stem = output_stem(&Self::source_path(compound));
            let mut name = format!("{}{}", stem, extension);
            let mut n = 2;
            while taken.contains(&name) {
                name = format!("{}-{}{}", stem, n, extension);
                n += 1;
            }
            if n > 2 {
                warn!(source = %Self::source_path(compound), file = %name, "output name collision, renamed");
            }
            taken.insert(name.clone());
            names.push(name);
        }
        names
    }

    fn file_compounds(&self) -> Result<Vec<Node>, RenderError> {
        let mut files = Vec::new();
        for compound in self.catalogue.iter().filter(|c| c.kind() == "file") {
            files.push(self.catalogue.element(compound)?);
        }
        Ok(files)
    }

    /// Writes every file compound under the configured output directory and
    /// returns the paths written.
    pub fn generate(&self, format: &mut dyn Format) -> Result<Vec<PathBuf>, RenderError> {
        fs::create_dir_all(&self.config.outdir)?;
        let files = self.file_compounds()?;
        let names = self.output_names(&files, &*format);

        let mut formatter = DocFormatter::new(self.catalogue, self.config, format);
        formatter.claim_aliases(&files);
        let mut written = Vec::with_capacity(files.len());
        for (compound, name) in files.iter().zip(names) {
            let path = self.config.outdir.join(&name);
            info!(file = %path.display(), "writing");
            let mut out = SquashWriter::new(IoSink(BufWriter::new(File::create(&path)?)));
            formatter.render_file(compound, &path.display().to_string(), &mut out)?;
            out.into_inner().flush()?;
            written.push(path);
        }
        Ok(written)
    }

    /// Renders every file compound in memory, in catalogue order.
    pub fn render_to_strings(&self, format: &mut dyn Format) -> Result<Vec<RenderedFile>, RenderError> {
        let files = self.file_compounds()?;
        let names = self.output_names(&files, &*format);

        let mut formatter = DocFormatter::new(self.catalogue, self.config, format);
        formatter.claim_aliases(&files);
        let mut rendered = Vec::with_capacity(files.len());
        for (compound, name) in files.iter().zip(names) {
            let mut out = SquashWriter::new(String::new());
            formatter.render_file(compound, &name, &mut out)?;
            rendered.push(RenderedFile {
                name,
                content: out.into_inner(),
            });
        }
        Ok(rendered)
    }
}
