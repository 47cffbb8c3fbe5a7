//! Generator configuration: defaults, an optional JSON file, then
//! `key=value` overrides.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::parser::text::AnonymousPolicy;

/// Order of entries inside a section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// By source file, then line, then column.
    #[default]
    Source,
    /// By name.
    Alpha,
    /// As listed by the analyzer.
    Doxygen,
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source" => Ok(SortOrder::Source),
            "alpha" => Ok(SortOrder::Alpha),
            "doxygen" => Ok(SortOrder::Doxygen),
            other => Err(anyhow!(
                "unknown order `{}` (expected source, alpha or doxygen)",
                other
            )),
        }
    }
}

/// A free-form configuration value handed through to templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Str(String),
}

impl ConfigValue {
    /// `true/false/yes/no` become booleans, anything else stays a string.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" => ConfigValue::Bool(true),
            "false" | "no" => ConfigValue::Bool(false),
            _ => ConfigValue::Str(raw.to_string()),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default = "default_outdir")]
    pub outdir: PathBuf,
    #[serde(default)]
    pub fileext: Option<String>,
    #[serde(default)]
    pub anonymous: Option<AnonymousPolicy>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, ConfigValue>,
}

fn default_outdir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order: SortOrder::default(),
            outdir: default_outdir(),
            fileext: None,
            anonymous: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    /// Applies one override; known keys are validated.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "order" => self.order = value.parse()?,
            "outdir" => self.outdir = PathBuf::from(value),
            "fileext" => self.fileext = Some(value.to_string()),
            "anonymous" => {
                self.anonymous = Some(value.parse().map_err(|e: String| anyhow!(e))?);
            }
            _ => {
                self.extra.insert(key.to_string(), ConfigValue::parse(value));
            }
        }
        Ok(())
    }

    /// Applies a `key=value` string.
    pub fn set_pair(&mut self, pair: &str) -> Result<()> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, got `{}`", pair))?;
        self.set(key.trim(), value.trim())
    }

    /// Every setting as strings and booleans, the shape templates see.
    pub fn entries(&self) -> BTreeMap<String, ConfigValue> {
        let mut entries = self.extra.clone();
        let order = match self.order {
            SortOrder::Source => "source",
            SortOrder::Alpha => "alpha",
            SortOrder::Doxygen => "doxygen",
        };
        entries.insert("order".to_string(), ConfigValue::Str(order.to_string()));
        entries.insert(
            "outdir".to_string(),
            ConfigValue::Str(self.outdir.display().to_string()),
        );
        if let Some(ext) = &self.fileext {
            entries.insert("fileext".to_string(), ConfigValue::Str(ext.clone()));
        }
        if let Some(policy) = self.anonymous {
            let policy = match policy {
                AnonymousPolicy::Label => "label",
                AnonymousPolicy::Suppress => "suppress",
            };
            entries.insert("anonymous".to_string(), ConfigValue::Str(policy.to_string()));
        }
        entries
    }
}
