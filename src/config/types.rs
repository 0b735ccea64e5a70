//! Config types for tailsource.
//!
//! `RawConfig` mirrors the YAML file; `PipelineConfig` is the validated form
//! the binary builds sources from.

use crate::detect::{Encoding, HeaderPatternMatcher, LogFileFormat, MatcherChain};
use crate::merge::UntimestampedPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Raw config file structure (used for parsing).
///
/// Unknown fields are rejected with an error.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub scan_interval_ms: Option<u64>,
    pub read_interval_ms: Option<u64>,
    /// Header bytes handed to format matchers
    pub probe_size: Option<usize>,
    pub default_encoding: Option<String>,
    pub line_cache_capacity: Option<usize>,
    /// Group continuation lines into one entry
    pub multiline: Option<bool>,
    pub level_starts_entry: Option<bool>,
    /// `exclude` or `append-at-tail`
    pub untimestamped: Option<String>,
    pub watch: Option<bool>,
    pub workers: Option<usize>,
    #[serde(default)]
    pub sources: Vec<RawSource>,
    /// Named formats recognised by a regex over the file header
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

/// Field names of [`RawConfig`], for typo suggestions
pub const RAW_CONFIG_FIELDS: &[&str] = &[
    "scan_interval_ms",
    "read_interval_ms",
    "probe_size",
    "default_encoding",
    "line_cache_capacity",
    "multiline",
    "level_starts_entry",
    "untimestamped",
    "watch",
    "workers",
    "sources",
    "formats",
];

/// Raw source from config file. The path is not expanded yet.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSource {
    /// Display name for this source.
    pub name: String,
    /// Path to the log file (may contain tilde).
    pub path: PathBuf,
}

/// A format recognised by its header
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFormat {
    pub name: String,
    /// Regex matched against the first `probe_size` bytes
    pub header: String,
    /// Encoding files of this format are always written in
    pub encoding: Option<String>,
}

/// Validated source with expanded path and existence check.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub name: String,
    pub path: PathBuf,
    /// Whether the file exists at load time.
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormatDef {
    pub name: String,
    pub header: String,
    pub encoding: Option<Encoding>,
}

/// Validated configuration with every default applied
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub scan_interval: Duration,
    pub read_interval: Duration,
    pub probe_size: usize,
    pub default_encoding: Encoding,
    pub line_cache_capacity: usize,
    pub multiline: bool,
    pub level_starts_entry: bool,
    pub untimestamped: UntimestampedPolicy,
    pub watch: bool,
    pub workers: usize,
    pub sources: Vec<Source>,
    pub formats: Vec<FormatDef>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(100),
            read_interval: Duration::from_millis(10),
            probe_size: crate::detect::DEFAULT_PROBE_SIZE,
            default_encoding: Encoding::Utf8,
            line_cache_capacity: crate::reader::line_cache::DEFAULT_CAPACITY,
            multiline: true,
            level_starts_entry: false,
            untimestamped: UntimestampedPolicy::Exclude,
            watch: true,
            workers: 2,
            sources: Vec::new(),
            formats: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Matchers for the configured formats, tried in file order.
    pub fn format_matcher(&self) -> Result<MatcherChain, regex::Error> {
        let mut chain = MatcherChain::new();
        for def in &self.formats {
            let format = LogFileFormat::new(def.name.clone(), def.encoding);
            chain.push(Arc::new(HeaderPatternMatcher::new(format, &def.header)?));
        }
        Ok(chain)
    }
}
