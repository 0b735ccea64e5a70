//! Config loading for tailsource.
//!
//! Loads and validates YAML config files with path expansion.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::config::discovery::DiscoveryResult;
use crate::config::error::{suggest, ConfigError};
use crate::config::types::{FormatDef, PipelineConfig, RawConfig, RawFormat, RawSource, Source};
use crate::detect::Encoding;
use crate::merge::UntimestampedPolicy;

/// Expand tilde in path to home directory.
///
/// Handles the following cases:
/// - `~/foo` -> `/home/user/foo`
/// - `/absolute/path` -> unchanged
/// - `relative/path` -> unchanged
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }

    path.to_path_buf()
}

/// Load and parse a YAML config file.
fn load_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    // An empty document or one holding only comments means "all defaults"
    if content.lines().all(|l| l.trim().is_empty() || l.trim_start().starts_with('#')) {
        return Ok(RawConfig::default());
    }

    serde_saphyr::from_str(&content).map_err(|e| ConfigError::from_saphyr_error(path.to_path_buf(), e))
}

/// Expands tilde paths and checks file existence.
fn validate_sources(raw: Vec<RawSource>) -> Vec<Source> {
    raw.into_iter()
        .map(|raw_source| {
            let expanded_path = expand_path(&raw_source.path);
            let exists = expanded_path.try_exists().unwrap_or(false);
            Source {
                name: raw_source.name,
                path: expanded_path,
                exists,
            }
        })
        .collect()
}

fn parse_encoding(path: &Path, field: &str, name: &str) -> Result<Encoding, ConfigError> {
    name.parse().map_err(|_| ConfigError::Validation {
        path: path.to_path_buf(),
        message: format!("unknown encoding `{}` in `{}`", name, field),
        suggestion: suggest(name, Encoding::NAMES),
    })
}

fn validate_formats(path: &Path, raw: Vec<RawFormat>) -> Result<Vec<FormatDef>, ConfigError> {
    raw.into_iter()
        .map(|format| {
            if let Err(e) = regex::Regex::new(&format.header) {
                return Err(ConfigError::Validation {
                    path: path.to_path_buf(),
                    message: format!("invalid header pattern for format `{}`: {}", format.name, e),
                    suggestion: None,
                });
            }
            let encoding = match &format.encoding {
                Some(name) => Some(parse_encoding(path, "formats.encoding", name)?),
                None => None,
            };
            Ok(FormatDef {
                name: format.name,
                header: format.header,
                encoding,
            })
        })
        .collect()
}

/// Apply a parsed file on top of the defaults.
pub fn validate(path: &Path, raw: RawConfig) -> Result<PipelineConfig, ConfigError> {
    let defaults = PipelineConfig::default();

    let default_encoding = match &raw.default_encoding {
        Some(name) => parse_encoding(path, "default_encoding", name)?,
        None => defaults.default_encoding,
    };

    let untimestamped = match &raw.untimestamped {
        Some(name) => name
            .parse::<UntimestampedPolicy>()
            .map_err(|_| ConfigError::Validation {
                path: path.to_path_buf(),
                message: format!("unknown untimestamped policy `{}`", name),
                suggestion: suggest(name, UntimestampedPolicy::NAMES),
            })?,
        None => defaults.untimestamped,
    };

    let workers = raw.workers.unwrap_or(defaults.workers);
    if workers == 0 {
        return Err(ConfigError::Validation {
            path: path.to_path_buf(),
            message: "`workers` must be at least 1".to_string(),
            suggestion: None,
        });
    }

    Ok(PipelineConfig {
        scan_interval: raw
            .scan_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.scan_interval),
        read_interval: raw
            .read_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.read_interval),
        probe_size: raw.probe_size.unwrap_or(defaults.probe_size),
        default_encoding,
        line_cache_capacity: raw.line_cache_capacity.unwrap_or(defaults.line_cache_capacity),
        multiline: raw.multiline.unwrap_or(defaults.multiline),
        level_starts_entry: raw.level_starts_entry.unwrap_or(defaults.level_starts_entry),
        untimestamped,
        watch: raw.watch.unwrap_or(defaults.watch),
        workers,
        sources: validate_sources(raw.sources),
        formats: validate_formats(path, raw.formats)?,
    })
}

/// Load and validate one config file.
pub fn load_single_file(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let raw = load_file(path)?;
    validate(path, raw)
}

/// Load the winning config file of a discovery: the project file if there is
/// one, else the global file.
///
/// Returns the defaults if no config files exist.
pub fn load(discovery: &DiscoveryResult) -> Result<PipelineConfig, ConfigError> {
    match discovery.winning_config() {
        Some(path) => load_single_file(path),
        None => Ok(PipelineConfig::default()),
    }
}

/// Load `explicit` if given, else whatever discovery finds.
pub fn load_for_cli(explicit: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match explicit {
        Some(path) => load_single_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let discovery = crate::config::discover();
            if let Some(path) = discovery.winning_config() {
                tracing::debug!(config = %path.display(), "using discovered config");
            }
            load(&discovery).context("failed to load discovered config")
        }
    }
}
