//! Config error types for tailsource.
//!
//! Provides rich error messages with file locations and typo suggestions.

use crate::config::types::RAW_CONFIG_FIELDS;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use thiserror::Error;

/// Error loading or parsing a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading the config file.
    #[error("{}", self.format_cargo_style())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error.
    #[error("{}", self.format_cargo_style())]
    Parse {
        path: PathBuf,
        message: String,
        line: Option<usize>,
        column: Option<usize>,
        suggestion: Option<String>,
    },

    /// Validation error (semantic errors after parsing).
    #[error("{}", self.format_cargo_style())]
    Validation {
        path: PathBuf,
        message: String,
        suggestion: Option<String>,
    },
}

impl ConfigError {
    /// Format error in Cargo-style format.
    pub fn format_cargo_style(&self) -> String {
        match self {
            ConfigError::Io { path, source } => {
                format!(
                    "error: cannot read config file\n  --> {}\n  |\n  = {}\n",
                    path.display(),
                    source
                )
            }
            ConfigError::Parse {
                path,
                message,
                line,
                column,
                suggestion,
            } => {
                let location = match (line, column) {
                    (Some(l), Some(c)) => format!("{}:{}:{}", path.display(), l, c),
                    (Some(l), None) => format!("{}:{}", path.display(), l),
                    _ => format!("{}", path.display()),
                };
                let mut output = format!("error: {}\n  --> {}\n  |\n", message, location);
                push_suggestion(&mut output, suggestion);
                output
            }
            ConfigError::Validation {
                path,
                message,
                suggestion,
            } => {
                let mut output = format!("error: {}\n  --> {}\n  |\n", message, path.display());
                push_suggestion(&mut output, suggestion);
                output
            }
        }
    }

    /// Build a parse error from a serde-saphyr failure, pulling the location
    /// and any unknown field name out of its message.
    pub fn from_saphyr_error(path: PathBuf, error: impl fmt::Display) -> Self {
        let message = error.to_string();
        let (line, column) = location_of(&message);
        let suggestion = unknown_field_of(&message)
            .and_then(|field| suggest(&field, RAW_CONFIG_FIELDS.iter().copied()));
        let message = message.lines().next().unwrap_or_default().to_string();
        ConfigError::Parse {
            path,
            message,
            line,
            column,
            suggestion,
        }
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            ConfigError::Io { .. } => None,
            ConfigError::Parse { suggestion, .. } | ConfigError::Validation { suggestion, .. } => {
                suggestion.as_deref()
            }
        }
    }
}

fn location_of(message: &str) -> (Option<usize>, Option<usize>) {
    static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"line\s+(\d+)\D{0,16}?column\s+(\d+)").expect("location pattern is valid")
    });
    match LOCATION.captures(message) {
        Some(caps) => (
            caps.get(1).and_then(|m| m.as_str().parse().ok()),
            caps.get(2).and_then(|m| m.as_str().parse().ok()),
        ),
        None => (None, None),
    }
}

fn unknown_field_of(message: &str) -> Option<String> {
    let rest = &message[message.find("unknown field `")? + "unknown field `".len()..];
    Some(rest[..rest.find('`')?].to_string())
}

/// Minimum Jaro-Winkler similarity for a "did you mean" hint
const SIMILARITY_THRESHOLD: f64 = 0.8;

/// The closest of `candidates` to `input`, if any is close enough.
pub fn suggest<'a>(input: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let input = input.to_ascii_lowercase();
    candidates
        .into_iter()
        .map(|candidate| (candidate, strsim::jaro_winkler(&input, candidate)))
        .filter(|(_, score)| *score >= SIMILARITY_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(candidate, _)| candidate.to_string())
}

fn push_suggestion(output: &mut String, suggestion: &Option<String>) {
    if let Some(suggestion) = suggestion {
        output.push_str(&format!("  = help: did you mean `{}`?\n", suggestion));
    }
}
