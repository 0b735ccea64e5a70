use super::Encoding;
use regex::bytes::Regex;
use std::path::Path;
use std::sync::Arc;

/// A recognised file format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileFormat {
    pub name: String,
    /// Encoding the format mandates, if any
    pub encoding: Option<Encoding>,
}

impl LogFileFormat {
    pub const PLAIN_TEXT: &'static str = "text";

    pub fn new(name: impl Into<String>, encoding: Option<Encoding>) -> Self {
        Self {
            name: name.into(),
            encoding,
        }
    }

    /// Built-in fallback: newline-delimited text
    pub fn plain_text() -> Self {
        Self::new(Self::PLAIN_TEXT, None)
    }

    pub fn is_plain_text(&self) -> bool {
        self.name == Self::PLAIN_TEXT
    }
}

/// Identifies a format from a file's first bytes.
///
/// Implementations may be third-party code: the detector calls them inside
/// `catch_unwind` and treats a panic as "not recognised".
pub trait FormatMatcher: Send + Sync {
    fn try_match(&self, path: &Path, header: &[u8], encoding: Option<Encoding>) -> Option<LogFileFormat>;
}

/// Recognises nothing; every file is plain text.
pub struct PlainTextMatcher;

impl FormatMatcher for PlainTextMatcher {
    fn try_match(&self, _path: &Path, _header: &[u8], _encoding: Option<Encoding>) -> Option<LogFileFormat> {
        None
    }
}

/// Recognises a format whose header matches a pattern
pub struct HeaderPatternMatcher {
    format: LogFileFormat,
    pattern: Regex,
}

impl HeaderPatternMatcher {
    pub fn new(format: LogFileFormat, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            format,
            pattern: Regex::new(pattern)?,
        })
    }
}

impl FormatMatcher for HeaderPatternMatcher {
    fn try_match(&self, _path: &Path, header: &[u8], _encoding: Option<Encoding>) -> Option<LogFileFormat> {
        self.pattern.is_match(header).then(|| self.format.clone())
    }
}

/// Tries matchers in order; the first answer wins.
#[derive(Default)]
pub struct MatcherChain {
    matchers: Vec<Arc<dyn FormatMatcher>>,
}

impl MatcherChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, matcher: Arc<dyn FormatMatcher>) {
        self.matchers.push(matcher);
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl FormatMatcher for MatcherChain {
    fn try_match(&self, path: &Path, header: &[u8], encoding: Option<Encoding>) -> Option<LogFileFormat> {
        self.matchers
            .iter()
            .find_map(|m| m.try_match(path, header, encoding))
    }
}
