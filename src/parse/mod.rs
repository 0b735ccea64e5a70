//! Turning raw lines into timestamps and levels.

pub mod level;
pub mod parsing_source;
pub mod timestamp;

pub use level::{detect_level, Level};
pub use parsing_source::ParsingLogSource;
pub use timestamp::{TimestampFormat, TimestampParser};

use chrono::NaiveDateTime;

/// What a parser extracted from one line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParsedLine {
    pub timestamp: Option<NaiveDateTime>,
    pub level: Level,
}

/// Extracts structure from a raw line.
///
/// May be third-party code: callers run it inside `catch_unwind` and treat
/// a panic as "nothing recognised".
pub trait LogEntryParser: Send + Sync {
    fn parse(&self, raw: &str) -> ParsedLine;
}

/// Parser used when no format-specific one applies
#[derive(Debug, Default)]
pub struct GenericTextParser {
    timestamps: TimestampParser,
}

impl GenericTextParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamp_parser(timestamps: TimestampParser) -> Self {
        Self { timestamps }
    }
}

impl LogEntryParser for GenericTextParser {
    fn parse(&self, raw: &str) -> ParsedLine {
        if raw.is_empty() {
            return ParsedLine::default();
        }
        ParsedLine {
            timestamp: self.timestamps.parse(raw),
            level: detect_level(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_parser_extracts_both() {
        let parser = GenericTextParser::new();
        let parsed = parser.parse("2024-01-15 10:30:00 WARN disk almost full");
        assert!(parsed.timestamp.is_some());
        assert_eq!(parsed.level, Level::Warning);
    }

    #[test]
    fn test_continuation_line_has_neither() {
        let parser = GenericTextParser::new();
        assert_eq!(parser.parse("    at Foo.bar()"), ParsedLine::default());
        assert_eq!(parser.parse(""), ParsedLine::default());
    }
}
